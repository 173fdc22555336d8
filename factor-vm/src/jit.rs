//! Hot-path JIT.
//!
//! When an instruction pointer's hit counter crosses the threshold, the
//! interpreter asks the compiler for a block. The straight-line opcode
//! set compiles to a direct op sequence with operands resolved at
//! compile time; everything else gets a fallback that drives the regular
//! handler chain, so compilation always succeeds and compiled execution
//! is observably identical to interpretation.
//!
//! Blocks are cached by the structural payload form of the compiled
//! sequence and expire after a TTL; expired entries are pruned
//! opportunistically on each lookup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use factor_asm::{DecodedInstruction, Opcode, DATA_OFFSET};
use factor_primes::{prime_index, Prime};
use tracing::debug;

use crate::error::Fault;
use crate::interpreter::Vm;

/// Default lifetime of a compiled block.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

type BlockKey = Vec<Vec<(Prime, u32)>>;

struct Slot {
    block: Arc<JitBlock>,
    expires_at: Instant,
}

/// Compiler and structural block cache. One per VM instance.
pub struct JitCompiler {
    ttl: Duration,
    cache: HashMap<BlockKey, Slot>,
    blocks_compiled: u64,
    cache_hits: u64,
    cache_misses: u64,
}

/// Compiler cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitStats {
    /// Blocks built (cache misses that compiled).
    pub blocks_compiled: u64,
    /// Lookups served from the structural cache.
    pub cache_hits: u64,
    /// Lookups that had to compile.
    pub cache_misses: u64,
    /// Blocks currently resident.
    pub resident: usize,
}

impl Default for JitCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl JitCompiler {
    /// A compiler with the default TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// A compiler whose blocks expire after `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: HashMap::new(),
            blocks_compiled: 0,
            cache_hits: 0,
            cache_misses: 0,
        }
    }

    /// Block lifetime handed to per-IP registrations.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Change the block lifetime for subsequent compilations.
    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }

    /// Compile an instruction sequence, reusing a structurally identical
    /// cached block when one is still live.
    pub fn compile(&mut self, instructions: &[DecodedInstruction]) -> Arc<JitBlock> {
        let key: BlockKey = instructions
            .iter()
            .map(|instr| instr.payload().to_vec())
            .collect();
        self.prune();
        if let Some(slot) = self.cache.get(&key) {
            self.cache_hits += 1;
            return Arc::clone(&slot.block);
        }
        self.cache_misses += 1;
        let block = Arc::new(JitBlock::build(instructions));
        debug!(
            ops = block.len(),
            direct = block.is_direct(),
            "compiled jit block"
        );
        self.cache.insert(
            key,
            Slot {
                block: Arc::clone(&block),
                expires_at: Instant::now() + self.ttl,
            },
        );
        self.blocks_compiled += 1;
        block
    }

    fn prune(&mut self) {
        let now = Instant::now();
        let before = self.cache.len();
        self.cache.retain(|_, slot| slot.expires_at > now);
        let evicted = before - self.cache.len();
        if evicted > 0 {
            debug!(evicted, "pruned expired jit blocks");
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> JitStats {
        JitStats {
            blocks_compiled: self.blocks_compiled,
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            resident: self.cache.len(),
        }
    }
}

enum JitOp {
    Push(i64),
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Fallback(DecodedInstruction),
}

/// A compiled block: executes its instructions and advances the IP past
/// them, exactly as the interpreter would.
pub struct JitBlock {
    ops: Vec<JitOp>,
}

impl JitBlock {
    fn build(instructions: &[DecodedInstruction]) -> Self {
        let ops = instructions
            .iter()
            .map(|instr| Self::lower(instr).unwrap_or_else(|| JitOp::Fallback(instr.clone())))
            .collect();
        Self { ops }
    }

    fn lower(instr: &DecodedInstruction) -> Option<JitOp> {
        let opcode = Opcode::from_prime(instr.opcode_prime()?)?;
        Some(match opcode {
            Opcode::Push => {
                let idx = prime_index(instr.operand_prime()?)?;
                JitOp::Push(idx as i64 - DATA_OFFSET as i64)
            }
            Opcode::Add => JitOp::Add,
            Opcode::Sub => JitOp::Sub,
            Opcode::Mul => JitOp::Mul,
            Opcode::Div => JitOp::Div,
            Opcode::Mod => JitOp::Mod,
            Opcode::Neg => JitOp::Neg,
            _ => return None,
        })
    }

    /// Instructions covered by this block.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the block is empty (never true for compiled blocks).
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn is_direct(&self) -> bool {
        !self
            .ops
            .iter()
            .any(|op| matches!(op, JitOp::Fallback(_)))
    }

    pub(crate) fn run(&self, vm: &mut Vm, out: &mut Vec<String>) -> Result<(), Fault> {
        for op in &self.ops {
            vm.ip += 1;
            match op {
                JitOp::Push(v) => vm.push_value(*v)?,
                JitOp::Add => {
                    let (a, b) = vm.pop_two()?;
                    vm.push_value(a.wrapping_add(b))?;
                }
                JitOp::Sub => {
                    let (a, b) = vm.pop_two()?;
                    vm.push_value(a.wrapping_sub(b))?;
                }
                JitOp::Mul => {
                    let (a, b) = vm.pop_two()?;
                    vm.push_value(a.wrapping_mul(b))?;
                }
                JitOp::Div => {
                    let (a, b) = vm.pop_two()?;
                    if b == 0 {
                        return Err(Fault::DivisionByZero);
                    }
                    vm.push_value(a.wrapping_div(b))?;
                }
                JitOp::Mod => {
                    let (a, b) = vm.pop_two()?;
                    if b == 0 {
                        return Err(Fault::DivisionByZero);
                    }
                    vm.push_value(a.wrapping_rem(b))?;
                }
                JitOp::Neg => {
                    let v = vm.pop()?;
                    vm.push_value(v.wrapping_neg())?;
                }
                JitOp::Fallback(instr) => {
                    vm.dispatch_instruction(instr, out)?;
                }
            }
        }
        Ok(())
    }
}
