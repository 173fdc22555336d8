//! The [`Vm`] and its lazy [`Execution`] stream.
//!
//! One call to [`Vm::execute`] produces an iterator of output strings;
//! each `next()` runs instructions until something is yielded, the
//! program halts, or a fatal error surfaces. Framed regions (blocks and
//! spectral regions) run on fresh sub-VMs whose output is spliced in
//! place.

use std::collections::{HashMap, VecDeque};
use std::iter::FusedIterator;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use factor_asm::{DecodedInstruction, Opcode, DATA_OFFSET};
use factor_primes::prime_index;
use tracing::{debug, warn};

use crate::checkpoint::{
    deserialize_state, serialize_state, CheckpointBackend, CheckpointPolicy, PolicyContext,
};
use crate::coherence::{CoherenceMetrics, CoherenceValidator};
use crate::debugger::{CallStackTracker, Debugger};
use crate::error::{Fault, VmError};
use crate::jit::{JitBlock, JitCompiler, JitStats};
use crate::memory::{MemoryLayout, SegmentedMemory};
use crate::ntt;
use crate::profiler::Profiler;

mod alu;
mod crypto;
mod flow;
mod io;
mod mem;
mod sys;

const DEFAULT_JIT_THRESHOLD: u64 = 1000;

struct CompiledSlot {
    block: Arc<JitBlock>,
    expires_at: Instant,
}

/// A stack machine executing decoded instructions.
///
/// The VM owns its operand stack, segmented memory, call stack and I/O
/// queues; the program is borrowed. Instances share nothing but the
/// process-wide prime table and decode caches.
pub struct Vm {
    pub(crate) stack: Vec<i64>,
    pub(crate) mem: SegmentedMemory,
    pub(crate) ip: i64,
    pub(crate) call_stack: Vec<i64>,
    pub(crate) tracker: Option<CallStackTracker>,
    pub(crate) atomic: bool,
    pub(crate) debugger: Debugger,
    pub(crate) profiler: Option<Profiler>,
    pub(crate) program_len: usize,
    counters: HashMap<usize, u64>,
    compiled: HashMap<usize, CompiledSlot>,
    jit: JitCompiler,
    jit_threshold: u64,
    coherence: Option<CoherenceValidator>,
    checkpoint_backend: Option<Box<dyn CheckpointBackend>>,
    checkpoint_policy: Option<Box<dyn CheckpointPolicy>>,
    last_checkpoint_id: Option<String>,
    executed_instructions: u64,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// A VM with the default memory layout.
    pub fn new() -> Self {
        Self::with_memory(SegmentedMemory::default())
    }

    /// A VM with custom segment sizes.
    pub fn with_layout(layout: MemoryLayout) -> Self {
        Self::with_memory(SegmentedMemory::new(layout))
    }

    /// A VM over a pre-built memory (e.g. with code already loaded).
    pub fn with_memory(mem: SegmentedMemory) -> Self {
        Self {
            stack: Vec::new(),
            mem,
            ip: 0,
            call_stack: Vec::new(),
            tracker: None,
            atomic: false,
            debugger: Debugger::default(),
            profiler: None,
            program_len: 0,
            counters: HashMap::new(),
            compiled: HashMap::new(),
            jit: JitCompiler::new(),
            jit_threshold: DEFAULT_JIT_THRESHOLD,
            coherence: None,
            checkpoint_backend: None,
            checkpoint_policy: None,
            last_checkpoint_id: None,
            executed_instructions: 0,
        }
    }

    // ------------------------------------------------------------------
    // State accessors
    // ------------------------------------------------------------------

    /// The operand stack, bottom first.
    pub fn stack(&self) -> &[i64] {
        &self.stack
    }

    /// The instruction pointer.
    pub fn ip(&self) -> i64 {
        self.ip
    }

    /// Return addresses currently on the call stack.
    pub fn call_stack(&self) -> &[i64] {
        &self.call_stack
    }

    /// The segmented memory.
    pub fn memory(&self) -> &SegmentedMemory {
        &self.mem
    }

    /// Mutable access to the segmented memory (load code, pre-fill
    /// cells).
    pub fn memory_mut(&mut self) -> &mut SegmentedMemory {
        &mut self.mem
    }

    /// Queue a value for the INPUT opcode / MMIO input cell.
    pub fn push_input(&mut self, value: i64) {
        self.mem.push_input(value);
    }

    /// Values emitted through OUTPUT and MMIO-out, in order.
    pub fn output_log(&self) -> &[i64] {
        self.mem.output_log()
    }

    /// Whether atomic mode is toggled on.
    pub fn atomic_mode(&self) -> bool {
        self.atomic
    }

    /// Instructions executed across all runs of this instance.
    pub fn executed_instructions(&self) -> u64 {
        self.executed_instructions
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Attach a profiler; it is reset when a run starts.
    pub fn set_profiler(&mut self, profiler: Profiler) {
        self.profiler = Some(profiler);
    }

    /// The attached profiler, if any.
    pub fn profiler(&self) -> Option<&Profiler> {
        self.profiler.as_ref()
    }

    /// The debugger state.
    pub fn debugger(&self) -> &Debugger {
        &self.debugger
    }

    /// Mutable debugger state (arm breakpoints, watchpoints, tracing).
    pub fn debugger_mut(&mut self) -> &mut Debugger {
        &mut self.debugger
    }

    /// Attach a coherence validator.
    pub fn set_coherence(&mut self, validator: CoherenceValidator) {
        self.coherence = Some(validator);
    }

    /// Validator counters, if a validator is attached.
    pub fn coherence_metrics(&self) -> Option<CoherenceMetrics> {
        self.coherence.as_ref().map(CoherenceValidator::metrics)
    }

    /// Attach a checkpoint backend.
    pub fn set_checkpoint_backend(&mut self, backend: impl CheckpointBackend + 'static) {
        self.checkpoint_backend = Some(Box::new(backend));
    }

    /// Attach an auto-checkpoint policy.
    pub fn set_checkpoint_policy(&mut self, policy: impl CheckpointPolicy + 'static) {
        self.checkpoint_policy = Some(Box::new(policy));
    }

    /// Identifier of the most recent checkpoint, if any was written.
    pub fn last_checkpoint_id(&self) -> Option<&str> {
        self.last_checkpoint_id.as_deref()
    }

    /// Track call/return frames for backtraces.
    pub fn enable_call_tracking(&mut self) {
        self.tracker = Some(CallStackTracker::default());
    }

    /// The tracked call frames, if tracking is enabled.
    pub fn call_frames(&self) -> Option<&CallStackTracker> {
        self.tracker.as_ref()
    }

    /// Formatted backtrace, newest frame first. Empty without tracking.
    pub fn backtrace(&self) -> String {
        let Some(tracker) = &self.tracker else {
            return String::new();
        };
        tracker
            .backtrace()
            .iter()
            .enumerate()
            .map(|(i, f)| format!("#{i} call@{} -> {}", f.call_site, f.return_ip))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Per-IP hits before a block is compiled (default 1000).
    pub fn set_jit_threshold(&mut self, threshold: u64) {
        self.jit_threshold = threshold.max(1);
    }

    /// Lifetime of compiled blocks (default 60 s).
    pub fn set_jit_ttl(&mut self, ttl: std::time::Duration) {
        self.jit.set_ttl(ttl);
    }

    /// JIT compiler counters.
    pub fn jit_stats(&self) -> JitStats {
        self.jit.stats()
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Execute `program` from the start, returning the lazy output
    /// stream.
    pub fn execute<'v, 'p>(&'v mut self, program: &'p [DecodedInstruction]) -> Execution<'v, 'p> {
        self.ip = 0;
        // Hit counters and compiled blocks are positional; they do not
        // carry over to a different program.
        self.counters.clear();
        self.compiled.clear();
        self.begin(program)
    }

    /// Continue `program` from the current instruction pointer
    /// (checkpoint restart).
    pub fn resume<'v, 'p>(&'v mut self, program: &'p [DecodedInstruction]) -> Execution<'v, 'p> {
        self.begin(program)
    }

    /// Run to completion and join the output.
    pub fn run(&mut self, program: &[DecodedInstruction]) -> Result<String, VmError> {
        self.execute(program).collect()
    }

    fn begin<'v, 'p>(&'v mut self, program: &'p [DecodedInstruction]) -> Execution<'v, 'p> {
        self.program_len = program.len();
        let checksum = self.state_checksum();
        if let Some(validator) = self.coherence.as_mut() {
            validator.start(checksum);
        }
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.reset();
        }
        Execution {
            root: self,
            program,
            frames: Vec::new(),
            queue: VecDeque::new(),
            finished: false,
        }
    }

    fn state_checksum(&self) -> f64 {
        let stack: f64 = self.stack.iter().map(|&v| v as f64).sum();
        stack + self.mem.cell_sum() + self.ip as f64
    }

    /// Execute at most one instruction; the caller splices framed
    /// regions.
    fn step<'p>(&mut self, program: &'p [DecodedInstruction]) -> Result<Step<'p>, VmError> {
        self.program_len = program.len();
        let len = program.len() as i64;
        if self.ip == len {
            return Ok(Step::Halt);
        }
        if self.ip < 0 || self.ip > len {
            return Err(VmError::SegmentationFault { ip: self.ip });
        }
        let ip = self.ip as usize;

        let mut outputs = Vec::new();

        if self.debugger.should_break(ip) {
            outputs.push(format!("BREAK:{ip}"));
            return Ok(Step::Ran(outputs));
        }
        if self.debugger.tracing() {
            outputs.push(format!("TRACE:{ip}"));
        }

        // Registered block, if still live.
        let cached = self
            .compiled
            .get(&ip)
            .map(|slot| (Arc::clone(&slot.block), slot.expires_at));
        let jit_block = match cached {
            Some((block, expires_at)) if expires_at > Instant::now() => Some(block),
            Some(_) => {
                self.compiled.remove(&ip);
                debug!(ip, "expired jit block discarded");
                None
            }
            None => None,
        };
        if let Some(block) = jit_block {
            let started = Instant::now();
            block.run(self, &mut outputs).map_err(|f| f.at(ip))?;
            let duration = started.elapsed();
            self.after_instruction(ip, None, duration, true)?;
            return Ok(Step::Ran(outputs));
        }

        let instr = &program[ip];
        let hits = {
            let counter = self.counters.entry(ip).or_insert(0);
            *counter += 1;
            *counter
        };
        let framing = instr.is_block() || instr.is_ntt();
        if hits >= self.jit_threshold && !framing && !self.compiled.contains_key(&ip) {
            let block = self.jit.compile(std::slice::from_ref(instr));
            let expires_at = Instant::now() + self.jit.ttl();
            self.compiled.insert(ip, CompiledSlot { block, expires_at });
        }

        self.ip += 1;

        if instr.is_block() {
            return Ok(Step::Enter {
                children: instr.children(),
                at: ip,
                outputs,
            });
        }
        if instr.is_ntt() {
            self.spectral_check(instr).map_err(|()| VmError::SpectralMismatch { ip })?;
            return Ok(Step::Enter {
                children: instr.children(),
                at: ip,
                outputs,
            });
        }

        let started = Instant::now();
        let opcode = self
            .dispatch_instruction(instr, &mut outputs)
            .map_err(|f| f.at(ip))?;
        let duration = started.elapsed();
        self.after_instruction(ip, opcode, duration, false)?;
        Ok(Step::Ran(outputs))
    }

    /// Dispatch one instruction to its handler. The IP has already been
    /// advanced past it.
    pub(crate) fn dispatch_instruction(
        &mut self,
        instr: &DecodedInstruction,
        out: &mut Vec<String>,
    ) -> Result<Option<Opcode>, Fault> {
        let Some(op_prime) = instr.opcode_prime() else {
            // Raw data: yield the character at the prime's index.
            let code = instr.char_code().ok_or(Fault::BadData)?;
            let code = u32::try_from(code).map_err(|_| Fault::BadData)?;
            let ch = char::from_u32(code).ok_or(Fault::BadData)?;
            out.push(ch.to_string());
            return Ok(None);
        };
        let opcode = Opcode::from_prime(op_prime).ok_or(Fault::InvalidOpcode)?;

        use Opcode::*;
        match opcode {
            Push => self.op_push(instr)?,
            Add => self.op_add()?,
            Sub => self.op_sub()?,
            Mul => self.op_mul()?,
            Div => self.op_div()?,
            Mod => self.op_mod()?,
            Neg => self.op_neg()?,
            And => self.op_and()?,
            Or => self.op_or()?,
            Xor => self.op_xor()?,
            Shl => self.op_shl()?,
            Shr => self.op_shr()?,
            Not => self.op_not()?,
            Gt => self.op_gt()?,
            Lt => self.op_lt()?,
            Eq => self.op_eq()?,
            Neq => self.op_neq()?,
            Gte => self.op_gte()?,
            Lte => self.op_lte()?,
            Fmul => self.op_fmul()?,
            Fdiv => self.op_fdiv()?,
            F2i => self.op_f2i()?,
            I2f => self.op_i2f()?,
            Dup => self.op_dup()?,
            Swap => self.op_swap()?,
            Rot => self.op_rot()?,
            Drop => self.op_drop()?,
            Over => self.op_over()?,
            Pick => self.op_pick()?,
            Load => self.op_load(instr, out)?,
            Store => self.op_store(instr, out)?,
            Alloc => self.op_alloc(instr)?,
            Free => self.op_free(instr)?,
            Jmp => self.op_jmp(instr)?,
            Jz => self.op_jz(instr)?,
            Jnz => self.op_jnz(instr)?,
            Call => self.op_call(instr)?,
            Ret => self.op_ret()?,
            Print => self.op_print(out)?,
            Input => self.op_input()?,
            Output => self.op_output(out)?,
            NetSend => self.op_net_send()?,
            NetRecv => self.op_net_recv()?,
            ThreadStart | ThreadJoin => {}
            Checkpoint => self.checkpoint_now(),
            Syscall => self.op_syscall()?,
            Int => self.op_int()?,
            Halt => self.op_halt(),
            Nop => {}
            Hash => self.op_hash()?,
            Sign => self.op_sign()?,
            Verify => self.op_verify()?,
            Rng => self.op_rng()?,
            Brk => out.push("BRK".to_string()),
            Trace => self.op_trace(out),
            Debug => out.push("DEBUG".to_string()),
            Atomic => self.atomic = !self.atomic,
            // Universal-number opcodes belong to the algebra
            // collaborator; without it there is no handler.
            UnCreate | UnGrade | UnInner | UnNorm | UnTrans | UnDwt => {
                return Err(Fault::InvalidOpcode)
            }
        }
        Ok(Some(opcode))
    }

    fn spectral_check(&self, instr: &DecodedInstruction) -> Result<(), ()> {
        let vector: Vec<u64> = instr
            .children()
            .iter()
            .map(|child| u64::from(child.leading_exponent()))
            .collect();
        if vector.is_empty() {
            return Ok(());
        }
        let modulus = factor_asm::spectral_modulus();
        if ntt::round_trip(&vector, modulus) == vector {
            Ok(())
        } else {
            Err(())
        }
    }

    fn after_instruction(
        &mut self,
        ip: usize,
        opcode: Option<Opcode>,
        duration: Duration,
        jit_hit: bool,
    ) -> Result<(), VmError> {
        self.executed_instructions += 1;
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.record_instruction(ip, opcode, duration, jit_hit);
        }
        self.maybe_checkpoint();
        self.check_coherence()
    }

    /// Observer bookkeeping for a completed framed region.
    fn finish_framed(&mut self, ip: usize) -> Result<(), VmError> {
        self.after_instruction(ip, None, Duration::ZERO, false)
    }

    fn check_coherence(&mut self) -> Result<(), VmError> {
        if self.coherence.is_none() {
            return Ok(());
        }
        let checksum = self.state_checksum();
        match self.coherence.as_mut() {
            Some(validator) => validator.check(checksum),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Checkpointing
    // ------------------------------------------------------------------

    fn maybe_checkpoint(&mut self) {
        let due = match self.checkpoint_policy.as_mut() {
            Some(policy) => policy.should_checkpoint(&PolicyContext {
                executed_instructions: self.executed_instructions,
                memory_cells: self.mem.cell_count(),
            }),
            None => false,
        };
        if due {
            self.checkpoint_now();
        }
    }

    /// Persist the current state through the checkpoint backend, if one
    /// is attached. Backend failures are logged, not fatal.
    pub fn checkpoint_now(&mut self) {
        if self.checkpoint_backend.is_none() {
            return;
        }
        let payload = match serialize_state(&self.stack, self.mem.dump(), self.ip) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "checkpoint serialization failed");
                return;
            }
        };
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let name = format!("cp_{millis}");
        if let Some(backend) = self.checkpoint_backend.as_mut() {
            match backend.save(&name, &payload) {
                Ok(id) => {
                    debug!(id = %id, "checkpoint saved");
                    self.last_checkpoint_id = Some(id);
                }
                Err(e) => warn!(error = %e, "checkpoint save failed"),
            }
        }
    }

    /// Restore {stack, memory, ip} from checkpoint bytes; follow with
    /// [`Vm::resume`] to continue execution.
    pub fn restore(&mut self, data: &[u8]) -> serde_json::Result<()> {
        let state = deserialize_state(data)?;
        self.stack = state.stack;
        self.mem.load_dump(&state.mem);
        self.ip = state.ip;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stack primitives shared by handlers and the JIT
    // ------------------------------------------------------------------

    pub(crate) fn pop(&mut self) -> Result<i64, Fault> {
        self.stack.pop().ok_or(Fault::StackUnderflow)
    }

    pub(crate) fn pop_two(&mut self) -> Result<(i64, i64), Fault> {
        if self.stack.len() < 2 {
            return Err(Fault::StackUnderflow);
        }
        let b = self.stack.pop().ok_or(Fault::StackUnderflow)?;
        let a = self.stack.pop().ok_or(Fault::StackUnderflow)?;
        Ok((a, b))
    }

    pub(crate) fn push_value(&mut self, value: i64) -> Result<(), Fault> {
        if self.stack.len() >= self.mem.layout().stack_size as usize {
            return Err(Fault::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }
}

/// Operand prime index of an instruction.
pub(crate) fn operand_index(instr: &DecodedInstruction) -> Result<usize, Fault> {
    let prime = instr.operand_prime().ok_or(Fault::BadData)?;
    prime_index(prime).ok_or(Fault::BadData)
}

/// Operand value: prime index minus the data offset.
pub(crate) fn operand_value(instr: &DecodedInstruction) -> Result<i64, Fault> {
    Ok(operand_index(instr)? as i64 - DATA_OFFSET as i64)
}

/// Signed jump/call offset: operand value, negated under the flag.
pub(crate) fn signed_offset(instr: &DecodedInstruction) -> Result<i64, Fault> {
    let magnitude = operand_value(instr)?;
    Ok(if instr.has_neg_flag() {
        -magnitude
    } else {
        magnitude
    })
}

enum Step<'p> {
    /// The program is complete.
    Halt,
    /// One instruction ran, possibly yielding output.
    Ran(Vec<String>),
    /// A framing instruction opened a sub-program.
    Enter {
        children: &'p [DecodedInstruction],
        at: usize,
        outputs: Vec<String>,
    },
}

struct Frame<'p> {
    vm: Box<Vm>,
    program: &'p [DecodedInstruction],
    outer_ip: usize,
}

/// Lazy output stream of one program run.
///
/// Yields `Ok(string)` per output-producing step in program order, with
/// sub-interpreter output spliced at the framing instruction. A fatal
/// error is yielded once, after which the iterator is fused. Dropping
/// the stream cancels the run; the VM keeps whatever state it reached.
pub struct Execution<'v, 'p> {
    root: &'v mut Vm,
    program: &'p [DecodedInstruction],
    frames: Vec<Frame<'p>>,
    queue: VecDeque<String>,
    finished: bool,
}

impl Iterator for Execution<'_, '_> {
    type Item = Result<String, VmError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(ready) = self.queue.pop_front() {
                return Some(Ok(ready));
            }
            if self.finished {
                return None;
            }

            let step = match self.frames.last_mut() {
                Some(frame) => frame.vm.step(frame.program),
                None => self.root.step(self.program),
            };
            match step {
                Ok(Step::Ran(outputs)) => self.queue.extend(outputs),
                Ok(Step::Enter {
                    children,
                    at,
                    outputs,
                }) => {
                    self.queue.extend(outputs);
                    // Children inherit no state: a fresh VM per region.
                    self.frames.push(Frame {
                        vm: Box::new(Vm::new()),
                        program: children,
                        outer_ip: at,
                    });
                }
                Ok(Step::Halt) => match self.frames.pop() {
                    Some(done) => {
                        let result = match self.frames.last_mut() {
                            Some(outer) => outer.vm.finish_framed(done.outer_ip),
                            None => self.root.finish_framed(done.outer_ip),
                        };
                        if let Err(e) = result {
                            self.finished = true;
                            return Some(Err(e));
                        }
                    }
                    None => {
                        self.finished = true;
                        return None;
                    }
                },
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl FusedIterator for Execution<'_, '_> {}
