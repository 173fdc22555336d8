//! Checkpointing: state serialization, backend interface and policies.
//!
//! The core owns the byte-level format ({stack, memory dump, ip} as
//! JSON) and the [`CheckpointBackend`] trait; durable storage lives
//! outside. Policies decide when the interpreter checkpoints on its own;
//! the CHECKPOINT opcode forces one regardless.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// The persisted machine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Operand stack, bottom first.
    pub stack: Vec<i64>,
    /// Writable memory cells.
    pub mem: BTreeMap<i64, i64>,
    /// Instruction pointer to resume at.
    pub ip: i64,
}

/// Serialize a machine state to checkpoint bytes.
pub fn serialize_state(
    stack: &[i64],
    mem: BTreeMap<i64, i64>,
    ip: i64,
) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&CheckpointState {
        stack: stack.to_vec(),
        mem,
        ip,
    })
}

/// Recover a machine state from checkpoint bytes.
pub fn deserialize_state(data: &[u8]) -> serde_json::Result<CheckpointState> {
    serde_json::from_slice(data)
}

/// Storage for opaque checkpoint payloads.
pub trait CheckpointBackend {
    /// Persist `data` under `name`, returning the identifier to load it
    /// back with.
    fn save(&mut self, name: &str, data: &[u8]) -> io::Result<String>;

    /// Fetch a payload by identifier.
    fn load(&self, id: &str) -> io::Result<Vec<u8>>;
}

/// In-memory backend, for tests and ephemeral hosts.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    /// An empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CheckpointBackend for MemoryBackend {
    fn save(&mut self, name: &str, data: &[u8]) -> io::Result<String> {
        self.entries.insert(name.to_string(), data.to_vec());
        Ok(name.to_string())
    }

    fn load(&self, id: &str) -> io::Result<Vec<u8>> {
        self.entries
            .get(id)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no checkpoint {id}")))
    }
}

/// What a policy sees when probed after an instruction.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext {
    /// Instructions executed so far in this run.
    pub executed_instructions: u64,
    /// Populated memory cells.
    pub memory_cells: usize,
}

/// Decides when the interpreter should checkpoint automatically.
pub trait CheckpointPolicy {
    /// Probed after every instruction.
    fn should_checkpoint(&mut self, cx: &PolicyContext) -> bool;
}

/// Checkpoint every `count` executed instructions.
#[derive(Debug, Clone)]
pub struct InstructionCountPolicy {
    count: u64,
    seen: u64,
}

impl InstructionCountPolicy {
    /// A policy firing every `count` instructions.
    pub fn new(count: u64) -> Self {
        Self { count, seen: 0 }
    }
}

impl CheckpointPolicy for InstructionCountPolicy {
    fn should_checkpoint(&mut self, _cx: &PolicyContext) -> bool {
        self.seen += 1;
        if self.seen >= self.count {
            self.seen = 0;
            true
        } else {
            false
        }
    }
}

/// Checkpoint when memory usage reaches a cell-count threshold.
#[derive(Debug, Clone)]
pub struct MemoryPolicy {
    threshold: usize,
}

impl MemoryPolicy {
    /// A policy firing at `threshold` populated cells.
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }
}

impl CheckpointPolicy for MemoryPolicy {
    fn should_checkpoint(&mut self, cx: &PolicyContext) -> bool {
        cx.memory_cells >= self.threshold
    }
}

/// Checkpoint at most once per wall-clock interval.
#[derive(Debug, Clone)]
pub struct IntervalPolicy {
    interval: Duration,
    last: Instant,
}

impl IntervalPolicy {
    /// A policy firing every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }
}

impl CheckpointPolicy for IntervalPolicy {
    fn should_checkpoint(&mut self, _cx: &PolicyContext) -> bool {
        if self.last.elapsed() >= self.interval {
            self.last = Instant::now();
            true
        } else {
            false
        }
    }
}
