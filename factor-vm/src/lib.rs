//! Stack interpreter for prime-factorization-encoded programs.
//!
//! A [`Vm`](interpreter::Vm) executes a borrowed slice of decoded
//! instructions and exposes its output as a lazy iterator of strings:
//! one entry per output-producing step, sub-program output spliced in
//! place at the framing instruction. Runtime failures carry the
//! instruction pointer at which they occurred and terminate the stream.
//!
//! The interpreter owns its operand stack, segmented memory, call stack
//! and I/O queues; it shares nothing with other instances except the
//! process-wide prime table and decode caches, which carry no program
//! semantics.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod checkpoint;
pub mod coherence;
pub mod debugger;
pub mod error;
pub mod interpreter;
pub mod jit;
pub mod memory;
pub mod ntt;
pub mod profiler;

pub mod prelude {
    //! Commonly used types, re-exported in one place.
    #[doc(no_inline)]
    pub use factor_asm::{
        decode, op, Chunk, DecodeError, DecodedInstruction, Opcode, DATA_OFFSET,
    };

    pub use crate::checkpoint::{
        deserialize_state, serialize_state, CheckpointBackend, CheckpointPolicy, CheckpointState,
        InstructionCountPolicy, IntervalPolicy, MemoryBackend, MemoryPolicy,
    };
    pub use crate::coherence::{CoherenceMetrics, CoherenceMode, CoherenceValidator};
    pub use crate::debugger::{CallFrame, CallStackTracker, Debugger, WatchMode};
    pub use crate::error::{Fault, MemoryFault, VmError};
    pub use crate::interpreter::{Execution, Vm};
    pub use crate::jit::{JitCompiler, JitStats};
    pub use crate::memory::{MemoryLayout, Segment, SegmentedMemory};
    pub use crate::profiler::{AccessMode, Profiler};
}
