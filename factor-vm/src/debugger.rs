//! Debugging hooks: breakpoints, watchpoints, tracing and call frames.
//!
//! The interpreter consults the debugger before each instruction and
//! around each memory access; trips surface as tagged strings in the
//! output stream (`BREAK:ip`, `WATCH:addr:mode`, `TRACE:ip`) rather than
//! as errors, so a host can drive a session off the same lazy iterator
//! it already consumes.

use std::collections::{HashMap, HashSet};

/// Access modes a watchpoint can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// Trip on loads.
    Read,
    /// Trip on stores.
    Write,
    /// Trip on both.
    ReadWrite,
}

impl WatchMode {
    pub(crate) fn watches_read(self) -> bool {
        matches!(self, WatchMode::Read | WatchMode::ReadWrite)
    }

    pub(crate) fn watches_write(self) -> bool {
        matches!(self, WatchMode::Write | WatchMode::ReadWrite)
    }
}

/// Breakpoint, watchpoint and tracing state for one VM.
#[derive(Debug, Default, Clone)]
pub struct Debugger {
    breakpoints: HashSet<usize>,
    watchpoints: HashMap<i64, WatchMode>,
    tracing: bool,
    single_step: bool,
}

impl Debugger {
    /// Arm a breakpoint at an instruction pointer. Breakpoints are
    /// one-shot: tripping removes them.
    pub fn add_breakpoint(&mut self, ip: usize) {
        self.breakpoints.insert(ip);
    }

    /// Disarm a breakpoint.
    pub fn remove_breakpoint(&mut self, ip: usize) {
        self.breakpoints.remove(&ip);
    }

    /// Disarm every breakpoint.
    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    /// Watch a memory address in the given mode.
    pub fn add_watchpoint(&mut self, addr: i64, mode: WatchMode) {
        self.watchpoints.insert(addr, mode);
    }

    /// Stop watching an address.
    pub fn remove_watchpoint(&mut self, addr: i64) {
        self.watchpoints.remove(&addr);
    }

    /// Toggle per-instruction trace output.
    pub fn set_tracing(&mut self, enabled: bool) {
        self.tracing = enabled;
    }

    /// Whether tracing is on.
    pub fn tracing(&self) -> bool {
        self.tracing
    }

    /// Pause before the next instruction, as if a breakpoint were set
    /// there.
    pub fn step(&mut self) {
        self.single_step = true;
    }

    /// Consulted by the interpreter before executing at `ip`; a `true`
    /// result consumes the breakpoint (or the pending single step).
    pub(crate) fn should_break(&mut self, ip: usize) -> bool {
        if self.single_step {
            self.single_step = false;
            self.breakpoints.remove(&ip);
            return true;
        }
        self.breakpoints.remove(&ip)
    }

    pub(crate) fn watch_hit(&self, addr: i64, write: bool) -> bool {
        self.watchpoints.get(&addr).is_some_and(|mode| {
            if write {
                mode.watches_write()
            } else {
                mode.watches_read()
            }
        })
    }
}

/// One tracked call: where the CALL sat and where RET will resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    /// Instruction pointer of the CALL.
    pub call_site: usize,
    /// Instruction pointer execution resumes at after RET.
    pub return_ip: i64,
}

/// Mirror of the call stack kept for backtraces.
#[derive(Debug, Default, Clone)]
pub struct CallStackTracker {
    frames: Vec<CallFrame>,
}

impl CallStackTracker {
    /// Record a CALL.
    pub fn push(&mut self, call_site: usize, return_ip: i64) {
        self.frames.push(CallFrame {
            call_site,
            return_ip,
        });
    }

    /// Record a RET.
    pub fn pop(&mut self) -> Option<CallFrame> {
        self.frames.pop()
    }

    /// Frames newest-first.
    pub fn backtrace(&self) -> Vec<CallFrame> {
        self.frames.iter().rev().copied().collect()
    }

    /// Forget all frames.
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Current depth.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no calls are in flight.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
