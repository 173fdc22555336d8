//! Execution profiler.
//!
//! Collects per-instruction timing, opcode and IP histograms, memory
//! access counts and I/O / network counters for one run, and exports
//! them as a JSON report or a folded-stack flamegraph.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use factor_asm::Opcode;
use itertools::Itertools;
use serde::Serialize;

/// Direction of a profiled memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// A load.
    Read,
    /// A store.
    Write,
}

/// Per-address load/store counts.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AccessCounters {
    /// Number of loads from this address.
    pub read: u64,
    /// Number of stores to this address.
    pub write: u64,
}

/// Collects detailed execution metrics for a VM run.
#[derive(Debug, Clone)]
pub struct Profiler {
    started: Instant,
    instruction_count: u64,
    total_time: Duration,
    opcode_counts: HashMap<Opcode, u64>,
    ip_counts: HashMap<usize, u64>,
    instruction_times: HashMap<usize, Duration>,
    memory_access: HashMap<i64, AccessCounters>,
    jit_hits: u64,
    io_ops: u64,
    network_latency: Duration,
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the collected metrics, serializable as the exported
/// report.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileReport {
    /// Instructions executed.
    pub instruction_count: u64,
    /// Wall-clock seconds since the run started.
    pub elapsed: f64,
    /// Seconds spent inside handlers.
    pub handler_time: f64,
    /// Executions per opcode (mnemonic-keyed).
    pub opcode_counts: HashMap<String, u64>,
    /// Executions per instruction pointer.
    pub ip_hotspots: HashMap<usize, u64>,
    /// Loads and stores per address.
    pub memory_access: HashMap<i64, AccessCounters>,
    /// Decode-cache hits (process-wide) plus JIT block hits.
    pub cache_hits: u64,
    /// Decode-cache misses (process-wide).
    pub cache_misses: u64,
    /// INPUT/OUTPUT operations.
    pub io_ops: u64,
    /// Accumulated network stub latency, seconds.
    pub network_latency: f64,
}

impl Profiler {
    /// A fresh profiler; the run clock starts now.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            instruction_count: 0,
            total_time: Duration::ZERO,
            opcode_counts: HashMap::new(),
            ip_counts: HashMap::new(),
            instruction_times: HashMap::new(),
            memory_access: HashMap::new(),
            jit_hits: 0,
            io_ops: 0,
            network_latency: Duration::ZERO,
        }
    }

    /// Drop collected data and restart the run clock.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Record one executed instruction. `opcode` is `None` for data
    /// chunks, framing headers and JIT blocks; `jit_hit` marks execution
    /// through a compiled block.
    pub fn record_instruction(
        &mut self,
        ip: usize,
        opcode: Option<Opcode>,
        duration: Duration,
        jit_hit: bool,
    ) {
        self.instruction_count += 1;
        self.total_time += duration;
        if let Some(op) = opcode {
            *self.opcode_counts.entry(op).or_insert(0) += 1;
        }
        *self.ip_counts.entry(ip).or_insert(0) += 1;
        *self.instruction_times.entry(ip).or_insert(Duration::ZERO) += duration;
        if jit_hit {
            self.jit_hits += 1;
        }
    }

    /// Record a load or store at `addr`.
    pub fn record_memory_access(&mut self, addr: i64, mode: AccessMode) {
        let counters = self.memory_access.entry(addr).or_default();
        match mode {
            AccessMode::Read => counters.read += 1,
            AccessMode::Write => counters.write += 1,
        }
    }

    /// Record one INPUT or OUTPUT operation.
    pub fn record_io(&mut self) {
        self.io_ops += 1;
    }

    /// Record latency of a network stub operation.
    pub fn record_network_latency(&mut self, duration: Duration) {
        self.network_latency += duration;
    }

    /// Executions recorded at `ip`.
    pub fn hits_at(&self, ip: usize) -> u64 {
        self.ip_counts.get(&ip).copied().unwrap_or(0)
    }

    /// Total instructions recorded.
    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    /// Snapshot the metrics, merging in the process-wide decode-cache
    /// statistics.
    pub fn metrics(&self) -> ProfileReport {
        let cache = factor_asm::instruction_cache().stats();
        ProfileReport {
            instruction_count: self.instruction_count,
            elapsed: self.started.elapsed().as_secs_f64(),
            handler_time: self.total_time.as_secs_f64(),
            opcode_counts: self
                .opcode_counts
                .iter()
                .map(|(op, &n)| (format!("{op:?}"), n))
                .collect(),
            ip_hotspots: self.ip_counts.clone(),
            memory_access: self.memory_access.clone(),
            cache_hits: cache.hits + self.jit_hits,
            cache_misses: cache.misses,
            io_ops: self.io_ops,
            network_latency: self.network_latency.as_secs_f64(),
        }
    }

    /// The metrics snapshot as a JSON string.
    pub fn export_report(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.metrics())
    }

    /// Per-IP handler time in folded stack format, one `ip_N <seconds>`
    /// line per instruction pointer, ascending.
    pub fn export_flamegraph(&self) -> String {
        self.instruction_times
            .iter()
            .sorted_by_key(|&(&ip, _)| ip)
            .map(|(ip, time)| format!("ip_{ip} {}\n", time.as_secs_f64()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histograms_accumulate() {
        let mut p = Profiler::new();
        p.record_instruction(0, Some(Opcode::Push), Duration::from_micros(5), false);
        p.record_instruction(1, Some(Opcode::Push), Duration::from_micros(5), false);
        p.record_instruction(1, Some(Opcode::Add), Duration::from_micros(2), false);
        assert_eq!(p.instruction_count(), 3);
        assert_eq!(p.hits_at(1), 2);
        assert_eq!(p.metrics().opcode_counts["Push"], 2);
    }

    #[test]
    fn memory_access_counts_split_by_mode() {
        let mut p = Profiler::new();
        p.record_memory_access(3, AccessMode::Read);
        p.record_memory_access(3, AccessMode::Read);
        p.record_memory_access(3, AccessMode::Write);
        let report = p.metrics();
        assert_eq!(report.memory_access[&3].read, 2);
        assert_eq!(report.memory_access[&3].write, 1);
    }

    #[test]
    fn report_serializes() {
        let mut p = Profiler::new();
        p.record_instruction(0, Some(Opcode::Print), Duration::from_micros(1), false);
        p.record_io();
        let json = p.export_report().unwrap();
        assert!(json.contains("\"instruction_count\":1"));
        assert!(json.contains("\"io_ops\":1"));
    }

    #[test]
    fn flamegraph_is_folded_and_ordered() {
        let mut p = Profiler::new();
        p.record_instruction(2, None, Duration::from_secs(1), false);
        p.record_instruction(0, None, Duration::from_secs(2), false);
        let folded = p.export_flamegraph();
        let lines: Vec<&str> = folded.lines().collect();
        assert_eq!(lines[0], "ip_0 2");
        assert_eq!(lines[1], "ip_2 1");
    }
}
