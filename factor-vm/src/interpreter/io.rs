//! I/O handlers and the network/thread stubs.

use std::time::Instant;

use super::Vm;
use crate::error::Fault;

impl Vm {
    pub(crate) fn op_input(&mut self) -> Result<(), Fault> {
        let value = self.mem.pop_input().unwrap_or(0);
        self.push_value(value)?;
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.record_io();
        }
        Ok(())
    }

    pub(crate) fn op_output(&mut self, out: &mut Vec<String>) -> Result<(), Fault> {
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.record_io();
        }
        let value = self.pop()?;
        self.mem.push_output(value);
        out.push(value.to_string());
        Ok(())
    }

    pub(crate) fn op_print(&mut self, out: &mut Vec<String>) -> Result<(), Fault> {
        let value = self.pop()?;
        out.push(value.to_string());
        Ok(())
    }

    pub(crate) fn op_net_send(&mut self) -> Result<(), Fault> {
        let started = Instant::now();
        // The wire is a stub; only the latency counter is real.
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.record_network_latency(started.elapsed());
        }
        Ok(())
    }

    pub(crate) fn op_net_recv(&mut self) -> Result<(), Fault> {
        let started = Instant::now();
        self.push_value(0)?;
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.record_network_latency(started.elapsed());
        }
        Ok(())
    }
}
