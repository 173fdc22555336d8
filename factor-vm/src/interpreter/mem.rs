//! Memory handlers: loads, stores, heap allocation.

use factor_asm::DecodedInstruction;

use super::{operand_value, Vm};
use crate::error::Fault;
use crate::profiler::AccessMode;

impl Vm {
    pub(crate) fn op_load(
        &mut self,
        instr: &DecodedInstruction,
        out: &mut Vec<String>,
    ) -> Result<(), Fault> {
        let addr = operand_value(instr)?;
        if self.debugger.watch_hit(addr, false) {
            out.push(format!("WATCH:{addr}:read"));
        }
        let value = self.mem.load(addr)?;
        self.push_value(value)?;
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.record_memory_access(addr, AccessMode::Read);
        }
        Ok(())
    }

    pub(crate) fn op_store(
        &mut self,
        instr: &DecodedInstruction,
        out: &mut Vec<String>,
    ) -> Result<(), Fault> {
        let addr = operand_value(instr)?;
        if self.debugger.watch_hit(addr, true) {
            out.push(format!("WATCH:{addr}:write"));
        }
        let value = self.pop()?;
        self.mem.store(addr, value)?;
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.record_memory_access(addr, AccessMode::Write);
        }
        Ok(())
    }

    pub(crate) fn op_alloc(&mut self, instr: &DecodedInstruction) -> Result<(), Fault> {
        let size = operand_value(instr)?;
        let size = usize::try_from(size).map_err(|_| Fault::BadData)?;
        let roots: Vec<i64> = self
            .stack
            .iter()
            .chain(self.call_stack.iter())
            .copied()
            .collect();
        let addr = self.mem.allocate(size, &roots)?;
        self.push_value(addr)
    }

    pub(crate) fn op_free(&mut self, instr: &DecodedInstruction) -> Result<(), Fault> {
        let addr = operand_value(instr)?;
        self.mem.free(addr);
        Ok(())
    }
}
