//! System handlers: syscall/interrupt stubs and trace output.

use super::Vm;
use crate::error::Fault;

impl Vm {
    pub(crate) fn op_syscall(&mut self) -> Result<(), Fault> {
        self.push_value(0)
    }

    pub(crate) fn op_int(&mut self) -> Result<(), Fault> {
        self.push_value(0)
    }

    pub(crate) fn op_trace(&mut self, out: &mut Vec<String>) {
        let top = self.stack.last().copied().unwrap_or(0);
        out.push(top.to_string());
    }
}
