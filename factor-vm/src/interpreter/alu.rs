//! Arithmetic, bitwise, comparison, float and stack-shuffle handlers.
//!
//! Integer arithmetic wraps at 64 bits. Float opcodes treat stack slots
//! as IEEE-754 bit patterns: I2F converts value → bits, FMUL/FDIV
//! combine bit patterns, F2I converts bits → value.

use factor_asm::DecodedInstruction;

use super::{operand_value, Vm};
use crate::error::Fault;

impl Vm {
    pub(crate) fn op_push(&mut self, instr: &DecodedInstruction) -> Result<(), Fault> {
        let value = operand_value(instr)?;
        self.push_value(value)
    }

    fn binary(&mut self, f: impl FnOnce(i64, i64) -> i64) -> Result<(), Fault> {
        let (a, b) = self.pop_two()?;
        self.push_value(f(a, b))
    }

    pub(crate) fn op_add(&mut self) -> Result<(), Fault> {
        self.binary(i64::wrapping_add)
    }

    pub(crate) fn op_sub(&mut self) -> Result<(), Fault> {
        self.binary(i64::wrapping_sub)
    }

    pub(crate) fn op_mul(&mut self) -> Result<(), Fault> {
        self.binary(i64::wrapping_mul)
    }

    pub(crate) fn op_div(&mut self) -> Result<(), Fault> {
        let (a, b) = self.pop_two()?;
        if b == 0 {
            return Err(Fault::DivisionByZero);
        }
        self.push_value(a.wrapping_div(b))
    }

    pub(crate) fn op_mod(&mut self) -> Result<(), Fault> {
        let (a, b) = self.pop_two()?;
        if b == 0 {
            return Err(Fault::DivisionByZero);
        }
        self.push_value(a.wrapping_rem(b))
    }

    pub(crate) fn op_neg(&mut self) -> Result<(), Fault> {
        let v = self.pop()?;
        self.push_value(v.wrapping_neg())
    }

    pub(crate) fn op_and(&mut self) -> Result<(), Fault> {
        self.binary(|a, b| a & b)
    }

    pub(crate) fn op_or(&mut self) -> Result<(), Fault> {
        self.binary(|a, b| a | b)
    }

    pub(crate) fn op_xor(&mut self) -> Result<(), Fault> {
        self.binary(|a, b| a ^ b)
    }

    pub(crate) fn op_shl(&mut self) -> Result<(), Fault> {
        self.binary(|a, b| a.wrapping_shl(b as u32))
    }

    pub(crate) fn op_shr(&mut self) -> Result<(), Fault> {
        self.binary(|a, b| a.wrapping_shr(b as u32))
    }

    pub(crate) fn op_not(&mut self) -> Result<(), Fault> {
        let v = self.pop()?;
        self.push_value(!v)
    }

    pub(crate) fn op_gt(&mut self) -> Result<(), Fault> {
        self.binary(|a, b| (a > b) as i64)
    }

    pub(crate) fn op_lt(&mut self) -> Result<(), Fault> {
        self.binary(|a, b| (a < b) as i64)
    }

    pub(crate) fn op_eq(&mut self) -> Result<(), Fault> {
        self.binary(|a, b| (a == b) as i64)
    }

    pub(crate) fn op_neq(&mut self) -> Result<(), Fault> {
        self.binary(|a, b| (a != b) as i64)
    }

    pub(crate) fn op_gte(&mut self) -> Result<(), Fault> {
        self.binary(|a, b| (a >= b) as i64)
    }

    pub(crate) fn op_lte(&mut self) -> Result<(), Fault> {
        self.binary(|a, b| (a <= b) as i64)
    }

    pub(crate) fn op_fmul(&mut self) -> Result<(), Fault> {
        let (a, b) = self.pop_two()?;
        let product = f64::from_bits(a as u64) * f64::from_bits(b as u64);
        self.push_value(product.to_bits() as i64)
    }

    pub(crate) fn op_fdiv(&mut self) -> Result<(), Fault> {
        let (a, b) = self.pop_two()?;
        let divisor = f64::from_bits(b as u64);
        if divisor == 0.0 {
            return Err(Fault::DivisionByZero);
        }
        let quotient = f64::from_bits(a as u64) / divisor;
        self.push_value(quotient.to_bits() as i64)
    }

    pub(crate) fn op_f2i(&mut self) -> Result<(), Fault> {
        let bits = self.pop()?;
        self.push_value(f64::from_bits(bits as u64) as i64)
    }

    pub(crate) fn op_i2f(&mut self) -> Result<(), Fault> {
        let v = self.pop()?;
        self.push_value((v as f64).to_bits() as i64)
    }

    pub(crate) fn op_dup(&mut self) -> Result<(), Fault> {
        let top = *self.stack.last().ok_or(Fault::StackUnderflow)?;
        self.push_value(top)
    }

    pub(crate) fn op_swap(&mut self) -> Result<(), Fault> {
        let (a, b) = self.pop_two()?;
        self.stack.push(b);
        self.stack.push(a);
        Ok(())
    }

    pub(crate) fn op_rot(&mut self) -> Result<(), Fault> {
        if self.stack.len() < 3 {
            return Err(Fault::StackUnderflow);
        }
        let c = self.pop()?;
        let b = self.pop()?;
        let a = self.pop()?;
        self.stack.push(b);
        self.stack.push(c);
        self.stack.push(a);
        Ok(())
    }

    pub(crate) fn op_drop(&mut self) -> Result<(), Fault> {
        self.pop().map(|_| ())
    }

    pub(crate) fn op_over(&mut self) -> Result<(), Fault> {
        if self.stack.len() < 2 {
            return Err(Fault::StackUnderflow);
        }
        let second = self.stack[self.stack.len() - 2];
        self.push_value(second)
    }

    pub(crate) fn op_pick(&mut self) -> Result<(), Fault> {
        let depth = self.pop()?;
        let len = self.stack.len();
        let depth = usize::try_from(depth).map_err(|_| Fault::StackUnderflow)?;
        if depth >= len {
            return Err(Fault::StackUnderflow);
        }
        let value = self.stack[len - 1 - depth];
        self.push_value(value)
    }
}
