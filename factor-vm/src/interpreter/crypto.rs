//! Crypto handlers: digest, toy signature, deterministic RNG.

use sha2::{Digest, Sha256};

use super::Vm;
use crate::error::Fault;

impl Vm {
    /// Push the first four bytes, big-endian, of SHA-256 over the
    /// decimal rendering of the popped value.
    pub(crate) fn op_hash(&mut self) -> Result<(), Fault> {
        let value = self.pop()?;
        let digest = Sha256::digest(value.to_string().as_bytes());
        let word = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        self.push_value(i64::from(word))
    }

    pub(crate) fn op_sign(&mut self) -> Result<(), Fault> {
        let value = self.pop()?;
        self.push_value(value.wrapping_add(1))
    }

    pub(crate) fn op_verify(&mut self) -> Result<(), Fault> {
        let value = self.pop()?;
        let signature = self.pop()?;
        self.push_value((signature == value.wrapping_add(1)) as i64)
    }

    pub(crate) fn op_rng(&mut self) -> Result<(), Fault> {
        self.push_value(4)
    }
}
