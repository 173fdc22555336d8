//! Chunk codec for the prime-factorization instruction format.
//!
//! A program is a sequence of positive integers ("chunks"). Each chunk's
//! prime factorization carries one instruction: the prime at exponent 4
//! names the opcode, a prime at exponent 5 carries the operand, primes at
//! exponent 2 or 3 carry raw data characters, and a single prime at
//! exponent 6 is the self-check digest. Two reserved primes introduce
//! framed regions (nested blocks and spectral regions) whose chunks are
//! decoded as children of the framing instruction.
//!
//! This crate owns the reserved opcode table ([`Opcode`]), the chunk
//! builders ([`op`]), the decoder ([`decode`]) and the process-wide
//! decoded-instruction cache ([`InstructionCache`]).

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub use num_bigint::BigUint;

mod cache;
mod decode;
mod loader;
pub mod op;
mod opcode;

pub use cache::{instruction_cache, CacheStats, InstructionCache};
pub use decode::{decode, decode_with_cache, DecodeError, DecodedInstruction};
pub use loader::{parse_program, serialize_program, LoadError};
pub use opcode::{
    block_tag, neg_flag, ntt_tag, spectral_modulus, Opcode, BLOCK_TAG_INDEX, DATA_OFFSET,
    NEG_FLAG_INDEX, NTT_ROOT, NTT_TAG_INDEX, SPECTRAL_MOD_INDEX,
};

/// A chunk: one instruction encoded as a positive integer.
pub type Chunk = BigUint;
