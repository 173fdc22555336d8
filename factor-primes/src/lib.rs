//! Prime generation, indexing and factorization.
//!
//! The chunk format identifies every symbol by the *index* of a prime, so
//! the whole stack below the codec reduces to three queries: the i-th
//! prime, the index of a prime, and the factorization of an arbitrary
//! integer. All three are served from a process-wide, append-only prime
//! table that grows on demand; factorization results are memoized.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

use num_bigint::BigUint;

mod factor;
mod fast;
mod table;

pub use factor::{factor, factor_u64, reconstruct};
pub use fast::{factor_fast, is_probable_prime, pollard_rho};
pub use table::{intern_prime, nth_prime, prime_index, primes_below};

/// A prime number as stored in the process-wide table.
pub type Prime = u64;

/// Factorization of an integer: `(prime, exponent)` pairs, exponent ≥ 1,
/// ordered by prime ascending (interned cofactors excepted).
pub type Factorization = Vec<(Prime, u32)>;

/// Errors produced by the factorization entry points.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FactorError {
    /// `factor(0)` and `factor(1)` are undefined in the chunk domain.
    #[error("factorization undefined for {0}")]
    Undefined(BigUint),
    /// A residual prime cofactor does not fit the 64-bit prime table.
    #[error("prime cofactor exceeds 64 bits")]
    CofactorOverflow,
}
