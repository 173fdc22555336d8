//! Trial-division factorization with a process-wide memo cache.

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};
use parking_lot::Mutex;

use crate::table::{intern_prime, nth_prime};
use crate::{FactorError, Factorization};

lazy_static! {
    static ref FACTOR_CACHE: Mutex<HashMap<BigUint, Arc<Factorization>>> =
        Mutex::new(HashMap::new());
}

/// Factor `x` into `(prime, exponent)` pairs by trial division over the
/// prime table. A residual cofactor > 1 is interned as a new prime, so
/// every integer ≥ 2 yields pairs whose primes all carry an index.
///
/// Results are memoized; every call returns an independent copy, so the
/// caller may mutate the returned vector freely.
pub fn factor(x: &BigUint) -> Result<Factorization, FactorError> {
    let two = BigUint::from(2u32);
    if *x < two {
        return Err(FactorError::Undefined(x.clone()));
    }
    if let Some(cached) = FACTOR_CACHE.lock().get(x) {
        return Ok(cached.as_ref().clone());
    }

    let mut rem = x.clone();
    let mut fac: Factorization = Vec::new();
    let mut i = 0usize;
    loop {
        let p = nth_prime(i);
        let pb = BigUint::from(p);
        if &pb * &pb > rem {
            break;
        }
        if (&rem % &pb).is_zero() {
            let mut count = 0u32;
            while (&rem % &pb).is_zero() {
                rem /= &pb;
                count += 1;
            }
            fac.push((p, count));
        }
        i += 1;
    }
    if rem > BigUint::one() {
        let cofactor = rem.to_u64().ok_or(FactorError::CofactorOverflow)?;
        intern_prime(cofactor);
        fac.push((cofactor, 1));
    }

    let entry = Arc::new(fac);
    let result = entry.as_ref().clone();
    FACTOR_CACHE.lock().insert(x.clone(), entry);
    Ok(result)
}

/// Convenience wrapper over [`factor`] for machine-word inputs.
pub fn factor_u64(x: u64) -> Result<Factorization, FactorError> {
    factor(&BigUint::from(x))
}

/// Rebuild the integer a factorization describes.
pub fn reconstruct(fac: &[(u64, u32)]) -> BigUint {
    fac.iter().fold(BigUint::one(), |acc, &(p, e)| {
        acc * BigUint::from(p).pow(e)
    })
}

pub(crate) fn cache_insert(x: BigUint, fac: Factorization) -> Factorization {
    let entry = Arc::new(fac);
    let result = entry.as_ref().clone();
    FACTOR_CACHE.lock().insert(x, entry);
    result
}

pub(crate) fn cache_get(x: &BigUint) -> Option<Factorization> {
    FACTOR_CACHE.lock().get(x).map(|arc| arc.as_ref().clone())
}
