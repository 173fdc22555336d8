//! Fast-path factorization: Miller–Rabin primality plus Pollard's Rho.
//!
//! Agrees with trial division on every input it accepts; large
//! semiprimes just get there without enumerating the prime table.

use num_bigint::BigUint;
use num_integer::gcd;
use rand::Rng;

use crate::factor::{cache_get, cache_insert};
use crate::table::intern_prime;
use crate::{FactorError, Factorization};

fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    ((u128::from(a) * u128::from(b)) % u128::from(m)) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, m: u64) -> u64 {
    let mut acc = 1u64;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base, m);
        }
        base = mul_mod(base, base, m);
        exp >>= 1;
    }
    acc
}

/// Deterministic Miller–Rabin for 64-bit integers.
pub fn is_probable_prime(n: u64) -> bool {
    const SMALL: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];
    if n < 2 {
        return false;
    }
    for p in SMALL {
        if n % p == 0 {
            return n == p;
        }
    }

    let mut d = n - 1;
    let mut s = 0u32;
    while d % 2 == 0 {
        d /= 2;
        s += 1;
    }

    // This base set decides primality for every 64-bit integer.
    'bases: for a in SMALL {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'bases;
            }
        }
        return false;
    }
    true
}

/// A non-trivial factor of composite `n` via Pollard's Rho (Floyd cycle).
pub fn pollard_rho(n: u64) -> u64 {
    if n % 2 == 0 {
        return 2;
    }
    let mut rng = rand::thread_rng();
    loop {
        let c = rng.gen_range(1..n);
        let step =
            |x: u64| ((u128::from(mul_mod(x, x, n)) + u128::from(c)) % u128::from(n)) as u64;
        let mut x = rng.gen_range(0..n);
        let mut y = x;
        let mut d = 1u64;
        while d == 1 {
            x = step(x);
            y = step(step(y));
            d = gcd(x.abs_diff(y), n);
        }
        if d != n {
            return d;
        }
    }
}

/// Factor `n` with Miller–Rabin and Pollard's Rho, interning every prime
/// found and memoizing the result alongside trial-division output.
pub fn factor_fast(n: u64) -> Result<Factorization, FactorError> {
    if n < 2 {
        return Err(FactorError::Undefined(BigUint::from(n)));
    }
    let key = BigUint::from(n);
    if let Some(cached) = cache_get(&key) {
        return Ok(cached);
    }

    let mut primes: Vec<u64> = Vec::new();
    split(n, &mut primes);
    primes.sort_unstable();

    let mut fac: Factorization = Vec::new();
    for p in primes {
        intern_prime(p);
        match fac.last_mut() {
            Some((last, count)) if *last == p => *count += 1,
            _ => fac.push((p, 1)),
        }
    }
    Ok(cache_insert(key, fac))
}

fn split(m: u64, out: &mut Vec<u64>) {
    if m == 1 {
        return;
    }
    if is_probable_prime(m) {
        out.push(m);
        return;
    }
    let d = pollard_rho(m);
    split(d, out);
    split(m / d, out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factor_u64;

    #[test]
    fn miller_rabin_knowns() {
        assert!(is_probable_prime(2));
        assert!(is_probable_prime(97));
        assert!(is_probable_prime(2_147_483_647)); // 2^31 - 1
        assert!(!is_probable_prime(1));
        assert!(!is_probable_prime(561)); // Carmichael
        assert!(!is_probable_prime(1_000_000));
    }

    #[test]
    fn rho_splits_a_semiprime() {
        let n = 10_403; // 101 * 103
        let d = pollard_rho(n);
        assert!(d == 101 || d == 103);
    }

    #[test]
    fn fast_path_agrees_with_trial_division() {
        for n in [2u64, 4, 97, 360, 10_403, 1_299_709, 2_000_006] {
            assert_eq!(factor_fast(n).unwrap(), factor_u64(n).unwrap());
        }
    }

    #[test]
    fn fast_path_rejects_degenerate_inputs() {
        assert!(factor_fast(0).is_err());
        assert!(factor_fast(1).is_err());
    }
}
