//! Number-theoretic transform over the reserved spectral modulus.
//!
//! Used solely as a round-trip integrity operator over spectral framed
//! regions: the interpreter transforms the region's data vector forward
//! and back and requires the original to reappear. The modulus is tiny
//! (the prime at the reserved index), so the textbook O(n²) form is the
//! right tool.

use factor_asm::NTT_ROOT;

fn pow_mod(mut base: u64, mut exp: u64, modulus: u64) -> u64 {
    let mut acc = 1u64;
    base %= modulus;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc * base % modulus;
        }
        base = base * base % modulus;
        exp >>= 1;
    }
    acc
}

fn root_of_unity(n: usize, modulus: u64) -> u64 {
    pow_mod(NTT_ROOT, (modulus - 1) / n as u64, modulus)
}

/// Forward transform of `values` (empty input passes through).
pub fn forward(values: &[u64], modulus: u64) -> Vec<u64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    let root = root_of_unity(n, modulus);
    (0..n)
        .map(|i| {
            values
                .iter()
                .enumerate()
                .fold(0u64, |acc, (j, &v)| {
                    (acc + v % modulus * pow_mod(root, (i * j % n) as u64, modulus)) % modulus
                })
        })
        .collect()
}

/// Inverse transform, the exact inverse of [`forward`] when the region
/// length divides the multiplicative group order.
pub fn inverse(values: &[u64], modulus: u64) -> Vec<u64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    let root = root_of_unity(n, modulus);
    let inv_root = pow_mod(root, modulus - 2, modulus);
    let inv_n = pow_mod(n as u64, modulus - 2, modulus);
    (0..n)
        .map(|i| {
            let acc = values.iter().enumerate().fold(0u64, |acc, (j, &v)| {
                (acc + v % modulus * pow_mod(inv_root, (i * j % n) as u64, modulus)) % modulus
            });
            acc * inv_n % modulus
        })
        .collect()
}

/// `inverse(forward(values))` — the interpreter's integrity probe.
pub fn round_trip(values: &[u64], modulus: u64) -> Vec<u64> {
    inverse(&forward(values, modulus), modulus)
}
