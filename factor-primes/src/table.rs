//! The process-wide prime table.
//!
//! An append-only sequence of primes with a reverse `prime → index` map.
//! Indices are the currency of the chunk format: index 0 is 2, index 1
//! is 3, and so on. Primes discovered by factoring arbitrary input are
//! interned at the end of the table, so every prime ever observed has a
//! well-defined index.

use std::collections::HashMap;

use lazy_static::lazy_static;
use num_integer::Roots;
use parking_lot::RwLock;

use crate::Prime;

const SEGMENT_SIZE: u64 = 32_768;

pub(crate) struct PrimeTable {
    primes: Vec<Prime>,
    index: HashMap<Prime, usize>,
    /// Upper bound already swept by the sieve. Every prime ≤ this bound
    /// is present in `primes`.
    sieve_limit: u64,
}

lazy_static! {
    static ref TABLE: RwLock<PrimeTable> = RwLock::new(PrimeTable::seeded());
}

impl PrimeTable {
    fn seeded() -> Self {
        let mut index = HashMap::new();
        index.insert(2, 0);
        Self {
            primes: vec![2],
            index,
            sieve_limit: 2,
        }
    }

    /// Sweep the segmented sieve up to `limit`, appending every new prime.
    fn extend_to(&mut self, limit: u64) {
        if limit <= self.sieve_limit {
            return;
        }

        // Sieving a segment needs all primes up to sqrt(limit).
        let root = limit.sqrt();
        if root > self.sieve_limit {
            self.extend_to(root);
        }

        let mut start = self.sieve_limit + 1;
        while start <= limit {
            let end = (start + SEGMENT_SIZE - 1).min(limit);
            let mut composite = vec![false; (end - start + 1) as usize];
            for &p in &self.primes {
                if p.checked_mul(p).map_or(true, |sq| sq > end) {
                    continue;
                }
                let mut m = start.div_ceil(p) * p;
                while m <= end {
                    composite[(m - start) as usize] = true;
                    m += p;
                }
            }
            for (offset, is_composite) in composite.iter().enumerate() {
                if !is_composite {
                    let n = start + offset as u64;
                    // Interned cofactors may already sit past the sieve
                    // front; never enter a prime twice.
                    if !self.index.contains_key(&n) {
                        self.index.insert(n, self.primes.len());
                        self.primes.push(n);
                    }
                }
            }
            self.sieve_limit = end;
            start = end + 1;
        }
    }

    fn ensure_index(&mut self, idx: usize) {
        while self.primes.len() <= idx {
            let limit = (self.sieve_limit * 2).max(4);
            self.extend_to(limit);
        }
    }
}

/// The i-th prime (0-based: `nth_prime(0) == 2`). Grows the table on demand.
pub fn nth_prime(i: usize) -> Prime {
    {
        let table = TABLE.read();
        if let Some(&p) = table.primes.get(i) {
            return p;
        }
    }
    let mut table = TABLE.write();
    table.ensure_index(i);
    table.primes[i]
}

/// Index of `p` in the table, if `p` has been generated or interned.
pub fn prime_index(p: Prime) -> Option<usize> {
    TABLE.read().index.get(&p).copied()
}

/// Register `p` (which the caller has established to be prime) and return
/// its index. Idempotent for known primes.
pub fn intern_prime(p: Prime) -> usize {
    {
        let table = TABLE.read();
        if let Some(&idx) = table.index.get(&p) {
            return idx;
        }
    }
    let mut table = TABLE.write();
    if let Some(&idx) = table.index.get(&p) {
        return idx;
    }
    let idx = table.primes.len();
    table.index.insert(p, idx);
    table.primes.push(p);
    idx
}

/// All sieve-generated primes strictly below `limit`, ascending.
pub fn primes_below(limit: u64) -> Vec<Prime> {
    {
        let mut table = TABLE.write();
        table.extend_to(limit);
    }
    let table = TABLE.read();
    let mut out: Vec<Prime> = table
        .primes
        .iter()
        .copied()
        .filter(|&p| p < limit)
        .collect();
    out.sort_unstable();
    out
}
