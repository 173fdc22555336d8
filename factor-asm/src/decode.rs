//! Chunk decoding: factor, peel the checksum, build the instruction tree.

use std::time::Instant;

use factor_primes::{factor, nth_prime, prime_index, Prime};

use crate::cache::{instruction_cache, InstructionCache};
use crate::opcode::{block_tag, neg_flag, ntt_tag};
use crate::Chunk;

/// One decoded instruction: the payload `(prime, exponent)` pairs with
/// the checksum peeled off and, for framing headers, the owned child
/// program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    payload: Vec<(Prime, u32)>,
    children: Vec<DecodedInstruction>,
}

impl DecodedInstruction {
    /// Assemble an instruction from parts (primarily for tests and the
    /// JIT's structural keys).
    pub fn new(payload: Vec<(Prime, u32)>, children: Vec<DecodedInstruction>) -> Self {
        Self { payload, children }
    }

    /// The payload pairs, checksum excluded, ordered by prime ascending.
    pub fn payload(&self) -> &[(Prime, u32)] {
        &self.payload
    }

    /// Child instructions of a framing header (empty otherwise).
    pub fn children(&self) -> &[DecodedInstruction] {
        &self.children
    }

    /// The opcode prime, if the payload carries an exponent-4 entry.
    pub fn opcode_prime(&self) -> Option<Prime> {
        self.payload.iter().find(|&&(_, e)| e == 4).map(|&(p, _)| p)
    }

    /// The operand prime: the exponent-5 entry that is not the
    /// negative-offset flag.
    pub fn operand_prime(&self) -> Option<Prime> {
        let flag = neg_flag();
        self.payload
            .iter()
            .find(|&&(p, e)| e == 5 && p != flag)
            .map(|&(p, _)| p)
    }

    /// Whether the negative-offset flag is present.
    pub fn has_neg_flag(&self) -> bool {
        let flag = neg_flag();
        self.payload.iter().any(|&(p, e)| p == flag && e == 5)
    }

    /// Whether this is a block framing header.
    pub fn is_block(&self) -> bool {
        let tag = block_tag();
        self.payload.iter().any(|&(p, e)| p == tag && e == 7)
    }

    /// Whether this is a spectral framing header.
    pub fn is_ntt(&self) -> bool {
        let tag = ntt_tag();
        self.payload.iter().any(|&(p, e)| p == tag && e == 4)
    }

    /// The code point of a raw data chunk (exponent 2 or 3 entry).
    pub fn char_code(&self) -> Option<usize> {
        self.payload
            .iter()
            .find(|&&(_, e)| e == 2 || e == 3)
            .and_then(|&(p, _)| prime_index(p))
    }

    /// First payload exponent; the spectral pre-pass reads framed
    /// children through this.
    pub fn leading_exponent(&self) -> u32 {
        self.payload.first().map(|&(_, e)| e).unwrap_or(0)
    }

    fn length_index(&self, tag: Prime) -> Option<usize> {
        self.payload
            .iter()
            .find(|&&(p, e)| e == 5 && p != tag)
            .and_then(|&(p, _)| prime_index(p))
    }
}

/// Decoding failures. All are fatal to the program, raised before any
/// instruction executes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// No factor carried the checksum exponent.
    #[error("checksum missing")]
    ChecksumMissing,
    /// The checksum prime does not match the payload digest.
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// More than one factor carried the checksum exponent.
    #[error("duplicate checksum")]
    DuplicateChecksum,
    /// The chunk is structurally unusable (unfactorable value, missing
    /// framing length, truncated framing run).
    #[error("bad data: {0}")]
    BadData(String),
}

/// Factor a single chunk and peel the checksum, returning the payload.
///
/// The first factor with exponent ≥ 6 is the checksum — except that
/// `BLOCK_TAG` at exactly exponent 7 is framing payload, never the
/// checksum. Any later factor with exponent ≥ 6 that is not the framing
/// tag is a duplicate checksum.
fn peel(chunk: &Chunk) -> Result<Vec<(Prime, u32)>, DecodeError> {
    let fac =
        factor(chunk).map_err(|e| DecodeError::BadData(format!("unfactorable chunk: {e}")))?;
    let tag = block_tag();

    let mut checksum = None;
    let mut payload = Vec::with_capacity(fac.len());
    for (p, mut e) in fac {
        if e >= 6 && !(p == tag && e == 7) {
            if checksum.is_none() {
                checksum = Some(p);
                e -= 6;
            } else {
                return Err(DecodeError::DuplicateChecksum);
            }
        }
        if e > 0 {
            payload.push((p, e));
        }
    }

    let checksum = checksum.ok_or(DecodeError::ChecksumMissing)?;
    let mut xor = 0usize;
    for &(p, e) in &payload {
        let idx = prime_index(p)
            .ok_or_else(|| DecodeError::BadData(format!("unindexed payload prime {p}")))?;
        xor ^= idx * e as usize;
    }
    if checksum != nth_prime(xor) {
        return Err(DecodeError::ChecksumMismatch);
    }
    Ok(payload)
}

/// Decode a chunk sequence into an instruction tree, using the
/// process-wide instruction cache.
pub fn decode(chunks: &[Chunk]) -> Result<Vec<DecodedInstruction>, DecodeError> {
    decode_with_cache(chunks, instruction_cache())
}

/// Decode against an explicit cache instance.
pub fn decode_with_cache(
    chunks: &[Chunk],
    cache: &InstructionCache,
) -> Result<Vec<DecodedInstruction>, DecodeError> {
    let mut out = Vec::new();
    let mut ip = 0usize;
    while ip < chunks.len() {
        let chunk = &chunks[ip];
        ip += 1;

        let payload = match cache.get(chunk) {
            Some(hit) => hit,
            None => {
                let started = Instant::now();
                let payload = peel(chunk)?;
                cache.put(chunk.clone(), payload.clone(), Some(started.elapsed()));
                payload
            }
        };

        let header = DecodedInstruction::new(payload, Vec::new());
        let framing_tag = if header.is_block() {
            Some(block_tag())
        } else if header.is_ntt() {
            Some(ntt_tag())
        } else {
            None
        };

        let children = match framing_tag {
            Some(tag) => {
                let n = header
                    .length_index(tag)
                    .ok_or_else(|| DecodeError::BadData("framing length missing".into()))?;
                let available = chunks.len() - ip;
                if n > available {
                    return Err(DecodeError::BadData(format!(
                        "framing run truncated: need {n} chunks, have {available}"
                    )));
                }
                let children = decode_with_cache(&chunks[ip..ip + n], cache)?;
                ip += n;
                children
            }
            None => Vec::new(),
        };

        out.push(DecodedInstruction::new(header.payload, children));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op;
    use crate::opcode::{Opcode, DATA_OFFSET};
    use num_bigint::BigUint;
    use rstest::rstest;

    fn fresh_cache() -> InstructionCache {
        InstructionCache::new(64)
    }

    #[rstest]
    #[case::add(op::add())]
    #[case::push(op::push(0))]
    #[case::push_large(op::push(300))]
    #[case::load(op::load(0))]
    #[case::store(op::store(4095))]
    #[case::jmp_forward(op::jmp(7))]
    #[case::jmp_backward(op::jmp(-9))]
    #[case::call_backward(op::call(-4))]
    #[case::data(op::data(0, 88))]
    #[case::data_diagonal(op::data(65, 65))]
    #[case::halt(op::halt())]
    fn encode_decode_round_trip(#[case] chunk: Chunk) {
        let decoded = decode_with_cache(&[chunk.clone()], &fresh_cache()).unwrap();
        assert_eq!(decoded.len(), 1);
        // Re-encoding the payload (plus its checksum) restores the chunk.
        let mut xor = 0usize;
        let mut raw = BigUint::from(1u32);
        for &(p, e) in decoded[0].payload() {
            xor ^= factor_primes::prime_index(p).unwrap() * e as usize;
            raw *= BigUint::from(p).pow(e);
        }
        raw *= BigUint::from(factor_primes::nth_prime(xor)).pow(6);
        assert_eq!(raw, chunk);
    }

    #[test]
    fn operand_recovery() {
        let decoded = decode_with_cache(&[op::push(42)], &fresh_cache()).unwrap();
        let instr = &decoded[0];
        assert_eq!(instr.opcode_prime(), Some(Opcode::Push.prime()));
        let idx = factor_primes::prime_index(instr.operand_prime().unwrap()).unwrap();
        assert_eq!(idx - DATA_OFFSET, 42);
        assert!(!instr.has_neg_flag());
    }

    #[test]
    fn negative_offset_flag() {
        let decoded = decode_with_cache(&[op::jmp(-3)], &fresh_cache()).unwrap();
        assert!(decoded[0].has_neg_flag());
        let idx = factor_primes::prime_index(decoded[0].operand_prime().unwrap()).unwrap();
        assert_eq!(idx - DATA_OFFSET, 3);
    }

    #[test]
    fn block_framing_builds_a_tree() {
        let chunks = vec![op::block(2), op::push(1), op::push(2), op::add()];
        let decoded = decode_with_cache(&chunks, &fresh_cache()).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].is_block());
        assert_eq!(decoded[0].children().len(), 2);
        assert_eq!(
            decoded[1].opcode_prime(),
            Some(Opcode::Add.prime()),
            "the chunk after the framed run is a sibling"
        );
    }

    #[test]
    fn nested_blocks() {
        let chunks = vec![
            op::block(4),
            op::push(1),
            op::block(2),
            op::push(2),
            op::push(3),
            op::halt(),
        ];
        let decoded = decode_with_cache(&chunks, &fresh_cache()).unwrap();
        assert_eq!(decoded.len(), 2);
        let outer = &decoded[0];
        assert_eq!(outer.children().len(), 2);
        assert_eq!(outer.children()[1].children().len(), 2);
    }

    #[test]
    fn ntt_framing() {
        let chunks = vec![op::ntt(2), op::data(0, 88), op::data(1, 89)];
        let decoded = decode_with_cache(&chunks, &fresh_cache()).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(decoded[0].is_ntt());
        assert_eq!(decoded[0].children().len(), 2);
    }

    #[test]
    fn checksum_missing() {
        // 2^2 * 3 carries no exponent-6 factor.
        let err = decode_with_cache(&[BigUint::from(12u32)], &fresh_cache()).unwrap_err();
        assert_eq!(err, DecodeError::ChecksumMissing);
    }

    #[test]
    fn checksum_mismatch_on_tampering() {
        // Multiply a valid ADD chunk by its opcode prime: the payload
        // exponent changes, the attached checksum no longer matches.
        let tampered = op::add() * BigUint::from(3u32);
        let err = decode_with_cache(&[tampered], &fresh_cache()).unwrap_err();
        assert_eq!(err, DecodeError::ChecksumMismatch);
    }

    #[test]
    fn duplicate_checksum() {
        // Two exponent-6 factors, neither of which is the framing tag.
        let chunk = BigUint::from(2u32).pow(6) * BigUint::from(3u32).pow(6);
        let err = decode_with_cache(&[chunk], &fresh_cache()).unwrap_err();
        assert_eq!(err, DecodeError::DuplicateChecksum);
    }

    #[test]
    fn truncated_framing_run() {
        let err = decode_with_cache(&[op::block(2), op::push(1)], &fresh_cache()).unwrap_err();
        assert!(matches!(err, DecodeError::BadData(_)));
    }

    #[quickcheck_macros::quickcheck]
    fn any_push_operand_survives_the_round_trip(v: u16) -> bool {
        let v = u64::from(v % 5000);
        let decoded = decode_with_cache(&[op::push(v)], &fresh_cache()).unwrap();
        let idx = factor_primes::prime_index(decoded[0].operand_prime().unwrap()).unwrap();
        idx - DATA_OFFSET == v as usize
    }

    #[quickcheck_macros::quickcheck]
    fn any_jump_offset_survives_the_round_trip(off: i16) -> bool {
        let off = i64::from(off % 1000);
        let decoded = decode_with_cache(&[op::jmp(off)], &fresh_cache()).unwrap();
        let instr = &decoded[0];
        let idx = factor_primes::prime_index(instr.operand_prime().unwrap()).unwrap();
        let magnitude = (idx - DATA_OFFSET) as i64;
        let recovered = if instr.has_neg_flag() {
            -magnitude
        } else {
            magnitude
        };
        recovered == off
    }

    #[test]
    fn cached_and_cold_decodes_agree() {
        let chunks = vec![op::push(5), op::push(5), op::add(), op::print()];
        let cache = fresh_cache();
        let warm = decode_with_cache(&chunks, &cache).unwrap();
        let again = decode_with_cache(&chunks, &cache).unwrap();
        let cold = decode_with_cache(&chunks, &fresh_cache()).unwrap();
        assert_eq!(warm, again);
        assert_eq!(warm, cold);
        assert!(cache.stats().hits >= 3, "repeated chunks hit the cache");
    }
}
