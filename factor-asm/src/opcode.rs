//! The reserved opcode table.
//!
//! Opcodes are identified by prime *index*, not prime value: the table
//! below is the canonical, compatibility-critical assignment of the
//! first prime indices. Three indices are not opcodes at all — the block
//! and spectral framing tags and the spectral modulus — and index 13 is
//! the negative-offset flag attached to jump operands.

use factor_primes::{nth_prime, prime_index, Prime};

/// Prime index of the block framing tag (payload exponent 7).
pub const BLOCK_TAG_INDEX: usize = 3;
/// Prime index of the spectral framing tag (payload exponent 4).
pub const NTT_TAG_INDEX: usize = 4;
/// Prime index of the spectral transform modulus.
pub const SPECTRAL_MOD_INDEX: usize = 5;
/// Prime index of the negative-offset flag (payload exponent 5).
pub const NEG_FLAG_INDEX: usize = 13;

/// Offset added to every non-signed operand value before prime lookup,
/// so that zero-valued operands have an encoding.
pub const DATA_OFFSET: usize = 50;

/// Primitive root used to derive the spectral transform root of unity.
pub const NTT_ROOT: u64 = 2;

/// The block framing tag prime.
pub fn block_tag() -> Prime {
    nth_prime(BLOCK_TAG_INDEX)
}

/// The spectral framing tag prime.
pub fn ntt_tag() -> Prime {
    nth_prime(NTT_TAG_INDEX)
}

/// The negative-offset flag prime.
pub fn neg_flag() -> Prime {
    nth_prime(NEG_FLAG_INDEX)
}

/// The spectral transform modulus (the prime at [`SPECTRAL_MOD_INDEX`]).
pub fn spectral_modulus() -> u64 {
    nth_prime(SPECTRAL_MOD_INDEX)
}

/// Reserved opcodes, with the canonical prime index as discriminant.
///
/// Indices 3, 4, 5 and 13 are reserved for the framing tags, the
/// spectral modulus and the negative-offset flag; indices 25–30 are
/// reserved for the universal-number collaborator, which registers its
/// own handlers — executing them without it is an invalid opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(usize)]
#[allow(missing_docs)]
pub enum Opcode {
    Push = 0,
    Add = 1,
    Print = 2,
    Sub = 6,
    Mul = 7,
    Load = 8,
    Store = 9,
    Jmp = 10,
    Jz = 11,
    Jnz = 12,
    Call = 14,
    Ret = 15,
    Alloc = 16,
    Free = 17,
    Input = 18,
    Output = 19,
    NetSend = 20,
    NetRecv = 21,
    ThreadStart = 22,
    ThreadJoin = 23,
    Checkpoint = 24,
    UnCreate = 25,
    UnGrade = 26,
    UnInner = 27,
    UnNorm = 28,
    UnTrans = 29,
    UnDwt = 30,
    Div = 31,
    Mod = 32,
    And = 33,
    Or = 34,
    Xor = 35,
    Shl = 36,
    Shr = 37,
    Neg = 38,
    Fmul = 39,
    Fdiv = 40,
    F2i = 41,
    I2f = 42,
    Syscall = 43,
    Int = 44,
    Halt = 45,
    Nop = 46,
    Hash = 47,
    Sign = 48,
    Verify = 49,
    Rng = 50,
    Brk = 51,
    Trace = 52,
    Debug = 53,
    Atomic = 54,
    Not = 55,
    Gt = 56,
    Lt = 57,
    Eq = 58,
    Neq = 59,
    Gte = 60,
    Lte = 61,
    Dup = 62,
    Swap = 63,
    Rot = 64,
    Drop = 65,
    Over = 66,
    Pick = 67,
}

impl Opcode {
    /// The canonical prime index of this opcode.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The prime identifying this opcode on the wire.
    pub fn prime(self) -> Prime {
        nth_prime(self.index())
    }

    /// Reverse lookup from a prime index.
    pub const fn from_index(idx: usize) -> Option<Self> {
        use Opcode::*;
        Some(match idx {
            0 => Push,
            1 => Add,
            2 => Print,
            6 => Sub,
            7 => Mul,
            8 => Load,
            9 => Store,
            10 => Jmp,
            11 => Jz,
            12 => Jnz,
            14 => Call,
            15 => Ret,
            16 => Alloc,
            17 => Free,
            18 => Input,
            19 => Output,
            20 => NetSend,
            21 => NetRecv,
            22 => ThreadStart,
            23 => ThreadJoin,
            24 => Checkpoint,
            25 => UnCreate,
            26 => UnGrade,
            27 => UnInner,
            28 => UnNorm,
            29 => UnTrans,
            30 => UnDwt,
            31 => Div,
            32 => Mod,
            33 => And,
            34 => Or,
            35 => Xor,
            36 => Shl,
            37 => Shr,
            38 => Neg,
            39 => Fmul,
            40 => Fdiv,
            41 => F2i,
            42 => I2f,
            43 => Syscall,
            44 => Int,
            45 => Halt,
            46 => Nop,
            47 => Hash,
            48 => Sign,
            49 => Verify,
            50 => Rng,
            51 => Brk,
            52 => Trace,
            53 => Debug,
            54 => Atomic,
            55 => Not,
            56 => Gt,
            57 => Lt,
            58 => Eq,
            59 => Neq,
            60 => Gte,
            61 => Lte,
            62 => Dup,
            63 => Swap,
            64 => Rot,
            65 => Drop,
            66 => Over,
            67 => Pick,
            _ => return None,
        })
    }

    /// Reverse lookup from the opcode prime itself.
    pub fn from_prime(p: Prime) -> Option<Self> {
        prime_index(p).and_then(Self::from_index)
    }
}
