//! Chunk builders.
//!
//! Each function encodes one instruction as its canonical chunk integer:
//! the payload primes are multiplied together at their role exponents and
//! the checksum prime — the prime whose index is the XOR of
//! `index · exponent` over the payload — is attached at exponent 6.
//!
//! Addressed builders panic if the operand lies below the addressable
//! window (less than `-DATA_OFFSET`); no prime index exists for it.

use num_bigint::BigUint;
use num_traits::One;

use factor_primes::nth_prime;

use crate::opcode::{Opcode, BLOCK_TAG_INDEX, DATA_OFFSET, NEG_FLAG_INDEX, NTT_TAG_INDEX};
use crate::Chunk;

/// Multiply out `(prime index, exponent)` payload entries and attach the
/// checksum prime.
fn build(entries: &[(usize, u32)]) -> Chunk {
    let mut raw = BigUint::one();
    let mut xor = 0usize;
    for &(idx, e) in entries {
        raw *= BigUint::from(nth_prime(idx)).pow(e);
        xor ^= idx * e as usize;
    }
    raw * BigUint::from(nth_prime(xor)).pow(6)
}

fn operand_index(value: i64) -> usize {
    usize::try_from(DATA_OFFSET as i64 + value)
        .expect("operand value below the addressable window")
}

/// A raw data chunk: stream position `pos` carrying code point `cp`.
pub fn data(pos: usize, cp: usize) -> Chunk {
    if pos == cp {
        build(&[(pos, 3)])
    } else {
        build(&[(pos, 1), (cp, 2)])
    }
}

/// `PUSH v` — push a literal (encoded at the data offset).
pub fn push(v: u64) -> Chunk {
    build(&[(Opcode::Push.index(), 4), (DATA_OFFSET + v as usize, 5)])
}

fn addressed(op: Opcode, value: i64) -> Chunk {
    build(&[(op.index(), 4), (operand_index(value), 5)])
}

/// `LOAD addr` — read a memory cell onto the stack.
pub fn load(addr: i64) -> Chunk {
    addressed(Opcode::Load, addr)
}

/// `STORE addr` — pop the stack into a memory cell.
pub fn store(addr: i64) -> Chunk {
    addressed(Opcode::Store, addr)
}

/// `ALLOC n` — heap-allocate `n` cells, pushing the start address.
pub fn alloc(size: i64) -> Chunk {
    addressed(Opcode::Alloc, size)
}

/// `FREE addr` — release the heap allocation starting at `addr`.
pub fn free(addr: i64) -> Chunk {
    addressed(Opcode::Free, addr)
}

fn jump(op: Opcode, offset: i64) -> Chunk {
    let magnitude = DATA_OFFSET + offset.unsigned_abs() as usize;
    if offset < 0 {
        build(&[(op.index(), 4), (magnitude, 5), (NEG_FLAG_INDEX, 5)])
    } else {
        build(&[(op.index(), 4), (magnitude, 5)])
    }
}

/// `JMP off` — unconditional relative jump.
pub fn jmp(offset: i64) -> Chunk {
    jump(Opcode::Jmp, offset)
}

/// `JZ off` — pop, jump when zero.
pub fn jz(offset: i64) -> Chunk {
    jump(Opcode::Jz, offset)
}

/// `JNZ off` — pop, jump when non-zero.
pub fn jnz(offset: i64) -> Chunk {
    jump(Opcode::Jnz, offset)
}

/// `CALL off` — push the return address and jump.
pub fn call(offset: i64) -> Chunk {
    jump(Opcode::Call, offset)
}

/// A block framing header: the next `n` chunks are an inner program.
pub fn block(n: usize) -> Chunk {
    build(&[(BLOCK_TAG_INDEX, 7), (n, 5)])
}

/// A spectral framing header: the next `n` chunks are an inner program
/// whose data vector is round-trip checked through the transform.
pub fn ntt(n: usize) -> Chunk {
    build(&[(NTT_TAG_INDEX, 4), (n, 5)])
}

macro_rules! bare_ops {
    ($($(#[$doc:meta])* $name:ident => $variant:ident),* $(,)?) => {$(
        $(#[$doc])*
        pub fn $name() -> Chunk {
            build(&[(Opcode::$variant.index(), 4)])
        }
    )*};
}

bare_ops! {
    /// `ADD` — pop two, push the sum.
    add => Add,
    /// `SUB` — pop two, push the difference.
    sub => Sub,
    /// `MUL` — pop two, push the product.
    mul => Mul,
    /// `DIV` — pop two, push the quotient; zero divisor faults.
    div => Div,
    /// `MOD` — pop two, push the remainder; zero divisor faults.
    modulo => Mod,
    /// `NEG` — negate the top of stack.
    neg => Neg,
    /// `AND` — bitwise and.
    and => And,
    /// `OR` — bitwise or.
    or => Or,
    /// `XOR` — bitwise exclusive or.
    xor => Xor,
    /// `SHL` — shift left.
    shl => Shl,
    /// `SHR` — shift right.
    shr => Shr,
    /// `NOT` — bitwise complement of the top of stack.
    not => Not,
    /// `GT` / `LT` / `EQ` / `NEQ` / `GTE` / `LTE` — comparisons pushing 1 or 0.
    gt => Gt,
    #[allow(missing_docs)]
    lt => Lt,
    #[allow(missing_docs)]
    eq => Eq,
    #[allow(missing_docs)]
    neq => Neq,
    #[allow(missing_docs)]
    gte => Gte,
    #[allow(missing_docs)]
    lte => Lte,
    /// `FMUL` — float multiply on IEEE-754 bit patterns.
    fmul => Fmul,
    /// `FDIV` — float divide; zero divisor faults.
    fdiv => Fdiv,
    /// `F2I` — float bit pattern to integer.
    f2i => F2i,
    /// `I2F` — integer to float bit pattern.
    i2f => I2f,
    /// `DUP` — duplicate the top of stack.
    dup => Dup,
    /// `SWAP` — exchange the top two values.
    swap => Swap,
    /// `ROT` — rotate the top three values.
    rot => Rot,
    /// `DROP` — discard the top of stack.
    drop => Drop,
    /// `OVER` — copy the second value to the top.
    over => Over,
    /// `PICK` — pop a depth, copy the value at that depth to the top.
    pick => Pick,
    /// `PRINT` — pop and yield the decimal rendering.
    print => Print,
    /// `INPUT` — pop the input queue (0 when empty) onto the stack.
    input => Input,
    /// `OUTPUT` — pop to the output log and yield.
    output => Output,
    /// `CALL`'s counterpart: pop the call stack into the IP.
    ret => Ret,
    /// `NET_SEND` / `NET_RECV` — network stubs.
    net_send => NetSend,
    #[allow(missing_docs)]
    net_recv => NetRecv,
    /// `THREAD_START` / `THREAD_JOIN` — threading stubs.
    thread_start => ThreadStart,
    #[allow(missing_docs)]
    thread_join => ThreadJoin,
    /// `CHECKPOINT` — persist VM state through the checkpoint backend.
    checkpoint => Checkpoint,
    /// `SYSCALL` / `INT` — system stubs pushing 0.
    syscall => Syscall,
    #[allow(missing_docs)]
    int => Int,
    /// `HALT` — stop execution.
    halt => Halt,
    /// `NOP` — do nothing.
    nop => Nop,
    /// `HASH` — SHA-256 digest prefix of the decimal top of stack.
    hash => Hash,
    /// `SIGN` — toy signature (v + 1).
    sign => Sign,
    /// `VERIFY` — check a toy signature.
    verify => Verify,
    /// `RNG` — deterministic random value.
    rng => Rng,
    /// `BRK` — yield a break diagnostic.
    brk => Brk,
    /// `TRACE` — yield the decimal top of stack without popping.
    trace => Trace,
    /// `DEBUG` — yield a debug diagnostic.
    debug => Debug,
    /// `ATOMIC` — toggle the atomic-mode flag.
    atomic => Atomic,
}
