//! Program loader: chunk lists ↔ newline-separated decimal bytes.

use num_bigint::BigUint;
use num_traits::Num;

use crate::Chunk;

/// Failures while parsing a serialized program.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// The byte stream is not UTF-8.
    #[error("program bytes are not valid UTF-8")]
    Encoding,
    /// A line is not a decimal chunk literal.
    #[error("invalid chunk literal on line {line}: {text:?}")]
    InvalidLiteral {
        /// 1-based line number.
        line: usize,
        /// The offending text.
        text: String,
    },
}

/// Parse newline-separated decimal chunk literals. Blank lines are
/// skipped.
pub fn parse_program(bytes: &[u8]) -> Result<Vec<Chunk>, LoadError> {
    let text = std::str::from_utf8(bytes).map_err(|_| LoadError::Encoding)?;
    let mut chunks = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let chunk =
            BigUint::from_str_radix(line, 10).map_err(|_| LoadError::InvalidLiteral {
                line: i + 1,
                text: line.to_string(),
            })?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

/// Serialize a program as newline-separated decimal literals.
pub fn serialize_program(chunks: &[Chunk]) -> Vec<u8> {
    let mut out = String::new();
    for chunk in chunks {
        out.push_str(&chunk.to_string());
        out.push('\n');
    }
    out.into_bytes()
}
