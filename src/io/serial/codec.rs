// src/io/serial/codec.rs
//
// ASCII integer-line codec.
//
// Line format (device -> host):
//   <int>;<int>;...;<int>\n
//
// An empty line carries zero values. A single trailing '\r' (CRLF devices)
// is dropped before the line is split.

use thiserror::Error;

use crate::io::ParsedMessage;

const TOKEN_SEPARATOR: char = ';';

/// Why a line could not be turned into integers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    /// `;;`, or a leading or trailing `;`
    #[error("empty token at position {index}")]
    EmptyToken { index: usize },

    #[error("token {index} is not a decimal integer: {token:?}")]
    InvalidToken { index: usize, token: String },

    /// Digits only, but outside the 32-bit signed range.
    #[error("token {index} does not fit in 32 bits: {token}")]
    OutOfRange { index: usize, token: String },

    #[error("line is not valid UTF-8")]
    NotUtf8,
}

/// Codec for semicolon-separated integer lines.
pub struct IntegerLineCodec;

impl IntegerLineCodec {
    /// Decode one line (line feed already removed) into its values.
    ///
    /// Examples:
    ///   `1;2;3`  -> [1, 2, 3]
    ///   ``       -> []
    ///   `12;;7`  -> Err(EmptyToken { index: 1 })
    pub fn decode(line: &[u8]) -> Result<ParsedMessage, ParseFailure> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            return Ok(ParsedMessage::default());
        }

        let text = std::str::from_utf8(line).map_err(|_| ParseFailure::NotUtf8)?;
        let values = text
            .split(TOKEN_SEPARATOR)
            .enumerate()
            .map(|(index, token)| parse_token(index, token))
            .collect::<Result<Vec<i32>, ParseFailure>>()?;

        Ok(ParsedMessage::new(values))
    }
}

/// Parse a single token: optional leading `-`, then one or more ASCII digits.
fn parse_token(index: usize, token: &str) -> Result<i32, ParseFailure> {
    if token.is_empty() {
        return Err(ParseFailure::EmptyToken { index });
    }

    let digits = token.strip_prefix('-').unwrap_or(token);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseFailure::InvalidToken {
            index,
            token: token.to_string(),
        });
    }

    token.parse::<i32>().map_err(|_| ParseFailure::OutOfRange {
        index,
        token: token.to_string(),
    })
}
