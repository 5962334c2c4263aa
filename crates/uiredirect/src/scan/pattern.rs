//! Byte signatures with whole-byte and nibble wildcards.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// One position of a [`Pattern`]: bits set in `mask` must equal `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternByte {
    pub value: u8,
    pub mask: u8,
}

impl PatternByte {
    pub const ANY: Self = Self { value: 0, mask: 0 };

    pub const fn exact(value: u8) -> Self {
        Self { value, mask: 0xFF }
    }

    #[inline]
    pub fn matches(&self, byte: u8) -> bool {
        byte & self.mask == self.value
    }

    pub fn is_exact(&self) -> bool {
        self.mask == 0xFF
    }
}

/// A parsed signature such as `81 3D ? ? ? ? 80 07 00 00` or `4? 8D 0D ??`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    bytes: Vec<PatternByte>,
}

impl Pattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let mut bytes = Vec::new();
        for token in pattern.split_whitespace() {
            bytes.push(parse_token(token)?);
        }

        if bytes.is_empty() {
            return Err(Error::InvalidPattern("Signature pattern is empty".to_string()));
        }

        Ok(Self { bytes })
    }

    pub fn new(bytes: Vec<PatternByte>) -> Self {
        Self { bytes }
    }

    /// Build a pattern that matches `literal` exactly.
    pub fn from_literal(literal: &[u8]) -> Self {
        Self {
            bytes: literal.iter().copied().map(PatternByte::exact).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[PatternByte] {
        &self.bytes
    }

    /// Check `data` starting at its first byte. `data` may be longer than the pattern.
    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() >= self.bytes.len()
            && self
                .bytes
                .iter()
                .zip(data)
                .all(|(pattern, &byte)| pattern.matches(byte))
    }

    /// Index and value of the first fully literal byte, used as a `memchr` anchor.
    pub(crate) fn anchor(&self) -> Option<(usize, u8)> {
        self.bytes
            .iter()
            .position(PatternByte::is_exact)
            .map(|i| (i, self.bytes[i].value))
    }
}

fn parse_token(token: &str) -> Result<PatternByte> {
    if token == "?" || token == "??" {
        return Ok(PatternByte::ANY);
    }

    let digits: Vec<char> = token.chars().collect();
    if digits.len() != 2 {
        return Err(Error::InvalidPattern(format!(
            "Invalid signature token '{}': expected two hex digits",
            token
        )));
    }

    let mut value = 0u8;
    let mut mask = 0u8;
    for (shift, digit) in [(4, digits[0]), (0, digits[1])] {
        if digit == '?' {
            continue;
        }
        let nibble = digit.to_digit(16).ok_or_else(|| {
            Error::InvalidPattern(format!("Invalid signature token '{}'", token))
        })? as u8;
        value |= nibble << shift;
        mask |= 0xF << shift;
    }

    Ok(PatternByte { value, mask })
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            for shift in [4, 0] {
                if (byte.mask >> shift) & 0xF == 0xF {
                    write!(f, "{:X}", (byte.value >> shift) & 0xF)?;
                } else {
                    f.write_str("?")?;
                }
            }
        }
        Ok(())
    }
}
