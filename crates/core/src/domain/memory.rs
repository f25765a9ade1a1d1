// Memory limit value type

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;

const KIB: u64 = 1024;

/// Resident-memory threshold in bytes.
///
/// Parsed from human-readable size strings with 1024-based multipliers:
/// `"100K"` -> 102400, `"500M"` -> 524288000, `"1G"` -> 1073741824.
/// A bare number is taken as bytes. An optional trailing `B` is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryLimit(u64);

impl MemoryLimit {
    pub fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }
}

impl FromStr for MemoryLimit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let invalid = || ConfigError::InvalidMemorySize(s.to_string());

        let mut body = raw.strip_suffix(['b', 'B']).unwrap_or(raw);
        let mut multiplier = 1u64;
        if let Some(last) = body.chars().last() {
            multiplier = match last.to_ascii_uppercase() {
                'K' => KIB,
                'M' => KIB * KIB,
                'G' => KIB * KIB * KIB,
                _ => 1,
            };
            if multiplier != 1 {
                body = &body[..body.len() - 1];
            }
        }

        if body.is_empty() || !body.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let value: u64 = body.parse().map_err(|_| invalid())?;
        let bytes = value.checked_mul(multiplier).ok_or_else(invalid)?;
        if bytes == 0 {
            return Err(invalid());
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        if b % (KIB * KIB * KIB) == 0 {
            write!(f, "{}G", b / (KIB * KIB * KIB))
        } else if b % (KIB * KIB) == 0 {
            write!(f, "{}M", b / (KIB * KIB))
        } else if b % KIB == 0 {
            write!(f, "{}K", b / KIB)
        } else {
            write!(f, "{}", b)
        }
    }
}
