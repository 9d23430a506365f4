//! Routing patterns for the dual-write layer.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// Which physical store an operation is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Base,
    Target,
}

impl Side {
    /// The other store.
    pub fn opposite(self) -> Side {
        match self {
            Side::Base => Side::Target,
            Side::Target => Side::Base,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Base => "base",
            Side::Target => "target",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live-switchable routing mode.
///
/// The migration moves through the patterns in declaration order:
/// base only, dual-write with base authoritative, dual-write with target
/// authoritative, target only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    #[default]
    BaseOnly,
    BaseFirst,
    TargetFirst,
    TargetOnly,
}

impl Pattern {
    pub const ALL: [Pattern; 4] = [
        Pattern::BaseOnly,
        Pattern::BaseFirst,
        Pattern::TargetFirst,
        Pattern::TargetOnly,
    ];

    /// The store whose outcome the caller sees and which serves all reads.
    pub fn primary(self) -> Side {
        match self {
            Pattern::BaseOnly | Pattern::BaseFirst => Side::Base,
            Pattern::TargetFirst | Pattern::TargetOnly => Side::Target,
        }
    }

    /// The store that receives best-effort mirrored writes, if any.
    pub fn secondary(self) -> Option<Side> {
        match self {
            Pattern::BaseFirst => Some(Side::Target),
            Pattern::TargetFirst => Some(Side::Base),
            Pattern::BaseOnly | Pattern::TargetOnly => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Pattern::BaseOnly => "base_only",
            Pattern::BaseFirst => "base_first",
            Pattern::TargetFirst => "target_first",
            Pattern::TargetOnly => "target_only",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Pattern::BaseOnly => 0,
            Pattern::BaseFirst => 1,
            Pattern::TargetFirst => 2,
            Pattern::TargetOnly => 3,
        }
    }
}

impl TryFrom<u8> for Pattern {
    type Error = MigrateError;

    fn try_from(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(Pattern::BaseOnly),
            1 => Ok(Pattern::BaseFirst),
            2 => Ok(Pattern::TargetFirst),
            3 => Ok(Pattern::TargetOnly),
            other => Err(MigrateError::Config(format!("unknown pattern: {}", other))),
        }
    }
}

impl FromStr for Pattern {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "base_only" => Ok(Pattern::BaseOnly),
            "base_first" => Ok(Pattern::BaseFirst),
            "target_first" => Ok(Pattern::TargetFirst),
            "target_only" => Ok(Pattern::TargetOnly),
            _ => Err(MigrateError::Config(format!(
                "unknown pattern '{}'. Valid values: base_only, base_first, target_first, target_only",
                s
            ))),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomically accessed pattern cell.
#[derive(Debug)]
pub struct AtomicPattern(AtomicU8);

impl AtomicPattern {
    pub fn new(pattern: Pattern) -> Self {
        Self(AtomicU8::new(pattern.to_u8()))
    }

    /// Snapshot the current pattern.
    ///
    /// Fails only if the cell holds a value outside the four known patterns.
    pub fn load(&self) -> Result<Pattern> {
        Pattern::try_from(self.0.load(Ordering::Acquire))
    }

    /// Replace the pattern, returning the previous raw value decoded.
    pub fn swap(&self, pattern: Pattern) -> Result<Pattern> {
        Pattern::try_from(self.0.swap(pattern.to_u8(), Ordering::AcqRel))
    }

    #[cfg(test)]
    pub(crate) fn store_raw(&self, raw: u8) {
        self.0.store(raw, Ordering::Release);
    }
}
