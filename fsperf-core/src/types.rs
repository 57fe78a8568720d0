// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! The slave protocol passes small integers around instead of opaque handles,
//! so every index is range-checked once at construction time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Number of file slots available to a slave.
pub const MAX_HANDLES: usize = 8;

/// Largest accepted I/O block size: 1 GB
const MAX_BLOCK_SIZE: u64 = 1024 * 1024 * 1024;

/// Index into the slave's file handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct HandleIndex(u8);

impl HandleIndex {
    /// Create a new HandleIndex with bounds validation.
    pub fn new(index: u32) -> Result<Self, HardValidationError> {
        if index as usize >= MAX_HANDLES {
            return Err(HardValidationError::OutOfRange {
                field: "file index",
                value: u64::from(index),
                min: 0,
                max: MAX_HANDLES as u64 - 1,
            });
        }
        Ok(Self(index as u8))
    }

    /// Slot position in the handle table.
    pub fn slot(&self) -> usize {
        usize::from(self.0)
    }

    /// Iterate over every valid index.
    pub fn all() -> impl Iterator<Item = HandleIndex> {
        (0..MAX_HANDLES as u8).map(HandleIndex)
    }
}

impl fmt::Display for HandleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for HandleIndex {
    type Error = HardValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<HandleIndex> for u32 {
    fn from(index: HandleIndex) -> Self {
        u32::from(index.0)
    }
}

/// Index into the fixed write-pattern table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PatternIndex(u8);

impl PatternIndex {
    /// Number of patterns in the table.
    pub const COUNT: usize = 11;

    /// Create a new PatternIndex with bounds validation.
    pub fn new(index: u32) -> Result<Self, HardValidationError> {
        if index as usize >= Self::COUNT {
            return Err(HardValidationError::OutOfRange {
                field: "pattern index",
                value: u64::from(index),
                min: 0,
                max: Self::COUNT as u64 - 1,
            });
        }
        Ok(Self(index as u8))
    }

    /// Position in the pattern table.
    pub fn position(&self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for PatternIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for PatternIndex {
    type Error = HardValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PatternIndex> for u32 {
    fn from(index: PatternIndex) -> Self {
        u32::from(index.0)
    }
}

/// Validated I/O block size in bytes.
/// Must be between 1 byte and 1 GB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct BlockSize(u64);

impl BlockSize {
    /// Create a new BlockSize with bounds validation.
    pub fn new(bytes: u64) -> Result<Self, HardValidationError> {
        if bytes == 0 || bytes > MAX_BLOCK_SIZE {
            return Err(HardValidationError::OutOfRange {
                field: "block size",
                value: bytes,
                min: 1,
                max: MAX_BLOCK_SIZE,
            });
        }
        Ok(Self(bytes))
    }

    /// Get the size in bytes.
    pub fn bytes(&self) -> u64 {
        self.0
    }

    /// Get the size as a buffer length.
    pub fn len(&self) -> usize {
        self.0 as usize
    }

    /// Block sizes are never empty.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1024 * 1024 && self.0 % (1024 * 1024) == 0 {
            write!(f, "{}MB", self.0 / (1024 * 1024))
        } else if self.0 >= 1024 && self.0 % 1024 == 0 {
            write!(f, "{}KB", self.0 / 1024)
        } else {
            write!(f, "{}B", self.0)
        }
    }
}

impl TryFrom<u64> for BlockSize {
    type Error = HardValidationError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BlockSize> for u64 {
    fn from(size: BlockSize) -> Self {
        size.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_index_bounds() {
        assert!(HandleIndex::new(0).is_ok());
        assert!(HandleIndex::new(7).is_ok());
        let err = HandleIndex::new(8).unwrap_err();
        assert_eq!(
            err.to_string(),
            "file index is out of range: 8, valid range 0..7"
        );
        assert_eq!(HandleIndex::all().count(), MAX_HANDLES);
    }

    #[test]
    fn test_pattern_index_bounds() {
        assert_eq!(PatternIndex::new(10).unwrap().position(), 10);
        assert!(PatternIndex::new(11).is_err());
    }

    #[test]
    fn test_block_size_display() {
        assert_eq!(BlockSize::new(1).unwrap().to_string(), "1B");
        assert_eq!(BlockSize::new(16384).unwrap().to_string(), "16KB");
        assert_eq!(BlockSize::new(32 * 1024 * 1024).unwrap().to_string(), "32MB");
        assert!(BlockSize::new(0).is_err());
    }

    #[test]
    fn test_block_size_serde() {
        let size: BlockSize = serde_yaml::from_str("4096").unwrap();
        assert_eq!(size.bytes(), 4096);
        assert!(serde_yaml::from_str::<BlockSize>("0").is_err());
    }
}
