// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

pub mod run;
pub mod slave;
pub mod validate;

use fsperf_core::FsPerfError;
use thiserror::Error;

/// Errors that end a command before or outside the test run.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] FsPerfError),

    #[error("Unknown test area: {name}")]
    UnknownArea { name: String },

    #[error("Failed to write JSON report {path}: {message}")]
    JsonReport { path: String, message: String },
}

impl CliError {
    /// Process exit status: 2 for bad input, 1 for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::UnknownArea { .. }
            | Self::Core(
                FsPerfError::HardValidation(_)
                | FsPerfError::ConfigNotFound { .. }
                | FsPerfError::ConfigParse { .. },
            ) => 2,
            _ => 1,
        }
    }
}

/// Parse a byte count with an optional `K`, `M` or `G` suffix (powers of
/// 1024).
pub fn parse_size(arg: &str) -> Result<u64, String> {
    let arg = arg.trim();
    let (digits, shift) = match arg.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => {
            let shift = match c.to_ascii_uppercase() {
                'K' => 10,
                'M' => 20,
                'G' => 30,
                _ => return Err(format!("unknown size suffix '{}'", c)),
            };
            (&arg[..i], shift)
        }
        _ => (arg, 0),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid size '{}'", arg))?;
    value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| format!("size '{}' is too large", arg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsperf_core::HardValidationError;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096"), Ok(4096));
        assert_eq!(parse_size("64k"), Ok(64 * 1024));
        assert_eq!(parse_size("1M"), Ok(1024 * 1024));
        assert_eq!(parse_size("2G"), Ok(2 << 30));
        assert!(parse_size("12Q").is_err());
        assert!(parse_size("M").is_err());
        assert!(parse_size("99999999999G").is_err());
    }

    #[test]
    fn test_exit_codes() {
        let bad = CliError::Core(FsPerfError::HardValidation(HardValidationError::TooManyBlockSizes {
            count: 17,
            max: 16,
        }));
        assert_eq!(bad.exit_code(), 2);
        assert_eq!(CliError::UnknownArea { name: "x".into() }.exit_code(), 2);
        let io = CliError::Core(FsPerfError::Io {
            context: "test",
            source: std::io::Error::other("boom"),
        });
        assert_eq!(io.exit_code(), 1);
    }
}
