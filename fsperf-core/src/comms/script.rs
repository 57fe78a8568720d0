// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Script text handling for the slave: line iteration, Bourne-style
//! argument splitting and numeric argument parsing.

use thiserror::Error;

use super::transport::EOF_MARKER;

/// A non-empty, non-comment script line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLine<'a> {
    /// 1-based line number, counting every line.
    pub number: usize,
    /// Trimmed text.
    pub text: &'a str,
}

/// Iterate over the executable lines of a script. Iteration stops at a NUL
/// or EOF marker; blank lines and `#` comments are skipped.
pub fn script_lines(script: &str) -> impl Iterator<Item = ScriptLine<'_>> {
    let end = script
        .find(|c: char| c == '\0' || c == EOF_MARKER as char)
        .unwrap_or(script.len());

    script[..end]
        .split('\n')
        .enumerate()
        .map(|(index, line)| ScriptLine {
            number: index + 1,
            text: line.trim(),
        })
        .filter(|line| !line.text.is_empty() && !line.text.starts_with('#'))
}

/// Argument splitting failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenizeError {
    #[error("unterminated single quote")]
    UnterminatedSingleQuote,

    #[error("unterminated double quote")]
    UnterminatedDoubleQuote,

    #[error("backslash at end of line")]
    TrailingBackslash,
}

/// Split a line into arguments using Bourne shell quoting rules.
pub fn tokenize(line: &str) -> Result<Vec<String>, TokenizeError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(TokenizeError::UnterminatedSingleQuote),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('\n') => {}
                            Some(c @ ('"' | '\\' | '$' | '`')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(TokenizeError::UnterminatedDoubleQuote),
                        },
                        Some(c) => current.push(c),
                        None => return Err(TokenizeError::UnterminatedDoubleQuote),
                    }
                }
            }
            '\\' => match chars.next() {
                Some('\n') => {}
                Some(c) => {
                    in_token = true;
                    current.push(c);
                }
                None => return Err(TokenizeError::TrailingBackslash),
            },
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Parse an unsigned argument. Without a fixed `radix`, `0x` selects hex and
/// a leading `0` selects octal.
pub fn parse_number(
    arg: &str,
    name: &str,
    radix: Option<u32>,
    min: u64,
    max: u64,
) -> Result<u64, String> {
    let (digits, radix) = match radix {
        Some(radix) => (arg, radix),
        None => {
            if let Some(hex) = arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
                (hex, 16)
            } else if arg.len() > 1 && arg.starts_with('0') {
                (&arg[1..], 8)
            } else {
                (arg, 10)
            }
        }
    };

    let value = u64::from_str_radix(digits, radix)
        .map_err(|_| format!("invalid {}: {}", name, arg))?;
    if value < min || value > max {
        return Err(format!(
            "{} is out of range: {}, valid range {}..{}",
            name, value, min, max
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_lines() {
        let script = "reset\n\n  # comment\n  open 0 'f' 'w' 'ca'  \nclose 0\x1agarbage\n";
        let lines: Vec<_> = script_lines(script).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], ScriptLine { number: 1, text: "reset" });
        assert_eq!(lines[1].number, 4);
        assert_eq!(lines[1].text, "open 0 'f' 'w' 'ca'");
        assert_eq!(lines[2].number, 5);
    }

    #[test]
    fn test_script_stops_at_nul() {
        let lines: Vec<_> = script_lines("reset\0exit 1\n").collect();
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_tokenize_quoting() {
        assert_eq!(
            tokenize("open 0 'file 30' \"w\" ca").unwrap(),
            vec!["open", "0", "file 30", "w", "ca"]
        );
        assert_eq!(tokenize(r#"a"b c"d"#).unwrap(), vec!["ab cd"]);
        assert_eq!(tokenize(r#"x\ y"#).unwrap(), vec!["x y"]);
        assert_eq!(tokenize(r#""q\"q" "\n""#).unwrap(), vec!["q\"q", "\\n"]);
        assert_eq!(tokenize("open 0 '' w").unwrap(), vec!["open", "0", "", "w"]);
        assert!(tokenize("   ").unwrap().is_empty());
    }

    #[test]
    fn test_tokenize_errors() {
        assert_eq!(
            tokenize("open 'oops").unwrap_err(),
            TokenizeError::UnterminatedSingleQuote
        );
        assert_eq!(
            tokenize("open \"oops").unwrap_err(),
            TokenizeError::UnterminatedDoubleQuote
        );
        assert_eq!(tokenize("x\\").unwrap_err(), TokenizeError::TrailingBackslash);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42", "n", None, 0, 100), Ok(42));
        assert_eq!(parse_number("0x10", "n", None, 0, 100), Ok(16));
        assert_eq!(parse_number("010", "n", None, 0, 100), Ok(8));
        assert_eq!(parse_number("0", "n", None, 0, 100), Ok(0));
        assert_eq!(parse_number("660", "mode", Some(8), 0, 0o777), Ok(0o660));
        assert_eq!(
            parse_number("9", "file index", None, 0, 7),
            Err("file index is out of range: 9, valid range 0..7".to_string())
        );
        assert_eq!(
            parse_number("abc", "file offset", None, 0, 7),
            Err("invalid file offset: abc".to_string())
        );
    }
}
