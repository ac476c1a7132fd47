//! Shared types for docmirror

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for parsing failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("value cannot be empty")]
    Empty,
    #[error("invalid character in value: {0:?}")]
    InvalidCharacter(char),
    #[error("value cannot start with '{0}'")]
    InvalidStart(char),
    #[error("value cannot end with '{0}'")]
    InvalidEnd(String),
    #[error("value cannot contain '{0}'")]
    InvalidSequence(&'static str),
    #[error("revision must be 40 or 64 hex digits, got {0}")]
    InvalidLength(usize),
}

/// Characters git refuses in ref names.
const FORBIDDEN_REF_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\'];

/// A local branch name, also used to address `origin/<name>`.
///
/// Validation rules:
/// - Non-empty
/// - No whitespace, control characters or any of `~ ^ : ? * [ \`
/// - No `..` or `@{` sequences
/// - Cannot start with `-` or `/`
/// - Cannot end with `/`, `.` or `.lock`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Returns the branch name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Revision expression for this branch's remote-tracking ref.
    pub fn remote_tracking(&self) -> String {
        format!("origin/{}", self.0)
    }
}

impl FromStr for BranchName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        for start in ['-', '/'] {
            if s.starts_with(start) {
                return Err(ParseError::InvalidStart(start));
            }
        }

        for end in ["/", ".", ".lock"] {
            if s.ends_with(end) {
                return Err(ParseError::InvalidEnd(end.to_string()));
            }
        }

        for seq in ["..", "@{"] {
            if s.contains(seq) {
                return Err(ParseError::InvalidSequence(seq));
            }
        }

        for c in s.chars() {
            if c.is_whitespace() || c.is_control() || FORBIDDEN_REF_CHARS.contains(&c) {
                return Err(ParseError::InvalidCharacter(c));
            }
        }

        Ok(BranchName(s.to_string()))
    }
}

impl TryFrom<String> for BranchName {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BranchName> for String {
    fn from(value: BranchName) -> Self {
        value.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable commit identifier (SHA-1 or SHA-256 object id).
///
/// Stored lower-case so two references to the same commit compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Revision(String);

impl Revision {
    /// Returns the full hex id
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated id for display, as `git log --oneline` would print it.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl FromStr for Revision {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        if let Some(c) = s.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(ParseError::InvalidCharacter(c));
        }

        if s.len() != 40 && s.len() != 64 {
            return Err(ParseError::InvalidLength(s.len()));
        }

        Ok(Revision(s.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for Revision {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Revision> for String {
    fn from(value: Revision) -> Self {
        value.0
    }
}

impl From<git2::Oid> for Revision {
    fn from(oid: git2::Oid) -> Self {
        Revision(oid.to_string())
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
