//! Typed identifier wrappers shared across the orchestrator.
//!
//! Bare `String`s for module paths, versions, job ids and binary hashes are
//! how identity bugs happen — passing a version where a path is expected
//! compiles fine and fails at 2am. Each identifier here is a distinct type
//! with its own parsing/validation rules.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned when an identifier fails validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

/// A module's import path, e.g. `golang.org/x/net`.
///
/// Identity for all lookups is canonical `(ModulePath, ModuleVersion)`; the
/// type itself does not validate ecosystem-specific path grammar, only that
/// it is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModulePath(String);

impl ModulePath {
    pub fn new(value: impl Into<String>) -> Result<Self, IdParseError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IdParseError::new("module path must not be empty"));
        }
        if value.contains('@') {
            return Err(IdParseError::new(
                "module path must not contain '@' (version separator)",
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The standard library sentinel module — always skipped by the planner.
    pub fn is_std(&self) -> bool {
        self.0 == "std"
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A module version string. The sentinel `"latest"` means "resolve at scan
/// time"; all other values are expected to be normalized to start with `v`
/// by the caller (the Request Parser does this normalization).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleVersion(String);

pub const LATEST_SENTINEL: &str = "latest";

impl ModuleVersion {
    pub fn new(value: impl Into<String>) -> Result<Self, IdParseError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IdParseError::new("module version must not be empty"));
        }
        Ok(Self(value))
    }

    pub fn latest() -> Self {
        Self(LATEST_SENTINEL.to_string())
    }

    pub fn is_latest(&self) -> bool {
        self.0 == LATEST_SENTINEL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Normalize to start with `v`, leaving the `latest` sentinel untouched.
    pub fn normalized(&self) -> Self {
        if self.is_latest() || self.0.starts_with('v') {
            self.clone()
        } else {
            Self(format!("v{}", self.0))
        }
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job id: `<user>-<startedAt YYMMDD-HHMMSS>`, unique by construction
/// (collision would require the same user starting two jobs in the same
/// second).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Build a job id from its two components. Does not itself check
    /// clock monotonicity; callers pass an already-formatted timestamp.
    pub fn new(user: &str, started_at_stamp: &str) -> Result<Self, IdParseError> {
        if user.is_empty() {
            return Err(IdParseError::new("job user must not be empty"));
        }
        if started_at_stamp.is_empty() {
            return Err(IdParseError::new("job timestamp must not be empty"));
        }
        Ok(Self(format!("{user}-{started_at_stamp}")))
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, IdParseError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IdParseError::new("job id must not be empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A lower-case hex-encoded SHA-256 digest of an analyzer binary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BinaryHash(String);

impl BinaryHash {
    pub fn parse(value: impl Into<String>) -> Result<Self, IdParseError> {
        let value = value.into();
        if value.len() != 64 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(IdParseError::new(
                "binary version must be a 64-character hex sha256 digest",
            ));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BinaryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
