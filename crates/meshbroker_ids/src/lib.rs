//! Job identifier type and generator for the mesh broker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error returned when parsing a [`JobId`] from its canonical text form fails.
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

/// A universally unique 128-bit job identifier, rendered as a canonical
/// hyphenated text form for transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Construct a `JobId` from an already-generated UUID. Prefer
    /// [`JobIdGenerator::next`] in broker code; this is for tests and
    /// round-trip parsing.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn parse(value: &str) -> Result<Self, IdParseError> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|e| IdParseError::new(format!("invalid job id: {e}")))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Produces unique [`JobId`]s. The broker holds a single instance for its
/// whole lifetime.
#[derive(Debug, Default)]
pub struct JobIdGenerator;

impl JobIdGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generate a fresh, almost-certainly-unique job id. No cryptographic
    /// randomness is required, only uniqueness with overwhelming probability.
    pub fn next(&self) -> JobId {
        JobId(Uuid::new_v4())
    }
}
