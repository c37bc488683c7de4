use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpanlaneError};

/// Process-wide span identifier assigned by the event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanId(pub u64);

impl SpanId {
    pub fn parse(input: &str) -> Result<Self> {
        input
            .trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| SpanlaneError::Parse(format!("invalid span id: {input}")))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SpanId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
