//! Node addressing

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of a node; `"localhost"` is local, anything else is remote
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location {
    address: String,
}

impl Location {
    pub const LOCALHOST: &'static str = "localhost";

    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// True only for the literal address `localhost`
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.address == Self::LOCALHOST
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        !self.is_local()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

impl From<&str> for Location {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for Location {
    fn from(address: String) -> Self {
        Self::new(address)
    }
}
