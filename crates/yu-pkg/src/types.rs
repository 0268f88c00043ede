//! Type definitions for package management

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Package manager type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageManagerType {
    Pip,
    Yum,
}

impl std::fmt::Display for PackageManagerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageManagerType::Pip => write!(f, "pip"),
            PackageManagerType::Yum => write!(f, "yum"),
        }
    }
}

/// What to pip-install on a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipSource {
    /// Package name, resolved by pip on the node
    Package(String),
    /// Local wheel file, copied to the node first
    Wheel(PathBuf),
}

/// What to yum-install on a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YumSource {
    /// Package name, looked up in the configured repositories
    Name(String),
    /// Local `.rpm`, copied to the node first when remote
    File(PathBuf),
}

/// Key/value summary printed by `pip show`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageSummary {
    fields: BTreeMap<String, String>,
}

impl PackageSummary {
    /// Parse `Key: value` lines; lines without a colon are ignored
    #[must_use]
    pub fn parse(output: &str) -> Self {
        let fields = output
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .filter(|(key, _)| !key.is_empty())
            .collect();
        Self { fields }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.get("Name")
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.get("Version")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
