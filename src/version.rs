//! Schema version types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checksum::Fingerprint;
use crate::error::{CatalogError, Result};
use crate::state::StateId;
use crate::storage::{PrimaryKey, Storable};

/// A schema revision submitted for addition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub schema_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SchemaVersion {
    pub fn new(schema_text: impl Into<String>) -> Self {
        Self {
            schema_text: schema_text.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A stored, immutable schema revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersionInfo {
    /// Globally unique id
    pub id: u64,
    pub schema_metadata_id: u64,
    /// Owning schema name
    pub name: String,
    /// Per-schema version number, starting at 1
    pub version: u64,
    pub schema_text: String,
    pub fingerprint: Fingerprint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub state_id: StateId,
    pub timestamp: DateTime<Utc>,
}

impl SchemaVersionInfo {
    pub fn id_version(&self) -> SchemaIdVersion {
        SchemaIdVersion {
            schema_metadata_id: self.schema_metadata_id,
            schema_version_id: self.id,
            version: self.version,
        }
    }

    pub fn key(&self) -> SchemaVersionKey {
        SchemaVersionKey::new(self.name.clone(), self.version)
    }
}

impl Storable for SchemaVersionInfo {
    const NAMESPACE: &'static str = "schema_version_info";

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::of("name", &self.name).and("version", self.version)
    }
}

/// Identity handed back after adding or merging a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaIdVersion {
    pub schema_metadata_id: u64,
    pub schema_version_id: u64,
    pub version: u64,
}

impl fmt::Display for SchemaIdVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{} (id {})", self.version, self.schema_version_id)
    }
}

/// A version addressed by schema name and number
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaVersionKey {
    pub schema_name: String,
    pub version: u64,
}

impl SchemaVersionKey {
    pub fn new(schema_name: impl Into<String>, version: u64) -> Self {
        Self {
            schema_name: schema_name.into(),
            version,
        }
    }
}

impl fmt::Display for SchemaVersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:v{}", self.schema_name, self.version)
    }
}

/// How a branch version is merged into master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaVersionMergeStrategy {
    /// Merge if compatible with master's lineage
    #[default]
    Optimistic,
    /// Additionally require that master has not moved past the branch root
    Pessimistic,
}

impl fmt::Display for SchemaVersionMergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaVersionMergeStrategy::Optimistic => write!(f, "OPTIMISTIC"),
            SchemaVersionMergeStrategy::Pessimistic => write!(f, "PESSIMISTIC"),
        }
    }
}

impl FromStr for SchemaVersionMergeStrategy {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "OPTIMISTIC" => Ok(SchemaVersionMergeStrategy::Optimistic),
            "PESSIMISTIC" => Ok(SchemaVersionMergeStrategy::Pessimistic),
            other => Err(CatalogError::InvalidArgument(format!(
                "unknown merge strategy '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::builtin::INITIATED;

    #[test]
    fn test_primary_key_is_name_and_version() {
        let info = SchemaVersionInfo {
            id: 12,
            schema_metadata_id: 3,
            name: "orders".into(),
            version: 4,
            schema_text: "\"string\"".into(),
            fingerprint: Fingerprint::of_text("\"string\""),
            description: None,
            state_id: INITIATED,
            timestamp: Utc::now(),
        };
        assert_eq!(info.primary_key(), PrimaryKey::of("name", "orders").and("version", 4));
        assert_eq!(info.storable_key().namespace, "schema_version_info");
        assert_eq!(info.key().to_string(), "orders:v4");
        assert_eq!(info.id_version().schema_version_id, 12);
    }

    #[test]
    fn test_merge_strategy_parsing() {
        assert_eq!(
            "pessimistic".parse::<SchemaVersionMergeStrategy>().unwrap(),
            SchemaVersionMergeStrategy::Pessimistic
        );
        assert_eq!(SchemaVersionMergeStrategy::default(), SchemaVersionMergeStrategy::Optimistic);
        assert!("eager".parse::<SchemaVersionMergeStrategy>().is_err());
    }
}
