//! Schema metadata types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::branch::AggregatedSchemaBranch;
use crate::compatibility::{SchemaCompatibility, SchemaValidationLevel};
use crate::storage::{PrimaryKey, Storable};

/// Group assigned when none is given
pub const DEFAULT_SCHEMA_GROUP: &str = "default";

fn default_group() -> String {
    DEFAULT_SCHEMA_GROUP.to_string()
}

fn default_evolve() -> bool {
    true
}

/// A named schema family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    /// Unique name
    pub name: String,
    /// Provider type, e.g. `avro` or `json`
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default = "default_group")]
    pub schema_group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub compatibility: SchemaCompatibility,
    #[serde(default)]
    pub validation_level: SchemaValidationLevel,
    /// Whether more than one version may be added
    #[serde(default = "default_evolve")]
    pub evolve: bool,
}

impl SchemaMetadata {
    pub fn builder(name: impl Into<String>, schema_type: impl Into<String>) -> SchemaMetadataBuilder {
        SchemaMetadataBuilder {
            metadata: SchemaMetadata {
                name: name.into(),
                schema_type: schema_type.into(),
                schema_group: default_group(),
                description: None,
                compatibility: SchemaCompatibility::default(),
                validation_level: SchemaValidationLevel::default(),
                evolve: true,
            },
        }
    }
}

/// Builder for [`SchemaMetadata`]
#[derive(Debug, Clone)]
pub struct SchemaMetadataBuilder {
    metadata: SchemaMetadata,
}

impl SchemaMetadataBuilder {
    pub fn schema_group(mut self, group: impl Into<String>) -> Self {
        self.metadata.schema_group = group.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    pub fn compatibility(mut self, compatibility: SchemaCompatibility) -> Self {
        self.metadata.compatibility = compatibility;
        self
    }

    pub fn validation_level(mut self, level: SchemaValidationLevel) -> Self {
        self.metadata.validation_level = level;
        self
    }

    pub fn evolve(mut self, evolve: bool) -> Self {
        self.metadata.evolve = evolve;
        self
    }

    pub fn build(self) -> SchemaMetadata {
        self.metadata
    }
}

/// Stored schema metadata row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMetadataInfo {
    pub id: u64,
    #[serde(flatten)]
    pub schema_metadata: SchemaMetadata,
    pub timestamp: DateTime<Utc>,
}

impl SchemaMetadataInfo {
    pub fn name(&self) -> &str {
        &self.schema_metadata.name
    }
}

impl Storable for SchemaMetadataInfo {
    const NAMESPACE: &'static str = "schema_metadata_info";

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::of("name", &self.schema_metadata.name)
    }
}

/// Metadata together with every branch that holds versions of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedSchemaMetadataInfo {
    pub id: u64,
    pub schema_metadata: SchemaMetadata,
    pub timestamp: DateTime<Utc>,
    pub schema_branches: Vec<AggregatedSchemaBranch>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let meta = SchemaMetadata::builder("orders", "avro").build();
        assert_eq!(meta.schema_group, DEFAULT_SCHEMA_GROUP);
        assert_eq!(meta.compatibility, SchemaCompatibility::Backward);
        assert_eq!(meta.validation_level, SchemaValidationLevel::All);
        assert!(meta.evolve);
    }

    #[test]
    fn test_info_row_is_flat() {
        let info = SchemaMetadataInfo {
            id: 9,
            schema_metadata: SchemaMetadata::builder("orders", "json")
                .compatibility(SchemaCompatibility::Both)
                .build(),
            timestamp: Utc::now(),
        };
        let row = serde_json::to_value(&info).unwrap();
        assert_eq!(row["name"], "orders");
        assert_eq!(row["type"], "json");
        assert_eq!(row["compatibility"], "BOTH");
        assert_eq!(row["id"], 9);

        let back: SchemaMetadataInfo = serde_json::from_value(row).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let meta: SchemaMetadata =
            serde_json::from_str(r#"{"name": "clicks", "type": "avro"}"#).unwrap();
        assert_eq!(meta.schema_group, "default");
        assert!(meta.evolve);
    }
}
