//! Field index for schema versions
//!
//! Every stored version has one row per declared field, so versions can be
//! looked up by the fields they contain.

use serde::{Deserialize, Serialize};

use crate::storage::{PrimaryKey, QueryParam, Storable};

/// A field declared by a schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaFieldInfo {
    /// Avro record namespace, or the dotted path of the enclosing JSON object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

impl SchemaFieldInfo {
    pub fn new(
        namespace: Option<String>,
        name: impl Into<String>,
        field_type: impl Into<String>,
    ) -> Self {
        Self {
            namespace,
            name: name.into(),
            field_type: field_type.into(),
        }
    }
}

/// Stored field row of one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaFieldRecord {
    pub id: u64,
    pub schema_version_id: u64,
    #[serde(flatten)]
    pub field: SchemaFieldInfo,
}

impl Storable for SchemaFieldRecord {
    const NAMESPACE: &'static str = "schema_field_info";

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::of("id", self.id)
    }
}

/// Field search criteria. Unset criteria match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaFieldQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
}

impl SchemaFieldQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn field_type(mut self, field_type: impl Into<String>) -> Self {
        self.field_type = Some(field_type.into());
        self
    }

    pub(crate) fn params(&self) -> Vec<QueryParam> {
        [
            ("namespace", &self.namespace),
            ("name", &self.name),
            ("type", &self.field_type),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.as_deref().map(|v| QueryParam::new(field, v)))
        .collect()
    }
}
