//! Schema compatibility checking
//!
//! Each schema type is served by a [`SchemaProvider`] that validates schema
//! text and detects the changes between two revisions. Every detected change
//! records which direction it breaks; a [`SchemaCompatibility`] policy then
//! decides which of those breaks matter.

mod avro;
mod json;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};
use crate::field::SchemaFieldInfo;
use crate::version::SchemaVersionInfo;

pub use avro::AvroSchemaProvider;
pub use json::JsonSchemaProvider;

/// Compatibility policy of a schema family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaCompatibility {
    /// Any change is accepted
    None,
    /// Readers using the new schema can read data written with older ones
    #[default]
    Backward,
    /// Readers using older schemas can read data written with the new one
    Forward,
    /// Both directions
    #[serde(alias = "FULL")]
    Both,
}

impl SchemaCompatibility {
    fn checks_backward(self) -> bool {
        matches!(self, SchemaCompatibility::Backward | SchemaCompatibility::Both)
    }

    fn checks_forward(self) -> bool {
        matches!(self, SchemaCompatibility::Forward | SchemaCompatibility::Both)
    }
}

impl fmt::Display for SchemaCompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchemaCompatibility::None => "NONE",
            SchemaCompatibility::Backward => "BACKWARD",
            SchemaCompatibility::Forward => "FORWARD",
            SchemaCompatibility::Both => "BOTH",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for SchemaCompatibility {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(SchemaCompatibility::None),
            "BACKWARD" => Ok(SchemaCompatibility::Backward),
            "FORWARD" => Ok(SchemaCompatibility::Forward),
            "BOTH" | "FULL" => Ok(SchemaCompatibility::Both),
            other => Err(CatalogError::InvalidArgument(format!(
                "unknown compatibility policy '{}'",
                other
            ))),
        }
    }
}

/// Which lineage versions a new version is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaValidationLevel {
    #[default]
    All,
    Latest,
}

impl SchemaValidationLevel {
    /// Narrow an ascending lineage to the versions this level checks against
    pub fn select<'a>(&self, lineage: &'a [SchemaVersionInfo]) -> &'a [SchemaVersionInfo] {
        match self {
            SchemaValidationLevel::All => lineage,
            SchemaValidationLevel::Latest => {
                let start = lineage.len().saturating_sub(1);
                &lineage[start..]
            }
        }
    }
}

impl fmt::Display for SchemaValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaValidationLevel::All => write!(f, "ALL"),
            SchemaValidationLevel::Latest => write!(f, "LATEST"),
        }
    }
}

impl FromStr for SchemaValidationLevel {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ALL" => Ok(SchemaValidationLevel::All),
            "LATEST" => Ok(SchemaValidationLevel::Latest),
            other => Err(CatalogError::InvalidArgument(format!(
                "unknown validation level '{}'",
                other
            ))),
        }
    }
}

/// Type of schema change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    FieldAdded,
    FieldRemoved,
    TypeChanged,
    /// A type was widened to one that can read all of its values
    TypePromoted,
    /// A property moved between required and optional
    OptionalityChanged,
    EnumSymbolAdded,
    EnumSymbolRemoved,
}

/// A detected change between two schema revisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChange {
    pub change_type: ChangeType,
    /// Path to the changed element (e.g., "fields.email")
    pub path: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    /// New readers can no longer read old data
    pub breaks_backward: bool,
    /// Old readers can no longer read new data
    pub breaks_forward: bool,
    pub description: String,
}

impl SchemaChange {
    pub(crate) fn new(change_type: ChangeType, path: impl Into<String>, description: String) -> Self {
        Self {
            change_type,
            path: path.into(),
            old_value: None,
            new_value: None,
            breaks_backward: false,
            breaks_forward: false,
            description,
        }
    }

    pub(crate) fn values(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_value = old;
        self.new_value = new;
        self
    }

    pub(crate) fn breaking(mut self, backward: bool, forward: bool) -> Self {
        self.breaks_backward = backward;
        self.breaks_forward = forward;
        self
    }

    /// Whether this change violates `policy`
    pub fn violates(&self, policy: SchemaCompatibility) -> bool {
        (policy.checks_backward() && self.breaks_backward)
            || (policy.checks_forward() && self.breaks_forward)
    }
}

/// Result of a compatibility check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityResult {
    pub compatible: bool,
    /// Why the check failed
    pub error_message: Option<String>,
    /// Path of the first offending change
    pub error_location: Option<String>,
    /// Version number the candidate conflicts with
    pub conflicting_version: Option<u64>,
    /// Changes that violate the policy
    pub changes: Vec<SchemaChange>,
}

impl CompatibilityResult {
    pub fn compatible() -> Self {
        Self {
            compatible: true,
            error_message: None,
            error_location: None,
            conflicting_version: None,
            changes: Vec::new(),
        }
    }

    pub fn incompatible(changes: Vec<SchemaChange>, reason: impl Into<String>) -> Self {
        Self {
            compatible: false,
            error_message: Some(reason.into()),
            error_location: changes.first().map(|c| c.path.clone()),
            conflicting_version: None,
            changes,
        }
    }

    /// Judge a set of detected changes under `policy`
    pub fn from_changes(changes: Vec<SchemaChange>, policy: SchemaCompatibility) -> Self {
        let violations: Vec<_> = changes.into_iter().filter(|c| c.violates(policy)).collect();
        if violations.is_empty() {
            return Self::compatible();
        }
        let reasons: Vec<_> = violations.iter().map(|c| c.description.as_str()).collect();
        let reason = format!("{} violation(s) of {}: {}", violations.len(), policy, reasons.join("; "));
        Self::incompatible(violations, reason)
    }
}

/// Introspection record for a registered provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaProviderInfo {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    pub description: String,
}

/// Validation and compatibility for one schema type
pub trait SchemaProvider: Send + Sync {
    /// Type string stored on schema metadata
    fn type_name(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Fails with `InvalidSchema` if `schema_text` is not a valid schema
    fn validate(&self, schema_text: &str) -> Result<()>;

    /// Changes needed to go from `existing` to `candidate`
    fn diff(&self, existing: &str, candidate: &str) -> Result<Vec<SchemaChange>>;

    /// Fields declared by `schema_text`, nested ones included
    fn fields(&self, schema_text: &str) -> Result<Vec<SchemaFieldInfo>>;

    /// Check `candidate` against `lineage` (oldest first), newest first.
    ///
    /// Stops at the first version it conflicts with.
    fn check_compatibility(
        &self,
        candidate: &str,
        lineage: &[SchemaVersionInfo],
        policy: SchemaCompatibility,
    ) -> Result<CompatibilityResult> {
        if policy == SchemaCompatibility::None {
            return Ok(CompatibilityResult::compatible());
        }
        for existing in lineage.iter().rev() {
            let changes = self.diff(&existing.schema_text, candidate)?;
            let mut result = CompatibilityResult::from_changes(changes, policy);
            if !result.compatible {
                result.conflicting_version = Some(existing.version);
                result.error_message = result.error_message.map(|m| {
                    format!("incompatible with version {}: {}", existing.version, m)
                });
                return Ok(result);
            }
        }
        Ok(CompatibilityResult::compatible())
    }

    fn info(&self) -> SchemaProviderInfo {
        SchemaProviderInfo {
            type_name: self.type_name().to_string(),
            name: self.name().to_string(),
            description: self.description().to_string(),
        }
    }
}

/// Providers keyed by type string
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn SchemaProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Avro and JSON Schema providers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AvroSchemaProvider));
        registry.register(Arc::new(JsonSchemaProvider));
        registry
    }

    /// Add a provider, replacing any registered for the same type
    pub fn register(&mut self, provider: Arc<dyn SchemaProvider>) {
        self.providers.insert(provider.type_name().to_string(), provider);
    }

    pub fn get(&self, type_name: &str) -> Result<&Arc<dyn SchemaProvider>> {
        self.providers
            .get(type_name)
            .ok_or_else(|| CatalogError::UnsupportedSchemaType(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.providers.contains_key(type_name)
    }

    pub fn infos(&self) -> Vec<SchemaProviderInfo> {
        let mut infos: Vec<_> = self.providers.values().map(|p| p.info()).collect();
        infos.sort_by(|a, b| a.type_name.cmp(&b.type_name));
        infos
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.providers.keys().collect();
        types.sort();
        f.debug_struct("ProviderRegistry").field("types", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Fingerprint;
    use crate::state::builtin::ENABLED;
    use chrono::Utc;

    fn version(number: u64, text: &str) -> SchemaVersionInfo {
        SchemaVersionInfo {
            id: number,
            schema_metadata_id: 1,
            name: "user".into(),
            version: number,
            schema_text: text.into(),
            fingerprint: Fingerprint::of_text(text),
            description: None,
            state_id: ENABLED,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("full".parse::<SchemaCompatibility>().unwrap(), SchemaCompatibility::Both);
        assert_eq!("Backward".parse::<SchemaCompatibility>().unwrap(), SchemaCompatibility::Backward);
        assert!("sideways".parse::<SchemaCompatibility>().is_err());
        let p: SchemaCompatibility = serde_json::from_str("\"FULL\"").unwrap();
        assert_eq!(p, SchemaCompatibility::Both);
        assert_eq!(SchemaCompatibility::default(), SchemaCompatibility::Backward);
    }

    #[test]
    fn test_validation_level_selects_lineage() {
        let lineage = vec![version(1, "\"int\""), version(2, "\"long\"")];
        assert_eq!(SchemaValidationLevel::All.select(&lineage).len(), 2);
        let latest = SchemaValidationLevel::Latest.select(&lineage);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].version, 2);
        assert!(SchemaValidationLevel::Latest.select(&[]).is_empty());
    }

    #[test]
    fn test_change_violation_by_policy() {
        let change = SchemaChange::new(ChangeType::FieldAdded, "fields.x", "added".into())
            .breaking(true, false);
        assert!(change.violates(SchemaCompatibility::Backward));
        assert!(change.violates(SchemaCompatibility::Both));
        assert!(!change.violates(SchemaCompatibility::Forward));
        assert!(!change.violates(SchemaCompatibility::None));
    }

    #[test]
    fn test_check_reports_conflicting_version() {
        let provider = AvroSchemaProvider;
        let lineage = vec![version(1, "\"int\""), version(2, "\"long\"")];
        // long -> int narrows, so it breaks backward against v2
        let result = provider
            .check_compatibility("\"int\"", &lineage, SchemaCompatibility::Backward)
            .unwrap();
        assert!(!result.compatible);
        assert_eq!(result.conflicting_version, Some(2));

        let result = provider
            .check_compatibility("\"int\"", &lineage, SchemaCompatibility::None)
            .unwrap();
        assert!(result.compatible);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ProviderRegistry::with_defaults();
        assert!(registry.contains("avro"));
        assert!(registry.get("json").is_ok());
        assert!(matches!(
            registry.get("protobuf"),
            Err(CatalogError::UnsupportedSchemaType(_))
        ));
        let types: Vec<_> = registry.infos().into_iter().map(|i| i.type_name).collect();
        assert_eq!(types, vec!["avro", "json"]);
    }
}
