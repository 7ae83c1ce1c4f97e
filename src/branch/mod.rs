//! Schema branches
//!
//! A branch forks a schema's version lineage at a root version. Versions added
//! on the branch are reachable from it through mapping rows and stay invisible
//! to master until merged.

mod cache;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{PrimaryKey, QueryParam, Storable, StorageExt, StorageManager};
use crate::version::SchemaVersionInfo;

pub use cache::{BranchFetcher, SchemaBranchCache};

/// Reserved name of the canonical branch
pub const MASTER_BRANCH: &str = "MASTER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaBranch {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SchemaBranch {
    /// An unsaved branch; storage assigns the id
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_master(&self) -> bool {
        self.name == MASTER_BRANCH
    }
}

impl Storable for SchemaBranch {
    const NAMESPACE: &'static str = "schema_branch";

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::of("name", &self.name)
    }
}

/// Records that a version is reachable from a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaBranchVersionMapping {
    pub schema_branch_id: u64,
    pub schema_version_info_id: u64,
}

impl SchemaBranchVersionMapping {
    pub fn new(schema_branch_id: u64, schema_version_info_id: u64) -> Self {
        Self {
            schema_branch_id,
            schema_version_info_id,
        }
    }
}

impl Storable for SchemaBranchVersionMapping {
    const NAMESPACE: &'static str = "schema_branch_version_mapping";

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::of("schema_branch_id", self.schema_branch_id)
            .and("schema_version_info_id", self.schema_version_info_id)
    }
}

/// Branch lookup key: by name or by id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BranchKey {
    Name(String),
    Id(u64),
}

impl BranchKey {
    pub fn name(name: impl Into<String>) -> Self {
        BranchKey::Name(name.into())
    }

    pub fn master() -> Self {
        BranchKey::Name(MASTER_BRANCH.to_string())
    }
}

impl From<&str> for BranchKey {
    fn from(name: &str) -> Self {
        BranchKey::Name(name.to_string())
    }
}

impl From<u64> for BranchKey {
    fn from(id: u64) -> Self {
        BranchKey::Id(id)
    }
}

impl fmt::Display for BranchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchKey::Name(name) => write!(f, "{}", name),
            BranchKey::Id(id) => write!(f, "id {}", id),
        }
    }
}

/// A branch with the versions of one schema it holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedSchemaBranch {
    pub schema_branch: SchemaBranch,
    /// Version the branch forked from; `None` for master
    pub root_schema_version: Option<u64>,
    pub schema_version_infos: Vec<SchemaVersionInfo>,
}

/// Read a branch row straight from storage. Used as the cache fetcher.
pub fn fetch_branch<S: StorageManager + ?Sized>(
    storage: &S,
    key: &BranchKey,
) -> Result<Option<SchemaBranch>> {
    let params = match key {
        BranchKey::Name(name) => QueryParam::new("name", name.as_str()),
        BranchKey::Id(id) => QueryParam::new("id", *id),
    };
    Ok(storage
        .find_rows::<SchemaBranch>(&[params], &[])?
        .into_iter()
        .next())
}
