//! Schema Catalog
//!
//! A catalog of schema families (Avro, JSON Schema) whose versions move
//! through a configurable review/enable/archive lifecycle and evolve along
//! branchable lineages.
//!
//! ## Features
//!
//! - **Lifecycle State Machine**: Built-in and custom states with actions bound to transitions
//! - **Compatibility Checking**: BACKWARD, FORWARD, BOTH or NONE against a version lineage
//! - **Branches**: Fork a lineage at any version, evolve it, merge back into MASTER
//! - **Fingerprints**: SHA256 of the schema text detects identical re-submissions
//! - **Pluggable Storage**: Row storage and file storage behind traits
//!
//! ## Architecture
//!
//! ```text
//! SchemaRegistry
//! └── SchemaVersionLifecycleManager
//!     ├── StateMachine          lifecycle states + transition actions
//!     ├── SchemaBranchCache     branches by name / id, TTL bounded
//!     ├── ProviderRegistry      avro, json
//!     └── StorageManager        schema_metadata_info, schema_version_info,
//!                               schema_branch, schema_branch_version_mapping,
//!                               schema_field_info
//! ```

pub mod branch;
pub mod checksum;
pub mod compatibility;
pub mod config;
pub mod error;
pub mod field;
pub mod manager;
pub mod registry;
pub mod schema;
pub mod state;
pub mod storage;
pub mod version;

pub use branch::{BranchKey, SchemaBranch, MASTER_BRANCH};
pub use checksum::Fingerprint;
pub use compatibility::{CompatibilityResult, SchemaCompatibility, SchemaValidationLevel};
pub use config::CatalogConfig;
pub use error::{CatalogError, Result};
pub use field::{SchemaFieldInfo, SchemaFieldQuery};
pub use manager::SchemaVersionLifecycleManager;
pub use registry::SchemaRegistry;
pub use schema::{SchemaMetadata, SchemaMetadataInfo};
pub use state::{StateId, StateMachine};
pub use storage::{InMemoryStorage, StorageManager};
pub use version::{SchemaIdVersion, SchemaVersion, SchemaVersionInfo, SchemaVersionKey, SchemaVersionMergeStrategy};
