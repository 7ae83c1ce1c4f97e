//! Schema Registry
//!
//! Public facade of the catalog. Composes the version lifecycle manager with
//! row storage, compatibility providers and file storage.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use chrono::Utc;
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use tracing::{debug, info};

use crate::branch::{AggregatedSchemaBranch, BranchKey, SchemaBranch, MASTER_BRANCH};
use crate::checksum::Fingerprint;
use crate::compatibility::{CompatibilityResult, ProviderRegistry, SchemaProviderInfo};
use crate::config::{CatalogConfig, RegistryConfig};
use crate::error::{CatalogError, Result, StorageError};
use crate::field::SchemaFieldQuery;
use crate::manager::SchemaVersionLifecycleManager;
use crate::schema::{AggregatedSchemaMetadataInfo, SchemaMetadata, SchemaMetadataBuilder, SchemaMetadataInfo};
use crate::state::builtin::DELETED;
use crate::state::{StateId, StateMachine, StateMachineInfo};
use crate::storage::{
    FileStorage, LocalFileStorage, OrderByField, QueryParam, SearchQuery, Storable, StorageExt,
    StorageManager, WhereClause,
};
use crate::version::{
    SchemaIdVersion, SchemaVersion, SchemaVersionInfo, SchemaVersionKey, SchemaVersionMergeStrategy,
};

/// Property of [`SchemaRegistry::find_schema_metadata`] that carries ordering,
/// e.g. `name,a,timestamp,d`
pub const ORDER_BY_FIELDS_PARAM: &str = "_orderByFields";

/// The schema catalog
pub struct SchemaRegistry {
    manager: SchemaVersionLifecycleManager,
    file_storage: Option<Arc<dyn FileStorage>>,
    defaults: RegistryConfig,
}

impl SchemaRegistry {
    /// Registry with the built-in lifecycle, the default providers and no
    /// file storage
    pub fn new(storage: Arc<dyn StorageManager>, config: &CatalogConfig) -> Result<Self> {
        Self::with_components(
            storage,
            StateMachine::default(),
            ProviderRegistry::with_defaults(),
            None,
            config,
        )
    }

    /// Registry storing uploads under the configured files directory
    pub fn with_local_files(storage: Arc<dyn StorageManager>, config: &CatalogConfig) -> Result<Self> {
        let files = LocalFileStorage::new(&config.files.directory)?;
        Self::with_components(
            storage,
            StateMachine::default(),
            ProviderRegistry::with_defaults(),
            Some(Arc::new(files)),
            config,
        )
    }

    pub fn with_components(
        storage: Arc<dyn StorageManager>,
        state_machine: StateMachine,
        providers: ProviderRegistry,
        file_storage: Option<Arc<dyn FileStorage>>,
        config: &CatalogConfig,
    ) -> Result<Self> {
        let manager = SchemaVersionLifecycleManager::new(
            storage,
            Arc::new(state_machine),
            providers,
            &config.cache,
        );
        manager.ensure_master_branch()?;
        Ok(Self {
            manager,
            file_storage,
            defaults: config.registry.clone(),
        })
    }

    pub fn manager(&self) -> &SchemaVersionLifecycleManager {
        &self.manager
    }

    fn storage(&self) -> &dyn StorageManager {
        self.manager.storage()
    }

    // ---- schema metadata ----

    /// Metadata builder seeded with the configured defaults
    pub fn new_schema_metadata(
        &self,
        name: impl Into<String>,
        schema_type: impl Into<String>,
    ) -> SchemaMetadataBuilder {
        SchemaMetadata::builder(name, schema_type)
            .compatibility(self.defaults.default_compatibility)
            .validation_level(self.defaults.default_validation_level)
    }

    /// Register a schema family and return its id.
    ///
    /// Registering an existing name returns the existing id, unless `strict`
    /// is set, in which case it fails with `SchemaAlreadyExists`.
    pub fn register_schema_metadata(&self, metadata: SchemaMetadata, strict: bool) -> Result<u64> {
        self.manager.providers().get(&metadata.schema_type)?;
        if let Some(existing) = self.manager.get_schema_metadata(&metadata.name)? {
            return if strict {
                Err(CatalogError::SchemaAlreadyExists(metadata.name))
            } else {
                Ok(existing.id)
            };
        }

        let info = SchemaMetadataInfo {
            id: self.storage().next_id(SchemaMetadataInfo::NAMESPACE)?,
            schema_metadata: metadata,
            timestamp: Utc::now(),
        };
        match self.storage().add_row(&info) {
            Ok(()) => {
                info!(schema = info.name(), id = info.id, "registered schema metadata");
                Ok(info.id)
            }
            Err(StorageError::AlreadyExists { .. }) if !strict => self
                .manager
                .get_schema_metadata(info.name())?
                .map(|existing| existing.id)
                .ok_or_else(|| CatalogError::SchemaNotFound(info.name().to_string())),
            Err(StorageError::AlreadyExists { .. }) => {
                Err(CatalogError::SchemaAlreadyExists(info.schema_metadata.name))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_schema_metadata_info(&self, name: &str) -> Result<Option<SchemaMetadataInfo>> {
        self.manager.get_schema_metadata(name)
    }

    pub fn get_schema_metadata_info_by_id(&self, id: u64) -> Result<Option<SchemaMetadataInfo>> {
        Ok(self
            .storage()
            .find_rows::<SchemaMetadataInfo>(&[QueryParam::new("id", id)], &[])?
            .into_iter()
            .next())
    }

    /// Update the mutable fields of a schema: description, compatibility
    /// and validation level
    pub fn update_schema_metadata(&self, name: &str, metadata: SchemaMetadata) -> Result<SchemaMetadataInfo> {
        let mut existing = self
            .manager
            .get_schema_metadata(name)?
            .ok_or_else(|| CatalogError::SchemaNotFound(name.to_string()))?;
        if metadata.name != name || metadata.schema_type != existing.schema_metadata.schema_type {
            return Err(CatalogError::InvalidArgument(format!(
                "schema '{}' cannot change its name or type",
                name
            )));
        }
        existing.schema_metadata.description = metadata.description;
        existing.schema_metadata.compatibility = metadata.compatibility;
        existing.schema_metadata.validation_level = metadata.validation_level;
        self.storage().add_or_update_row(&existing)?;
        info!(schema = name, "updated schema metadata");
        Ok(existing)
    }

    /// Metadata matching every property. [`ORDER_BY_FIELDS_PARAM`] sets the
    /// ordering instead of filtering.
    pub fn find_schema_metadata(&self, props: &BTreeMap<String, String>) -> Result<Vec<SchemaMetadataInfo>> {
        let mut params = Vec::new();
        let mut order_by = Vec::new();
        for (name, value) in props {
            if name == ORDER_BY_FIELDS_PARAM {
                order_by = parse_order_by_fields(value)?;
            } else {
                params.push(QueryParam::new(name.as_str(), value.as_str()));
            }
        }
        Ok(self.storage().find_rows(&params, &order_by)?)
    }

    pub fn search_schemas(
        &self,
        where_clause: WhereClause,
        order_by: Vec<OrderByField>,
    ) -> Result<Vec<SchemaMetadataInfo>> {
        let query = SearchQuery::search_from(SchemaMetadataInfo::NAMESPACE)
            .filter(where_clause)
            .order_by(order_by);
        Ok(self.storage().search_rows(&query)?)
    }

    /// Schemas whose name or description fuzzy-matches `query`, best first
    pub fn fuzzy_search_schemas(&self, query: &str) -> Result<Vec<SchemaMetadataInfo>> {
        let matcher = SkimMatcherV2::default();
        let mut scored: Vec<(i64, SchemaMetadataInfo)> = self
            .storage()
            .list_rows::<SchemaMetadataInfo>()?
            .into_iter()
            .filter_map(|info| {
                let name_score = matcher.fuzzy_match(&info.schema_metadata.name, query);
                let description_score = info
                    .schema_metadata
                    .description
                    .as_deref()
                    .and_then(|d| matcher.fuzzy_match(d, query));
                name_score.max(description_score).map(|score| (score, info))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name().cmp(b.1.name())));
        debug!(query, hits = scored.len(), "fuzzy schema search");
        Ok(scored.into_iter().map(|(_, info)| info).collect())
    }

    pub fn get_aggregated_schema_metadata_info(&self, name: &str) -> Result<AggregatedSchemaMetadataInfo> {
        let info = self
            .manager
            .get_schema_metadata(name)?
            .ok_or_else(|| CatalogError::SchemaNotFound(name.to_string()))?;
        self.aggregate(info)
    }

    pub fn find_aggregated_schema_metadata(
        &self,
        props: &BTreeMap<String, String>,
    ) -> Result<Vec<AggregatedSchemaMetadataInfo>> {
        self.find_schema_metadata(props)?
            .into_iter()
            .map(|info| self.aggregate(info))
            .collect()
    }

    fn aggregate(&self, info: SchemaMetadataInfo) -> Result<AggregatedSchemaMetadataInfo> {
        let schema_branches = self
            .manager
            .get_schema_branches(info.name())?
            .into_iter()
            .map(|branch| self.manager.aggregate_branch(branch, info.name()))
            .collect::<Result<Vec<_>>>()?;
        Ok(AggregatedSchemaMetadataInfo {
            id: info.id,
            schema_metadata: info.schema_metadata,
            timestamp: info.timestamp,
            schema_branches,
        })
    }

    // ---- versions ----

    pub fn add_schema_version(
        &self,
        branch_name: &str,
        schema_name: &str,
        version: SchemaVersion,
    ) -> Result<SchemaIdVersion> {
        self.manager.add_schema_version(branch_name, schema_name, version)
    }

    /// Register `metadata` if needed, then add the version
    pub fn add_schema_version_with_metadata(
        &self,
        branch_name: &str,
        metadata: SchemaMetadata,
        version: SchemaVersion,
    ) -> Result<SchemaIdVersion> {
        let name = metadata.name.clone();
        self.register_schema_metadata(metadata, false)?;
        self.manager.add_schema_version(branch_name, &name, version)
    }

    /// Live versions of a schema across all branches
    pub fn get_all_versions(&self, schema_name: &str) -> Result<Vec<SchemaVersionInfo>> {
        if self.manager.get_schema_metadata(schema_name)?.is_none() {
            return Err(CatalogError::SchemaNotFound(schema_name.to_string()));
        }
        Ok(self
            .manager
            .get_all_versions(schema_name)?
            .into_iter()
            .filter(|v| v.state_id != DELETED)
            .collect())
    }

    pub fn get_all_versions_in_branch(
        &self,
        branch_name: &str,
        schema_name: &str,
        states: Option<&[StateId]>,
    ) -> Result<Vec<SchemaVersionInfo>> {
        self.manager
            .get_all_versions_in_branch(branch_name, schema_name, states)
    }

    pub fn get_schema_version_info(&self, id: u64) -> Result<SchemaVersionInfo> {
        self.manager.get_schema_version_info(id)
    }

    pub fn get_schema_version_info_by_key(&self, key: &SchemaVersionKey) -> Result<SchemaVersionInfo> {
        self.manager.get_schema_version_info_by_key(key)
    }

    /// The live version of `schema_name` whose text matches `schema_text`
    pub fn get_schema_version_info_by_text(
        &self,
        schema_name: &str,
        schema_text: &str,
    ) -> Result<Option<SchemaVersionInfo>> {
        let fingerprint = Fingerprint::of_text(schema_text);
        Ok(self
            .get_all_versions(schema_name)?
            .into_iter()
            .find(|v| v.fingerprint == fingerprint))
    }

    pub fn get_latest_schema_version_info(
        &self,
        branch_name: &str,
        schema_name: &str,
    ) -> Result<Option<SchemaVersionInfo>> {
        self.manager
            .get_latest_schema_version_info(branch_name, schema_name)
    }

    pub fn check_compatibility(
        &self,
        branch_name: &str,
        schema_name: &str,
        schema_text: &str,
    ) -> Result<CompatibilityResult> {
        self.manager
            .check_compatibility(branch_name, schema_name, schema_text)
    }

    /// Versions on `branch_name` declaring a field matching `query`
    pub fn find_schemas_by_fields(
        &self,
        branch_name: &str,
        query: &SchemaFieldQuery,
    ) -> Result<Vec<SchemaVersionKey>> {
        self.manager.find_schemas_by_fields(branch_name, query)
    }

    pub fn delete_schema_version(&self, key: &SchemaVersionKey) -> Result<()> {
        let version = self.manager.get_schema_version_info_by_key(key)?;
        self.manager.delete(version.id)
    }

    // ---- lifecycle ----

    pub fn enable_schema_version(&self, id: u64) -> Result<()> {
        self.manager.enable(id)
    }

    pub fn disable_schema_version(&self, id: u64) -> Result<()> {
        self.manager.disable(id)
    }

    pub fn archive_schema_version(&self, id: u64) -> Result<()> {
        self.manager.archive(id)
    }

    pub fn start_schema_version_review(&self, id: u64) -> Result<()> {
        self.manager.start_review(id)
    }

    pub fn approve_schema_version_review(&self, id: u64) -> Result<()> {
        self.manager.approve_review(id)
    }

    pub fn request_schema_version_changes(&self, id: u64) -> Result<()> {
        self.manager.request_changes(id)
    }

    pub fn delete_schema_version_by_id(&self, id: u64) -> Result<()> {
        self.manager.delete(id)
    }

    pub fn transition_state(&self, id: u64, target: StateId) -> Result<()> {
        self.manager.transition(id, target)
    }

    // ---- branches ----

    pub fn create_schema_branch(&self, root_version_id: u64, branch: SchemaBranch) -> Result<SchemaBranch> {
        self.manager.create_schema_branch(root_version_id, branch)
    }

    pub fn delete_schema_branch(&self, id: u64) -> Result<()> {
        self.manager.delete_schema_branch(&BranchKey::Id(id))
    }

    pub fn delete_schema_branch_by_name(&self, name: &str) -> Result<()> {
        self.manager.delete_schema_branch(&BranchKey::name(name))
    }

    pub fn get_schema_branch(&self, key: &BranchKey) -> Result<SchemaBranch> {
        self.manager.get_schema_branch(key)
    }

    pub fn get_schema_branches(&self, schema_name: &str) -> Result<Vec<SchemaBranch>> {
        self.manager.get_schema_branches(schema_name)
    }

    pub fn get_schema_branches_for_version(&self, version_id: u64) -> Result<Vec<SchemaBranch>> {
        self.manager.get_schema_branches_for_version(version_id)
    }

    pub fn get_root_version(&self, branch_name: &str) -> Result<Option<SchemaVersionInfo>> {
        let branch = self.manager.get_schema_branch(&BranchKey::name(branch_name))?;
        self.manager.get_root_version(&branch)
    }

    pub fn get_aggregated_schema_branch(
        &self,
        branch_name: &str,
        schema_name: &str,
    ) -> Result<AggregatedSchemaBranch> {
        let branch = self.manager.get_schema_branch(&BranchKey::name(branch_name))?;
        self.manager.aggregate_branch(branch, schema_name)
    }

    pub fn merge_schema_version(
        &self,
        version_id: u64,
        strategy: SchemaVersionMergeStrategy,
    ) -> Result<SchemaIdVersion> {
        self.manager.merge_schema_version(version_id, strategy)
    }

    pub fn master_branch(&self) -> Result<SchemaBranch> {
        self.manager.get_schema_branch(&BranchKey::name(MASTER_BRANCH))
    }

    // ---- introspection ----

    pub fn get_schema_version_lifecycle_state_machine_info(&self) -> StateMachineInfo {
        self.manager.state_machine().to_config()
    }

    pub fn get_supported_schema_providers(&self) -> Vec<SchemaProviderInfo> {
        self.manager.providers().infos()
    }

    // ---- files ----

    fn files(&self) -> Result<&Arc<dyn FileStorage>> {
        self.file_storage
            .as_ref()
            .ok_or_else(|| CatalogError::InvalidArgument("no file storage configured".into()))
    }

    /// Store an uploaded file and return its generated id
    pub fn upload_file(&self, input: &mut dyn Read) -> Result<String> {
        let id = LocalFileStorage::generate_id();
        let stored = self.files()?.upload(input, &id)?;
        info!(file = %stored, "uploaded file");
        Ok(stored)
    }

    pub fn download_file(&self, id: &str) -> Result<Box<dyn Read + Send>> {
        Ok(self.files()?.download(id)?)
    }

    pub fn delete_file(&self, id: &str) -> Result<bool> {
        Ok(self.files()?.delete(id)?)
    }
}

/// Parse `field,a|d,field,a|d,...`
fn parse_order_by_fields(value: &str) -> Result<Vec<OrderByField>> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() % 2 != 0 {
        return Err(CatalogError::InvalidArgument(format!(
            "{} must hold field/direction pairs: '{}'",
            ORDER_BY_FIELDS_PARAM, value
        )));
    }
    parts
        .chunks(2)
        .map(|pair| match pair[1] {
            "a" => Ok(OrderByField::asc(pair[0])),
            "d" => Ok(OrderByField::desc(pair[0])),
            other => Err(CatalogError::InvalidArgument(format!(
                "unknown order direction '{}' for field '{}'",
                other, pair[0]
            ))),
        })
        .collect()
}
