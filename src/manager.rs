//! Version and branch management
//!
//! [`SchemaVersionLifecycleManager`] owns the algorithms that touch the
//! version graph: numbering and adding versions, forking and deleting
//! branches, merging, and driving versions through the lifecycle state
//! machine. It is also the [`LifecycleServices`] implementation transition
//! actions call back into.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::branch::{
    fetch_branch, AggregatedSchemaBranch, BranchKey, SchemaBranch, SchemaBranchCache,
    SchemaBranchVersionMapping, MASTER_BRANCH,
};
use crate::checksum::Fingerprint;
use crate::compatibility::{CompatibilityResult, ProviderRegistry, SchemaProvider};
use crate::config::CacheConfig;
use crate::error::{CatalogError, Result, StorageError};
use crate::field::{SchemaFieldInfo, SchemaFieldQuery, SchemaFieldRecord};
use crate::schema::SchemaMetadataInfo;
use crate::state::builtin::{ARCHIVED, CHANGES_REQUIRED, DELETED, DISABLED, ENABLED, INITIATED, REVIEWED, START_REVIEW};
use crate::state::{LifecycleServices, StateId, StateMachine};
use crate::storage::{OrderByField, PrimaryKey, QueryParam, Storable, StorableKey, StorageExt, StorageManager};
use crate::version::{
    SchemaIdVersion, SchemaVersion, SchemaVersionInfo, SchemaVersionKey, SchemaVersionMergeStrategy,
};

pub struct SchemaVersionLifecycleManager {
    storage: Arc<dyn StorageManager>,
    state_machine: Arc<StateMachine>,
    branch_cache: SchemaBranchCache,
    providers: ProviderRegistry,
}

impl SchemaVersionLifecycleManager {
    pub fn new(
        storage: Arc<dyn StorageManager>,
        state_machine: Arc<StateMachine>,
        providers: ProviderRegistry,
        cache: &CacheConfig,
    ) -> Self {
        let fetch_storage = Arc::clone(&storage);
        let branch_cache = SchemaBranchCache::new(
            cache.max_branch_cache_size,
            cache.expiry(),
            Arc::new(move |key: &BranchKey| fetch_branch(fetch_storage.as_ref(), key)),
        );
        Self {
            storage,
            state_machine,
            branch_cache,
            providers,
        }
    }

    pub fn storage(&self) -> &dyn StorageManager {
        self.storage.as_ref()
    }

    pub fn state_machine(&self) -> &StateMachine {
        &self.state_machine
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn branch_cache(&self) -> &SchemaBranchCache {
        &self.branch_cache
    }

    /// Create the master branch unless it already exists
    pub fn ensure_master_branch(&self) -> Result<SchemaBranch> {
        match self.branch_cache.get(&BranchKey::master()) {
            Ok(master) => return Ok(master),
            Err(CatalogError::SchemaBranchNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let id = self.storage.next_id(SchemaBranch::NAMESPACE)?;
        let mut master = SchemaBranch::new(MASTER_BRANCH)
            .with_description("Canonical lineage of every schema");
        master.id = id;
        match self.storage.add_row(&master) {
            Ok(()) => info!(id, "created master branch"),
            Err(StorageError::AlreadyExists { .. }) => debug!("master branch created concurrently"),
            Err(e) => return Err(e.into()),
        }
        self.branch_cache.invalidate(&BranchKey::master());
        self.branch_cache.get(&BranchKey::master())
    }

    // ---- lookups ----

    pub fn get_schema_metadata(&self, name: &str) -> Result<Option<SchemaMetadataInfo>> {
        let key = StorableKey::new(SchemaMetadataInfo::NAMESPACE, PrimaryKey::of("name", name));
        Ok(self.storage.get_row(&key)?)
    }

    fn require_schema_metadata(&self, name: &str) -> Result<SchemaMetadataInfo> {
        self.get_schema_metadata(name)?
            .ok_or_else(|| CatalogError::SchemaNotFound(name.to_string()))
    }

    fn provider_for(&self, metadata: &SchemaMetadataInfo) -> Result<&Arc<dyn SchemaProvider>> {
        self.providers.get(&metadata.schema_metadata.schema_type)
    }

    pub fn get_schema_branch(&self, key: &BranchKey) -> Result<SchemaBranch> {
        self.branch_cache.get(key)
    }

    pub fn get_schema_version_info(&self, id: u64) -> Result<SchemaVersionInfo> {
        self.storage
            .find_rows::<SchemaVersionInfo>(&[QueryParam::new("id", id)], &[])?
            .into_iter()
            .next()
            .ok_or_else(|| CatalogError::SchemaNotFound(format!("schema version with id {}", id)))
    }

    pub fn get_schema_version_info_by_key(&self, key: &SchemaVersionKey) -> Result<SchemaVersionInfo> {
        let storable = StorableKey::new(
            SchemaVersionInfo::NAMESPACE,
            PrimaryKey::of("name", &key.schema_name).and("version", key.version),
        );
        self.storage
            .get_row(&storable)?
            .ok_or_else(|| CatalogError::SchemaNotFound(key.to_string()))
    }

    /// Every version of `schema_name` ever created, tombstones included
    pub fn get_all_versions(&self, schema_name: &str) -> Result<Vec<SchemaVersionInfo>> {
        Ok(self.storage.find_rows(
            &[QueryParam::new("name", schema_name)],
            &[OrderByField::asc("version")],
        )?)
    }

    fn branch_mappings(&self, branch_id: u64) -> Result<Vec<SchemaBranchVersionMapping>> {
        Ok(self.storage.find_rows(
            &[QueryParam::new("schema_branch_id", branch_id)],
            &[OrderByField::asc("schema_version_info_id")],
        )?)
    }

    fn version_mappings(&self, version_id: u64) -> Result<Vec<SchemaBranchVersionMapping>> {
        Ok(self.storage.find_rows(
            &[QueryParam::new("schema_version_info_id", version_id)],
            &[OrderByField::asc("schema_branch_id")],
        )?)
    }

    /// Version a non-master branch forked from; `None` for master
    pub fn get_root_version(&self, branch: &SchemaBranch) -> Result<Option<SchemaVersionInfo>> {
        if branch.is_master() {
            return Ok(None);
        }
        match self.branch_mappings(branch.id)?.first() {
            Some(root) => Ok(Some(self.get_schema_version_info(root.schema_version_info_id)?)),
            None => Ok(None),
        }
    }

    fn mapped_versions(&self, branch_id: u64, schema_name: &str) -> Result<Vec<SchemaVersionInfo>> {
        let ids: BTreeSet<u64> = self
            .branch_mappings(branch_id)?
            .into_iter()
            .map(|m| m.schema_version_info_id)
            .collect();
        Ok(self
            .get_all_versions(schema_name)?
            .into_iter()
            .filter(|v| ids.contains(&v.id) && v.state_id != DELETED)
            .collect())
    }

    /// Versions of `schema_name` reachable from `branch`, oldest first.
    ///
    /// For a non-master branch this is master's versions older than the root
    /// followed by the branch's own versions, root included.
    pub fn lineage(&self, branch: &SchemaBranch, schema_name: &str) -> Result<Vec<SchemaVersionInfo>> {
        if branch.is_master() {
            return self.mapped_versions(branch.id, schema_name);
        }
        let own = self.mapped_versions(branch.id, schema_name)?;
        let Some(root) = self.get_root_version(branch)? else {
            return Ok(own);
        };
        if root.name != schema_name {
            return Ok(own);
        }
        let master = self.branch_cache.get(&BranchKey::master())?;
        let mut lineage: Vec<_> = self
            .mapped_versions(master.id, schema_name)?
            .into_iter()
            .filter(|v| v.version < root.version)
            .collect();
        lineage.extend(own);
        Ok(lineage)
    }

    pub fn get_all_versions_in_branch(
        &self,
        branch_name: &str,
        schema_name: &str,
        states: Option<&[StateId]>,
    ) -> Result<Vec<SchemaVersionInfo>> {
        self.require_schema_metadata(schema_name)?;
        let branch = self.branch_cache.get(&BranchKey::name(branch_name))?;
        let lineage = self.lineage(&branch, schema_name)?;
        Ok(match states {
            Some(states) => lineage
                .into_iter()
                .filter(|v| states.contains(&v.state_id))
                .collect(),
            None => lineage,
        })
    }

    pub fn get_latest_schema_version_info(
        &self,
        branch_name: &str,
        schema_name: &str,
    ) -> Result<Option<SchemaVersionInfo>> {
        Ok(self
            .get_all_versions_in_branch(branch_name, schema_name, None)?
            .pop())
    }

    /// Branches the version is reachable from through a mapping row
    pub fn get_schema_branches_for_version(&self, version_id: u64) -> Result<Vec<SchemaBranch>> {
        self.get_schema_version_info(version_id)?;
        self.version_mappings(version_id)?
            .into_iter()
            .map(|m| self.branch_cache.get(&BranchKey::Id(m.schema_branch_id)))
            .collect()
    }

    /// Branches holding at least one live version of `schema_name`
    pub fn get_schema_branches(&self, schema_name: &str) -> Result<Vec<SchemaBranch>> {
        self.require_schema_metadata(schema_name)?;
        let mut branch_ids = BTreeSet::new();
        for version in self.get_all_versions(schema_name)? {
            if version.state_id == DELETED {
                continue;
            }
            for mapping in self.version_mappings(version.id)? {
                branch_ids.insert(mapping.schema_branch_id);
            }
        }
        branch_ids
            .into_iter()
            .map(|id| self.branch_cache.get(&BranchKey::Id(id)))
            .collect()
    }

    pub fn aggregate_branch(
        &self,
        branch: SchemaBranch,
        schema_name: &str,
    ) -> Result<AggregatedSchemaBranch> {
        let root_schema_version = self.get_root_version(&branch)?.map(|v| v.id);
        let schema_version_infos = self.lineage(&branch, schema_name)?;
        Ok(AggregatedSchemaBranch {
            schema_branch: branch,
            root_schema_version,
            schema_version_infos,
        })
    }

    // ---- versions ----

    /// Check `schema_text` against the lineage of `schema_name` on `branch_name`
    pub fn check_compatibility(
        &self,
        branch_name: &str,
        schema_name: &str,
        schema_text: &str,
    ) -> Result<CompatibilityResult> {
        let metadata = self.require_schema_metadata(schema_name)?;
        let provider = self.provider_for(&metadata)?;
        provider.validate(schema_text)?;
        let branch = self.branch_cache.get(&BranchKey::name(branch_name))?;
        let lineage = self.lineage(&branch, schema_name)?;
        provider.check_compatibility(
            schema_text,
            metadata.schema_metadata.validation_level.select(&lineage),
            metadata.schema_metadata.compatibility,
        )
    }

    /// Add a version of `schema_name` on `branch_name`.
    ///
    /// Text identical to the lineage tip returns the tip's identity instead
    /// of creating a version. A version number taken by a concurrent writer
    /// re-reads the lineage and tries the next one.
    pub fn add_schema_version(
        &self,
        branch_name: &str,
        schema_name: &str,
        version: SchemaVersion,
    ) -> Result<SchemaIdVersion> {
        let branch = self.branch_cache.get(&BranchKey::name(branch_name))?;
        let metadata = self.require_schema_metadata(schema_name)?;
        let provider = self.provider_for(&metadata)?;
        provider.validate(&version.schema_text)?;
        let fields = provider.fields(&version.schema_text)?;
        let fingerprint = Fingerprint::of_text(&version.schema_text);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let lineage = self.lineage(&branch, schema_name)?;
            if let Some(tip) = lineage.last() {
                if tip.fingerprint == fingerprint {
                    debug!(schema = schema_name, version = tip.version, "schema text matches lineage tip");
                    return Ok(tip.id_version());
                }
                if !metadata.schema_metadata.evolve {
                    return Err(CatalogError::IncompatibleSchema(format!(
                        "schema '{}' does not allow new versions",
                        schema_name
                    )));
                }
            }

            let result = provider.check_compatibility(
                &version.schema_text,
                metadata.schema_metadata.validation_level.select(&lineage),
                metadata.schema_metadata.compatibility,
            )?;
            if !result.compatible {
                return Err(CatalogError::IncompatibleSchema(
                    result
                        .error_message
                        .unwrap_or_else(|| format!("schema '{}' is incompatible", schema_name)),
                ));
            }

            let next_version = self
                .get_all_versions(schema_name)?
                .iter()
                .map(|v| v.version)
                .max()
                .unwrap_or(0)
                + 1;
            let info = SchemaVersionInfo {
                id: self.storage.next_id(SchemaVersionInfo::NAMESPACE)?,
                schema_metadata_id: metadata.id,
                name: schema_name.to_string(),
                version: next_version,
                schema_text: version.schema_text.clone(),
                fingerprint: fingerprint.clone(),
                description: version.description.clone(),
                state_id: INITIATED,
                timestamp: Utc::now(),
            };
            match self.storage.add_row(&info) {
                Ok(()) => {}
                // the winner advanced the lineage, so this loop makes progress
                Err(StorageError::AlreadyExists { .. }) => {
                    warn!(schema = schema_name, version = next_version, attempt, "version number taken, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            self.storage
                .add_row(&SchemaBranchVersionMapping::new(branch.id, info.id))?;
            self.index_fields(info.id, &fields)?;
            info!(
                schema = schema_name,
                branch = %branch.name,
                version = info.version,
                id = info.id,
                fields = fields.len(),
                "added schema version"
            );
            return Ok(info.id_version());
        }
    }

    fn index_fields(&self, version_id: u64, fields: &[SchemaFieldInfo]) -> Result<()> {
        for field in fields {
            let row = SchemaFieldRecord {
                id: self.storage.next_id(SchemaFieldRecord::NAMESPACE)?,
                schema_version_id: version_id,
                field: field.clone(),
            };
            self.storage.add_row(&row)?;
        }
        Ok(())
    }

    /// Versions reachable from `branch_name` declaring a field that matches
    /// `query`, ordered by schema name then version
    pub fn find_schemas_by_fields(
        &self,
        branch_name: &str,
        query: &SchemaFieldQuery,
    ) -> Result<Vec<SchemaVersionKey>> {
        let branch = self.branch_cache.get(&BranchKey::name(branch_name))?;
        let version_ids: BTreeSet<u64> = self
            .storage
            .find_rows::<SchemaFieldRecord>(&query.params(), &[])?
            .into_iter()
            .map(|row| row.schema_version_id)
            .collect();

        let mut reachable: HashMap<String, BTreeSet<u64>> = HashMap::new();
        let mut keys = Vec::new();
        for id in version_ids {
            let version = match self.get_schema_version_info(id) {
                Ok(version) => version,
                Err(CatalogError::SchemaNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if !reachable.contains_key(&version.name) {
                let ids = self
                    .lineage(&branch, &version.name)?
                    .into_iter()
                    .map(|v| v.id)
                    .collect();
                reachable.insert(version.name.clone(), ids);
            }
            if reachable.get(&version.name).is_some_and(|ids| ids.contains(&version.id)) {
                keys.push(version.key());
            }
        }
        keys.sort_by(|a, b| {
            a.schema_name
                .cmp(&b.schema_name)
                .then(a.version.cmp(&b.version))
        });
        Ok(keys)
    }

    // ---- lifecycle ----

    /// Move a version one hop along a registered transition
    pub fn transition(&self, version_id: u64, target: StateId) -> Result<()> {
        let version = self.get_schema_version_info(version_id)?;
        self.state_machine.execute(&version, target, self)?;
        let source = version.state_id;
        let updated = SchemaVersionInfo {
            state_id: target,
            ..version
        };
        self.storage.add_or_update_row(&updated)?;
        debug!(version_id, source, target, "schema version state updated");
        Ok(())
    }

    pub fn enable(&self, version_id: u64) -> Result<()> {
        self.transition(version_id, ENABLED)
    }

    pub fn disable(&self, version_id: u64) -> Result<()> {
        self.transition(version_id, DISABLED)
    }

    pub fn archive(&self, version_id: u64) -> Result<()> {
        self.transition(version_id, ARCHIVED)
    }

    pub fn start_review(&self, version_id: u64) -> Result<()> {
        self.transition(version_id, START_REVIEW)
    }

    /// Close a review as passed
    pub fn approve_review(&self, version_id: u64) -> Result<()> {
        self.transition(version_id, REVIEWED)
    }

    /// Close a review as needing changes
    pub fn request_changes(&self, version_id: u64) -> Result<()> {
        self.transition(version_id, CHANGES_REQUIRED)
    }

    /// Move a version to DELETED. Deleting a deleted version does nothing.
    pub fn delete(&self, version_id: u64) -> Result<()> {
        let version = self.get_schema_version_info(version_id)?;
        if version.state_id == DELETED {
            warn!(version_id, "schema version already deleted");
            return Ok(());
        }
        self.transition(version_id, DELETED)
    }

    // ---- branches ----

    /// Fork `branch` off the version with id `root_version_id`
    pub fn create_schema_branch(&self, root_version_id: u64, branch: SchemaBranch) -> Result<SchemaBranch> {
        if branch.is_master() {
            return Err(CatalogError::SchemaBranchAlreadyExists(branch.name));
        }
        let name_key = BranchKey::name(&branch.name);
        match self.branch_cache.get(&name_key) {
            Ok(_) => return Err(CatalogError::SchemaBranchAlreadyExists(branch.name)),
            Err(CatalogError::SchemaBranchNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let root = self.get_schema_version_info(root_version_id)?;
        if root.state_id == DELETED {
            return Err(CatalogError::Lifecycle(format!(
                "cannot fork branch '{}' from deleted version {}",
                branch.name, root.key()
            )));
        }

        let row = SchemaBranch {
            id: self.storage.next_id(SchemaBranch::NAMESPACE)?,
            timestamp: Utc::now(),
            ..branch
        };
        match self.storage.add_row(&row) {
            Ok(()) => {}
            Err(StorageError::AlreadyExists { .. }) => {
                return Err(CatalogError::SchemaBranchAlreadyExists(row.name))
            }
            Err(e) => return Err(e.into()),
        }

        self.branch_cache.invalidate(&name_key);
        let stored = self.branch_cache.get(&name_key).map_err(|e| match e {
            CatalogError::SchemaBranchNotFound(name) => CatalogError::Storage(StorageError::Backend(
                format!("branch '{}' missing right after insert", name),
            )),
            other => other,
        })?;
        self.storage
            .add_row(&SchemaBranchVersionMapping::new(stored.id, root.id))?;
        info!(branch = %stored.name, id = stored.id, root = %root.key(), "created schema branch");
        Ok(stored)
    }

    /// Delete a branch and every version it added. The root version survives.
    pub fn delete_schema_branch(&self, key: &BranchKey) -> Result<()> {
        if matches!(key, BranchKey::Name(name) if name == MASTER_BRANCH) {
            return Err(master_deletion());
        }
        let branch = self.branch_cache.get(key)?;
        if branch.is_master() {
            return Err(master_deletion());
        }
        self.branch_cache.invalidate(key);

        let mappings = self.branch_mappings(branch.id)?;
        if let Some((root, owned)) = mappings.split_first() {
            for mapping in owned {
                let version_id = mapping.schema_version_info_id;
                self.delete(version_id).map_err(|e| {
                    CatalogError::branch_deletion(
                        format!(
                            "failed to delete version id {} of branch '{}'",
                            version_id, branch.name
                        ),
                        e,
                    )
                })?;
            }
            self.storage.remove_row(root)?;
        }
        self.storage.remove_row(&branch)?;
        self.branch_cache.invalidate(&BranchKey::Id(branch.id));
        self.branch_cache.invalidate(&BranchKey::name(&branch.name));
        info!(branch = %branch.name, id = branch.id, "deleted schema branch");
        Ok(())
    }

    /// Bring a branch version into master
    pub fn merge_schema_version(
        &self,
        version_id: u64,
        strategy: SchemaVersionMergeStrategy,
    ) -> Result<SchemaIdVersion> {
        let version = self.get_schema_version_info(version_id)?;
        let master = self.branch_cache.get(&BranchKey::master())?;
        let mappings = self.version_mappings(version.id)?;
        if mappings.iter().any(|m| m.schema_branch_id == master.id) {
            debug!(version_id, "version already on master");
            return Ok(version.id_version());
        }
        let Some(source) = mappings.first() else {
            return Err(CatalogError::InvalidArgument(format!(
                "version {} is not on any branch",
                version.key()
            )));
        };
        let branch = self.branch_cache.get(&BranchKey::Id(source.schema_branch_id))?;

        if strategy == SchemaVersionMergeStrategy::Pessimistic {
            let root = self.get_root_version(&branch)?;
            let master_tip = self.lineage(&master, &version.name)?.pop();
            if master_tip.as_ref().map(|v| v.id) != root.as_ref().map(|v| v.id) {
                return Err(CatalogError::IncompatibleSchema(format!(
                    "master has moved past the root of branch '{}'",
                    branch.name
                )));
            }
        }

        let merged = SchemaVersion::new(version.schema_text.clone()).with_description(format!(
            "Merged from branch '{}' version {}",
            branch.name, version.version
        ));
        let id_version = self.add_schema_version(MASTER_BRANCH, &version.name, merged)?;
        info!(
            from = %branch.name,
            version = version.version,
            merged_version = id_version.version,
            %strategy,
            "merged schema version into master"
        );
        Ok(id_version)
    }
}

fn master_deletion() -> CatalogError {
    CatalogError::InvalidSchemaBranchDeletion {
        message: format!("branch '{}' cannot be deleted", MASTER_BRANCH),
        source: None,
    }
}

impl LifecycleServices for SchemaVersionLifecycleManager {
    fn check_enable_compatibility(&self, version: &SchemaVersionInfo) -> Result<()> {
        let metadata = self.require_schema_metadata(&version.name)?;
        let provider = self.provider_for(&metadata)?;
        for mapping in self.version_mappings(version.id)? {
            let branch = self.branch_cache.get(&BranchKey::Id(mapping.schema_branch_id))?;
            let enabled: Vec<_> = self
                .lineage(&branch, &version.name)?
                .into_iter()
                .filter(|v| v.version < version.version && v.state_id == ENABLED)
                .collect();
            let result = provider.check_compatibility(
                &version.schema_text,
                metadata.schema_metadata.validation_level.select(&enabled),
                metadata.schema_metadata.compatibility,
            )?;
            if !result.compatible {
                return Err(CatalogError::IncompatibleSchema(format!(
                    "cannot enable {} on branch '{}': {}",
                    version.key(),
                    branch.name,
                    result.error_message.unwrap_or_default()
                )));
            }
        }
        Ok(())
    }

    fn remove_version_mappings(&self, version: &SchemaVersionInfo) -> Result<()> {
        let mappings = self.version_mappings(version.id)?;
        for mapping in &mappings {
            let branch = self.branch_cache.get(&BranchKey::Id(mapping.schema_branch_id))?;
            if branch.is_master() {
                continue;
            }
            if self.get_root_version(&branch)?.map(|r| r.id) == Some(version.id) {
                return Err(CatalogError::Lifecycle(format!(
                    "{} is the root of branch '{}', delete the branch first",
                    version.key(),
                    branch.name
                )));
            }
        }
        for mapping in &mappings {
            self.storage.remove_row(mapping)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaMetadata;
    use crate::storage::{InMemoryStorage, SearchQuery, StorageResult};
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    const V1: &str = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"}]}"#;
    const V2: &str = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"},{"name":"email","type":"string","default":""}]}"#;
    const V3: &str = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"},{"name":"email","type":"string","default":""},{"name":"age","type":"int","default":0}]}"#;
    const BREAKING: &str = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"},{"name":"email","type":"string"}]}"#;

    fn manager_with(storage: Arc<dyn StorageManager>) -> SchemaVersionLifecycleManager {
        let manager = SchemaVersionLifecycleManager::new(
            storage,
            Arc::new(StateMachine::default()),
            ProviderRegistry::with_defaults(),
            &CacheConfig::default(),
        );
        manager.ensure_master_branch().unwrap();
        manager
    }

    fn register(manager: &SchemaVersionLifecycleManager, metadata: SchemaMetadata) {
        let info = SchemaMetadataInfo {
            id: manager.storage().next_id(SchemaMetadataInfo::NAMESPACE).unwrap(),
            schema_metadata: metadata,
            timestamp: Utc::now(),
        };
        manager.storage().add_row(&info).unwrap();
    }

    fn setup() -> SchemaVersionLifecycleManager {
        let manager = manager_with(Arc::new(InMemoryStorage::new()));
        register(&manager, SchemaMetadata::builder("user", "avro").build());
        manager
    }

    fn add(manager: &SchemaVersionLifecycleManager, branch: &str, text: &str) -> SchemaIdVersion {
        manager
            .add_schema_version(branch, "user", SchemaVersion::new(text))
            .unwrap()
    }

    #[test]
    fn test_ensure_master_is_idempotent() {
        let manager = setup();
        let first = manager.ensure_master_branch().unwrap();
        let second = manager.ensure_master_branch().unwrap();
        assert_eq!(first, second);
        assert!(first.is_master());
    }

    #[test]
    fn test_add_assigns_dense_numbers() {
        let manager = setup();
        assert_eq!(add(&manager, MASTER_BRANCH, V1).version, 1);
        assert_eq!(add(&manager, MASTER_BRANCH, V2).version, 2);
        let info = manager.get_schema_version_info_by_key(&SchemaVersionKey::new("user", 2)).unwrap();
        assert_eq!(info.state_id, INITIATED);
        assert_eq!(info.fingerprint, Fingerprint::of_text(V2));
    }

    #[test]
    fn test_identical_text_returns_tip() {
        let manager = setup();
        let first = add(&manager, MASTER_BRANCH, V1);
        let again = add(&manager, MASTER_BRANCH, &format!("{}\n", V1));
        assert_eq!(first, again);
        assert_eq!(manager.get_all_versions("user").unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_schema_and_branch() {
        let manager = setup();
        let err = manager
            .add_schema_version(MASTER_BRANCH, "ghost", SchemaVersion::new(V1))
            .unwrap_err();
        assert!(matches!(err, CatalogError::SchemaNotFound(_)));
        let err = manager
            .add_schema_version("nowhere", "user", SchemaVersion::new(V1))
            .unwrap_err();
        assert!(matches!(err, CatalogError::SchemaBranchNotFound(_)));
    }

    #[test]
    fn test_invalid_text_and_unsupported_type() {
        let manager = setup();
        let err = manager
            .add_schema_version(MASTER_BRANCH, "user", SchemaVersion::new("{not avro"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidSchema(_)));

        register(&manager, SchemaMetadata::builder("proto", "protobuf").build());
        let err = manager
            .add_schema_version(MASTER_BRANCH, "proto", SchemaVersion::new("syntax = \"proto3\";"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnsupportedSchemaType(_)));
    }

    #[test]
    fn test_non_evolving_schema_rejects_second_version() {
        let manager = setup();
        register(&manager, SchemaMetadata::builder("fixed", "avro").evolve(false).build());
        manager
            .add_schema_version(MASTER_BRANCH, "fixed", SchemaVersion::new(V1))
            .unwrap();
        let err = manager
            .add_schema_version(MASTER_BRANCH, "fixed", SchemaVersion::new(V2))
            .unwrap_err();
        assert!(matches!(err, CatalogError::IncompatibleSchema(_)));
    }

    #[test]
    fn test_latest_validation_level_only_checks_tip() {
        use crate::compatibility::SchemaValidationLevel;

        let manager = setup();
        let with_email = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"},{"name":"email","type":"string"}]}"#;
        let email_as_int = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"},{"name":"email","type":"int","default":0}]}"#;

        for (name, level) in [("latest", SchemaValidationLevel::Latest), ("all", SchemaValidationLevel::All)] {
            register(&manager, SchemaMetadata::builder(name, "avro").validation_level(level).build());
            for text in [with_email, V1] {
                manager
                    .add_schema_version(MASTER_BRANCH, name, SchemaVersion::new(text))
                    .unwrap();
            }
        }
        // compatible with the tip, but retypes a field the first version had
        assert!(manager
            .add_schema_version(MASTER_BRANCH, "latest", SchemaVersion::new(email_as_int))
            .is_ok());
        assert!(matches!(
            manager.add_schema_version(MASTER_BRANCH, "all", SchemaVersion::new(email_as_int)),
            Err(CatalogError::IncompatibleSchema(_))
        ));
    }

    /// Lets another writer win the first version insert
    struct ContendedStorage {
        inner: InMemoryStorage,
        contended: AtomicBool,
    }

    impl StorageManager for ContendedStorage {
        fn get(&self, key: &StorableKey) -> StorageResult<Option<Value>> {
            self.inner.get(key)
        }

        fn find(&self, namespace: &str, params: &[QueryParam], order_by: &[OrderByField]) -> StorageResult<Vec<Value>> {
            self.inner.find(namespace, params, order_by)
        }

        fn add(&self, key: StorableKey, row: Value) -> StorageResult<()> {
            if key.namespace == SchemaVersionInfo::NAMESPACE && !self.contended.swap(true, Ordering::SeqCst) {
                let mut rival = row.clone();
                rival["id"] = Value::from(999);
                self.inner.add(key.clone(), rival)?;
            }
            self.inner.add(key, row)
        }

        fn add_or_update(&self, key: StorableKey, row: Value) -> StorageResult<()> {
            self.inner.add_or_update(key, row)
        }

        fn remove(&self, key: &StorableKey) -> StorageResult<Option<Value>> {
            self.inner.remove(key)
        }

        fn next_id(&self, namespace: &str) -> StorageResult<u64> {
            self.inner.next_id(namespace)
        }

        fn search(&self, query: &SearchQuery) -> StorageResult<Vec<Value>> {
            self.inner.search(query)
        }
    }

    #[test]
    fn test_lost_version_race_retries_with_next_number() {
        let manager = manager_with(Arc::new(ContendedStorage {
            inner: InMemoryStorage::new(),
            contended: AtomicBool::new(false),
        }));
        register(&manager, SchemaMetadata::builder("user", "avro").build());
        let added = add(&manager, MASTER_BRANCH, V1);
        assert_eq!(added.version, 2);
        let numbers: Vec<_> = manager
            .get_all_versions("user")
            .unwrap()
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    /// Delegates to memory with a slow id allocator, widening the window
    /// between reading the latest version number and inserting the next one
    struct SlowStorage {
        inner: InMemoryStorage,
    }

    impl StorageManager for SlowStorage {
        fn get(&self, key: &StorableKey) -> StorageResult<Option<Value>> {
            self.inner.get(key)
        }

        fn find(&self, namespace: &str, params: &[QueryParam], order_by: &[OrderByField]) -> StorageResult<Vec<Value>> {
            self.inner.find(namespace, params, order_by)
        }

        fn add(&self, key: StorableKey, row: Value) -> StorageResult<()> {
            self.inner.add(key, row)
        }

        fn add_or_update(&self, key: StorableKey, row: Value) -> StorageResult<()> {
            self.inner.add_or_update(key, row)
        }

        fn remove(&self, key: &StorableKey) -> StorageResult<Option<Value>> {
            self.inner.remove(key)
        }

        fn next_id(&self, namespace: &str) -> StorageResult<u64> {
            std::thread::sleep(std::time::Duration::from_millis(5));
            self.inner.next_id(namespace)
        }

        fn search(&self, query: &SearchQuery) -> StorageResult<Vec<Value>> {
            self.inner.search(query)
        }
    }

    #[test]
    fn test_concurrent_writers_all_get_a_version() {
        use crate::compatibility::SchemaCompatibility;
        use std::sync::Barrier;

        const WRITERS: usize = 8;
        let manager = manager_with(Arc::new(SlowStorage {
            inner: InMemoryStorage::new(),
        }));
        register(
            &manager,
            SchemaMetadata::builder("user", "avro")
                .compatibility(SchemaCompatibility::None)
                .build(),
        );

        let barrier = Barrier::new(WRITERS);
        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..WRITERS)
                .map(|i| {
                    let manager = &manager;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        let text = format!(
                            r#"{{"type":"record","name":"User","fields":[{{"name":"f{}","type":"long"}}]}}"#,
                            i
                        );
                        barrier.wait();
                        manager.add_schema_version(MASTER_BRANCH, "user", SchemaVersion::new(text))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut numbers: Vec<u64> = results.into_iter().map(|r| r.unwrap().version).collect();
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=WRITERS as u64).collect::<Vec<_>>());
        assert_eq!(manager.get_all_versions("user").unwrap().len(), WRITERS);
    }

    #[test]
    fn test_find_schemas_by_fields_follows_branch_lineage() {
        let manager = setup();
        let v1 = add(&manager, MASTER_BRANCH, V1);
        manager
            .create_schema_branch(v1.schema_version_id, SchemaBranch::new("feature"))
            .unwrap();
        add(&manager, "feature", V2);

        let email = SchemaFieldQuery::new().name("email");
        assert!(manager.find_schemas_by_fields(MASTER_BRANCH, &email).unwrap().is_empty());
        assert_eq!(
            manager.find_schemas_by_fields("feature", &email).unwrap(),
            vec![SchemaVersionKey::new("user", 2)]
        );

        let id = SchemaFieldQuery::new().name("id");
        assert_eq!(
            manager.find_schemas_by_fields("feature", &id).unwrap(),
            vec![SchemaVersionKey::new("user", 1), SchemaVersionKey::new("user", 2)]
        );
        assert!(manager
            .find_schemas_by_fields("feature", &id.clone().field_type("string"))
            .unwrap()
            .is_empty());
        assert!(matches!(
            manager.find_schemas_by_fields("nowhere", &id),
            Err(CatalogError::SchemaBranchNotFound(_))
        ));
    }

    #[test]
    fn test_find_schemas_by_fields_skips_deleted_versions() {
        let manager = setup();
        add(&manager, MASTER_BRANCH, V1);
        let v2 = add(&manager, MASTER_BRANCH, V2);
        manager.delete(v2.schema_version_id).unwrap();
        let found = manager
            .find_schemas_by_fields(MASTER_BRANCH, &SchemaFieldQuery::new().name("email"))
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_branch_lineage_includes_older_master_versions() {
        let manager = setup();
        add(&manager, MASTER_BRANCH, V1);
        let v2 = add(&manager, MASTER_BRANCH, V2);
        let branch = manager
            .create_schema_branch(v2.schema_version_id, SchemaBranch::new("feature"))
            .unwrap();
        add(&manager, "feature", V3);

        let numbers = |branch: &SchemaBranch| -> Vec<u64> {
            manager
                .lineage(branch, "user")
                .unwrap()
                .iter()
                .map(|v| v.version)
                .collect()
        };
        assert_eq!(numbers(&branch), vec![1, 2, 3]);
        let master = manager.get_schema_branch(&BranchKey::master()).unwrap();
        assert_eq!(numbers(&master), vec![1, 2]);

        let aggregated = manager.aggregate_branch(branch, "user").unwrap();
        assert_eq!(aggregated.root_schema_version, Some(v2.schema_version_id));
    }

    #[test]
    fn test_duplicate_branch_names() {
        let manager = setup();
        let v1 = add(&manager, MASTER_BRANCH, V1);
        manager
            .create_schema_branch(v1.schema_version_id, SchemaBranch::new("feature"))
            .unwrap();
        for name in ["feature", MASTER_BRANCH] {
            let err = manager
                .create_schema_branch(v1.schema_version_id, SchemaBranch::new(name))
                .unwrap_err();
            assert!(matches!(err, CatalogError::SchemaBranchAlreadyExists(_)));
        }
    }

    #[test]
    fn test_root_version_cannot_be_deleted_while_branch_exists() {
        let manager = setup();
        let v1 = add(&manager, MASTER_BRANCH, V1);
        manager
            .create_schema_branch(v1.schema_version_id, SchemaBranch::new("feature"))
            .unwrap();
        let err = manager.delete(v1.schema_version_id).unwrap_err();
        assert!(matches!(err, CatalogError::Lifecycle(_)));
        assert_eq!(
            manager.get_schema_version_info(v1.schema_version_id).unwrap().state_id,
            INITIATED
        );
    }

    #[test]
    fn test_branch_deletion_fails_on_enabled_version() {
        let manager = setup();
        let v1 = add(&manager, MASTER_BRANCH, V1);
        manager
            .create_schema_branch(v1.schema_version_id, SchemaBranch::new("feature"))
            .unwrap();
        let v2 = add(&manager, "feature", V2);
        manager.enable(v2.schema_version_id).unwrap();

        let err = manager.delete_schema_branch(&BranchKey::name("feature")).unwrap_err();
        match err {
            CatalogError::InvalidSchemaBranchDeletion { source, .. } => {
                assert!(matches!(source.as_deref(), Some(CatalogError::Lifecycle(_))));
            }
            other => panic!("expected branch deletion error, got {:?}", other),
        }
        // disabling first lets the cascade through
        manager.disable(v2.schema_version_id).unwrap();
        manager.delete_schema_branch(&BranchKey::name("feature")).unwrap();
        assert_eq!(
            manager.get_schema_version_info(v2.schema_version_id).unwrap().state_id,
            DELETED
        );
    }

    #[test]
    fn test_enable_checks_prior_enabled_versions() {
        use crate::compatibility::SchemaCompatibility;

        let manager = setup();
        register(
            &manager,
            SchemaMetadata::builder("open", "avro")
                .compatibility(SchemaCompatibility::None)
                .build(),
        );
        let add_open = |text: &str| {
            manager
                .add_schema_version(MASTER_BRANCH, "open", SchemaVersion::new(text))
                .unwrap()
        };
        let v1 = add_open(V1);
        let v2 = add_open(BREAKING);
        manager.enable(v1.schema_version_id).unwrap();

        let mut metadata = manager.get_schema_metadata("open").unwrap().unwrap();
        metadata.schema_metadata.compatibility = SchemaCompatibility::Backward;
        manager.storage().add_or_update_row(&metadata).unwrap();

        let err = manager.enable(v2.schema_version_id).unwrap_err();
        assert!(matches!(err, CatalogError::IncompatibleSchema(_)));
        assert_eq!(
            manager.get_schema_version_info(v2.schema_version_id).unwrap().state_id,
            INITIATED
        );
    }

    #[test]
    fn test_pessimistic_merge_requires_unmoved_master() {
        let manager = setup();
        let v1 = add(&manager, MASTER_BRANCH, V1);
        manager
            .create_schema_branch(v1.schema_version_id, SchemaBranch::new("feature"))
            .unwrap();
        let v2 = add(&manager, "feature", V2);
        add(&manager, MASTER_BRANCH, V3);

        let err = manager
            .merge_schema_version(v2.schema_version_id, SchemaVersionMergeStrategy::Pessimistic)
            .unwrap_err();
        assert!(matches!(err, CatalogError::IncompatibleSchema(_)));

        let merged = manager
            .merge_schema_version(v2.schema_version_id, SchemaVersionMergeStrategy::Optimistic)
            .unwrap();
        assert_eq!(merged.version, 4);
        let info = manager.get_schema_version_info(merged.schema_version_id).unwrap();
        assert_eq!(
            info.description.as_deref(),
            Some("Merged from branch 'feature' version 2")
        );
    }

    #[test]
    fn test_branches_for_version_and_schema() {
        let manager = setup();
        let v1 = add(&manager, MASTER_BRANCH, V1);
        manager
            .create_schema_branch(v1.schema_version_id, SchemaBranch::new("feature"))
            .unwrap();
        let names: Vec<_> = manager
            .get_schema_branches_for_version(v1.schema_version_id)
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec![MASTER_BRANCH.to_string(), "feature".to_string()]);
        assert_eq!(manager.get_schema_branches("user").unwrap().len(), 2);
    }
}
