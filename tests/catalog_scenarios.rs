//! End-to-end catalog scenarios
//!
//! Drives the public registry API through registration, versioning, the
//! lifecycle and branches.

use std::sync::Arc;

use schema_catalog::branch::BranchKey;
use schema_catalog::compatibility::ProviderRegistry;
use schema_catalog::error::StateMachineError;
use schema_catalog::state::builtin::{DELETED, DISABLED, ENABLED, INITIATED};
use schema_catalog::state::{FnAction, LifecycleState, StateMachine, Transition};
use schema_catalog::{
    CatalogConfig, CatalogError, InMemoryStorage, SchemaBranch, SchemaFieldQuery, SchemaMetadata,
    SchemaRegistry, SchemaVersion, SchemaVersionKey, SchemaVersionMergeStrategy, MASTER_BRANCH,
};
use tempfile::TempDir;

const USER_V1: &str = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"}]}"#;

const USER_EMAIL_NO_DEFAULT: &str = r#"{"type":"record","name":"User","fields":[
    {"name":"id","type":"long"},
    {"name":"email","type":"string"}
]}"#;

const USER_EMAIL: &str = r#"{"type":"record","name":"User","fields":[
    {"name":"id","type":"long"},
    {"name":"email","type":"string","default":""}
]}"#;

const USER_EMAIL_NAME: &str = r#"{"type":"record","name":"User","fields":[
    {"name":"id","type":"long"},
    {"name":"email","type":"string","default":""},
    {"name":"name","type":"string","default":""}
]}"#;

fn registry() -> SchemaRegistry {
    SchemaRegistry::new(Arc::new(InMemoryStorage::new()), &CatalogConfig::default()).unwrap()
}

fn registry_with_schema() -> SchemaRegistry {
    let registry = registry();
    registry
        .register_schema_metadata(SchemaMetadata::builder("S", "avro").build(), true)
        .unwrap();
    registry
}

fn state_of(registry: &SchemaRegistry, id: u64) -> u8 {
    registry.get_schema_version_info(id).unwrap().state_id
}

fn master_numbers(registry: &SchemaRegistry) -> Vec<u64> {
    registry
        .get_all_versions_in_branch(MASTER_BRANCH, "S", None)
        .unwrap()
        .into_iter()
        .map(|v| v.version)
        .collect()
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_incompatible_version_leaves_counter_untouched() {
    let registry = registry_with_schema();

    let v1 = registry
        .add_schema_version(MASTER_BRANCH, "S", SchemaVersion::new(USER_V1))
        .unwrap();
    assert_eq!(v1.version, 1);
    assert_eq!(state_of(&registry, v1.schema_version_id), INITIATED);

    let err = registry
        .add_schema_version(MASTER_BRANCH, "S", SchemaVersion::new(USER_EMAIL_NO_DEFAULT))
        .unwrap_err();
    assert!(matches!(err, CatalogError::IncompatibleSchema(_)), "got {:?}", err);

    let v2 = registry
        .add_schema_version(MASTER_BRANCH, "S", SchemaVersion::new(USER_EMAIL))
        .unwrap();
    assert_eq!(v2.version, 2);
}

#[test]
fn test_enable_disable_and_illegal_repeat() {
    let registry = registry_with_schema();
    let v1 = registry
        .add_schema_version(MASTER_BRANCH, "S", SchemaVersion::new(USER_V1))
        .unwrap()
        .schema_version_id;

    registry.enable_schema_version(v1).unwrap();
    assert_eq!(state_of(&registry, v1), ENABLED);
    registry.disable_schema_version(v1).unwrap();
    assert_eq!(state_of(&registry, v1), DISABLED);

    let err = registry.disable_schema_version(v1).unwrap_err();
    assert!(matches!(err, CatalogError::Lifecycle(_)), "got {:?}", err);
    assert_eq!(state_of(&registry, v1), DISABLED);
}

#[test]
fn test_branch_versions_stay_off_master_until_deleted() {
    let registry = registry_with_schema();
    let v1 = registry
        .add_schema_version(MASTER_BRANCH, "S", SchemaVersion::new(USER_V1))
        .unwrap()
        .schema_version_id;
    registry.enable_schema_version(v1).unwrap();

    let b1 = registry
        .create_schema_branch(v1, SchemaBranch::new("B1"))
        .unwrap();
    let v2 = registry
        .add_schema_version("B1", "S", SchemaVersion::new(USER_EMAIL))
        .unwrap();
    assert_eq!(v2.version, 2);

    let on_branch: Vec<_> = registry
        .get_schema_branches_for_version(v2.schema_version_id)
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(on_branch, vec!["B1"]);
    assert_eq!(master_numbers(&registry), vec![1]);

    registry.delete_schema_branch(b1.id).unwrap();
    assert_eq!(state_of(&registry, v2.schema_version_id), DELETED);
    assert_eq!(state_of(&registry, v1), ENABLED);
    assert_eq!(master_numbers(&registry), vec![1]);
    assert!(matches!(
        registry.get_schema_branch(&BranchKey::name("B1")),
        Err(CatalogError::SchemaBranchNotFound(_))
    ));
}

// =============================================================================
// Versions and branches
// =============================================================================

#[test]
fn test_numbers_are_shared_across_branches() {
    let registry = registry_with_schema();
    let v1 = registry
        .add_schema_version(MASTER_BRANCH, "S", SchemaVersion::new(USER_V1))
        .unwrap();
    registry
        .create_schema_branch(v1.schema_version_id, SchemaBranch::new("feature"))
        .unwrap();

    let on_branch = registry
        .add_schema_version("feature", "S", SchemaVersion::new(USER_EMAIL))
        .unwrap();
    let on_master = registry
        .add_schema_version(MASTER_BRANCH, "S", SchemaVersion::new(USER_EMAIL_NAME))
        .unwrap();

    assert_eq!(on_branch.version, 2);
    assert_eq!(on_master.version, 3);
    assert_eq!(master_numbers(&registry), vec![1, 3]);

    let branch_numbers: Vec<_> = registry
        .get_all_versions_in_branch("feature", "S", None)
        .unwrap()
        .into_iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(branch_numbers, vec![1, 2]);
}

#[test]
fn test_identical_text_returns_existing_tip() {
    let registry = registry_with_schema();
    let first = registry
        .add_schema_version(MASTER_BRANCH, "S", SchemaVersion::new(USER_V1))
        .unwrap();
    let again = registry
        .add_schema_version(MASTER_BRANCH, "S", SchemaVersion::new(format!("  {}\n", USER_V1)))
        .unwrap();
    assert_eq!(again, first);
    assert_eq!(registry.get_all_versions("S").unwrap().len(), 1);
}

#[test]
fn test_branch_name_is_reusable_after_deletion() {
    let registry = registry_with_schema();
    let v1 = registry
        .add_schema_version(MASTER_BRANCH, "S", SchemaVersion::new(USER_V1))
        .unwrap()
        .schema_version_id;

    let first = registry.create_schema_branch(v1, SchemaBranch::new("feature")).unwrap();
    assert!(matches!(
        registry.create_schema_branch(v1, SchemaBranch::new("feature")),
        Err(CatalogError::SchemaBranchAlreadyExists(_))
    ));
    registry.delete_schema_branch_by_name("feature").unwrap();

    let second = registry.create_schema_branch(v1, SchemaBranch::new("feature")).unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(
        registry.get_root_version("feature").unwrap().map(|v| v.id),
        Some(v1)
    );
}

#[test]
fn test_master_cannot_be_deleted() {
    let registry = registry();
    let master = registry.master_branch().unwrap();

    for result in [
        registry.delete_schema_branch(master.id),
        registry.delete_schema_branch_by_name(MASTER_BRANCH),
    ] {
        assert!(matches!(
            result,
            Err(CatalogError::InvalidSchemaBranchDeletion { .. })
        ));
    }
    assert_eq!(registry.master_branch().unwrap(), master);
}

#[test]
fn test_optimistic_merge_lands_on_master() {
    let registry = registry_with_schema();
    let v1 = registry
        .add_schema_version(MASTER_BRANCH, "S", SchemaVersion::new(USER_V1))
        .unwrap();
    registry
        .create_schema_branch(v1.schema_version_id, SchemaBranch::new("feature"))
        .unwrap();
    let v2 = registry
        .add_schema_version("feature", "S", SchemaVersion::new(USER_EMAIL))
        .unwrap();

    let merged = registry
        .merge_schema_version(v2.schema_version_id, SchemaVersionMergeStrategy::Optimistic)
        .unwrap();
    assert_eq!(merged.version, 3);
    let info = registry
        .get_schema_version_info_by_key(&SchemaVersionKey::new("S", 3))
        .unwrap();
    assert_eq!(info.description.as_deref(), Some("Merged from branch 'feature' version 2"));
    assert_eq!(master_numbers(&registry), vec![1, 3]);

    // merging a master version is a no-op
    let again = registry
        .merge_schema_version(merged.schema_version_id, SchemaVersionMergeStrategy::Pessimistic)
        .unwrap();
    assert_eq!(again, merged);
}

#[test]
fn test_delete_version_by_key() {
    let registry = registry_with_schema();
    let v1 = registry
        .add_schema_version(MASTER_BRANCH, "S", SchemaVersion::new(USER_V1))
        .unwrap();
    registry
        .delete_schema_version(&SchemaVersionKey::new("S", 1))
        .unwrap();
    assert_eq!(state_of(&registry, v1.schema_version_id), DELETED);
    assert!(master_numbers(&registry).is_empty());
    assert!(registry.get_all_versions("S").unwrap().is_empty());

    // deleting twice is harmless
    registry
        .delete_schema_version(&SchemaVersionKey::new("S", 1))
        .unwrap();
}

// =============================================================================
// Custom lifecycle
// =============================================================================

#[test]
fn test_custom_state_and_transition() {
    let mut builder = StateMachine::builder();
    builder
        .register(LifecycleState::custom(40, "QUARANTINED", "Held for inspection"))
        .unwrap();
    builder
        .transition(
            Transition::new(INITIATED, 40),
            Arc::new(FnAction::new("quarantine", |_ctx| Ok(()))),
        )
        .unwrap();

    let err = builder
        .register(LifecycleState::custom(40, "HELD", "Duplicate id"))
        .unwrap_err();
    assert!(matches!(err, StateMachineError::DuplicateState { id: 40, .. }));
    let err = builder
        .register(LifecycleState::custom(9, "EARLY", "Reserved id"))
        .unwrap_err();
    assert!(matches!(err, StateMachineError::InvalidCustomStateId { id: 9, .. }));

    let registry = SchemaRegistry::with_components(
        Arc::new(InMemoryStorage::new()),
        builder.build(),
        ProviderRegistry::with_defaults(),
        None,
        &CatalogConfig::default(),
    )
    .unwrap();
    registry
        .register_schema_metadata(SchemaMetadata::builder("S", "avro").build(), false)
        .unwrap();
    let v1 = registry
        .add_schema_version(MASTER_BRANCH, "S", SchemaVersion::new(USER_V1))
        .unwrap()
        .schema_version_id;

    registry.transition_state(v1, 40).unwrap();
    assert_eq!(state_of(&registry, v1), 40);
    assert!(matches!(
        registry.enable_schema_version(v1),
        Err(CatalogError::Lifecycle(_))
    ));

    let info = registry.get_schema_version_lifecycle_state_machine_info();
    assert!(info
        .transitions
        .iter()
        .any(|t| t.source_state_id == INITIATED && t.target_state_id == 40 && t.action == "quarantine"));
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn test_field_search_spans_schemas_and_respects_branches() {
    let registry = registry_with_schema();
    registry
        .register_schema_metadata(SchemaMetadata::builder("P", "json").build(), true)
        .unwrap();
    let v1 = registry
        .add_schema_version(MASTER_BRANCH, "S", SchemaVersion::new(USER_V1))
        .unwrap();
    registry
        .add_schema_version(
            MASTER_BRANCH,
            "P",
            SchemaVersion::new(r#"{"type":"object","properties":{"email":{"type":"string"}}}"#),
        )
        .unwrap();
    registry
        .create_schema_branch(v1.schema_version_id, SchemaBranch::new("B1"))
        .unwrap();
    registry
        .add_schema_version("B1", "S", SchemaVersion::new(USER_EMAIL))
        .unwrap();

    let email = SchemaFieldQuery::new().name("email");
    assert_eq!(
        registry.find_schemas_by_fields(MASTER_BRANCH, &email).unwrap(),
        vec![SchemaVersionKey::new("P", 1)]
    );
    assert_eq!(
        registry.find_schemas_by_fields("B1", &email).unwrap(),
        vec![SchemaVersionKey::new("S", 2)]
    );
    assert_eq!(
        registry
            .find_schemas_by_fields(MASTER_BRANCH, &SchemaFieldQuery::new().field_type("long"))
            .unwrap(),
        vec![SchemaVersionKey::new("S", 1)]
    );
}

#[test]
fn test_catalog_survives_snapshot_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("catalog.json");

    {
        let storage = Arc::new(InMemoryStorage::open(&path).unwrap());
        let registry = SchemaRegistry::new(storage.clone(), &CatalogConfig::default()).unwrap();
        registry
            .register_schema_metadata(SchemaMetadata::builder("S", "avro").build(), false)
            .unwrap();
        let v1 = registry
            .add_schema_version(MASTER_BRANCH, "S", SchemaVersion::new(USER_V1))
            .unwrap();
        registry.enable_schema_version(v1.schema_version_id).unwrap();
        storage.save().unwrap();
    }

    let registry =
        SchemaRegistry::new(Arc::new(InMemoryStorage::open(&path).unwrap()), &CatalogConfig::default())
            .unwrap();
    let latest = registry
        .get_latest_schema_version_info(MASTER_BRANCH, "S")
        .unwrap()
        .unwrap();
    assert_eq!(latest.version, 1);
    assert_eq!(latest.state_id, ENABLED);

    let v2 = registry
        .add_schema_version(MASTER_BRANCH, "S", SchemaVersion::new(USER_EMAIL))
        .unwrap();
    assert_eq!(v2.version, 2);
}
