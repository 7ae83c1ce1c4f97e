//! Schema Catalog CLI
//!
//! Registers schemas, adds versions and drives them through their lifecycle
//! against a catalog persisted as a JSON snapshot.
//!
//! Usage:
//!   schema-catalog register user --type avro
//!   schema-catalog add-version user ./user.avsc
//!   schema-catalog enable 1
//!   schema-catalog branch create user-v2 --from-version 1

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use schema_catalog::compatibility::{SchemaCompatibility, SchemaValidationLevel};
use schema_catalog::storage::{OrderByField, Predicate, WhereClause};
use schema_catalog::{
    CatalogConfig, InMemoryStorage, SchemaBranch, SchemaFieldQuery, SchemaRegistry, SchemaVersion,
    SchemaVersionInfo, SchemaVersionKey, SchemaVersionMergeStrategy, StateId, MASTER_BRANCH,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-catalog")]
#[command(about = "Manage versioned schemas, their lifecycle and branches")]
struct Cli {
    /// Config file layered over the default locations
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Catalog snapshot (overrides storage.data_file)
    #[arg(short, long)]
    data: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a schema family
    Register {
        name: String,
        #[arg(short = 't', long = "type", default_value = "avro")]
        schema_type: String,
        #[arg(short, long)]
        group: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// NONE, BACKWARD, FORWARD or BOTH
        #[arg(long)]
        compatibility: Option<SchemaCompatibility>,
        /// ALL or LATEST
        #[arg(long)]
        validation_level: Option<SchemaValidationLevel>,
        /// Fail if the name is already registered
        #[arg(long)]
        strict: bool,
    },

    /// Add a version from a schema file
    AddVersion {
        name: String,
        file: PathBuf,
        #[arg(short, long, default_value = MASTER_BRANCH)]
        branch: String,
        #[arg(long)]
        description: Option<String>,
    },

    /// Check a schema file against a branch lineage without adding it
    Check {
        name: String,
        file: PathBuf,
        #[arg(short, long, default_value = MASTER_BRANCH)]
        branch: String,
    },

    /// List versions of a schema
    Versions {
        name: String,
        /// Restrict to one branch lineage
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Enable a version
    Enable { id: u64 },

    /// Disable a version
    Disable { id: u64 },

    /// Archive a version
    Archive { id: u64 },

    /// Delete a version, by id or as NAME:VERSION
    Delete { version: String },

    /// Start reviewing a version
    StartReview { id: u64 },

    /// Approve a version under review
    Approve { id: u64 },

    /// Send a version under review back for changes
    RequestChanges { id: u64 },

    /// Move a version to any state, by state name or id
    Transition { id: u64, state: String },

    /// Manage branches
    Branch {
        #[command(subcommand)]
        command: BranchCommands,
    },

    /// Merge a branch version into MASTER
    Merge {
        id: u64,
        /// OPTIMISTIC or PESSIMISTIC
        #[arg(short, long, default_value = "OPTIMISTIC")]
        strategy: SchemaVersionMergeStrategy,
    },

    /// Search schemas by name or description
    Search {
        query: String,
        /// Rank by fuzzy match instead of substring
        #[arg(long)]
        fuzzy: bool,
    },

    /// Find versions on a branch declaring a matching field
    Fields {
        #[arg(short, long, default_value = MASTER_BRANCH)]
        branch: String,
        #[arg(long)]
        namespace: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(short = 't', long = "type")]
        field_type: Option<String>,
    },

    /// Print the lifecycle state machine
    States,

    /// List supported schema types
    Providers,
}

#[derive(Subcommand)]
enum BranchCommands {
    /// Fork a branch at a version
    Create {
        name: String,
        #[arg(short, long)]
        from_version: u64,
        #[arg(long)]
        description: Option<String>,
    },

    /// Delete a branch and its versions
    Delete { name: String },

    /// List the branches holding versions of a schema
    List { schema: String },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = CatalogConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    let data_file = cli.data.unwrap_or_else(|| config.storage.data_file.clone());
    let storage = Arc::new(
        InMemoryStorage::open(&data_file)
            .with_context(|| format!("opening catalog {}", data_file.display()))?,
    );
    let registry = SchemaRegistry::with_local_files(storage.clone(), &config)?;

    let mutated = execute(&registry, cli.command)?;
    if mutated {
        storage.save()?;
        if let Some(path) = storage.snapshot_path() {
            debug!(path = %path.display(), "saved catalog");
        }
    }
    Ok(())
}

/// Runs one command; returns whether the catalog changed
fn execute(registry: &SchemaRegistry, command: Commands) -> anyhow::Result<bool> {
    match command {
        Commands::Register {
            name,
            schema_type,
            group,
            description,
            compatibility,
            validation_level,
            strict,
        } => {
            let mut builder = registry.new_schema_metadata(&name, schema_type);
            if let Some(group) = group {
                builder = builder.schema_group(group);
            }
            if let Some(description) = description {
                builder = builder.description(description);
            }
            if let Some(compatibility) = compatibility {
                builder = builder.compatibility(compatibility);
            }
            if let Some(level) = validation_level {
                builder = builder.validation_level(level);
            }
            let id = registry.register_schema_metadata(builder.build(), strict)?;
            println!("✅ Registered {} (id {})", name, id);
            Ok(true)
        }

        Commands::AddVersion {
            name,
            file,
            branch,
            description,
        } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let mut version = SchemaVersion::new(text);
            if let Some(description) = description {
                version = version.with_description(description);
            }
            let added = registry.add_schema_version(&branch, &name, version)?;
            println!("✅ {} on {}: {}", name, branch, added);
            Ok(true)
        }

        Commands::Check { name, file, branch } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let result = registry.check_compatibility(&branch, &name, &text)?;
            if result.compatible {
                println!("✅ Compatible with {} on {}", name, branch);
            } else {
                println!(
                    "❌ Incompatible: {}",
                    result.error_message.as_deref().unwrap_or("unknown reason")
                );
                for change in result.changes.iter().filter(|c| c.breaks_backward || c.breaks_forward) {
                    println!("   └─ {} at {}", change.description, change.path);
                }
                std::process::exit(1);
            }
            Ok(false)
        }

        Commands::Versions { name, branch } => {
            let versions = match branch {
                Some(branch) => registry.get_all_versions_in_branch(&branch, &name, None)?,
                None => registry.get_all_versions(&name)?,
            };
            let states = registry.manager().state_machine();
            for v in &versions {
                let state = states.state(v.state_id).map(|s| s.name()).unwrap_or("?");
                println!("  {:>4}  v{:<4} {:<16} {}", v.id, v.version, state, v.fingerprint);
            }
            println!("{} version(s)", versions.len());
            Ok(false)
        }

        Commands::Enable { id } => lifecycle(registry, id, "enabled", |r| r.enable_schema_version(id)),
        Commands::Disable { id } => lifecycle(registry, id, "disabled", |r| r.disable_schema_version(id)),
        Commands::Archive { id } => lifecycle(registry, id, "archived", |r| r.archive_schema_version(id)),
        Commands::StartReview { id } => {
            lifecycle(registry, id, "under review", |r| r.start_schema_version_review(id))
        }
        Commands::Approve { id } => lifecycle(registry, id, "reviewed", |r| r.approve_schema_version_review(id)),
        Commands::RequestChanges { id } => {
            lifecycle(registry, id, "sent back for changes", |r| r.request_schema_version_changes(id))
        }

        Commands::Delete { version } => {
            let target = resolve_version(registry, &version)?;
            registry.delete_schema_version_by_id(target.id)?;
            println!("🗑️  Deleted {}", target.key());
            Ok(true)
        }

        Commands::Transition { id, state } => {
            let target = resolve_state(registry, &state)?;
            lifecycle(registry, id, &state, |r| r.transition_state(id, target))
        }

        Commands::Branch { command } => match command {
            BranchCommands::Create {
                name,
                from_version,
                description,
            } => {
                let mut branch = SchemaBranch::new(name);
                if let Some(description) = description {
                    branch = branch.with_description(description);
                }
                let created = registry.create_schema_branch(from_version, branch)?;
                println!("✅ Created branch {} (id {}) at version {}", created.name, created.id, from_version);
                Ok(true)
            }
            BranchCommands::Delete { name } => {
                registry.delete_schema_branch_by_name(&name)?;
                println!("🗑️  Deleted branch {}", name);
                Ok(true)
            }
            BranchCommands::List { schema } => {
                for branch in registry.get_schema_branches(&schema)? {
                    println!("  {:>4}  {}", branch.id, branch.name);
                }
                Ok(false)
            }
        },

        Commands::Merge { id, strategy } => {
            let merged = registry.merge_schema_version(id, strategy)?;
            println!("✅ Merged version {} into {}: {}", id, MASTER_BRANCH, merged);
            Ok(true)
        }

        Commands::Search { query, fuzzy } => {
            let found = if fuzzy {
                registry.fuzzy_search_schemas(&query)?
            } else {
                registry.search_schemas(
                    WhereClause::any(vec![
                        Predicate::contains("name", query.as_str()),
                        Predicate::contains("description", query.as_str()),
                    ]),
                    vec![OrderByField::asc("name")],
                )?
            };
            for info in &found {
                let meta = &info.schema_metadata;
                println!(
                    "  {:<32} {:<6} {:<10} {}",
                    meta.name,
                    meta.schema_type,
                    meta.compatibility,
                    meta.description.as_deref().unwrap_or("")
                );
            }
            println!("{} schema(s)", found.len());
            Ok(false)
        }

        Commands::Fields {
            branch,
            namespace,
            name,
            field_type,
        } => {
            let query = SchemaFieldQuery {
                namespace,
                name,
                field_type,
            };
            let found = registry.find_schemas_by_fields(&branch, &query)?;
            for key in &found {
                println!("  {}", key);
            }
            println!("{} version(s)", found.len());
            Ok(false)
        }

        Commands::States => {
            let info = registry.get_schema_version_lifecycle_state_machine_info();
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(false)
        }

        Commands::Providers => {
            for provider in registry.get_supported_schema_providers() {
                println!("  {:<6} {}", provider.type_name, provider.description);
            }
            Ok(false)
        }
    }
}

fn lifecycle(
    registry: &SchemaRegistry,
    id: u64,
    outcome: &str,
    action: impl FnOnce(&SchemaRegistry) -> schema_catalog::Result<()>,
) -> anyhow::Result<bool> {
    action(registry)?;
    println!("✅ Version {} {}", id, outcome);
    Ok(true)
}

/// `42` or `user:3`
fn resolve_version(registry: &SchemaRegistry, version: &str) -> anyhow::Result<SchemaVersionInfo> {
    if let Ok(id) = version.parse::<u64>() {
        return Ok(registry.get_schema_version_info(id)?);
    }
    let (name, number) = version
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("expected a version id or NAME:VERSION, got '{}'", version))?;
    let number = number.trim_start_matches('v').parse::<u64>()
        .with_context(|| format!("invalid version number in '{}'", version))?;
    Ok(registry.get_schema_version_info_by_key(&SchemaVersionKey::new(name, number))?)
}

fn resolve_state(registry: &SchemaRegistry, state: &str) -> anyhow::Result<StateId> {
    let machine = registry.manager().state_machine();
    if let Ok(id) = state.parse::<StateId>() {
        if machine.state(id).is_some() {
            return Ok(id);
        }
    }
    machine
        .state_by_name(state)
        .map(|s| s.id())
        .ok_or_else(|| anyhow!("unknown lifecycle state '{}'", state))
}
