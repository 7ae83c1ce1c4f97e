//! Avro schema provider

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::{CatalogError, Result};
use crate::field::SchemaFieldInfo;

use super::{ChangeType, SchemaChange, SchemaProvider};

/// Validates with `apache-avro` and compares records field by field
#[derive(Debug, Clone, Copy, Default)]
pub struct AvroSchemaProvider;

impl SchemaProvider for AvroSchemaProvider {
    fn type_name(&self) -> &str {
        "avro"
    }

    fn name(&self) -> &str {
        "Avro schema provider"
    }

    fn description(&self) -> &str {
        "Apache Avro schemas with record field evolution rules"
    }

    fn validate(&self, schema_text: &str) -> Result<()> {
        apache_avro::Schema::parse_str(schema_text)
            .map(|_| ())
            .map_err(|e| CatalogError::InvalidSchema(e.to_string()))
    }

    fn diff(&self, existing: &str, candidate: &str) -> Result<Vec<SchemaChange>> {
        let old = parse(existing)?;
        let new = parse(candidate)?;
        let mut changes = Vec::new();
        detect_type_changes(&old, &new, "", &mut changes);
        Ok(changes)
    }

    fn fields(&self, schema_text: &str) -> Result<Vec<SchemaFieldInfo>> {
        let schema = parse(schema_text)?;
        let mut found = Vec::new();
        collect_fields(&schema, None, &mut found);
        Ok(found)
    }
}

fn parse(text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| CatalogError::InvalidSchema(e.to_string()))
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", path, segment)
    }
}

/// Kind of a type definition: `"record"` for `{"type": "record", ...}`,
/// the primitive name for `"long"` or `{"type": "long"}`.
fn kind(schema: &Value) -> Option<&str> {
    match schema {
        Value::String(s) => Some(s.as_str()),
        Value::Object(obj) => obj.get("type").and_then(Value::as_str),
        _ => None,
    }
}

/// Avro's reader-side promotions: `reader` can read data written as `writer`
fn promotable(writer: &str, reader: &str) -> bool {
    matches!(
        (writer, reader),
        ("int", "long" | "float" | "double")
            | ("long", "float" | "double")
            | ("float", "double")
            | ("string", "bytes")
            | ("bytes", "string")
    )
}

fn detect_type_changes(old: &Value, new: &Value, path: &str, changes: &mut Vec<SchemaChange>) {
    if old == new {
        return;
    }
    let location = if path.is_empty() { "type" } else { path };
    match (old, new) {
        (Value::Array(old_branches), Value::Array(new_branches)) => {
            detect_union_changes(old_branches, new_branches, location, changes);
            return;
        }
        (Value::Array(_), _) | (_, Value::Array(_)) => {
            changes.push(type_changed(old, new, location).breaking(true, true));
            return;
        }
        _ => {}
    }

    match (kind(old), kind(new)) {
        (Some("record"), Some("record")) => detect_record_changes(old, new, path, changes),
        (Some("enum"), Some("enum")) => detect_enum_changes(old, new, path, changes),
        (Some("array"), Some("array")) => {
            if let (Some(o), Some(n)) = (old.get("items"), new.get("items")) {
                detect_type_changes(o, n, &join(path, "items"), changes);
            }
        }
        (Some("map"), Some("map")) => {
            if let (Some(o), Some(n)) = (old.get("values"), new.get("values")) {
                detect_type_changes(o, n, &join(path, "values"), changes);
            }
        }
        (Some(o), Some(n)) if o == n => {
            // Same kind, differing attributes such as logicalType or size
            if old.get("size") != new.get("size")
                || old.get("logicalType") != new.get("logicalType")
            {
                changes.push(type_changed(old, new, location).breaking(true, true));
            }
        }
        (Some(o), Some(n)) if promotable(o, n) => {
            changes.push(
                SchemaChange::new(
                    ChangeType::TypePromoted,
                    location,
                    format!("'{}' widened from {} to {}", location, o, n),
                )
                .values(Some(old.to_string()), Some(new.to_string()))
                .breaking(false, true),
            );
        }
        (Some(o), Some(n)) if promotable(n, o) => {
            changes.push(
                SchemaChange::new(
                    ChangeType::TypeChanged,
                    location,
                    format!("'{}' narrowed from {} to {}", location, o, n),
                )
                .values(Some(old.to_string()), Some(new.to_string()))
                .breaking(true, false),
            );
        }
        _ => changes.push(type_changed(old, new, location).breaking(true, true)),
    }
}

fn type_changed(old: &Value, new: &Value, location: &str) -> SchemaChange {
    SchemaChange::new(
        ChangeType::TypeChanged,
        location,
        format!("'{}' type changed from {} to {}", location, old, new),
    )
    .values(Some(old.to_string()), Some(new.to_string()))
}

fn detect_union_changes(old: &[Value], new: &[Value], location: &str, changes: &mut Vec<SchemaChange>) {
    let old_set: BTreeSet<String> = old.iter().map(Value::to_string).collect();
    let new_set: BTreeSet<String> = new.iter().map(Value::to_string).collect();
    let added = new_set.difference(&old_set).count() > 0;
    let removed = old_set.difference(&new_set).count() > 0;
    if !added && !removed {
        return;
    }
    let old_value = Value::Array(old.to_vec());
    let new_value = Value::Array(new.to_vec());
    changes.push(
        SchemaChange::new(
            ChangeType::TypeChanged,
            location,
            format!("'{}' union branches changed from {} to {}", location, old_value, new_value),
        )
        .values(Some(old_value.to_string()), Some(new_value.to_string()))
        .breaking(removed, added),
    );
}

fn fields(record: &Value) -> BTreeMap<&str, &Value> {
    record
        .get("fields")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(|f| f.get("name").and_then(Value::as_str).map(|n| (n, f)))
                .collect()
        })
        .unwrap_or_default()
}

fn detect_record_changes(old: &Value, new: &Value, path: &str, changes: &mut Vec<SchemaChange>) {
    let old_fields = fields(old);
    let new_fields = fields(new);

    for (name, old_field) in &old_fields {
        if !new_fields.contains_key(name) {
            let has_default = old_field.get("default").is_some();
            changes.push(
                SchemaChange::new(
                    ChangeType::FieldRemoved,
                    join(path, &format!("fields.{}", name)),
                    if has_default {
                        format!("Field '{}' was removed, old readers fall back to its default", name)
                    } else {
                        format!("Field '{}' was removed and had no default", name)
                    },
                )
                .values(Some(old_field.to_string()), None)
                .breaking(false, !has_default),
            );
        }
    }

    for (name, new_field) in &new_fields {
        if !old_fields.contains_key(name) {
            let has_default = new_field.get("default").is_some();
            changes.push(
                SchemaChange::new(
                    ChangeType::FieldAdded,
                    join(path, &format!("fields.{}", name)),
                    if has_default {
                        format!("Field '{}' was added with a default", name)
                    } else {
                        format!("Field '{}' was added without a default", name)
                    },
                )
                .values(None, Some(new_field.to_string()))
                .breaking(!has_default, false),
            );
        }
    }

    for (name, old_field) in &old_fields {
        if let Some(new_field) = new_fields.get(name) {
            if let (Some(old_type), Some(new_type)) = (old_field.get("type"), new_field.get("type")) {
                detect_type_changes(old_type, new_type, &join(path, &format!("fields.{}", name)), changes);
            }
        }
    }
}

/// Walk named records, recording each field under its record's namespace
fn collect_fields<'a>(schema: &'a Value, namespace: Option<&'a str>, found: &mut Vec<SchemaFieldInfo>) {
    match schema {
        Value::Array(branches) => {
            for branch in branches {
                collect_fields(branch, namespace, found);
            }
        }
        Value::Object(obj) => match kind(schema) {
            Some("record") | Some("error") => {
                let full_name = obj.get("name").and_then(Value::as_str).unwrap_or_default();
                let namespace = full_name
                    .rsplit_once('.')
                    .map(|(ns, _)| ns)
                    .or_else(|| obj.get("namespace").and_then(Value::as_str))
                    .or(namespace);
                for (name, field) in fields(schema) {
                    let Some(field_type) = field.get("type") else {
                        continue;
                    };
                    found.push(SchemaFieldInfo::new(
                        namespace.map(str::to_string),
                        name,
                        type_label(field_type),
                    ));
                    collect_fields(field_type, namespace, found);
                }
            }
            Some("array") => {
                if let Some(items) = obj.get("items") {
                    collect_fields(items, namespace, found);
                }
            }
            Some("map") => {
                if let Some(values) = obj.get("values") {
                    collect_fields(values, namespace, found);
                }
            }
            _ => {}
        },
        _ => {}
    }
}

/// `long` for `"long"`, the single non-null branch of a nullable union,
/// `union` otherwise
fn type_label(field_type: &Value) -> String {
    match field_type {
        Value::Array(branches) => {
            let non_null: Vec<_> = branches
                .iter()
                .filter_map(kind)
                .filter(|k| *k != "null")
                .collect();
            match non_null.as_slice() {
                [single] => single.to_string(),
                _ => "union".to_string(),
            }
        }
        other => kind(other).unwrap_or("unknown").to_string(),
    }
}

fn symbols(schema: &Value) -> BTreeSet<&str> {
    schema
        .get("symbols")
        .and_then(Value::as_array)
        .map(|s| s.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn detect_enum_changes(old: &Value, new: &Value, path: &str, changes: &mut Vec<SchemaChange>) {
    let old_symbols = symbols(old);
    let new_symbols = symbols(new);
    let location = join(path, "symbols");
    let has_default = new.get("default").is_some();

    for removed in old_symbols.difference(&new_symbols) {
        changes.push(
            SchemaChange::new(
                ChangeType::EnumSymbolRemoved,
                location.clone(),
                format!("Enum symbol '{}' was removed", removed),
            )
            .values(Some(removed.to_string()), None)
            .breaking(!has_default, false),
        );
    }
    for added in new_symbols.difference(&old_symbols) {
        changes.push(
            SchemaChange::new(
                ChangeType::EnumSymbolAdded,
                location.clone(),
                format!("Enum symbol '{}' was added", added),
            )
            .values(None, Some(added.to_string()))
            .breaking(false, old.get("default").is_none()),
        );
    }
}
