//! JSON Schema provider

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::error::{CatalogError, Result};
use crate::field::SchemaFieldInfo;

use super::{ChangeType, SchemaChange, SchemaProvider};

/// Validates with `jsonschema` and compares object properties recursively
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaProvider;

impl SchemaProvider for JsonSchemaProvider {
    fn type_name(&self) -> &str {
        "json"
    }

    fn name(&self) -> &str {
        "JSON Schema provider"
    }

    fn description(&self) -> &str {
        "JSON Schema documents with property and required-set evolution rules"
    }

    fn validate(&self, schema_text: &str) -> Result<()> {
        let schema = parse(schema_text)?;
        jsonschema::JSONSchema::compile(&schema)
            .map(|_| ())
            .map_err(|e| CatalogError::InvalidSchema(e.to_string()))
    }

    fn diff(&self, existing: &str, candidate: &str) -> Result<Vec<SchemaChange>> {
        let old = parse(existing)?;
        let new = parse(candidate)?;
        let mut changes = Vec::new();
        if old.get("type") != new.get("type") {
            changes.push(type_changed(&old, &new, "type"));
        }
        detect_changes(&old, &new, "", &mut changes);
        Ok(changes)
    }

    fn fields(&self, schema_text: &str) -> Result<Vec<SchemaFieldInfo>> {
        let schema = parse(schema_text)?;
        let mut found = Vec::new();
        collect_fields(&schema, "", &mut found);
        Ok(found)
    }
}

fn parse(text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| CatalogError::InvalidSchema(e.to_string()))
}

fn required(schema: &Value) -> BTreeSet<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn properties(schema: &Value) -> Option<&Map<String, Value>> {
    schema.get("properties").and_then(Value::as_object)
}

/// Record every property; nested objects and array items use the dotted
/// property path as their namespace
fn collect_fields(schema: &Value, path: &str, found: &mut Vec<SchemaFieldInfo>) {
    let Some(props) = properties(schema) else {
        return;
    };
    for (name, prop) in props {
        found.push(SchemaFieldInfo::new(
            (!path.is_empty()).then(|| path.to_string()),
            name.as_str(),
            type_label(prop),
        ));
        let child = if path.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", path, name)
        };
        collect_fields(prop, &child, found);
        if let Some(items) = prop.get("items") {
            collect_fields(items, &child, found);
        }
    }
}

fn type_label(prop: &Value) -> String {
    match prop.get("type") {
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(types)) => {
            let non_null: Vec<_> = types
                .iter()
                .filter_map(Value::as_str)
                .filter(|t| *t != "null")
                .collect();
            match non_null.as_slice() {
                [single] => single.to_string(),
                _ => "union".to_string(),
            }
        }
        _ => "any".to_string(),
    }
}

fn type_changed(old: &Value, new: &Value, path: &str) -> SchemaChange {
    let old_type = old.get("type").map(Value::to_string);
    let new_type = new.get("type").map(Value::to_string);
    SchemaChange::new(
        ChangeType::TypeChanged,
        path,
        format!(
            "'{}' type changed from {} to {}",
            path,
            old_type.as_deref().unwrap_or("any"),
            new_type.as_deref().unwrap_or("any")
        ),
    )
    .values(old_type, new_type)
    .breaking(true, true)
}

fn detect_changes(old: &Value, new: &Value, path: &str, changes: &mut Vec<SchemaChange>) {
    let empty = Map::new();
    let old_props = properties(old).unwrap_or(&empty);
    let new_props = properties(new).unwrap_or(&empty);
    let old_required = required(old);
    let new_required = required(new);

    let prop_path = |name: &str| {
        if path.is_empty() {
            format!("properties.{}", name)
        } else {
            format!("{}.properties.{}", path, name)
        }
    };

    for (name, old_prop) in old_props {
        if !new_props.contains_key(name) {
            let was_required = old_required.contains(name.as_str());
            changes.push(
                SchemaChange::new(
                    ChangeType::FieldRemoved,
                    prop_path(name),
                    if was_required {
                        format!("Required property '{}' was removed", name)
                    } else {
                        format!("Optional property '{}' was removed", name)
                    },
                )
                .values(Some(old_prop.to_string()), None)
                .breaking(false, was_required),
            );
        }
    }

    for (name, new_prop) in new_props {
        if !old_props.contains_key(name) {
            let is_required = new_required.contains(name.as_str());
            changes.push(
                SchemaChange::new(
                    ChangeType::FieldAdded,
                    prop_path(name),
                    if is_required {
                        format!("Required property '{}' was added", name)
                    } else {
                        format!("Optional property '{}' was added", name)
                    },
                )
                .values(None, Some(new_prop.to_string()))
                .breaking(is_required, false),
            );
        }
    }

    for (name, old_prop) in old_props {
        let Some(new_prop) = new_props.get(name) else {
            continue;
        };
        let path = prop_path(name);

        if old_prop.get("type") != new_prop.get("type") {
            changes.push(type_changed(old_prop, new_prop, &path));
        }

        let was_required = old_required.contains(name.as_str());
        let is_required = new_required.contains(name.as_str());
        if was_required != is_required {
            changes.push(
                SchemaChange::new(
                    ChangeType::OptionalityChanged,
                    path.clone(),
                    if is_required {
                        format!("Property '{}' became required", name)
                    } else {
                        format!("Property '{}' became optional", name)
                    },
                )
                .breaking(is_required, was_required),
            );
        }

        if properties(old_prop).is_some() || properties(new_prop).is_some() || old_prop.get("enum").is_some() {
            detect_changes(old_prop, new_prop, &path, changes);
        }
    }

    detect_enum_changes(old, new, path, changes);
}

fn detect_enum_changes(old: &Value, new: &Value, path: &str, changes: &mut Vec<SchemaChange>) {
    let (Some(old_enum), Some(new_enum)) = (
        old.get("enum").and_then(Value::as_array),
        new.get("enum").and_then(Value::as_array),
    ) else {
        return;
    };
    let location = if path.is_empty() {
        "enum".to_string()
    } else {
        format!("{}.enum", path)
    };
    let old_set: BTreeSet<String> = old_enum.iter().map(Value::to_string).collect();
    let new_set: BTreeSet<String> = new_enum.iter().map(Value::to_string).collect();

    for removed in old_set.difference(&new_set) {
        changes.push(
            SchemaChange::new(
                ChangeType::EnumSymbolRemoved,
                location.clone(),
                format!("Enum value {} was removed", removed),
            )
            .values(Some(removed.clone()), None)
            .breaking(true, false),
        );
    }
    for added in new_set.difference(&old_set) {
        changes.push(
            SchemaChange::new(
                ChangeType::EnumSymbolAdded,
                location.clone(),
                format!("Enum value {} was added", added),
            )
            .values(None, Some(added.clone()))
            .breaking(false, true),
        );
    }
}
