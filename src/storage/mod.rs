//! Storage collaborators
//!
//! The catalog keeps its rows behind [`StorageManager`], a narrow key/value
//! interface that moves rows as JSON documents grouped by namespace. Typed
//! access goes through [`StorageExt`], which converts [`Storable`] rows on the
//! way in and out.
//!
//! [`memory::InMemoryStorage`] is the reference backend. Binary uploads live
//! behind [`files::FileStorage`].

pub mod files;
pub mod memory;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageError;

pub use files::{FileStorage, LocalFileStorage};
pub use memory::InMemoryStorage;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Primary key of a row: field name to stringified value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PrimaryKey(BTreeMap<String, String>);

impl PrimaryKey {
    pub fn of(field: impl Into<String>, value: impl ToString) -> Self {
        Self(BTreeMap::new()).and(field, value)
    }

    pub fn and(mut self, field: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(field.into(), value.to_string());
        self
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<_> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Namespaced primary key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorableKey {
    pub namespace: String,
    pub primary_key: PrimaryKey,
}

impl StorableKey {
    pub fn new(namespace: impl Into<String>, primary_key: PrimaryKey) -> Self {
        Self {
            namespace: namespace.into(),
            primary_key,
        }
    }
}

impl fmt::Display for StorableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.namespace, self.primary_key)
    }
}

/// A row type the catalog persists
pub trait Storable: Serialize + DeserializeOwned {
    const NAMESPACE: &'static str;

    fn primary_key(&self) -> PrimaryKey;

    fn storable_key(&self) -> StorableKey {
        StorableKey::new(Self::NAMESPACE, self.primary_key())
    }
}

/// Equality filter on one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParam {
    pub name: String,
    pub value: Value,
}

impl QueryParam {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, row: &Value) -> bool {
        row.get(&self.name)
            .map(|v| scalars_equal(v, &self.value))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderByField {
    pub field: String,
    pub descending: bool,
}

impl OrderByField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// Single-field condition of a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Eq { field: String, value: Value },
    Contains { field: String, value: String },
    /// SQL-style pattern: `%` matches any run, `_` matches one character
    Like { field: String, pattern: String },
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Predicate::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Predicate::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

/// Predicates joined by AND or OR. An empty clause matches every row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WhereClause {
    #[serde(default)]
    pub combinator: Combinator,
    #[serde(default)]
    pub predicates: Vec<Predicate>,
}

impl WhereClause {
    pub fn all(predicates: Vec<Predicate>) -> Self {
        Self {
            combinator: Combinator::And,
            predicates,
        }
    }

    pub fn any(predicates: Vec<Predicate>) -> Self {
        Self {
            combinator: Combinator::Or,
            predicates,
        }
    }

    /// Compile LIKE patterns once so rows can be matched cheaply
    pub fn compile(&self) -> StorageResult<RowMatcher> {
        let conditions = self
            .predicates
            .iter()
            .map(|p| match p {
                Predicate::Eq { field, value } => Ok(Condition::Eq(field.clone(), value.clone())),
                Predicate::Contains { field, value } => {
                    Ok(Condition::Contains(field.clone(), value.clone()))
                }
                Predicate::Like { field, pattern } => {
                    Ok(Condition::Like(field.clone(), like_to_regex(pattern)?))
                }
            })
            .collect::<StorageResult<Vec<_>>>()?;
        Ok(RowMatcher {
            combinator: self.combinator,
            conditions,
        })
    }
}

enum Condition {
    Eq(String, Value),
    Contains(String, String),
    Like(String, Regex),
}

/// Compiled form of a [`WhereClause`]
pub struct RowMatcher {
    combinator: Combinator,
    conditions: Vec<Condition>,
}

impl RowMatcher {
    pub fn matches(&self, row: &Value) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        let check = |c: &Condition| match c {
            Condition::Eq(field, value) => {
                row.get(field).map(|v| scalars_equal(v, value)).unwrap_or(false)
            }
            Condition::Contains(field, needle) => row
                .get(field)
                .and_then(scalar_text)
                .map(|text| text.contains(needle.as_str()))
                .unwrap_or(false),
            Condition::Like(field, re) => row
                .get(field)
                .and_then(scalar_text)
                .map(|text| re.is_match(&text))
                .unwrap_or(false),
        };
        match self.combinator {
            Combinator::And => self.conditions.iter().all(check),
            Combinator::Or => self.conditions.iter().any(check),
        }
    }
}

/// A search over one namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub namespace: String,
    #[serde(default)]
    pub where_clause: WhereClause,
    #[serde(default)]
    pub order_by: Vec<OrderByField>,
}

impl SearchQuery {
    pub fn search_from(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            where_clause: WhereClause::default(),
            order_by: Vec::new(),
        }
    }

    pub fn filter(mut self, where_clause: WhereClause) -> Self {
        self.where_clause = where_clause;
        self
    }

    pub fn order_by(mut self, order_by: Vec<OrderByField>) -> Self {
        self.order_by = order_by;
        self
    }
}

/// Row store consumed by the catalog.
///
/// Implementations must make `add` a conditional insert: it fails with
/// [`StorageError::AlreadyExists`] when the key is present. The catalog relies
/// on that for unique branch names and race-free version numbering.
pub trait StorageManager: Send + Sync {
    fn get(&self, key: &StorableKey) -> StorageResult<Option<Value>>;

    /// Rows of `namespace` matching every param, sorted by `order_by`
    fn find(
        &self,
        namespace: &str,
        params: &[QueryParam],
        order_by: &[OrderByField],
    ) -> StorageResult<Vec<Value>>;

    fn add(&self, key: StorableKey, row: Value) -> StorageResult<()>;

    fn add_or_update(&self, key: StorableKey, row: Value) -> StorageResult<()>;

    /// Remove and return the row, if present
    fn remove(&self, key: &StorableKey) -> StorageResult<Option<Value>>;

    /// Next id of a per-namespace sequence, starting at 1
    fn next_id(&self, namespace: &str) -> StorageResult<u64>;

    fn search(&self, query: &SearchQuery) -> StorageResult<Vec<Value>>;
}

/// Typed helpers over [`StorageManager`]
pub trait StorageExt: StorageManager {
    fn get_row<T: Storable>(&self, key: &StorableKey) -> StorageResult<Option<T>> {
        self.get(key)?.map(decode::<T>).transpose()
    }

    fn find_rows<T: Storable>(
        &self,
        params: &[QueryParam],
        order_by: &[OrderByField],
    ) -> StorageResult<Vec<T>> {
        self.find(T::NAMESPACE, params, order_by)?
            .into_iter()
            .map(decode::<T>)
            .collect()
    }

    fn list_rows<T: Storable>(&self) -> StorageResult<Vec<T>> {
        self.find_rows(&[], &[])
    }

    fn search_rows<T: Storable>(&self, query: &SearchQuery) -> StorageResult<Vec<T>> {
        self.search(query)?.into_iter().map(decode::<T>).collect()
    }

    fn add_row<T: Storable>(&self, row: &T) -> StorageResult<()> {
        self.add(row.storable_key(), serde_json::to_value(row)?)
    }

    fn add_or_update_row<T: Storable>(&self, row: &T) -> StorageResult<()> {
        self.add_or_update(row.storable_key(), serde_json::to_value(row)?)
    }

    fn remove_row<T: Storable>(&self, row: &T) -> StorageResult<Option<T>> {
        self.remove(&row.storable_key())?.map(decode::<T>).transpose()
    }
}

impl<S: StorageManager + ?Sized> StorageExt for S {}

fn decode<T: Storable>(row: Value) -> StorageResult<T> {
    serde_json::from_value(row).map_err(|e| StorageError::Malformed {
        namespace: T::NAMESPACE.to_string(),
        message: e.to_string(),
    })
}

/// Scalar text form used for loose comparisons
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Equality that lets `"5"` match `5`, so string-typed query props work
/// against numeric columns.
pub fn scalars_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (scalar_text(a), scalar_text(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_u64(), y.as_u64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None, Some(_)) | (Some(Value::Null), Some(_)) => Ordering::Less,
        (Some(_), None) | (Some(_), Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// Sort rows in place by a list of order-by fields
pub fn sort_rows(rows: &mut [Value], order_by: &[OrderByField]) {
    if order_by.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for field in order_by {
            let ord = compare_values(a.get(&field.field), b.get(&field.field));
            let ord = if field.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn like_to_regex(pattern: &str) -> StorageResult<Regex> {
    let mut re = String::with_capacity(pattern.len() + 2);
    re.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| StorageError::InvalidQuery(e.to_string()))
}
