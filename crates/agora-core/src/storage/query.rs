//! Document query model
//!
//! Filters, sort keys and field updates understood by every
//! [`DocumentStore`](super::DocumentStore). Documents are JSON objects;
//! field paths may be dotted (`"profile.name"`) to reach nested objects.
//!
//! Missing fields compare as `null`, so `Filter::eq("reply_to", Value::Null)`
//! matches documents that never had the field.

use std::cmp::Ordering;
use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{StoreError, StoreResult};

/// Sort direction for ordered listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl SortDirection {
    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

/// A predicate over documents
#[derive(Debug, Clone)]
pub enum Filter {
    /// Matches every document
    All,
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Lt(String, Value),
    In(String, Vec<Value>),
    /// Field is a string matching the expression
    Regex(String, Regex),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Filter::Ne(field.to_string(), value.into())
    }

    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Filter::Gt(field.to_string(), value.into())
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Filter::Lt(field.to_string(), value.into())
    }

    pub fn any_of(field: &str, values: Vec<Value>) -> Self {
        Filter::In(field.to_string(), values)
    }

    /// Build a regex filter, optionally case-insensitive
    pub fn regex(field: &str, pattern: &str, case_insensitive: bool) -> StoreResult<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| StoreError::InvalidArgument(format!("Invalid pattern: {}", e)))?;
        Ok(Filter::Regex(field.to_string(), regex))
    }

    /// Case-insensitive literal substring match
    pub fn contains_ignore_case(field: &str, needle: &str) -> StoreResult<Self> {
        Self::regex(field, &regex::escape(needle), true)
    }

    /// Combine with another filter, flattening nested conjunctions
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), f) => {
                left.push(f);
                Filter::And(left)
            }
            (f, Filter::And(mut right)) => {
                right.insert(0, f);
                Filter::And(right)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    /// Evaluate the filter against a document
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, expected) => values_equal(lookup(doc, field), expected),
            Filter::Ne(field, expected) => !values_equal(lookup(doc, field), expected),
            Filter::Gt(field, bound) => {
                comparable(lookup(doc, field), bound) == Some(Ordering::Greater)
            }
            Filter::Lt(field, bound) => comparable(lookup(doc, field), bound) == Some(Ordering::Less),
            Filter::In(field, candidates) => {
                let actual = lookup(doc, field);
                candidates.iter().any(|c| values_equal(actual, c))
            }
            Filter::Regex(field, regex) => lookup(doc, field)
                .as_str()
                .map(|s| regex.is_match(s))
                .unwrap_or(false),
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }

    /// The `_id` this filter pins, if any
    ///
    /// Lets adapters use a primary-key lookup instead of a scan.
    pub fn pinned_id(&self) -> Option<&str> {
        self.pinned(ID_FIELD)
    }

    /// The `_key` this filter pins, if any
    pub fn pinned_key(&self) -> Option<&str> {
        self.pinned(UNIQUE_KEY_FIELD)
    }

    fn pinned(&self, name: &str) -> Option<&str> {
        match self {
            Filter::Eq(field, Value::String(value)) if field == name => Some(value.as_str()),
            Filter::And(filters) => filters.iter().find_map(|f| f.pinned(name)),
            _ => None,
        }
    }
}

/// Name of the identity field every document carries
pub const ID_FIELD: &str = "_id";

/// Name of the optional unique-key field adapters must enforce
pub const UNIQUE_KEY_FIELD: &str = "_key";

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

/// Sort, skip and limit applied after filtering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub sort: Vec<SortKey>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sort key; earlier keys take precedence
    pub fn sort_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.sort.push(SortKey {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Order documents, then apply skip and limit
    pub fn apply(&self, mut docs: Vec<Value>) -> Vec<Value> {
        if !self.sort.is_empty() {
            docs.sort_by(|a, b| {
                self.sort
                    .iter()
                    .map(|key| {
                        key.direction
                            .apply(compare_values(lookup(a, &key.field), lookup(b, &key.field)))
                    })
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        let skipped = docs.into_iter().skip(self.skip);
        match self.limit {
            Some(limit) => skipped.take(limit).collect(),
            None => skipped.collect(),
        }
    }
}

/// A single field modification
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Overwrite the field
    Set(String, Value),
    /// Remove the field
    Unset(String),
    /// Add to a numeric field (missing counts as zero)
    Inc(String, i64),
}

impl Update {
    pub fn set(field: &str, value: impl Into<Value>) -> Self {
        Update::Set(field.to_string(), value.into())
    }

    pub fn inc(field: &str, by: i64) -> Self {
        Update::Inc(field.to_string(), by)
    }

    pub fn unset(field: &str) -> Self {
        Update::Unset(field.to_string())
    }
}

/// Apply updates in order to a document
pub fn apply_updates(doc: &mut Value, updates: &[Update]) -> StoreResult<()> {
    let object = doc
        .as_object_mut()
        .ok_or_else(|| StoreError::InvalidArgument("Document is not an object".to_string()))?;

    for update in updates {
        match update {
            Update::Set(field, value) => {
                *slot(object, field) = value.clone();
            }
            Update::Unset(field) => {
                remove(object, field);
            }
            Update::Inc(field, by) => {
                let current = numeric_field(object, field)?;
                *slot(object, field) = Value::from(current.saturating_add(*by));
            }
        }
    }
    Ok(())
}

/// One write of an atomic batch
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert a document, creating the collection on demand
    Insert { collection: String, doc: Value },
    /// Update the first document matching `filter`; the batch is abandoned
    /// when nothing matches
    Update {
        collection: String,
        filter: Filter,
        updates: Vec<Update>,
    },
}

impl WriteOp {
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Insert { collection, .. } | WriteOp::Update { collection, .. } => collection,
        }
    }
}

/// Count documents per distinct value of `field`, in first-seen order
pub fn group_counts<'a>(docs: impl IntoIterator<Item = &'a Value>, field: &str) -> Vec<(Value, u64)> {
    let mut groups: Vec<(Value, u64)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for doc in docs {
        let key = lookup(doc, field);
        match index.get(&group_key(key)) {
            Some(&i) => groups[i].1 += 1,
            None => {
                index.insert(group_key(key), groups.len());
                groups.push((key.clone(), 1));
            }
        }
    }
    groups
}

/// Grouping key agreeing with `values_equal`: `1` and `1.0` share a group
fn group_key(value: &Value) -> String {
    match value {
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                (f as i64).to_string()
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

// ==================== Value helpers ====================

static NULL: Value = Value::Null;

fn lookup<'a>(doc: &'a Value, path: &str) -> &'a Value {
    path.split('.')
        .try_fold(doc, |current, segment| current.get(segment))
        .unwrap_or(&NULL)
}

fn slot<'a>(object: &'a mut Map<String, Value>, path: &str) -> &'a mut Value {
    match path.split_once('.') {
        None => object.entry(path.to_string()).or_insert(Value::Null),
        Some((head, rest)) => {
            let child = object.entry(head.to_string()).or_insert(Value::Null);
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            match child {
                Value::Object(map) => slot(map, rest),
                _ => unreachable!("replaced with an object above"),
            }
        }
    }
}

fn remove(object: &mut Map<String, Value>, path: &str) {
    match path.split_once('.') {
        None => {
            object.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(map)) = object.get_mut(head) {
                remove(map, rest);
            }
        }
    }
}

fn numeric_field(object: &Map<String, Value>, path: &str) -> StoreResult<i64> {
    let value = match path.split_once('.') {
        None => object.get(path).unwrap_or(&NULL),
        Some((head, rest)) => object.get(head).map(|v| lookup(v, rest)).unwrap_or(&NULL),
    };

    match value {
        Value::Null => Ok(0),
        Value::Number(n) => n.as_i64().ok_or_else(|| {
            StoreError::InvalidArgument(format!("Field '{}' is not an integer", path))
        }),
        _ => Err(StoreError::InvalidArgument(format!(
            "Field '{}' is not numeric",
            path
        ))),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

/// Ordering between two values of the same kind, `None` across kinds
fn comparable(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_))
        | (Value::String(_), Value::String(_))
        | (Value::Bool(_), Value::Bool(_)) => Some(compare_values(a, b)),
        _ => None,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null < bool < number < string < array < object
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
