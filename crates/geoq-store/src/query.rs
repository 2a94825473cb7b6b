use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use geoq_types::{DocumentData, DocumentId, RangeQuery, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::GEOHASH_FIELD;
use crate::document::StoredDocument;

/// Comparison operator of a `where` clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WhereOp {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "array-contains")]
    ArrayContains,
}

impl WhereOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ge => ">=",
            Self::Gt => ">",
            Self::ArrayContains => "array-contains",
        }
    }

    /// Apply the operator to a field value. A missing field never matches.
    pub fn evaluate(&self, field: Option<&Value>, operand: &Value) -> bool {
        let Some(field) = field else {
            return false;
        };
        match self {
            Self::Eq => values_equal(field, operand),
            Self::ArrayContains => field
                .as_array()
                .is_some_and(|items| items.iter().any(|item| values_equal(item, operand))),
            Self::Lt => compare_values(field, operand) == Some(Ordering::Less),
            Self::Le => matches!(
                compare_values(field, operand),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Ge => matches!(
                compare_values(field, operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Gt => compare_values(field, operand) == Some(Ordering::Greater),
        }
    }
}

impl fmt::Display for WhereOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WhereOp {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            "==" => Ok(Self::Eq),
            ">=" => Ok(Self::Ge),
            ">" => Ok(Self::Gt),
            "array-contains" => Ok(Self::ArrayContains),
            other => Err(ValidationError::InvalidArgument(format!(
                "unsupported where operator: {other}"
            ))),
        }
    }
}

/// Values of the same JSON type compare naturally; anything else is
/// incomparable.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Resolve a dotted field path (`a.b.c`) inside a JSON value.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

/// Resolve a dotted field path inside a document body.
pub fn lookup_field<'a>(data: &'a DocumentData, path: &str) -> Option<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let value = data.get(head)?;
    match rest {
        Some(rest) => lookup_path(value, rest),
        None => Some(value),
    }
}

/// One `where` clause: `field op value`, with `field` a dotted path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub op: WhereOp,
    pub value: Value,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, op: WhereOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn matches(&self, data: &Value) -> bool {
        self.op.evaluate(lookup_path(data, &self.field), &self.value)
    }
}

impl fmt::Display for FieldFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op, self.value)
    }
}

/// Where a one-shot read may be served from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Default,
    Server,
    Cache,
}

/// Options for a one-shot read, passed through to the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOptions {
    pub source: Source,
}

impl GetOptions {
    pub fn server() -> Self {
        Self {
            source: Source::Server,
        }
    }

    pub fn cache() -> Self {
        Self {
            source: Source::Cache,
        }
    }
}

/// A store-level query: an optional key range on the geohash field, a list
/// of equality/range filters and an optional limit.
///
/// Results are ordered by geohash then id when a range is set, by id
/// otherwise. The limit applies after ordering.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreQuery {
    pub range: Option<RangeQuery>,
    pub filters: Vec<FieldFilter>,
    pub limit: Option<usize>,
}

impl StoreQuery {
    /// Every document in the collection.
    pub fn collection() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, range: RangeQuery) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_filter(mut self, filter: FieldFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Returns `true` if the document body satisfies the range and every
    /// filter. A ranged query skips documents without a string geohash.
    pub fn matches(&self, data: &Value) -> bool {
        if let Some(ref range) = self.range {
            match lookup_path(data, GEOHASH_FIELD).and_then(Value::as_str) {
                Some(hash) if range.contains(hash) => {}
                _ => return false,
            }
        }
        self.filters.iter().all(|filter| filter.matches(data))
    }

    /// Run the query over a set of documents: match, order, then limit.
    pub fn execute<'a, I>(&self, documents: I) -> Vec<StoredDocument>
    where
        I: IntoIterator<Item = (&'a DocumentId, &'a Value)>,
    {
        let mut results: Vec<StoredDocument> = documents
            .into_iter()
            .filter(|(_, data)| self.matches(data))
            .map(|(id, data)| StoredDocument::new(id.clone(), data.clone()))
            .collect();

        if self.range.is_some() {
            results.sort_by(|a, b| {
                a.geohash()
                    .cmp(&b.geohash())
                    .then_with(|| a.id.cmp(&b.id))
            });
        } else {
            results.sort_by(|a, b| a.id.cmp(&b.id));
        }

        if let Some(limit) = self.limit {
            results.truncate(limit);
        }
        results
    }
}
