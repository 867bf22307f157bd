//! Lenient building blocks shared by the wire records

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A set of ids as found in the store: either an array or a `{id: true}` map.
///
/// Both shapes are accepted on read; the engine always writes the map form
/// unless a list is explicitly requested.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum IdSet {
    List(Vec<Option<String>>),
    Map(BTreeMap<String, Value>),
}

impl Default for IdSet {
    fn default() -> Self {
        IdSet::Map(BTreeMap::new())
    }
}

impl IdSet {
    pub fn from_ids<'a>(ids: impl IntoIterator<Item = &'a String>) -> Self {
        IdSet::Map(ids.into_iter().map(|id| (id.clone(), Value::Bool(true))).collect())
    }

    pub fn list<'a>(ids: impl IntoIterator<Item = &'a String>) -> Self {
        IdSet::List(ids.into_iter().cloned().map(Some).collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            IdSet::List(ids) => ids.iter().all(Option::is_none),
            IdSet::Map(ids) => ids.is_empty(),
        }
    }

    /// Ids in the set. Map entries count only when their value is truthy.
    pub fn to_set(&self) -> BTreeSet<String> {
        match self {
            IdSet::List(ids) => ids
                .iter()
                .flatten()
                .filter(|id| !id.is_empty())
                .cloned()
                .collect(),
            IdSet::Map(ids) => ids
                .iter()
                .filter(|(_, flag)| is_truthy(flag))
                .map(|(id, _)| id.clone())
                .collect(),
        }
    }

    /// Ids in stored order (map form is ordered by key).
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            IdSet::List(ids) => {
                let mut seen = BTreeSet::new();
                ids.iter()
                    .flatten()
                    .filter(|id| !id.is_empty() && seen.insert((*id).clone()))
                    .cloned()
                    .collect()
            }
            IdSet::Map(_) => self.to_set().into_iter().collect(),
        }
    }
}

pub fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// Epoch millis from a number, a float, or a numeric string.
pub fn millis_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `deserialize_with` helper: unreadable timestamps become `None` instead of failing the record.
pub fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(millis_of))
}
