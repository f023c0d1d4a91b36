//! The engine's `filters` query parameter.
//!
//! Clients send it either as `{"label": ["k=v"]}` or as the older
//! `{"label": {"k=v": true}}`; both decode to the same map.

use crate::compose::LABEL_PROJECT;
use crate::error::ApiError;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    terms: BTreeMap<String, Vec<String>>,
}

impl Filters {
    pub fn parse(raw: Option<&str>) -> Result<Self, ApiError> {
        let raw = match raw.map(str::trim) {
            None | Some("") => return Ok(Self::default()),
            Some(raw) => raw,
        };
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ApiError::bad_request(format!("invalid filter '{}': {}", raw, e)))?;
        let Value::Object(fields) = value else {
            return Err(ApiError::bad_request(format!("invalid filter '{}'", raw)));
        };

        let mut terms = BTreeMap::new();
        for (key, values) in fields {
            let values = match values {
                Value::Array(items) => items
                    .into_iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect(),
                Value::Object(map) => map
                    .into_iter()
                    .filter(|(_, enabled)| enabled.as_bool().unwrap_or(false))
                    .map(|(term, _)| term)
                    .collect(),
                Value::String(single) => vec![single],
                _ => {
                    return Err(ApiError::bad_request(format!(
                        "invalid filter value for '{}'",
                        key
                    )));
                }
            };
            terms.insert(key, values);
        }
        Ok(Self { terms })
    }

    /// Reads `filters` out of a decoded query string.
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, ApiError> {
        Self::parse(query.get("filters").map(String::as_str))
    }

    pub fn get(&self, key: &str) -> &[String] {
        self.terms.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.terms.values().all(Vec::is_empty)
    }

    /// The compose project named by a `label` term, if any.
    pub fn project(&self) -> Option<&str> {
        self.get("label").iter().find_map(|term| {
            term.split_once('=')
                .filter(|(key, _)| *key == LABEL_PROJECT)
                .map(|(_, project)| project)
        })
    }

    /// Every `label` term must hold: `key` for presence, `key=value` for equality.
    pub fn matches_labels(&self, labels: &BTreeMap<String, String>) -> bool {
        self.get("label").iter().all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
            None => labels.contains_key(term.as_str()),
        })
    }

    /// True when `key` is unfiltered or any of its terms satisfies `check`.
    pub fn any_of(&self, key: &str, check: impl Fn(&str) -> bool) -> bool {
        let terms = self.get(key);
        terms.is_empty() || terms.iter().any(|t| check(t))
    }
}

/// The engine's boolean query convention: `1`, `true` and `True` are set.
pub fn query_flag(query: &HashMap<String, String>, key: &str) -> bool {
    query
        .get(key)
        .is_some_and(|v| matches!(v.trim(), "1" | "true" | "True" | "TRUE"))
}

/// Like `query_flag`, with a default for absent keys.
pub fn query_flag_or(query: &HashMap<String, String>, key: &str, default: bool) -> bool {
    if query.contains_key(key) {
        query_flag(query, key)
    } else {
        default
    }
}
