//! Translation of the dataset-agnostic filter vocabulary into each
//! backend's native query syntax.
//!
//! Translation is deterministic and total: an unknown filter key is
//! silently dropped, never an error. Clients may ship filter vocabularies
//! newer than this service.

use std::collections::BTreeMap;

use tracing::debug;

/// Filter keys this engine understands.
pub const KNOWN_KEYS: [&str; 9] = [
    "area",
    "level",
    "origin",
    "product",
    "quantity",
    "run",
    "task",
    "timerange",
    "network",
];

/// The recognized subset of a request's filter map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    values: BTreeMap<&'static str, Vec<String>>,
}

impl FilterSet {
    /// Keep the known keys, drop the rest.
    pub fn from_request(raw: &BTreeMap<String, Vec<String>>) -> Self {
        let mut values = BTreeMap::new();

        for (key, entries) in raw {
            match KNOWN_KEYS.iter().find(|k| *k == key) {
                Some(known) if !entries.is_empty() => {
                    values.insert(*known, entries.clone());
                }
                Some(_) => {}
                None => {
                    debug!(key = %key, "Dropping unknown filter key");
                }
            }
        }

        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.values.get(key).map(|v| v.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Archive matcher expression: `key:v1 or v2; key2:v3`, keys in the
    /// engine's fixed order so equal inputs produce equal matchers.
    pub fn to_archive_matcher(&self) -> String {
        let mut clauses = Vec::new();

        for key in KNOWN_KEYS {
            if let Some(entries) = self.values.get(key) {
                clauses.push(format!("{}:{}", key, entries.join(" or ")));
            }
        }

        clauses.join("; ")
    }

    /// Typed query for the observation store. Only the keys meaningful for
    /// point observations survive; the rest are dropped.
    pub fn to_observation_query(&self) -> ObservationQuery {
        let take = |key: &str| {
            self.values
                .get(key)
                .cloned()
                .unwrap_or_default()
        };

        ObservationQuery {
            networks: take("network"),
            products: take("product"),
            levels: take("level"),
            timeranges: take("timerange"),
        }
    }
}

/// Native query parameters of the observation store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservationQuery {
    pub networks: Vec<String>,
    pub products: Vec<String>,
    pub levels: Vec<String>,
    pub timeranges: Vec<String>,
}
