//! A Cypher query with named parameters.

use crate::model::{PropertyMap, Value};

/// Query text plus its parameter map. Immutable once submitted: the
/// executors take it by reference and never modify it.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    text: String,
    params: PropertyMap,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), params: PropertyMap::new() }
    }

    /// Bind one named parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key, value);
        self
    }

    /// Bind a batch of named parameters.
    pub fn params<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        for (k, v) in pairs {
            self.params.insert(k, v);
        }
        self
    }

    /// Ask the server for the query plan instead of running the query.
    pub fn explain(mut self) -> Self {
        self.text = format!("EXPLAIN {}", self.text);
        self
    }

    /// Run the query and ask the server for the executed plan with row
    /// counts attached.
    pub fn profile(mut self) -> Self {
        self.text = format!("PROFILE {}", self.text);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parameters(&self) -> &PropertyMap {
        &self.params
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Query::new(text)
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Query::new(text)
    }
}
