//! Query payload templates.
//!
//! Payloads are captured once from the dashboard (browser network tab) and
//! stored as JSON files. The scrape rewrites two spots inside them: the topic
//! literal of the `Area` filter and the list of record ids to fetch.

use std::path::Path;

use serde_json::{Value, json};

use dashscrape_shared::{DashscrapeError, Result};

/// A semantic query payload loaded from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTemplate {
    payload: Value,
}

impl QueryTemplate {
    pub fn from_value(payload: Value) -> Self {
        Self { payload }
    }

    /// Load a payload template from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DashscrapeError::io(path, e))?;
        let payload = serde_json::from_str(&content).map_err(|e| {
            DashscrapeError::config(format!("invalid query payload {}: {e}", path.display()))
        })?;
        Ok(Self { payload })
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Copy of the payload with the literal at `pointer` set to `topic`.
    pub fn with_topic(&self, pointer: &str, topic: &str) -> Result<Value> {
        let mut payload = self.payload.clone();
        *slot(&mut payload, pointer)? = Value::String(quote_literal(topic));
        Ok(payload)
    }

    /// Replace the `In.Values` list at `pointer` with one literal per record id.
    pub fn set_record_ids(&mut self, pointer: &str, ids: &[String]) -> Result<()> {
        let values: Vec<Value> = ids
            .iter()
            .map(|id| json!([{ "Literal": { "Value": quote_literal(id) } }]))
            .collect();
        *slot(&mut self.payload, pointer)? = Value::Array(values);
        Ok(())
    }
}

/// Quote a string as a query-language literal: `'text'`, inner quotes doubled.
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn slot<'a>(payload: &'a mut Value, pointer: &str) -> Result<&'a mut Value> {
    payload.pointer_mut(pointer).ok_or_else(|| {
        DashscrapeError::config(format!("query payload has nothing at pointer '{pointer}'"))
    })
}
