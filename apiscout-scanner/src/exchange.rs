use crate::schema::SchemaNode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use url::Url;

/// A captured JSON API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub method: String,
    pub status_code: u16,
    pub response_headers: BTreeMap<String, String>,
    pub request_headers: BTreeMap<String, String>,
    pub body: Value,
    /// Raw body length in bytes.
    pub size: usize,
    pub content_type: String,
    pub schema: SchemaNode,
}

impl Exchange {
    /// Same exchange carrying a replacement body; size and schema are kept.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// `scheme://host/path` with query and fragment stripped.
    pub fn endpoint_key(&self) -> String {
        endpoint_key(&self.url)
    }
}

pub fn endpoint_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => format!(
            "{}://{}{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or(""),
            parsed.path()
        ),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    }
}

/// Running counters over every exchange captured in one crawl.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaptureStats {
    pub total_captured: usize,
    pub unique_endpoints: BTreeSet<String>,
    pub methods: BTreeMap<String, usize>,
    pub status_codes: BTreeMap<u16, usize>,
}

impl CaptureStats {
    pub fn record(&mut self, exchange: &Exchange) {
        self.total_captured += 1;
        self.unique_endpoints.insert(exchange.endpoint_key());
        *self.methods.entry(exchange.method.clone()).or_insert(0) += 1;
        *self.status_codes.entry(exchange.status_code).or_insert(0) += 1;
    }

    pub fn unique_endpoint_count(&self) -> usize {
        self.unique_endpoints.len()
    }
}
