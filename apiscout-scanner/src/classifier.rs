use crate::config::CompiledConfig;
use crate::exchange::Exchange;
use crate::renderer::ResponseEvent;
use crate::schema::SchemaInferencer;
use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// URL fragments that mark a request as API traffic regardless of content type.
pub const API_PATH_MARKERS: [&str; 6] = ["/api/", "/v1/", "/v2/", "/v3/", "/graphql", "/rest/"];

/// Decides which observed responses are API traffic and turns them into
/// [`Exchange`] records.
#[derive(Debug, Clone)]
pub struct TrafficClassifier {
    ignore_patterns: Vec<Regex>,
    api_content_types: Vec<String>,
    min_json_size: usize,
    schema: SchemaInferencer,
}

impl TrafficClassifier {
    pub fn new(
        ignore_patterns: Vec<Regex>,
        api_content_types: Vec<String>,
        min_json_size: usize,
    ) -> Self {
        Self {
            ignore_patterns,
            api_content_types: api_content_types
                .into_iter()
                .map(|ct| ct.to_lowercase())
                .collect(),
            min_json_size,
            schema: SchemaInferencer::default(),
        }
    }

    pub fn from_config(config: &CompiledConfig) -> Self {
        Self::new(
            config.ignore_patterns.clone(),
            config.api_content_types.clone(),
            config.min_json_size,
        )
    }

    pub fn with_schema_inferencer(mut self, schema: SchemaInferencer) -> Self {
        self.schema = schema;
        self
    }

    pub fn is_ignored(&self, url: &str) -> bool {
        self.ignore_patterns.iter().any(|re| re.is_match(url))
    }

    pub fn classify(&self, url: &str, content_type: &str) -> bool {
        if self.is_ignored(url) {
            debug!("Ignored by pattern: {}", url);
            return false;
        }

        let content_type = content_type.to_lowercase();
        if self
            .api_content_types
            .iter()
            .any(|ct| content_type.contains(ct.as_str()))
        {
            return true;
        }

        let url = url.to_lowercase();
        API_PATH_MARKERS.iter().any(|marker| url.contains(marker))
    }

    /// Decode a classified response. `None` means "not API traffic": the body
    /// is too small, not UTF-8, or not JSON.
    pub fn extract(&self, event: &ResponseEvent) -> Option<Exchange> {
        let size = event.body.len();
        if size < self.min_json_size {
            debug!("Body below minimum size ({} < {}): {}", size, self.min_json_size, event.url);
            return None;
        }

        let text = std::str::from_utf8(&event.body).ok()?;
        let body: Value = match serde_json::from_str(text) {
            Ok(body) => body,
            Err(e) => {
                debug!("Body is not JSON ({}): {}", e, event.url);
                return None;
            }
        };

        Some(Exchange {
            timestamp: Utc::now(),
            url: event.url.clone(),
            method: event.method.clone(),
            status_code: event.status,
            response_headers: event.headers.clone(),
            request_headers: event.request_headers.clone(),
            schema: self.schema.infer(&body),
            body,
            size,
            content_type: event.content_type().to_string(),
        })
    }

    /// [`classify`](Self::classify) then [`extract`](Self::extract).
    pub fn process(&self, event: &ResponseEvent) -> Option<Exchange> {
        if !self.classify(&event.url, event.content_type()) {
            return None;
        }
        self.extract(event)
    }
}

impl Default for TrafficClassifier {
    fn default() -> Self {
        Self::from_config(&CompiledConfig::default())
    }
}
