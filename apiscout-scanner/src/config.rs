//! Scan configuration.
//!
//! [`ScanConfig`] is the serde view of the TOML document; [`CompiledConfig`] is
//! what the crawler actually consumes. Every regex is compiled in
//! [`ScanConfig::compile`] so a bad pattern stops the run before the first
//! request is made.

use crate::error::ConfigError;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config written by `apiscout init`.
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../config/default.toml");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub crawl: CrawlSettings,
    pub detection: DetectionSettings,
    pub privacy: PrivacySettings,
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    pub max_depth: usize,
    pub page_delay_ms: u64,
    pub timeout_ms: u64,
    pub respect_robots: bool,
    pub user_agent: String,
    pub priority_boosts: Vec<PriorityBoost>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityBoost {
    pub pattern: String,
    pub boost: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub ignore_patterns: Vec<String>,
    pub api_content_types: Vec<String>,
    pub min_json_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacySettings {
    pub anonymize: bool,
    pub sensitive_fields: Vec<String>,
    pub mask_char: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        let boosts = [
            (r"/api/", 10),
            (r"/graphql", 10),
            (r"/rest/", 9),
            (r"/v\d+/", 8),
            (r"/products", 7),
            (r"/search", 7),
            (r"/data", 7),
            (r"/users", 6),
            (r"/posts", 6),
        ];

        Self {
            max_depth: 3,
            page_delay_ms: 2000,
            timeout_ms: 30_000,
            respect_robots: true,
            user_agent: format!(
                "apiscout/{} (https://github.com/trapdoorsec/apiscout)",
                env!("CARGO_PKG_VERSION")
            ),
            priority_boosts: boosts
                .iter()
                .map(|(pattern, boost)| PriorityBoost {
                    pattern: pattern.to_string(),
                    boost: *boost,
                })
                .collect(),
        }
    }
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            ignore_patterns: vec![
                r".*\.(?:png|jpe?g|gif|svg|ico|webp|woff2?|ttf|css)(?:\?.*)?$".to_string(),
                r"https?://(?:www\.)?google-analytics\.com".to_string(),
                r"https?://(?:www\.)?googletagmanager\.com".to_string(),
                r"https?://[^/]*doubleclick\.net".to_string(),
            ],
            api_content_types: vec![
                "application/json".to_string(),
                "application/vnd.api+json".to_string(),
                "application/ld+json".to_string(),
                "application/graphql".to_string(),
                "text/json".to_string(),
            ],
            min_json_size: 50,
        }
    }
}

impl Default for PrivacySettings {
    fn default() -> Self {
        let fields = [
            "email",
            "phone",
            "phone_number",
            "ssn",
            "password",
            "credit_card",
            "card_number",
            "address",
            "first_name",
            "last_name",
            "full_name",
            "birth_date",
            "date_of_birth",
            "ip_address",
        ];

        Self {
            anonymize: true,
            sensitive_fields: fields.iter().map(|f| f.to_string()).collect(),
            mask_char: "*".to_string(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "~/.config/apiscout/apiscout.db".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Validated, ready-to-use settings.
#[derive(Debug, Clone)]
pub struct CompiledConfig {
    pub max_depth: usize,
    pub page_delay: Duration,
    pub timeout: Duration,
    pub respect_robots: bool,
    pub user_agent: String,
    pub priority_boosts: Vec<(Regex, i64)>,
    /// Anchored at the start of the URL.
    pub ignore_patterns: Vec<Regex>,
    /// Lowercased substrings matched against the response content type.
    pub api_content_types: Vec<String>,
    pub min_json_size: usize,
    pub anonymize: bool,
    /// Lowercased field names.
    pub sensitive_fields: HashSet<String>,
    pub mask_char: char,
}

impl ScanConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Database location with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).as_ref())
    }

    pub fn compile(&self) -> Result<CompiledConfig, ConfigError> {
        let mut priority_boosts = Vec::with_capacity(self.crawl.priority_boosts.len());
        for entry in &self.crawl.priority_boosts {
            if entry.pattern.trim().is_empty() {
                return Err(ConfigError::InvalidBoost(format!(
                    "empty pattern for boost {}",
                    entry.boost
                )));
            }
            let regex = RegexBuilder::new(&entry.pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| ConfigError::InvalidPattern {
                    field: "priority_boosts",
                    pattern: entry.pattern.clone(),
                    source,
                })?;
            priority_boosts.push((regex, entry.boost));
        }

        let ignore_patterns = self
            .detection
            .ignore_patterns
            .iter()
            .map(|pattern| {
                Regex::new(&format!("^(?:{})", pattern)).map_err(|source| {
                    ConfigError::InvalidPattern {
                        field: "ignore_patterns",
                        pattern: pattern.clone(),
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut mask_chars = self.privacy.mask_char.chars();
        let mask_char = match (mask_chars.next(), mask_chars.next()) {
            (Some(c), None) => c,
            _ => {
                return Err(ConfigError::InvalidValue {
                    field: "privacy.mask_char",
                    reason: format!(
                        "expected a single character, got '{}'",
                        self.privacy.mask_char
                    ),
                });
            }
        };

        Ok(CompiledConfig {
            max_depth: self.crawl.max_depth,
            page_delay: Duration::from_millis(self.crawl.page_delay_ms),
            timeout: Duration::from_millis(self.crawl.timeout_ms),
            respect_robots: self.crawl.respect_robots,
            user_agent: self.crawl.user_agent.clone(),
            priority_boosts,
            ignore_patterns,
            api_content_types: self
                .detection
                .api_content_types
                .iter()
                .map(|ct| ct.to_lowercase())
                .collect(),
            min_json_size: self.detection.min_json_size,
            anonymize: self.privacy.anonymize,
            sensitive_fields: self
                .privacy
                .sensitive_fields
                .iter()
                .map(|f| f.to_lowercase())
                .collect(),
            mask_char,
        })
    }
}

impl Default for CompiledConfig {
    fn default() -> Self {
        // The built-in tables are known-good patterns.
        ScanConfig::default()
            .compile()
            .expect("default configuration compiles")
    }
}
