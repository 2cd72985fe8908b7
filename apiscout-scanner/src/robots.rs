use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Rules from the `User-agent: *` groups of a robots.txt file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsRules {
    disallowed: Vec<String>,
    crawl_delay: Option<Duration>,
}

impl RobotsRules {
    /// Rules that allow everything.
    pub fn permissive() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let mut rules = Self::default();
        let mut in_wildcard_group = false;

        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match field.trim().to_lowercase().as_str() {
                "user-agent" => in_wildcard_group = value == "*",
                "disallow" if in_wildcard_group && !value.is_empty() => {
                    rules.disallowed.push(value.to_string());
                }
                "crawl-delay" if in_wildcard_group => {
                    // Negative, NaN and out-of-range delays are ignored.
                    if let Ok(seconds) = value.parse::<f64>()
                        && let Ok(delay) = Duration::try_from_secs_f64(seconds)
                    {
                        rules.crawl_delay = Some(delay);
                    }
                }
                _ => {}
            }
        }

        rules
    }

    /// Fetch `<scheme>://<host>/robots.txt` for `base_url`. Any failure yields
    /// permissive rules.
    pub async fn fetch(client: &Client, base_url: &str) -> Self {
        let Some(robots_url) = robots_url(base_url) else {
            return Self::permissive();
        };

        let response = match client.get(&robots_url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Could not fetch {}: {}", robots_url, e);
                return Self::permissive();
            }
        };

        if response.status().as_u16() != 200 {
            debug!("No robots.txt at {} ({})", robots_url, response.status());
            return Self::permissive();
        }

        match response.text().await {
            Ok(text) => {
                let rules = Self::parse(&text);
                debug!(
                    "Loaded robots.txt: {} disallowed prefixes, crawl delay {:?}",
                    rules.disallowed.len(),
                    rules.crawl_delay
                );
                rules
            }
            Err(e) => {
                warn!("Could not read {}: {}", robots_url, e);
                Self::permissive()
            }
        }
    }

    pub fn is_allowed(&self, url: &str) -> bool {
        if self.disallowed.is_empty() {
            return true;
        }
        let path = match Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => return true,
        };
        !self
            .disallowed
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }

    pub fn disallowed(&self) -> &[String] {
        &self.disallowed
    }
}

fn robots_url(base_url: &str) -> Option<String> {
    let parsed = Url::parse(base_url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}://{}:{}/robots.txt", parsed.scheme(), host, port),
        None => format!("{}://{}/robots.txt", parsed.scheme(), host),
    })
}
