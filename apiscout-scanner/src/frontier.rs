//! Prioritized, deduplicated crawl queue.
//!
//! Entries pop in `priority desc, insertion order asc` order. A URL is accepted
//! at most once per frontier (keyed by its normalized form), never deeper than
//! `max_depth`, and only on the host of the first URL ever accepted.

use regex::Regex;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, HashSet};
use tracing::debug;
use url::Url;

/// Minimum length a normalized URL must exceed before a trailing `/` is dropped.
const TRAILING_SLASH_MIN_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub raw_url: String,
    pub normalized_url: String,
    pub depth: usize,
    pub priority: i64,
    pub visited: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontierStats {
    pub visited: usize,
    pub queued: usize,
    pub visited_by_depth: BTreeMap<usize, usize>,
}

/// Heap key. Higher priority wins, then the lower sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueKey {
    priority: i64,
    seq: Reverse<usize>,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct Frontier {
    max_depth: usize,
    boosts: Vec<(Regex, i64)>,
    /// Every entry ever accepted, indexed by insertion sequence.
    entries: Vec<FrontierEntry>,
    queue: BinaryHeap<QueueKey>,
    seen: HashSet<String>,
    base_domain: Option<String>,
}

impl Frontier {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            boosts: Vec::new(),
            entries: Vec::new(),
            queue: BinaryHeap::new(),
            seen: HashSet::new(),
            base_domain: None,
        }
    }

    /// Boost patterns should be compiled case-insensitive, as
    /// [`crate::config::ScanConfig::compile`] does.
    pub fn with_priority_boosts(mut self, boosts: Vec<(Regex, i64)>) -> Self {
        self.boosts = boosts;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn base_domain(&self) -> Option<&str> {
        self.base_domain.as_deref()
    }

    /// Queue `url`. Returns whether it was accepted; rejections are silent
    /// control flow (duplicate, too deep, off-domain or unparseable).
    pub fn add(&mut self, url: &str, depth: usize, base_priority: i64) -> bool {
        let Some(normalized) = normalize_url(url) else {
            debug!("Skipping unparseable URL: {}", url);
            return false;
        };

        if self.seen.contains(&normalized) || depth > self.max_depth {
            return false;
        }

        let Some(authority) = url_authority(&normalized) else {
            return false;
        };
        match &self.base_domain {
            Some(base) if *base != authority => {
                debug!("Skipping off-domain URL: {} (base: {})", normalized, base);
                return false;
            }
            Some(_) => {}
            None => {
                debug!("Base domain pinned to {}", authority);
                self.base_domain = Some(authority);
            }
        }

        let priority = self.calculate_priority(&normalized, base_priority);
        let seq = self.entries.len();

        debug!(
            "URL queued: {} (depth: {}, priority: {})",
            normalized, depth, priority
        );

        self.seen.insert(normalized.clone());
        self.entries.push(FrontierEntry {
            raw_url: url.to_string(),
            normalized_url: normalized,
            depth,
            priority,
            visited: false,
        });
        self.queue.push(QueueKey {
            priority,
            seq: Reverse(seq),
        });
        true
    }

    /// Pop the best unvisited entry as `(depth, normalized_url)`.
    pub fn next(&mut self) -> Option<(usize, String)> {
        while let Some(key) = self.queue.pop() {
            let entry = &mut self.entries[key.seq.0];
            if entry.visited {
                continue;
            }
            entry.visited = true;
            return Some((entry.depth, entry.normalized_url.clone()));
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn entries(&self) -> &[FrontierEntry] {
        &self.entries
    }

    pub fn stats(&self) -> FrontierStats {
        let mut visited_by_depth = BTreeMap::new();
        let mut visited = 0;
        for entry in self.entries.iter().filter(|e| e.visited) {
            visited += 1;
            *visited_by_depth.entry(entry.depth).or_insert(0) += 1;
        }

        FrontierStats {
            visited,
            queued: self.queue.len(),
            visited_by_depth,
        }
    }

    fn calculate_priority(&self, normalized: &str, base_priority: i64) -> i64 {
        let mut priority = base_priority;
        for (pattern, boost) in &self.boosts {
            if pattern.is_match(normalized) {
                priority += boost;
                debug!(
                    "Priority boost +{} for {} (pattern: {})",
                    boost,
                    normalized,
                    pattern.as_str()
                );
            }
        }
        priority
    }
}

/// Canonical form used for deduplication: `scheme://host[:port]/path[?query]`
/// with the fragment removed and a single trailing `/` dropped from anything
/// longer than ten characters. Returns `None` for URLs without a host.
pub fn normalize_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let authority = authority_of(&parsed)?;

    let mut normalized = format!("{}://{}{}", parsed.scheme(), authority, parsed.path());
    if let Some(query) = parsed.query()
        && !query.is_empty()
    {
        normalized.push('?');
        normalized.push_str(query);
    }

    if normalized.ends_with('/')
        && !normalized.ends_with("//")
        && normalized.chars().count() > TRAILING_SLASH_MIN_LEN
    {
        normalized.pop();
    }

    Some(normalized)
}

fn url_authority(url: &str) -> Option<String> {
    Url::parse(url).ok().as_ref().and_then(authority_of)
}

/// Host plus explicit non-default port. User info is never part of it.
fn authority_of(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}
