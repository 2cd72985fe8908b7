use crate::classifier::TrafficClassifier;
use crate::config::CompiledConfig;
use crate::error::{Result, ScanError};
use crate::exchange::{CaptureStats, Exchange};
use crate::frontier::{Frontier, FrontierStats, normalize_url};
use crate::pii::PiiEngine;
use crate::renderer::{PageRenderer, PageVisit, ResponseEvent, resolve_link};
use crate::robots::RobotsRules;
use crate::schema::SchemaNode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use url::Url;

/// Base priority of the start URL.
pub const SEED_PRIORITY: i64 = 10;
/// Base priority of links discovered on a page.
pub const LINK_PRIORITY: i64 = 5;

pub type CancelFlag = Arc<AtomicBool>;

/// Where captured exchanges go. Failures are returned to the caller of
/// [`Crawler::crawl`] as [`ScanError::StoreError`] and are never retried.
pub trait ExchangeStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Record one call against `(url, method)` and return the endpoint id.
    fn upsert_endpoint(
        &self,
        url: &str,
        method: &str,
        size: usize,
        schema: &SchemaNode,
    ) -> std::result::Result<i64, Self::Error>;

    fn append_call(&self, endpoint_id: i64, exchange: &Exchange)
    -> std::result::Result<i64, Self::Error>;
}

/// Progress notifications, drained by whoever drives the crawl.
#[derive(Debug, Clone, PartialEq)]
pub enum CrawlEvent {
    PageStarted { depth: usize, url: String },
    PageFailed { url: String, reason: String },
    PageSkipped { url: String },
    ApiCaptured { url: String, method: String, status: u16 },
}

#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub pages_visited: usize,
    pub pages_failed: usize,
    pub exchanges_captured: usize,
    pub frontier: FrontierStats,
    pub captures: CaptureStats,
    pub cancelled: bool,
}

pub struct Crawler<R> {
    renderer: R,
    frontier: Frontier,
    classifier: TrafficClassifier,
    pii: PiiEngine,
    robots: Option<RobotsRules>,
    page_delay: Duration,
    events: Option<UnboundedSender<CrawlEvent>>,
    captures: CaptureStats,
}

impl<R: PageRenderer> Crawler<R> {
    pub fn new(renderer: R, config: &CompiledConfig) -> Self {
        Self {
            renderer,
            frontier: Frontier::new(config.max_depth)
                .with_priority_boosts(config.priority_boosts.clone()),
            classifier: TrafficClassifier::from_config(config),
            pii: PiiEngine::from_config(config),
            robots: None,
            page_delay: config.page_delay,
            events: None,
            captures: CaptureStats::default(),
        }
    }

    /// Honour `rules` for every popped URL. A crawl delay longer than the
    /// configured page delay replaces it.
    pub fn with_robots(mut self, rules: RobotsRules) -> Self {
        if let Some(delay) = rules.crawl_delay() {
            self.page_delay = self.page_delay.max(delay);
        }
        self.robots = Some(rules);
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<CrawlEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn page_delay(&self) -> Duration {
        self.page_delay
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    pub fn capture_stats(&self) -> &CaptureStats {
        &self.captures
    }

    /// Crawl from `start_url` until the frontier drains or `cancel` is set.
    ///
    /// Cancellation is checked between pages only; the page in progress is
    /// fully drained first.
    pub async fn crawl<S: ExchangeStore>(
        &mut self,
        start_url: &str,
        store: &S,
        cancel: &AtomicBool,
    ) -> Result<CrawlSummary> {
        let parsed = Url::parse(start_url)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", start_url, e)))?;
        if parsed.host_str().is_none() {
            return Err(ScanError::InvalidUrl(format!("{}: missing host", start_url)));
        }

        info!("Starting crawl of {}", start_url);
        self.frontier.add(start_url, 0, SEED_PRIORITY);

        let mut summary = CrawlSummary::default();

        loop {
            if cancel.load(Ordering::SeqCst) {
                info!("Crawl cancelled");
                summary.cancelled = true;
                break;
            }

            let Some((depth, url)) = self.frontier.next() else {
                break;
            };

            if let Some(robots) = &self.robots
                && !robots.is_allowed(&url)
            {
                debug!("Disallowed by robots.txt: {}", url);
                self.emit(CrawlEvent::PageSkipped { url });
                continue;
            }

            self.emit(CrawlEvent::PageStarted {
                depth,
                url: url.clone(),
            });

            match self.renderer.visit(&url).await {
                Ok(visit) => {
                    let links = self.process_visit(&url, visit, store, &mut summary).await?;
                    let page_url = Url::parse(&url).ok();
                    for link in links {
                        let absolute = match &page_url {
                            Some(base) => resolve_link(base, &link),
                            None => Some(link),
                        };
                        if let Some(absolute) = absolute {
                            self.frontier.add(&absolute, depth + 1, LINK_PRIORITY);
                        }
                    }
                    summary.pages_visited += 1;
                }
                Err(e) => {
                    warn!("Crawl failed for {}: {}", url, e);
                    summary.pages_failed += 1;
                    self.emit(CrawlEvent::PageFailed {
                        url,
                        reason: e.to_string(),
                    });
                }
            }

            if !self.frontier.is_empty() && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
        }

        summary.frontier = self.frontier.stats();
        summary.captures = self.captures.clone();
        info!(
            "Crawl complete. Visited {} pages, captured {} API calls",
            summary.pages_visited, summary.exchanges_captured
        );
        Ok(summary)
    }

    /// Drain the page's response events, then return its links. Pages with an
    /// error status contribute no links.
    async fn process_visit<S: ExchangeStore>(
        &mut self,
        url: &str,
        visit: PageVisit,
        store: &S,
        summary: &mut CrawlSummary,
    ) -> Result<Vec<String>> {
        let PageVisit {
            status,
            mut responses,
            links,
            ..
        } = visit;

        while let Some(event) = responses.recv().await {
            if self.capture(event, store)? {
                summary.exchanges_captured += 1;
            }
        }

        match status {
            Some(code) if code >= 400 => {
                warn!("HTTP {} for {}", code, url);
                summary.pages_failed += 1;
                self.emit(CrawlEvent::PageFailed {
                    url: url.to_string(),
                    reason: format!("HTTP {}", code),
                });
                Ok(Vec::new())
            }
            _ => {
                info!("Crawled {} ({} links found)", url, links.len());
                Ok(links)
            }
        }
    }

    /// classify, extract, anonymize, store. Returns whether the event was kept.
    fn capture<S: ExchangeStore>(&mut self, event: ResponseEvent, store: &S) -> Result<bool> {
        let Some(exchange) = self.classifier.process(&event) else {
            return Ok(false);
        };

        let findings = self.pii.detect(&exchange.body);
        if !findings.is_empty() {
            let counts: Vec<String> = findings
                .iter()
                .map(|(category, matches)| format!("{}={}", category.as_str(), matches.len()))
                .collect();
            debug!("PII in {}: {}", exchange.url, counts.join(", "));
        }

        let body = self.pii.anonymize(&exchange.body);
        let exchange = exchange.with_body(body);

        let endpoint_url = normalize_url(&exchange.url).unwrap_or_else(|| exchange.url.clone());
        let endpoint_id = store
            .upsert_endpoint(
                &endpoint_url,
                &exchange.method,
                exchange.size,
                &exchange.schema,
            )
            .map_err(|e| ScanError::StoreError(Box::new(e)))?;
        store
            .append_call(endpoint_id, &exchange)
            .map_err(|e| ScanError::StoreError(Box::new(e)))?;

        info!("API found: {} {} [{}]", exchange.method, exchange.url, exchange.status_code);
        self.captures.record(&exchange);
        self.emit(CrawlEvent::ApiCaptured {
            url: exchange.url,
            method: exchange.method,
            status: exchange.status_code,
        });
        Ok(true)
    }

    fn emit(&self, event: CrawlEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is watching.
            let _ = events.send(event);
        }
    }
}
