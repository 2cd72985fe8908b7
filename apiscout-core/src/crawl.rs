use crate::data::Database;
use apiscout_scanner::error::{Result, ScanError};
use apiscout_scanner::{
    CancelFlag, CompiledConfig, CrawlEvent, CrawlSummary, Crawler, HttpRenderer, PageRenderer,
    RobotsRules,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::info;
use url::Url;

/// Options for configuring a crawl operation
pub struct CrawlOptions {
    pub url: String,
    pub config: CompiledConfig,
    pub show_progress_bars: bool,
}

#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub session_id: String,
    pub summary: CrawlSummary,
}

/// Path and query of a URL for compact display. Unparseable input comes back
/// unchanged.
pub fn extract_url_path(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let path = if parsed.path().is_empty() { "/" } else { parsed.path() };
            match parsed.query() {
                Some(query) if !query.is_empty() => format!("{}?{}", path, query),
                _ => path.to_string(),
            }
        }
        Err(_) => url.to_string(),
    }
}

fn store_error(e: rusqlite::Error) -> ScanError {
    ScanError::StoreError(Box::new(e))
}

/// Crawl `options.url` over plain HTTP, recording everything into `db` under
/// a new crawl session.
pub async fn execute_crawl(
    options: CrawlOptions,
    db: &Database,
    cancel: CancelFlag,
) -> Result<CrawlReport> {
    let CrawlOptions {
        url,
        config,
        show_progress_bars,
    } = options;

    Url::parse(&url).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", url, e)))?;

    let renderer = HttpRenderer::new(&config.user_agent, config.timeout)?;
    let robots = if config.respect_robots {
        Some(RobotsRules::fetch(renderer.client(), &url).await)
    } else {
        None
    };

    run_crawl(renderer, robots, &url, &config, db, cancel, show_progress_bars).await
}

/// [`execute_crawl`] with a caller-supplied renderer.
pub async fn run_crawl<R: PageRenderer>(
    renderer: R,
    robots: Option<RobotsRules>,
    url: &str,
    config: &CompiledConfig,
    db: &Database,
    cancel: CancelFlag,
    show_progress_bars: bool,
) -> Result<CrawlReport> {
    let session_id = db.create_session(url).map_err(store_error)?;
    info!("Crawl session {} started for {}", session_id, url);

    let mut crawler = Crawler::new(renderer, config);
    if let Some(rules) = robots {
        crawler = crawler.with_robots(rules);
    }

    let progress_bar = show_progress_bars.then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message("Starting crawl...");
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    });

    let progress_task = match &progress_bar {
        Some(pb) => {
            let (tx, rx) = mpsc::unbounded_channel();
            crawler = crawler.with_events(tx);
            Some(tokio::spawn(drive_progress(pb.clone(), rx)))
        }
        None => None,
    };

    let result = crawler.crawl(url, db, &cancel).await;
    // Closes the event channel so the progress task can finish.
    drop(crawler);
    let joined = match progress_task {
        Some(task) => task.await.map_err(ScanError::from),
        None => Ok(()),
    };
    let result = result.and_then(|summary| joined.map(|()| summary));

    settle_session(db, session_id, result, progress_bar.as_ref())
}

/// Close the session as completed, cancelled or failed to match `result`.
/// The crawl error, if any, is returned after the session is marked failed.
fn settle_session(
    db: &Database,
    session_id: String,
    result: Result<CrawlSummary>,
    progress_bar: Option<&ProgressBar>,
) -> Result<CrawlReport> {
    match result {
        Ok(summary) => {
            let message = if summary.cancelled {
                db.cancel_session(&session_id, summary.pages_visited, summary.exchanges_captured)
                    .map_err(store_error)?;
                format!(
                    "Crawl cancelled after {} pages, {} API calls captured",
                    summary.pages_visited, summary.exchanges_captured
                )
            } else {
                db.complete_session(&session_id, summary.pages_visited, summary.exchanges_captured)
                    .map_err(store_error)?;
                format!(
                    "Crawl complete! {} pages, {} API calls captured",
                    summary.pages_visited, summary.exchanges_captured
                )
            };
            if let Some(pb) = progress_bar {
                pb.finish_with_message(message);
            }
            Ok(CrawlReport {
                session_id,
                summary,
            })
        }
        Err(e) => {
            if let Some(pb) = progress_bar {
                pb.abandon_with_message(format!("Crawl failed: {}", e));
            }
            db.fail_session(&session_id).map_err(store_error)?;
            Err(e)
        }
    }
}

async fn drive_progress(pb: ProgressBar, mut events: UnboundedReceiver<CrawlEvent>) {
    let mut pages = 0usize;
    let mut apis = 0usize;

    while let Some(event) = events.recv().await {
        match event {
            CrawlEvent::PageStarted { depth, url } => {
                pages += 1;
                pb.set_message(format!(
                    "Crawling (depth {}) {} [{} pages, {} APIs]",
                    depth,
                    extract_url_path(&url),
                    pages,
                    apis
                ));
            }
            CrawlEvent::ApiCaptured { url, method, status } => {
                apis += 1;
                pb.println(format!("  [{}] {} {}", status, method, url));
            }
            CrawlEvent::PageFailed { url, reason } => {
                pb.println(format!("  [!] {} ({})", url, reason));
            }
            CrawlEvent::PageSkipped { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SessionStatus;

    #[tokio::test]
    async fn test_progress_failure_marks_session_failed() {
        let db = Database::in_memory().unwrap();
        let session_id = db.create_session("https://example.com").unwrap();

        let join_error = tokio::spawn(async { panic!("progress display crashed") })
            .await
            .unwrap_err();
        let result = settle_session(&db, session_id.clone(), Err(join_error.into()), None);

        assert!(matches!(result, Err(ScanError::JoinError(_))));
        let session = db.get_session(&session_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.end_time.is_some());
    }

    #[test]
    fn test_settle_session_completes_and_cancels() {
        let db = Database::in_memory().unwrap();

        let done = db.create_session("https://example.com").unwrap();
        let summary = CrawlSummary {
            pages_visited: 4,
            exchanges_captured: 2,
            ..Default::default()
        };
        let report = settle_session(&db, done.clone(), Ok(summary), None).unwrap();
        assert_eq!(report.session_id, done);
        let session = db.get_session(&done).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.apis_found, 2);

        let stopped = db.create_session("https://example.com").unwrap();
        let summary = CrawlSummary {
            cancelled: true,
            ..Default::default()
        };
        settle_session(&db, stopped.clone(), Ok(summary), None).unwrap();
        assert_eq!(
            db.get_session(&stopped).unwrap().unwrap().status,
            SessionStatus::Cancelled
        );
    }

    #[test]
    fn test_extract_url_path() {
        assert_eq!(extract_url_path("https://example.com"), "/");
        assert_eq!(extract_url_path("https://example.com/api/users"), "/api/users");
        assert_eq!(
            extract_url_path("https://example.com/search?q=shoes"),
            "/search?q=shoes"
        );
        assert_eq!(extract_url_path("not a url"), "not a url");
    }
}
