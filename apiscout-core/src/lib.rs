pub mod crawl;
pub mod data;

pub use crawl::{CrawlOptions, CrawlReport, execute_crawl, extract_url_path, run_crawl};
pub use data::{Database, DatabaseStats, EndpointRecord, SessionStatus};
