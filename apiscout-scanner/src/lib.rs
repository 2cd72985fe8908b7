pub mod classifier;
pub mod config;
pub mod crawler;
pub mod error;
pub mod exchange;
pub mod frontier;
pub mod pii;
pub mod renderer;
pub mod robots;
pub mod schema;

pub use classifier::TrafficClassifier;
pub use config::{CompiledConfig, ScanConfig};
pub use crawler::{CancelFlag, CrawlEvent, CrawlSummary, Crawler, ExchangeStore};
pub use error::{ConfigError, ScanError};
pub use exchange::{CaptureStats, Exchange};
pub use frontier::{Frontier, FrontierStats, normalize_url};
pub use pii::{PiiCategory, PiiEngine};
pub use renderer::{HttpRenderer, PageRenderer, PageVisit, ResponseEvent};
pub use robots::RobotsRules;
pub use schema::{SchemaInferencer, SchemaNode};
