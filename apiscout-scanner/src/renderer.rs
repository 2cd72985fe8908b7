use crate::error::{Result, ScanError};
use reqwest::Client;
use reqwest::header::HeaderMap;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

/// One network response observed while a page was rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEvent {
    pub url: String,
    pub method: String,
    pub status: u16,
    /// Header names are lowercase.
    pub headers: BTreeMap<String, String>,
    pub request_headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl ResponseEvent {
    pub fn new(url: impl Into<String>, status: u16) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            status,
            headers: BTreeMap::new(),
            request_headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn with_request_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.request_headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// `content-type` header, or an empty string.
    pub fn content_type(&self) -> &str {
        self.headers
            .get("content-type")
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Result of navigating to one URL.
///
/// `responses` yields events in whatever order the renderer observed them and
/// closes once the page is done. `links` may be relative and may repeat.
pub struct PageVisit {
    pub url: String,
    pub status: Option<u16>,
    pub responses: mpsc::Receiver<ResponseEvent>,
    pub links: Vec<String>,
}

impl PageVisit {
    /// A visit whose response events are already known.
    pub fn from_events(
        url: impl Into<String>,
        status: Option<u16>,
        events: Vec<ResponseEvent>,
        links: Vec<String>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            // Capacity covers every event and the receiver is still held here.
            let _ = tx.try_send(event);
        }
        Self {
            url: url.into(),
            status,
            responses: rx,
            links,
        }
    }
}

pub trait PageRenderer {
    /// Navigate to `url`. An `Err` means the navigation itself failed.
    fn visit(&self, url: &str) -> impl Future<Output = Result<PageVisit>> + Send;
}

/// Renderer that fetches pages over plain HTTP without executing scripts. The
/// page's own response is the only response event; links come from
/// `a[href]` elements of HTML bodies.
#[derive(Clone)]
pub struct HttpRenderer {
    client: Client,
    user_agent: String,
}

impl HttpRenderer {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl PageRenderer for HttpRenderer {
    async fn visit(&self, url: &str) -> Result<PageVisit> {
        debug!("Fetching {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = header_map(response.headers());
        let body = response.bytes().await?.to_vec();

        let is_html = headers
            .get("content-type")
            .is_some_and(|ct| ct.to_lowercase().contains("text/html"));
        let links = match Url::parse(&final_url) {
            Ok(base) if is_html => extract_links(&String::from_utf8_lossy(&body), &base),
            _ => Vec::new(),
        };

        let mut request_headers = BTreeMap::new();
        request_headers.insert("user-agent".to_string(), self.user_agent.clone());
        request_headers.insert("accept".to_string(), "*/*".to_string());

        let event = ResponseEvent {
            url: final_url.clone(),
            method: "GET".to_string(),
            status,
            headers,
            request_headers,
            body,
        };

        let (tx, rx) = mpsc::channel(1);
        tx.send(event)
            .await
            .map_err(|e| ScanError::RendererError(format!("response channel closed: {}", e)))?;

        Ok(PageVisit {
            url: final_url,
            status: Some(status),
            responses: rx,
            links,
        })
    }
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}

/// Absolute URLs of every navigable anchor in `html`, resolved against `base`.
pub fn extract_links(html: &str, base: &Url) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    document
        .select(&selector)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| resolve_link(base, href))
        .collect()
}

/// Resolve a raw href against the page it was found on. Scripting, mail and
/// phone links and bare fragments yield `None`.
pub fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    let lower = href.to_lowercase();
    if href.is_empty()
        || href.starts_with('#')
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
    {
        return None;
    }

    let mut resolved = base.join(href).ok()?;
    resolved.set_fragment(None);
    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    #[test]
    fn test_extract_links_resolves_and_filters() {
        let html = r##"<html><body>
            <a href="/api/users">Users</a>
            <a href="page2">Relative</a>
            <a href="https://other.com/x">External</a>
            <a href="#top">Top</a>
            <a href="javascript:void(0)">Script</a>
            <a href="mailto:someone@example.com">Mail</a>
            <a href="TEL:+15551234567">Phone</a>
            <a href="  ">Blank</a>
            <a>No href</a>
        </body></html>"##;
        let base = Url::parse("https://example.com/docs/index.html").unwrap();
        assert_eq!(
            extract_links(html, &base),
            vec![
                "https://example.com/api/users",
                "https://example.com/docs/page2",
                "https://other.com/x",
            ]
        );
    }

    #[test]
    fn test_resolve_link() {
        let base = Url::parse("https://example.com/a/b").unwrap();
        assert_eq!(
            resolve_link(&base, "../c?x=1").as_deref(),
            Some("https://example.com/c?x=1")
        );
        assert_eq!(
            resolve_link(&base, "//cdn.example.com/app.js").as_deref(),
            Some("https://cdn.example.com/app.js")
        );
        assert_eq!(
            resolve_link(&base, "/docs#intro").as_deref(),
            Some("https://example.com/docs")
        );
        assert_eq!(resolve_link(&base, "ftp://example.com/file"), None);
        assert_eq!(resolve_link(&base, "#section"), None);
    }

    #[test]
    fn test_content_type_lookup_is_case_insensitive() {
        let event = ResponseEvent::new("https://x/api", 200).with_header("Content-Type", "application/json");
        assert_eq!(event.content_type(), "application/json");
        assert_eq!(ResponseEvent::new("https://x/", 200).content_type(), "");
    }

    #[tokio::test]
    async fn test_page_visit_from_events_preserves_order() {
        let events = vec![
            ResponseEvent::new("https://x/a", 200),
            ResponseEvent::new("https://x/b", 200),
        ];
        let mut visit = PageVisit::from_events("https://x/", Some(200), events, Vec::new());
        assert_eq!(visit.responses.recv().await.unwrap().url, "https://x/a");
        assert_eq!(visit.responses.recv().await.unwrap().url, "https://x/b");
        assert!(visit.responses.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_http_renderer_html_page() {
        let mock_server = MockServer::start().await;
        let html = r#"<html><body><a href="/api/items">Items</a><a href="/about">About</a></body></html>"#;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_bytes(html.as_bytes()),
            )
            .mount(&mock_server)
            .await;

        let renderer = HttpRenderer::new("apiscout-test", Duration::from_secs(5)).unwrap();
        let mut visit = renderer.visit(&format!("{}/", mock_server.uri())).await.unwrap();

        assert_eq!(visit.status, Some(200));
        assert_eq!(
            visit.links,
            vec![
                format!("{}/api/items", mock_server.uri()),
                format!("{}/about", mock_server.uri()),
            ]
        );

        let event = visit.responses.recv().await.unwrap();
        assert_eq!(event.status, 200);
        assert_eq!(event.method, "GET");
        assert!(event.content_type().starts_with("text/html"));
        assert_eq!(event.request_headers.get("user-agent").unwrap(), "apiscout-test");
        assert!(visit.responses.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_http_renderer_json_has_no_links() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/items"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_bytes(br#"{"items": [{"href": "/nope"}]}"#.as_slice()),
            )
            .mount(&mock_server)
            .await;

        let renderer = HttpRenderer::new("apiscout-test", Duration::from_secs(5)).unwrap();
        let mut visit = renderer
            .visit(&format!("{}/api/items", mock_server.uri()))
            .await
            .unwrap();

        assert!(visit.links.is_empty());
        let event = visit.responses.recv().await.unwrap();
        assert_eq!(event.body, br#"{"items": [{"href": "/nope"}]}"#.to_vec());
    }

    #[tokio::test]
    async fn test_http_renderer_connection_failure_is_error() {
        let renderer = HttpRenderer::new("apiscout-test", Duration::from_millis(500)).unwrap();
        let result = renderer.visit("http://127.0.0.1:1/").await;
        assert!(matches!(result, Err(ScanError::HttpError(_))));
    }
}
