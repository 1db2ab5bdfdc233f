use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Client;
use tracing::{debug, info};

use super::config::CatalogConfig;
use super::error::TransportError;
use super::planner::Page;
use super::record::ProductRecord;
use super::request::SearchRequest;

const SEARCH_PATH: &str = "/api/catalog_system/pub/products/search/";
const RESOURCES_HEADER: &str = "resources";

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

fn is_loopback(base_url: &str) -> bool {
    let Ok(url) = url::Url::parse(base_url) else {
        return false;
    };
    match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// One result window of one search against the remote endpoint.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    async fn perform_search(
        &self,
        request: &SearchRequest,
        page: &Page,
    ) -> Result<Vec<ProductRecord>, TransportError>;
}

/// Storefront catalog search over HTTP:
/// `GET {base}/api/catalog_system/pub/products/search/?fq=..&fq=..&_from=..&_to=..`
/// with the window repeated in the `resources` header.
#[derive(Debug, Clone)]
pub struct HttpSearchTransport {
    base_url: String,
    http: Client,
    trace_bodies: bool,
}

impl HttpSearchTransport {
    pub fn new(cfg: &CatalogConfig) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (k, v) in &cfg.extra_headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| TransportError::Other(format!("header name {k}: {e}")))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| TransportError::Other(format!("header value for {k}: {e}")))?;
            headers.insert(name, value);
        }

        let mut builder = Client::builder()
            .default_headers(headers)
            .user_agent(cfg.user_agent.clone())
            .gzip(true)
            .pool_idle_timeout(Duration::from_secs(300))
            .tcp_keepalive(Duration::from_secs(60));
        if let Some(secs) = cfg.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        // local catalogs are reached directly, never through a system proxy
        if is_loopback(&cfg.base_url) {
            builder = builder.no_proxy();
        }

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            http: builder.build()?,
            trace_bodies: cfg.trace_bodies,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, SEARCH_PATH)
    }
}

#[async_trait]
impl SearchTransport for HttpSearchTransport {
    async fn perform_search(
        &self,
        request: &SearchRequest,
        page: &Page,
    ) -> Result<Vec<ProductRecord>, TransportError> {
        let url = self.endpoint();
        let resources = page.resources();
        let t0 = Instant::now();

        let resp = self
            .http
            .get(&url)
            .query(&request.query_pairs(page))
            .headers(request.headers.clone())
            .header(RESOURCES_HEADER, resources.as_str())
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        info!(
            url = %url,
            resources = %resources,
            clauses = request.clauses.len(),
            status = status.as_u16(),
            body_len = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "catalog search response"
        );
        if self.trace_bodies {
            debug!(resources = %resources, sample = %truncate_for_log(body.clone(), 512), "catalog search body sample");
        }

        // the endpoint answers 206 Partial Content for windowed searches
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                body: truncate_for_log(body, 2000),
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}
