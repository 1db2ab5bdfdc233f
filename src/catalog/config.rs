use std::collections::HashMap;
use std::time::Duration;

use crate::catalog::planner::DEFAULT_PAGE_SIZE;
use crate::util::env::{env_flag, env_opt, env_parse, env_parse_opt};

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug)]
pub struct CatalogConfig {
    /// Storefront origin, e.g. `https://store.example.com`.
    pub base_url: String,
    pub page_size: usize,
    /// Attempts per page, first try included.
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Per-request wall clock limit. Unset means pages wait as long as the
    /// connection does.
    pub timeout_secs: Option<u64>,
    pub user_agent: String,
    /// Default `sc` for searches that do not set one.
    pub sales_channel: Option<String>,
    pub extra_headers: HashMap<String, String>,
    pub trace_bodies: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".into(),
            page_size: DEFAULT_PAGE_SIZE,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: 0,
            timeout_secs: None,
            user_agent: concat!("catalog-cache/", env!("CARGO_PKG_VERSION")).into(),
            sales_channel: None,
            extra_headers: HashMap::new(),
            trace_bodies: false,
        }
    }
}

impl CatalogConfig {
    /// Read `CATALOG_*` variables (after loading `.env`), falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            base_url: env_opt("CATALOG_BASE_URL").unwrap_or(d.base_url),
            page_size: env_parse("CATALOG_PAGE_SIZE", d.page_size).max(1),
            retry_attempts: env_parse("CATALOG_RETRY_ATTEMPTS", d.retry_attempts).max(1),
            retry_delay_ms: env_parse("CATALOG_RETRY_DELAY_MS", d.retry_delay_ms),
            timeout_secs: env_parse_opt("CATALOG_TIMEOUT_SECS"),
            user_agent: env_opt("CATALOG_USER_AGENT").unwrap_or(d.user_agent),
            sales_channel: env_opt("CATALOG_SALES_CHANNEL"),
            extra_headers: env_opt("CATALOG_EXTRA_HEADERS")
                .map(|raw| parse_header_list(&raw))
                .unwrap_or_default(),
            trace_bodies: env_flag("CATALOG_TRACE_BODIES", false),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// `k=v;k2=v2` → map. Entries without `=` or with an empty key are skipped.
pub fn parse_header_list(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}
