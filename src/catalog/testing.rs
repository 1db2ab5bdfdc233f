//! In-memory stand-in for the search endpoint used by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;

use super::clause::ClauseKind;
use super::error::TransportError;
use super::planner::Page;
use super::record::ProductRecord;
use super::request::{SearchOptions, SearchRequest};
use super::transport::SearchTransport;

#[derive(Debug, Clone)]
struct Call {
    fq: Vec<String>,
    window: String,
    options: SearchOptions,
    headers: HeaderMap,
}

#[derive(Default)]
pub struct ScriptedTransport {
    products: Mutex<Vec<ProductRecord>>,
    tags: Mutex<HashMap<String, Vec<String>>>,
    calls: AtomicUsize,
    log: Mutex<Vec<Call>>,
    fail_windows: Mutex<Vec<String>>,
    fail_next: AtomicUsize,
    fail_always: Mutex<bool>,
    delay: Mutex<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ProductRecord) {
        self.products.lock().unwrap().push(record);
    }

    /// Make a non-identity clause (category, price...) match `product_id`.
    pub fn tag(&self, clause: &str, product_id: &str) {
        self.tags
            .lock()
            .unwrap()
            .entry(clause.to_string())
            .or_default()
            .push(product_id.to_string());
    }

    pub fn fail_window(&self, window: &str) {
        self.fail_windows.lock().unwrap().push(window.to_string());
    }

    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn fail_always(&self) {
        *self.fail_always.lock().unwrap() = true;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn windows(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|c| c.window.clone()).collect()
    }

    pub fn requests(&self) -> Vec<Vec<String>> {
        self.log.lock().unwrap().iter().map(|c| c.fq.clone()).collect()
    }

    /// `fq` and `map` of every request, in send order.
    pub fn sent(&self) -> Vec<(Vec<String>, Option<String>)> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|c| (c.fq.clone(), c.options.map.clone()))
            .collect()
    }

    pub fn last_options(&self) -> Option<SearchOptions> {
        self.log.lock().unwrap().last().map(|c| c.options.clone())
    }

    pub fn last_headers(&self) -> Option<HeaderMap> {
        self.log.lock().unwrap().last().map(|c| c.headers.clone())
    }

    // Identity clauses add up; any other clauses narrow the result together,
    // the way the endpoint ANDs them.
    fn matches(&self, request: &SearchRequest) -> Vec<ProductRecord> {
        let products = self.products.lock().unwrap();
        let tags = self.tags.lock().unwrap();
        let filters: Vec<_> = request
            .clauses
            .iter()
            .filter(|c| !c.kind().is_identity())
            .collect();
        if !filters.is_empty() {
            return products
                .iter()
                .filter(|p| {
                    filters.iter().all(|c| {
                        tags.get(c.as_str())
                            .is_some_and(|ids| ids.contains(&p.product_id))
                    })
                })
                .cloned()
                .collect();
        }

        let mut out: Vec<ProductRecord> = Vec::new();
        for clause in &request.clauses {
            let hits: Vec<&ProductRecord> = match clause.kind() {
                ClauseKind::ProductId => products
                    .iter()
                    .filter(|p| p.product_id == clause.value())
                    .collect(),
                ClauseKind::SkuId => products
                    .iter()
                    .filter(|p| p.sku_ids().any(|s| s == clause.value()))
                    .collect(),
                _ => Vec::new(),
            };
            for hit in hits {
                if !out.iter().any(|p| p.product_id == hit.product_id) {
                    out.push(hit.clone());
                }
            }
        }
        out
    }
}

#[async_trait]
impl SearchTransport for ScriptedTransport {
    async fn perform_search(
        &self,
        request: &SearchRequest,
        page: &Page,
    ) -> Result<Vec<ProductRecord>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(Call {
            fq: request.clauses.iter().map(|c| c.as_str().to_string()).collect(),
            window: page.resources(),
            options: request.options.clone(),
            headers: request.headers.clone(),
        });

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if *self.fail_always.lock().unwrap() {
            return Err(TransportError::Other("scripted outage".into()));
        }
        if self.fail_windows.lock().unwrap().contains(&page.resources()) {
            return Err(TransportError::Http {
                status: 503,
                body: "scripted window failure".into(),
            });
        }
        let pending_failures = self.fail_next.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fail_next.store(pending_failures - 1, Ordering::SeqCst);
            return Err(TransportError::Other("scripted transient failure".into()));
        }

        Ok(self
            .matches(request)
            .into_iter()
            .skip(page.from)
            .take(page.count())
            .collect())
    }
}
