//! Fan-out/fan-in of paged catalog searches.
//!
//! A search admits its identity clauses one by one and its remaining clauses
//! as a single filter set. Each admitted part becomes a batch on its own task
//! that sends one request per page window, writes the returned products into
//! the cache and settles the ledger. The caller then waits for any earlier
//! batch it shares work with and resolves its clauses against the cache.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use reqwest::header::HeaderMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::clause::{routing_hint, FilterClause};
use super::config::CatalogConfig;
use super::context::CatalogContext;
use super::error::CatalogError;
use super::events::CatalogEvent;
use super::ledger::BatchTicket;
use super::planner::{plan, Page};
use super::record::ProductRecord;
use super::request::{FilterSet, SearchOptions, SearchRequest};
use super::resolver::{resolve, settle_clauses};
use super::transport::SearchTransport;

/// What a batch settles once its pages are in.
enum BatchTarget {
    Clauses,
    Set(FilterSet),
}

#[derive(Clone)]
pub struct FetchOrchestrator {
    ctx: Arc<CatalogContext>,
    transport: Arc<dyn SearchTransport>,
    cfg: Arc<CatalogConfig>,
}

impl FetchOrchestrator {
    pub fn new(
        ctx: Arc<CatalogContext>,
        transport: Arc<dyn SearchTransport>,
        cfg: Arc<CatalogConfig>,
    ) -> Self {
        Self {
            ctx,
            transport,
            cfg,
        }
    }

    pub fn context(&self) -> &Arc<CatalogContext> {
        &self.ctx
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.cfg
    }

    /// Resolve `clauses` to products, fetching only what no earlier call has
    /// fetched or is fetching. Fails with `EmptyResult` only when nothing at
    /// all resolved.
    pub async fn execute(
        &self,
        clauses: Vec<FilterClause>,
        mut options: SearchOptions,
        headers: HeaderMap,
    ) -> Result<Vec<Arc<ProductRecord>>, CatalogError> {
        if options.sales_channel.is_none() {
            options.sales_channel = self.cfg.sales_channel.clone();
        }

        let filters: Vec<FilterClause> = clauses
            .iter()
            .filter(|c| !c.kind().is_identity())
            .cloned()
            .collect();
        let set = FilterSet::new(filters, options.clone());

        let (admission, set_admission) = {
            let mut ledger = self.ctx.ledger.lock().await;
            let admission = ledger.admit(&clauses);
            let set_admission = set.as_ref().map(|s| ledger.admit_set(s));
            (admission, set_admission)
        };
        debug!(
            requested = clauses.len(),
            admitted = admission.admitted.len(),
            filter_set = set_admission.as_ref().map_or(0, |a| a.admitted.len()),
            "catalog admission"
        );

        let mut batches = Vec::new();
        let mut waiters = admission.waiters;
        if let Some(ticket) = admission.ticket {
            let request = SearchRequest::new(
                admission.admitted,
                options_for_identity(&options),
                headers.clone(),
            );
            batches.push(self.spawn_batch(ticket, request, BatchTarget::Clauses));
        }
        if let (Some(set), Some(set_admission)) = (set.as_ref(), set_admission) {
            waiters.extend(set_admission.waiters);
            if let Some(ticket) = set_admission.ticket {
                let request = SearchRequest::new(
                    set_admission.admitted,
                    options_for_set(set),
                    headers,
                );
                batches.push(self.spawn_batch(ticket, request, BatchTarget::Set(set.clone())));
            }
        }

        for batch in batches {
            batch
                .await
                .map_err(|e| CatalogError::Task(e.to_string()))?;
        }
        for waiter in waiters {
            let id = waiter.id;
            waiter.wait().await;
            debug!(batch = id, "shared batch settled");
        }

        let resolution = {
            let ledger = self.ctx.ledger.lock().await;
            let cache = self.ctx.cache.read().await;
            resolve(&clauses, set.as_ref(), &ledger, &cache)
        };

        self.ctx.events.publish(CatalogEvent::OperationSettled {
            clauses: clauses.clone(),
            found: resolution.products.len(),
            empty: resolution.empty.clone(),
        });

        if resolution.products.is_empty() {
            return Err(CatalogError::EmptyResult {
                clauses: resolution.empty,
            });
        }
        if !resolution.empty.is_empty() {
            info!(
                found = resolution.products.len(),
                empty = resolution.empty.len(),
                "catalog search resolved partially"
            );
        }
        Ok(resolution.products)
    }

    // The batch owns its own task so that a dropped caller can neither cancel
    // pages in flight nor leave clauses pending forever.
    fn spawn_batch(
        &self,
        ticket: BatchTicket,
        request: SearchRequest,
        target: BatchTarget,
    ) -> JoinHandle<()> {
        tokio::spawn(run_batch(
            Arc::clone(&self.ctx),
            Arc::clone(&self.transport),
            Arc::clone(&self.cfg),
            ticket,
            request,
            target,
        ))
    }
}

// Identity lookups never carry a routing hint.
fn options_for_identity(options: &SearchOptions) -> SearchOptions {
    SearchOptions {
        map: None,
        derive_map: false,
        ..options.clone()
    }
}

fn options_for_set(set: &FilterSet) -> SearchOptions {
    let mut options = set.options().clone();
    if options.derive_map {
        options.map = routing_hint(set.clauses());
        options.derive_map = false;
    }
    options
}

async fn run_batch(
    ctx: Arc<CatalogContext>,
    transport: Arc<dyn SearchTransport>,
    cfg: Arc<CatalogConfig>,
    ticket: BatchTicket,
    request: SearchRequest,
    target: BatchTarget,
) {
    let pages = plan(request.clauses.len(), cfg.page_size);
    info!(
        batch = ticket.id,
        clauses = request.clauses.len(),
        pages = pages.len(),
        filter_set = matches!(target, BatchTarget::Set(_)),
        map = ?request.options.map,
        "catalog batch started"
    );

    let outcomes = join_all(pages.iter().map(|page| {
        fetch_page(
            transport.as_ref(),
            &request,
            page,
            cfg.retry_attempts,
            cfg.retry_delay(),
        )
    }))
    .await;

    let mut records = Vec::new();
    let mut failed = 0usize;
    for outcome in outcomes {
        match outcome {
            Ok(mut page_records) => records.append(&mut page_records),
            Err(e) => {
                failed += 1;
                warn!(batch = ticket.id, error = %e, "catalog page dropped");
            }
        }
    }

    let mut seen = HashSet::new();
    let returned: Vec<String> = records
        .iter()
        .filter(|r| seen.insert(r.product_id.clone()))
        .map(|r| r.product_id.clone())
        .collect();
    let stored = ctx.store(records).await.len();

    let empty = {
        let mut ledger = ctx.ledger.lock().await;
        let cache = ctx.cache.read().await;
        let empty = match &target {
            BatchTarget::Clauses => settle_clauses(&request.clauses, ticket.id, &mut ledger, &cache),
            BatchTarget::Set(set) => {
                let empty = if returned.is_empty() { request.clauses.len() } else { 0 };
                ledger.resolve_set(set, ticket.id, returned);
                empty
            }
        };
        ledger.finish(ticket.id);
        empty
    };

    info!(
        batch = ticket.id,
        pages = pages.len(),
        failed_pages = failed,
        stored,
        resolved = request.clauses.len() - empty,
        empty,
        "catalog batch settled"
    );
    ticket.settle();
}

/// Send one page, resubmitting the same page parameters until it succeeds or
/// `attempts` are used up.
async fn fetch_page(
    transport: &dyn SearchTransport,
    request: &SearchRequest,
    page: &Page,
    attempts: u32,
    delay: Duration,
) -> Result<Vec<ProductRecord>, CatalogError> {
    let max_attempts = attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match transport.perform_search(request, page).await {
            Ok(records) => {
                debug!(resources = %page.resources(), attempt, records = records.len(), "catalog page ok");
                return Ok(records);
            }
            Err(e) => {
                warn!(resources = %page.resources(), attempt, error = %e, "catalog page failed");
                if attempt >= max_attempts {
                    return Err(CatalogError::Transport {
                        resources: page.resources(),
                        attempts: attempt,
                        source: e,
                    });
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ledger::ClauseState;
    use crate::catalog::testing::ScriptedTransport;

    fn orchestrator(transport: Arc<ScriptedTransport>, cfg: CatalogConfig) -> FetchOrchestrator {
        FetchOrchestrator::new(CatalogContext::new(), transport, Arc::new(cfg))
    }

    fn clauses(raw: &[&str]) -> Vec<FilterClause> {
        raw.iter().map(|r| FilterClause::parse(r).unwrap()).collect()
    }

    #[tokio::test]
    async fn zero_admitted_clauses_make_no_calls() {
        let transport = Arc::new(ScriptedTransport::new());
        let orch = orchestrator(transport.clone(), CatalogConfig::default());
        let err = orch
            .execute(Vec::new(), SearchOptions::default(), HeaderMap::new())
            .await
            .unwrap_err();
        assert!(err.is_empty_result());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn one_call_per_page_with_full_clause_set() {
        let transport = Arc::new(ScriptedTransport::new());
        for id in 0..5 {
            transport.insert(ProductRecord::new(id.to_string(), [format!("{id}0")]));
        }
        let cfg = CatalogConfig {
            page_size: 2,
            ..CatalogConfig::default()
        };
        let orch = orchestrator(transport.clone(), cfg);
        let ids: Vec<String> = (0..5).map(|i| format!("productId:{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        let products = orch
            .execute(clauses(&refs), SearchOptions::default(), HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(transport.calls(), 3);
        let mut windows = transport.windows();
        windows.sort();
        assert_eq!(windows, ["0-1", "2-3", "4-5"]);
        assert!(transport.requests().iter().all(|fq| fq.len() == 5));
        let got: Vec<_> = products.iter().map(|p| p.product_id.as_str()).collect();
        assert_eq!(got, ["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn failed_page_is_retried_then_dropped_alone() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.insert(ProductRecord::new("0", ["00"]));
        transport.insert(ProductRecord::new("1", ["10"]));
        transport.fail_window("1-1");
        let cfg = CatalogConfig {
            page_size: 1,
            ..CatalogConfig::default()
        };
        let orch = orchestrator(transport.clone(), cfg);

        let products = orch
            .execute(
                clauses(&["productId:0", "productId:1"]),
                SearchOptions::default(),
                HeaderMap::new(),
            )
            .await
            .unwrap();

        // page 0-0 once, page 1-1 three times
        assert_eq!(transport.calls(), 4);
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].product_id, "0");
        let state = orch
            .context()
            .clause_state(&FilterClause::product_id(1).unwrap())
            .await;
        assert_eq!(state, ClauseState::ResolvedEmpty);
    }

    #[tokio::test]
    async fn transient_failure_recovers_within_attempts() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.insert(ProductRecord::new("1", ["10"]));
        transport.fail_next(2);
        let orch = orchestrator(transport.clone(), CatalogConfig::default());

        let products = orch
            .execute(clauses(&["productId:1"]), SearchOptions::default(), HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn total_failure_reports_every_empty_clause() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail_always();
        let orch = orchestrator(transport.clone(), CatalogConfig::default());

        let err = orch
            .execute(
                clauses(&["productId:1", "skuId:2"]),
                SearchOptions::default(),
                HeaderMap::new(),
            )
            .await
            .unwrap_err();
        match err {
            CatalogError::EmptyResult { clauses: empty } => {
                assert_eq!(empty, clauses(&["productId:1", "skuId:2"]));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn sales_channel_defaults_from_config() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.insert(ProductRecord::new("1", ["10"]));
        let cfg = CatalogConfig {
            sales_channel: Some("2".into()),
            ..CatalogConfig::default()
        };
        let orch = orchestrator(transport.clone(), cfg);
        orch.execute(clauses(&["productId:1"]), SearchOptions::default(), HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(transport.last_options().unwrap().sales_channel.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn identity_and_filter_clauses_travel_separately() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.insert(ProductRecord::new("1", ["10"]));
        transport.insert(ProductRecord::new("2", ["20"]));
        transport.tag("C:/5/", "2");
        let orch = orchestrator(transport.clone(), CatalogConfig::default());
        let options = SearchOptions {
            derive_map: true,
            ..SearchOptions::default()
        };

        let products = orch
            .execute(clauses(&["productId:1", "C:/5/"]), options.clone(), HeaderMap::new())
            .await
            .unwrap();
        let got: Vec<_> = products.iter().map(|p| p.product_id.as_str()).collect();
        assert_eq!(got, ["1", "2"]);

        let mut sent = transport.sent();
        sent.sort();
        assert_eq!(
            sent,
            vec![
                (vec!["C:/5/".to_string()], Some("c".to_string())),
                (vec!["productId:1".to_string()], None),
            ]
        );

        // product 1 was fetched alongside the category but is not one of its hits
        let again = orch
            .execute(clauses(&["C:/5/"]), options, HeaderMap::new())
            .await
            .unwrap();
        let got: Vec<_> = again.iter().map(|p| p.product_id.as_str()).collect();
        assert_eq!(got, ["2"]);
        assert_eq!(transport.calls(), 2);
    }
}
