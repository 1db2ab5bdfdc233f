use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use reqwest::header::HeaderMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::clause::{normalize, CatalogQuery, FilterClause};
use super::config::CatalogConfig;
use super::context::CatalogContext;
use super::error::CatalogError;
use super::events::CatalogEvent;
use super::orchestrator::FetchOrchestrator;
use super::record::ProductRecord;
use super::request::SearchFilter;
use super::transport::{HttpSearchTransport, SearchTransport};

pub type ProductMap = IndexMap<String, Arc<ProductRecord>>;

/// Caller-facing catalog API. Cheap to clone; clones share one
/// [`CatalogContext`], so every clone sees the same cache and in-flight set.
#[derive(Clone)]
pub struct CatalogClient {
    orchestrator: FetchOrchestrator,
}

impl CatalogClient {
    /// Client talking HTTP to `cfg.base_url`.
    pub fn new(cfg: CatalogConfig) -> Result<Self, CatalogError> {
        let transport = HttpSearchTransport::new(&cfg).map_err(|e| {
            CatalogError::validation("config", format!("cannot build http client: {e}"))
        })?;
        Ok(Self::with_transport(cfg, Arc::new(transport)))
    }

    pub fn with_transport(cfg: CatalogConfig, transport: Arc<dyn SearchTransport>) -> Self {
        Self::with_context(CatalogContext::new(), cfg, transport)
    }

    pub fn with_context(
        ctx: Arc<CatalogContext>,
        cfg: CatalogConfig,
        transport: Arc<dyn SearchTransport>,
    ) -> Self {
        Self {
            orchestrator: FetchOrchestrator::new(ctx, transport, Arc::new(cfg)),
        }
    }

    pub fn context(&self) -> &Arc<CatalogContext> {
        self.orchestrator.context()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.context().subscribe()
    }

    /// Products matching `filter`, in `fq` order. Partial matches succeed;
    /// `EmptyResult` means no clause matched anything.
    pub async fn search(
        &self,
        filter: &SearchFilter,
        headers: HeaderMap,
    ) -> Result<Vec<Arc<ProductRecord>>, CatalogError> {
        let clauses = normalize(&CatalogQuery::Filter(filter.clone()))?;
        self.orchestrator
            .execute(clauses, filter.options(), headers)
            .await
    }

    /// `None` when the product does not exist.
    pub async fn search_product(
        &self,
        product_id: impl fmt::Display,
    ) -> Result<Option<Arc<ProductRecord>>, CatalogError> {
        let clause = FilterClause::product_id(product_id)?;
        if let Some(hit) = self.context().lookup_by_product(clause.value()).await {
            debug!(clause = %clause, "served from cache");
            return Ok(Some(hit));
        }
        self.search_single(clause).await
    }

    /// Product owning `sku_id`; `None` when the sku does not exist.
    pub async fn search_sku(
        &self,
        sku_id: impl fmt::Display,
    ) -> Result<Option<Arc<ProductRecord>>, CatalogError> {
        let clause = FilterClause::sku_id(sku_id)?;
        if let Some(hit) = self.context().lookup_by_sku(clause.value()).await {
            debug!(clause = %clause, "served from cache");
            return Ok(Some(hit));
        }
        self.search_single(clause).await
    }

    async fn search_single(
        &self,
        clause: FilterClause,
    ) -> Result<Option<Arc<ProductRecord>>, CatalogError> {
        match self
            .orchestrator
            .execute(vec![clause], Default::default(), HeaderMap::new())
            .await
        {
            Ok(products) => Ok(products.into_iter().next()),
            Err(CatalogError::EmptyResult { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Products keyed by requested product id, in request order. Ids missing
    /// from the catalog (or lost to a failed fetch) are left out.
    pub async fn search_product_array<I, S>(&self, product_ids: I) -> Result<ProductMap, CatalogError>
    where
        I: IntoIterator<Item = S>,
        S: fmt::Display,
    {
        let ids: Vec<String> = product_ids.into_iter().map(|id| id.to_string()).collect();
        let clauses = normalize(&CatalogQuery::Products(ids))?;

        let misses = {
            let cache = self.context().cache.read().await;
            clauses
                .iter()
                .filter(|c| !cache.contains_product(c.value()))
                .cloned()
                .collect::<Vec<_>>()
        };
        self.fetch_misses(misses).await?;

        let cache = self.context().cache.read().await;
        let mut out = ProductMap::new();
        for clause in &clauses {
            if let Some(record) = cache.lookup_by_product(clause.value()) {
                out.insert(clause.value().to_string(), record);
            }
        }
        Ok(out)
    }

    /// Products owning the requested skus, keyed by product id, in request
    /// order of their first sku.
    pub async fn search_sku_array<I, S>(&self, sku_ids: I) -> Result<ProductMap, CatalogError>
    where
        I: IntoIterator<Item = S>,
        S: fmt::Display,
    {
        let ids: Vec<String> = sku_ids.into_iter().map(|id| id.to_string()).collect();
        let clauses = normalize(&CatalogQuery::Skus(ids))?;

        let misses = {
            let cache = self.context().cache.read().await;
            clauses
                .iter()
                .filter(|c| !cache.contains_sku(c.value()))
                .cloned()
                .collect::<Vec<_>>()
        };
        self.fetch_misses(misses).await?;

        let cache = self.context().cache.read().await;
        let mut out = ProductMap::new();
        for clause in &clauses {
            if let Some(record) = cache.lookup_by_sku(clause.value()) {
                out.entry(record.product_id.clone()).or_insert(record);
            }
        }
        Ok(out)
    }

    // Failures of the miss set are not fatal: the caller still gets whatever
    // was cached already.
    async fn fetch_misses(&self, misses: Vec<FilterClause>) -> Result<(), CatalogError> {
        if misses.is_empty() {
            return Ok(());
        }
        let requested = misses.len();
        match self
            .orchestrator
            .execute(misses, Default::default(), HeaderMap::new())
            .await
        {
            Ok(_) => Ok(()),
            Err(e @ CatalogError::Validation { .. }) => Err(e),
            Err(e) => {
                warn!(requested, error = %e, "catalog array lookup returned cached entries only");
                Ok(())
            }
        }
    }

    /// Category / price search. Each request's `map` routing hint is derived
    /// from the clauses it sends and replaces whatever the filter carried.
    pub async fn search_category(
        &self,
        filter: &SearchFilter,
    ) -> Result<Vec<Arc<ProductRecord>>, CatalogError> {
        let clauses = normalize(&CatalogQuery::Filter(filter.clone()))?;
        let mut options = filter.options();
        options.map = None;
        options.derive_map = true;
        self.orchestrator
            .execute(clauses, options, HeaderMap::new())
            .await
    }
}
