use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};

use super::cache::ProductCache;
use super::clause::FilterClause;
use super::events::{CatalogEvent, EventHub};
use super::ledger::{ClauseState, DedupLedger};
use super::record::ProductRecord;

/// Process-wide catalog state: the dedup ledger, the product cache and the
/// event hub. Created once at startup and shared by `Arc`; it is never torn
/// down, entries live as long as the process.
///
/// Lock order is ledger, then cache. The cache write lock is never held while
/// waiting for the ledger.
#[derive(Debug, Default)]
pub struct CatalogContext {
    pub(crate) ledger: Mutex<DedupLedger>,
    pub(crate) cache: RwLock<ProductCache>,
    pub(crate) events: EventHub,
}

impl CatalogContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn clause_state(&self, clause: &FilterClause) -> ClauseState {
        self.ledger.lock().await.state(clause)
    }

    pub async fn empty_clauses(&self) -> Vec<FilterClause> {
        self.ledger.lock().await.empty_clauses()
    }

    pub async fn lookup_by_product(&self, product_id: &str) -> Option<Arc<ProductRecord>> {
        self.cache.read().await.lookup_by_product(product_id)
    }

    pub async fn lookup_by_sku(&self, sku_id: &str) -> Option<Arc<ProductRecord>> {
        self.cache.read().await.lookup_by_sku(sku_id)
    }

    pub async fn cached_products(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Write records straight into the cache, e.g. products already embedded
    /// in a page. Ledger states are not touched.
    pub async fn store(&self, records: Vec<ProductRecord>) -> Vec<Arc<ProductRecord>> {
        let mut cache = self.cache.write().await;
        records
            .into_iter()
            .map(|record| {
                let stored = cache.store(record);
                self.events.publish(CatalogEvent::RecordStored {
                    product_id: stored.product_id.clone(),
                    sku_ids: stored.sku_ids().map(str::to_string).collect(),
                });
                stored
            })
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_publishes_and_indexes() {
        let ctx = CatalogContext::new();
        let mut rx = ctx.subscribe();
        ctx.store(vec![ProductRecord::new("42", ["7"])]).await;

        assert_eq!(ctx.cached_products().await, 1);
        assert_eq!(
            ctx.lookup_by_sku("7").await,
            ctx.lookup_by_product("42").await
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            CatalogEvent::RecordStored {
                product_id: "42".into(),
                sku_ids: vec!["7".into()],
            }
        );
        let clause = FilterClause::product_id(42).unwrap();
        assert_eq!(ctx.clause_state(&clause).await, ClauseState::Unseen);
        assert!(ctx.empty_clauses().await.is_empty());
    }
}
