//! Product store keyed by product id, with a sku → product index.

use std::collections::HashMap;
use std::sync::Arc;

use super::record::ProductRecord;

/// Invariant: every value in `sku_index` is a key of `products`.
#[derive(Debug, Default)]
pub struct ProductCache {
    products: HashMap<String, Arc<ProductRecord>>,
    sku_index: HashMap<String, String>,
}

impl ProductCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert by product id and index every item. Skus indexed under a
    /// replaced record that the new record no longer lists are dropped.
    pub fn store(&mut self, record: ProductRecord) -> Arc<ProductRecord> {
        let record = Arc::new(record);
        let product_id = record.product_id.clone();

        if let Some(previous) = self.products.get(&product_id) {
            for sku in previous.sku_ids() {
                let still_listed = record.sku_ids().any(|s| s == sku);
                if !still_listed && self.sku_index.get(sku) == Some(&product_id) {
                    self.sku_index.remove(sku);
                }
            }
        }

        for sku in record.sku_ids() {
            self.sku_index.insert(sku.to_string(), product_id.clone());
        }
        self.products.insert(product_id, Arc::clone(&record));
        record
    }

    pub fn lookup_by_product(&self, product_id: &str) -> Option<Arc<ProductRecord>> {
        self.products.get(product_id).cloned()
    }

    pub fn lookup_by_sku(&self, sku_id: &str) -> Option<Arc<ProductRecord>> {
        self.sku_index
            .get(sku_id)
            .and_then(|product_id| self.products.get(product_id))
            .cloned()
    }

    pub fn product_id_for_sku(&self, sku_id: &str) -> Option<&str> {
        self.sku_index.get(sku_id).map(String::as_str)
    }

    pub fn contains_product(&self, product_id: &str) -> bool {
        self.products.contains_key(product_id)
    }

    pub fn contains_sku(&self, sku_id: &str) -> bool {
        self.sku_index.contains_key(sku_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.products.len()
    }

    #[cfg(test)]
    fn sku_count(&self) -> usize {
        self.sku_index.len()
    }
}
