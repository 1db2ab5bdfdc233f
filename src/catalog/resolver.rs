//! Turns a clause list back into products once the cache holds what the
//! network returned.

use std::collections::HashSet;
use std::slice;
use std::sync::Arc;

use super::cache::ProductCache;
use super::clause::{ClauseKind, FilterClause};
use super::ledger::{BatchId, ClauseState, DedupLedger};
use super::record::ProductRecord;
use super::request::FilterSet;

#[derive(Debug, Default)]
pub struct Resolution {
    /// In clause order; each product at most once.
    pub products: Vec<Arc<ProductRecord>>,
    /// Clauses that matched nothing.
    pub empty: Vec<FilterClause>,
}

/// Move the identity clauses still pending under `batch` to their final
/// state, judged by what the cache now holds. Returns how many came back
/// empty.
pub fn settle_clauses(
    clauses: &[FilterClause],
    batch: BatchId,
    ledger: &mut DedupLedger,
    cache: &ProductCache,
) -> usize {
    let mut empty = 0;
    for clause in clauses {
        if ledger.state(clause) != ClauseState::Pending(batch) {
            continue;
        }
        let has_data = match clause.kind() {
            ClauseKind::ProductId => cache.contains_product(clause.value()),
            ClauseKind::SkuId => cache.contains_sku(clause.value()),
            _ => continue,
        };
        ledger.resolve(clause, batch, has_data);
        if !has_data {
            empty += 1;
        }
    }
    empty
}

/// Look every clause up. Identity clauses go straight to the cache; the
/// non-identity ones answer together through the products `set` returned,
/// placed where the first of them sits in `clauses`.
pub fn resolve(
    clauses: &[FilterClause],
    set: Option<&FilterSet>,
    ledger: &DedupLedger,
    cache: &ProductCache,
) -> Resolution {
    let mut out = Resolution::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut set_done = false;

    for clause in clauses {
        let (found, answering): (Vec<Arc<ProductRecord>>, &[FilterClause]) = match clause.kind() {
            ClauseKind::ProductId => (
                cache.lookup_by_product(clause.value()).into_iter().collect(),
                slice::from_ref(clause),
            ),
            ClauseKind::SkuId => (
                cache.lookup_by_sku(clause.value()).into_iter().collect(),
                slice::from_ref(clause),
            ),
            _ if set_done => continue,
            _ => {
                set_done = true;
                match set {
                    Some(set) => (
                        ledger
                            .set_hits(set)
                            .unwrap_or_default()
                            .iter()
                            .filter_map(|id| cache.lookup_by_product(id))
                            .collect(),
                        set.clauses(),
                    ),
                    None => (Vec::new(), slice::from_ref(clause)),
                }
            }
        };

        if found.is_empty() {
            for c in answering {
                if !out.empty.contains(c) {
                    out.empty.push(c.clone());
                }
            }
            continue;
        }
        for record in found {
            if seen.insert(record.product_id.clone()) {
                out.products.push(record);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(raw: &str) -> FilterClause {
        FilterClause::parse(raw).unwrap()
    }

    #[test]
    fn follows_clause_order_and_marks_states() {
        let mut ledger = DedupLedger::new();
        let mut cache = ProductCache::new();
        let set = vec![clause("skuId:20"), clause("productId:1"), clause("productId:3")];
        let ticket = ledger.admit(&set).ticket.unwrap();

        cache.store(ProductRecord::new("1", ["10"]));
        cache.store(ProductRecord::new("2", ["20"]));

        assert_eq!(settle_clauses(&set, ticket.id, &mut ledger, &cache), 1);
        let res = resolve(&set, None, &ledger, &cache);

        let ids: Vec<_> = res.products.iter().map(|p| p.product_id.as_str()).collect();
        assert_eq!(ids, ["2", "1"]);
        assert_eq!(res.empty, vec![clause("productId:3")]);
        assert_eq!(ledger.state(&set[0]), ClauseState::ResolvedWithData);
        assert_eq!(ledger.state(&set[1]), ClauseState::ResolvedWithData);
        assert_eq!(ledger.state(&set[2]), ClauseState::ResolvedEmpty);
    }

    #[test]
    fn read_only_pass_leaves_pending_untouched() {
        let mut ledger = DedupLedger::new();
        let cache = ProductCache::new();
        let set = vec![clause("productId:1")];
        let ticket = ledger.admit(&set).ticket.unwrap();

        let res = resolve(&set, None, &ledger, &cache);
        assert!(res.products.is_empty());
        assert_eq!(res.empty, set);
        assert_eq!(ledger.state(&set[0]), ClauseState::Pending(ticket.id));
    }

    #[test]
    fn settling_skips_clauses_of_other_batches() {
        let mut ledger = DedupLedger::new();
        let mut cache = ProductCache::new();
        let first = ledger.admit(&[clause("productId:1")]).ticket.unwrap();
        let second = ledger.admit(&[clause("productId:2")]).ticket.unwrap();
        cache.store(ProductRecord::new("1", ["10"]));

        let both = [clause("productId:1"), clause("productId:2")];
        settle_clauses(&both, first.id, &mut ledger, &cache);
        assert_eq!(ledger.state(&both[0]), ClauseState::ResolvedWithData);
        assert_eq!(ledger.state(&both[1]), ClauseState::Pending(second.id));
    }

    #[test]
    fn duplicate_matches_appear_once() {
        let ledger = DedupLedger::new();
        let mut cache = ProductCache::new();
        cache.store(ProductRecord::new("1", ["10", "11"]));
        let set = vec![clause("skuId:10"), clause("productId:1"), clause("skuId:11")];
        let res = resolve(&set, None, &ledger, &cache);
        assert_eq!(res.products.len(), 1);
        assert!(res.empty.is_empty());
    }

    #[test]
    fn filter_set_answers_at_its_first_clause() {
        let mut ledger = DedupLedger::new();
        let mut cache = ProductCache::new();
        let clauses = vec![clause("C:/10/"), clause("productId:1"), clause("P[1 TO 5]")];
        let filters = FilterSet::new(
            [clause("C:/10/"), clause("P[1 TO 5]")],
            Default::default(),
        )
        .unwrap();
        let ticket = ledger.admit_set(&filters).ticket.unwrap();
        cache.store(ProductRecord::new("1", ["10"]));
        cache.store(ProductRecord::new("5", ["50"]));
        cache.store(ProductRecord::new("6", ["60"]));
        ledger.resolve_set(&filters, ticket.id, vec!["6".into(), "5".into()]);

        let res = resolve(&clauses, Some(&filters), &ledger, &cache);
        let ids: Vec<_> = res.products.iter().map(|p| p.product_id.as_str()).collect();
        // product 1 sits in the cache but only the set's own hits count for it
        assert_eq!(ids, ["6", "5", "1"]);
        assert!(res.empty.is_empty());
    }

    #[test]
    fn empty_filter_set_reports_every_clause() {
        let mut ledger = DedupLedger::new();
        let cache = ProductCache::new();
        let filters = FilterSet::new(
            [clause("C:/99/"), clause("P[1 TO 5]")],
            Default::default(),
        )
        .unwrap();
        let ticket = ledger.admit_set(&filters).ticket.unwrap();
        ledger.resolve_set(&filters, ticket.id, Vec::new());

        let res = resolve(filters.clauses(), Some(&filters), &ledger, &cache);
        assert!(res.products.is_empty());
        assert_eq!(res.empty, filters.clauses());
        assert_eq!(ledger.set_state(&filters), ClauseState::ResolvedEmpty);
    }
}
