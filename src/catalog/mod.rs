//! Deduplicating, batching product-catalog cache in front of a storefront
//! search endpoint.
//!
//! Callers ask for products by id, sku, or raw filter clauses. Clauses already
//! answered (with data or empty) or already in flight are never requested
//! again; the rest go out as one paged batch whose results land in a shared
//! product cache before anybody reads them.

pub mod cache;
pub mod clause;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod ledger;
pub mod orchestrator;
pub mod planner;
pub mod record;
pub mod request;
pub mod resolver;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::ProductCache;
pub use clause::{normalize, routing_hint, CatalogQuery, ClauseKind, FilterClause};
pub use client::{CatalogClient, ProductMap};
pub use config::CatalogConfig;
pub use context::CatalogContext;
pub use error::{CatalogError, TransportError};
pub use events::CatalogEvent;
pub use ledger::{ClauseState, DedupLedger};
pub use planner::{plan, Page, DEFAULT_PAGE_SIZE};
pub use record::{ProductRecord, SkuItem};
pub use request::{FilterSet, SearchFilter, SearchOptions, SearchRequest};
pub use transport::{HttpSearchTransport, SearchTransport};
