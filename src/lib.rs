pub mod catalog;
pub mod telemetry;

pub mod util {
    pub mod env;
}

pub use catalog::{
    CatalogClient, CatalogConfig, CatalogContext, CatalogError, CatalogEvent, FilterClause,
    ProductRecord, SearchFilter,
};
