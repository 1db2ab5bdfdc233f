//! Filter clause parsing and normalization.
//!
//! A clause is one `fq` condition as the catalog search endpoint understands it:
//! `productId:42`, `skuId:7`, `C:/1000/2000/`, `specificationFilter_15:Red`,
//! `B:2000003` or a price range `P[10 TO 100]`. Clauses are compared by their
//! canonical string, so `productId: 42` and `productId:42` are the same clause.

use std::fmt;

use serde::{Serialize, Serializer};

use super::error::CatalogError;
use super::request::SearchFilter;

const PRODUCT_ID_FIELD: &str = "productId";
const SKU_ID_FIELD: &str = "skuId";
const CATEGORY_FIELD: &str = "C";
const PRICE_FIELD: &str = "P";
const SPECIFICATION_PREFIX: &str = "specificationFilter_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClauseKind {
    Category,
    Price,
    ProductId,
    SkuId,
    Specification,
    Other,
}

impl ClauseKind {
    fn from_field(field: &str) -> Self {
        match field {
            PRODUCT_ID_FIELD => Self::ProductId,
            SKU_ID_FIELD => Self::SkuId,
            CATEGORY_FIELD => Self::Category,
            PRICE_FIELD => Self::Price,
            f if f.starts_with(SPECIFICATION_PREFIX) => Self::Specification,
            _ => Self::Other,
        }
    }

    /// Whether the clause can be answered straight from the product cache.
    pub fn is_identity(self) -> bool {
        matches!(self, Self::ProductId | Self::SkuId)
    }
}

/// Canonical `field:value` filter condition. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterClause {
    raw: String,
    kind: ClauseKind,
    // byte offset of the value inside `raw`
    value_at: usize,
}

impl FilterClause {
    pub fn parse(input: &str) -> Result<Self, CatalogError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(CatalogError::validation("fq", "empty filter clause"));
        }

        // VTEX price ranges come without a colon: P[10 TO 100]
        if let Some(range) = s.strip_prefix("P[") {
            if range.len() > 1 && range.ends_with(']') {
                return Ok(Self {
                    raw: s.to_string(),
                    kind: ClauseKind::Price,
                    value_at: 1,
                });
            }
            return Err(CatalogError::validation(
                "fq",
                format!("malformed price range `{s}`"),
            ));
        }

        let Some((field, value)) = s.split_once(':') else {
            return Err(CatalogError::validation(
                "fq",
                format!("expected `field:value`, got `{s}`"),
            ));
        };
        let field = field.trim();
        let value = value.trim();
        if field.is_empty() {
            return Err(CatalogError::validation(
                "fq",
                format!("missing field name in `{s}`"),
            ));
        }
        if value.is_empty() {
            return Err(CatalogError::validation(
                "fq",
                format!("missing value for field `{field}`"),
            ));
        }

        let kind = ClauseKind::from_field(field);
        if kind == ClauseKind::Price && !(value.starts_with('[') && value.ends_with(']')) {
            return Err(CatalogError::validation(
                "fq",
                format!("malformed price range `{s}`"),
            ));
        }

        Ok(Self {
            raw: format!("{field}:{value}"),
            kind,
            value_at: field.len() + 1,
        })
    }

    pub fn product_id(id: impl fmt::Display) -> Result<Self, CatalogError> {
        Self::identity(PRODUCT_ID_FIELD, "productId", id)
    }

    pub fn sku_id(id: impl fmt::Display) -> Result<Self, CatalogError> {
        Self::identity(SKU_ID_FIELD, "skuId", id)
    }

    fn identity(
        field: &str,
        name: &'static str,
        id: impl fmt::Display,
    ) -> Result<Self, CatalogError> {
        let id = id.to_string();
        let id = id.trim();
        if id.is_empty() {
            return Err(CatalogError::validation(name, "is not defined"));
        }
        if id.contains(':') {
            return Err(CatalogError::validation(
                name,
                format!("`{id}` is not a valid identifier"),
            ));
        }
        Self::parse(&format!("{field}:{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> ClauseKind {
        self.kind
    }

    pub fn field(&self) -> &str {
        match self.kind {
            ClauseKind::Price if !self.raw.starts_with("P:") => PRICE_FIELD,
            _ => &self.raw[..self.value_at - 1],
        }
    }

    pub fn value(&self) -> &str {
        &self.raw[self.value_at..]
    }

    /// Routing hints this clause contributes to the `map` parameter.
    pub fn routing_hints(&self) -> Vec<&'static str> {
        match self.kind {
            ClauseKind::Category => {
                let numeric = self
                    .value()
                    .split('/')
                    .filter(|seg| !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()))
                    .count();
                vec!["c"; numeric]
            }
            ClauseKind::Price => vec!["priceFrom"],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for FilterClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for FilterClause {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

/// Comma-joined `map` value for the given clauses, in clause order.
/// `None` when no clause contributes a hint.
pub fn routing_hint(clauses: &[FilterClause]) -> Option<String> {
    let hints: Vec<&str> = clauses.iter().flat_map(|c| c.routing_hints()).collect();
    if hints.is_empty() {
        None
    } else {
        Some(hints.join(","))
    }
}

/// Structured caller query before normalization.
#[derive(Debug, Clone)]
pub enum CatalogQuery {
    Product(String),
    Sku(String),
    Products(Vec<String>),
    Skus(Vec<String>),
    Filter(SearchFilter),
}

/// Turn a structured query into its ordered canonical clauses.
pub fn normalize(query: &CatalogQuery) -> Result<Vec<FilterClause>, CatalogError> {
    match query {
        CatalogQuery::Product(id) => Ok(vec![FilterClause::product_id(id)?]),
        CatalogQuery::Sku(id) => Ok(vec![FilterClause::sku_id(id)?]),
        CatalogQuery::Products(ids) => ids
            .iter()
            .map(|id| FilterClause::product_id(id).map_err(|e| rename_field(e, "productIdArray")))
            .collect(),
        CatalogQuery::Skus(ids) => ids
            .iter()
            .map(|id| FilterClause::sku_id(id).map_err(|e| rename_field(e, "skuIdArray")))
            .collect(),
        CatalogQuery::Filter(filter) => {
            if filter.fq.is_empty() {
                return Err(CatalogError::validation("fq", "property was not found"));
            }
            filter.fq.iter().map(|raw| FilterClause::parse(raw)).collect()
        }
    }
}

fn rename_field(err: CatalogError, field: &'static str) -> CatalogError {
    match err {
        CatalogError::Validation { reason, .. } => CatalogError::Validation { field, reason },
        other => other,
    }
}
