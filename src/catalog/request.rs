use std::hash::{Hash, Hasher};

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use super::clause::FilterClause;
use super::planner::Page;

/// Raw caller filter, shaped like the search endpoint's query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub fq: Vec<String>,
    /// Routing hint (`c,c,priceFrom`). Derived automatically by `search_category`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
    /// Sort order, e.g. `OrderByPriceASC`.
    #[serde(default, rename = "O", skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    /// Free text.
    #[serde(default, rename = "ft", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Sales channel / scope id.
    #[serde(default, rename = "sc", skip_serializing_if = "Option::is_none")]
    pub sales_channel: Option<String>,
}

impl SearchFilter {
    pub fn new<I, S>(fq: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fq: fq.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_sales_channel(mut self, sc: impl Into<String>) -> Self {
        self.sales_channel = Some(sc.into());
        self
    }

    /// Parameters that travel with every page except the clauses themselves.
    pub(crate) fn options(&self) -> SearchOptions {
        SearchOptions {
            map: self.map.clone(),
            order: self.order.clone(),
            text: self.text.clone(),
            sales_channel: self.sales_channel.clone(),
            derive_map: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SearchOptions {
    pub map: Option<String>,
    pub order: Option<String>,
    pub text: Option<String>,
    pub sales_channel: Option<String>,
    /// Replace `map` with the routing hint of the clauses each request sends.
    pub derive_map: bool,
}

/// The non-identity clauses of one search (category, price, specification...).
/// The endpoint ANDs them, so they are fetched and remembered as one unit,
/// keyed by the clause set regardless of order plus the options shaping the
/// answer.
#[derive(Debug, Clone)]
pub struct FilterSet {
    clauses: Vec<FilterClause>,
    options: SearchOptions,
    key: Vec<String>,
}

impl FilterSet {
    /// `None` when no clause is left after dropping repeats.
    pub fn new<I>(clauses: I, options: SearchOptions) -> Option<Self>
    where
        I: IntoIterator<Item = FilterClause>,
    {
        let mut unique: Vec<FilterClause> = Vec::new();
        for clause in clauses {
            if !unique.contains(&clause) {
                unique.push(clause);
            }
        }
        if unique.is_empty() {
            return None;
        }
        let mut key: Vec<String> = unique.iter().map(|c| c.as_str().to_string()).collect();
        key.sort();
        Some(Self {
            clauses: unique,
            options,
            key,
        })
    }

    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }
}

impl PartialEq for FilterSet {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.options == other.options
    }
}

impl Eq for FilterSet {}

impl Hash for FilterSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.options.hash(state);
    }
}

/// One admitted clause set, ready to be sent page by page. Built per call and
/// dropped once its batch settles.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub clauses: Vec<FilterClause>,
    pub options: SearchOptions,
    pub headers: HeaderMap,
}

impl SearchRequest {
    pub fn new(clauses: Vec<FilterClause>, options: SearchOptions, headers: HeaderMap) -> Self {
        Self {
            clauses,
            options,
            headers,
        }
    }

    /// Query string pairs for one page; `fq` repeats once per clause.
    pub fn query_pairs(&self, page: &Page) -> Vec<(&'static str, String)> {
        let mut pairs: Vec<(&'static str, String)> = self
            .clauses
            .iter()
            .map(|c| ("fq", c.as_str().to_string()))
            .collect();
        let optional = [
            ("map", &self.options.map),
            ("O", &self.options.order),
            ("ft", &self.options.text),
            ("sc", &self.options.sales_channel),
        ];
        for (key, value) in optional {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                pairs.push((key, v.to_string()));
            }
        }
        pairs.push(("_from", page.from.to_string()));
        pairs.push(("_to", page.to.to_string()));
        pairs
    }
}
