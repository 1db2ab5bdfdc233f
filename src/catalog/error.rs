use thiserror::Error;

use super::clause::FilterClause;

/// Failure of a single call against the remote search endpoint.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network: {0}")]
    Net(#[from] reqwest::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("other: {0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum CatalogError {
    /// Malformed or missing caller input; raised before any work starts.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// One page exhausted its attempts. Absorbed by the orchestrator and only
    /// surfaced in logs.
    #[error("page {resources} failed after {attempts} attempts: {source}")]
    Transport {
        resources: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// Nothing resolved for the whole operation.
    #[error("no products found for [{}]", join_clauses(.clauses))]
    EmptyResult { clauses: Vec<FilterClause> },

    #[error("batch task failed: {0}")]
    Task(String),
}

impl CatalogError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn is_empty_result(&self) -> bool {
        matches!(self, Self::EmptyResult { .. })
    }
}

fn join_clauses(clauses: &[FilterClause]) -> String {
    clauses
        .iter()
        .map(FilterClause::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
