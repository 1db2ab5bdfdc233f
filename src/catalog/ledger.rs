//! Per-clause fetch bookkeeping.
//!
//! Each identity clause (`productId`, `skuId`) moves
//! `Unseen -> Pending(batch) -> ResolvedWithData | ResolvedEmpty` and never goes
//! back. A clause is pending under at most one batch at a time, which is what
//! keeps two concurrent searches from fetching it twice. Non-identity clauses
//! only mean something together, so they are tracked the same way but per
//! [`FilterSet`], with the product ids the set returned.

use std::collections::{HashMap, HashSet};

use tokio::sync::watch;

use super::clause::FilterClause;
use super::request::FilterSet;

pub type BatchId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseState {
    Unseen,
    Pending(BatchId),
    ResolvedEmpty,
    ResolvedWithData,
}

/// Ownership of a freshly admitted batch. Dropping it without calling
/// [`BatchTicket::settle`] still wakes waiters (the channel closes).
#[derive(Debug)]
pub struct BatchTicket {
    pub id: BatchId,
    tx: watch::Sender<bool>,
}

impl BatchTicket {
    pub fn settle(self) {
        self.tx.send_replace(true);
    }
}

/// Settle signal of a batch owned by another operation.
#[derive(Debug, Clone)]
pub struct BatchWaiter {
    pub id: BatchId,
    rx: watch::Receiver<bool>,
}

impl BatchWaiter {
    /// Resolves once the batch settled or its owner went away.
    pub async fn wait(mut self) {
        let _ = self.rx.wait_for(|settled| *settled).await;
    }
}

#[derive(Debug)]
pub struct Admission {
    /// Clauses this call must fetch, in first-seen order, without repeats.
    pub admitted: Vec<FilterClause>,
    /// Present iff `admitted` is non-empty.
    pub ticket: Option<BatchTicket>,
    /// Earlier batches holding some of the requested clauses.
    pub waiters: Vec<BatchWaiter>,
}

#[derive(Debug, Default)]
pub struct DedupLedger {
    states: HashMap<FilterClause, ClauseState>,
    sets: HashMap<FilterSet, ClauseState>,
    // product ids each resolved set returned, in response order
    set_hits: HashMap<FilterSet, Vec<String>>,
    in_flight: HashMap<BatchId, watch::Receiver<bool>>,
    next_batch: BatchId,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, clause: &FilterClause) -> ClauseState {
        self.states
            .get(clause)
            .copied()
            .unwrap_or(ClauseState::Unseen)
    }

    pub fn set_state(&self, set: &FilterSet) -> ClauseState {
        self.sets.get(set).copied().unwrap_or(ClauseState::Unseen)
    }

    /// Move every `Unseen` identity clause to `Pending` under a new batch and
    /// return it; resolved and already pending clauses are left out, and so
    /// are non-identity clauses (see [`DedupLedger::admit_set`]).
    pub fn admit(&mut self, clauses: &[FilterClause]) -> Admission {
        let batch = self.next_batch + 1;
        let mut admitted = Vec::new();
        let mut waiting_on = Vec::new();
        let mut seen = HashSet::new();

        for clause in clauses {
            if !clause.kind().is_identity() || !seen.insert(clause) {
                continue;
            }
            match self.state(clause) {
                ClauseState::Unseen => {
                    self.states
                        .insert(clause.clone(), ClauseState::Pending(batch));
                    admitted.push(clause.clone());
                }
                ClauseState::Pending(owner) => {
                    if !waiting_on.contains(&owner) {
                        waiting_on.push(owner);
                    }
                }
                ClauseState::ResolvedEmpty | ClauseState::ResolvedWithData => {}
            }
        }

        let waiters = waiting_on
            .into_iter()
            .filter_map(|id| self.waiter(id))
            .collect();

        let ticket = if admitted.is_empty() {
            None
        } else {
            Some(self.open_batch())
        };

        Admission {
            admitted,
            ticket,
            waiters,
        }
    }

    /// Admit a whole filter set: a new batch when it was never asked for, the
    /// owning batch's waiter while it is pending, nothing once resolved.
    pub fn admit_set(&mut self, set: &FilterSet) -> Admission {
        match self.set_state(set) {
            ClauseState::Unseen => {
                let ticket = self.open_batch();
                self.sets.insert(set.clone(), ClauseState::Pending(ticket.id));
                Admission {
                    admitted: set.clauses().to_vec(),
                    ticket: Some(ticket),
                    waiters: Vec::new(),
                }
            }
            ClauseState::Pending(owner) => Admission {
                admitted: Vec::new(),
                ticket: None,
                waiters: self.waiter(owner).into_iter().collect(),
            },
            ClauseState::ResolvedEmpty | ClauseState::ResolvedWithData => Admission {
                admitted: Vec::new(),
                ticket: None,
                waiters: Vec::new(),
            },
        }
    }

    fn open_batch(&mut self) -> BatchTicket {
        self.next_batch += 1;
        let (tx, rx) = watch::channel(false);
        self.in_flight.insert(self.next_batch, rx);
        BatchTicket {
            id: self.next_batch,
            tx,
        }
    }

    fn waiter(&self, id: BatchId) -> Option<BatchWaiter> {
        self.in_flight.get(&id).map(|rx| BatchWaiter {
            id,
            rx: rx.clone(),
        })
    }

    /// `Pending(batch) -> ResolvedWithData | ResolvedEmpty`. Returns false and
    /// changes nothing when the clause is not pending under `batch`.
    pub fn resolve(&mut self, clause: &FilterClause, batch: BatchId, has_data: bool) -> bool {
        match self.states.get_mut(clause) {
            Some(state) if *state == ClauseState::Pending(batch) => {
                *state = if has_data {
                    ClauseState::ResolvedWithData
                } else {
                    ClauseState::ResolvedEmpty
                };
                true
            }
            _ => false,
        }
    }

    /// Drop the settle signal of a finished batch.
    pub fn finish(&mut self, batch: BatchId) {
        self.in_flight.remove(&batch);
    }

    /// `Pending(batch) -> ResolvedWithData | ResolvedEmpty` for a filter set,
    /// keeping the product ids it returned. Same once-only rule as
    /// [`DedupLedger::resolve`].
    pub fn resolve_set(&mut self, set: &FilterSet, batch: BatchId, product_ids: Vec<String>) -> bool {
        match self.sets.get_mut(set) {
            Some(state) if *state == ClauseState::Pending(batch) => {
                *state = if product_ids.is_empty() {
                    ClauseState::ResolvedEmpty
                } else {
                    ClauseState::ResolvedWithData
                };
                self.set_hits.insert(set.clone(), product_ids);
                true
            }
            _ => false,
        }
    }

    pub fn set_hits(&self, set: &FilterSet) -> Option<&[String]> {
        self.set_hits.get(set).map(Vec::as_slice)
    }

    pub fn empty_clauses(&self) -> Vec<FilterClause> {
        self.states
            .iter()
            .filter(|(_, state)| **state == ClauseState::ResolvedEmpty)
            .map(|(clause, _)| clause.clone())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
