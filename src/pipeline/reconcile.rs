//! Merge fetched candidates into the store.
//!
//! Each unique candidate is inserted, updated in place or skipped by
//! comparing its metadata against the stored record. Relevance tags are
//! never written here.

use std::collections::HashMap;
use std::ops::AddAssign;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{Paper, PaperId};
use crate::storage::{JsonMirror, PaperStore};

/// Outcome counts of one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ReconcileSummary {
    /// Writes committed to the store.
    pub fn committed(&self) -> usize {
        self.inserted + self.updated
    }
}

impl AddAssign for ReconcileSummary {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

enum Outcome {
    Inserted,
    Updated,
    Skipped,
}

/// Reconciliation engine over a store and an optional mirror.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn PaperStore>,
    mirror: Option<JsonMirror>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn PaperStore>, mirror: Option<JsonMirror>) -> Self {
        Self { store, mirror }
    }

    /// Reconcile one batch of candidates.
    ///
    /// Store failures are counted per record and never abort the batch.
    pub async fn reconcile(&self, candidates: Vec<Paper>) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        for candidate in collapse(candidates) {
            match self.apply(&candidate).await {
                Ok(Outcome::Inserted) => summary.inserted += 1,
                Ok(Outcome::Updated) => summary.updated += 1,
                Ok(Outcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    log::warn!("Skipping {}: {}", candidate.id, e);
                    summary.failed += 1;
                }
            }
        }

        if summary.committed() > 0 {
            if let Some(mirror) = &self.mirror {
                mirror.refresh_logged(self.store.as_ref()).await;
            }
        }

        log::debug!(
            "Reconciled batch: {} inserted, {} updated, {} skipped, {} failed",
            summary.inserted,
            summary.updated,
            summary.skipped,
            summary.failed
        );
        summary
    }

    async fn apply(&self, candidate: &Paper) -> Result<Outcome, AppError> {
        let existing = self
            .store
            .get(&candidate.id)
            .await
            .map_err(|e| AppError::store_write(&candidate.id, e))?;

        let outcome = match existing {
            None => Outcome::Inserted,
            Some(stored) if stored.metadata_differs(candidate) => Outcome::Updated,
            Some(_) => return Ok(Outcome::Skipped),
        };

        self.store
            .upsert_metadata(candidate)
            .await
            .map_err(|e| match e {
                AppError::StoreWriteFailed { .. } => e,
                other => AppError::store_write(&candidate.id, other),
            })?;
        Ok(outcome)
    }
}

/// Collapse duplicate ids, last seen wins, keeping first-seen order.
fn collapse(candidates: Vec<Paper>) -> Vec<Paper> {
    let mut position: HashMap<PaperId, usize> = HashMap::new();
    let mut unique: Vec<Paper> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        match position.get(&candidate.id) {
            Some(&index) => unique[index] = candidate,
            None => {
                position.insert(candidate.id.clone(), unique.len());
                unique.push(candidate);
            }
        }
    }
    unique
}
