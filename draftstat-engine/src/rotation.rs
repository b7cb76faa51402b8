//! Batch rotation: seed the next batch with the cumulative counts of the
//! current one, then advance the counter.

use serde::Serialize;
use thiserror::Error;

use crate::document::{BatchPrefix, Ledger, MatrixDocument};
use crate::store::{DocumentStore, StoreError};
use crate::version::{VersionError, VersionService, VersionState};

#[derive(Debug, Error)]
pub enum RotationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Version(#[from] VersionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RotationOutcome {
    /// No patch version is active yet.
    Idle,
    /// The current batch holds no documents; the counter was not advanced.
    #[serde(rename_all = "camelCase")]
    NoPriorDocuments { patch_version: String, batch: u32 },
    #[serde(rename_all = "camelCase")]
    Rotated {
        patch_version: String,
        from: u32,
        to: u32,
        documents: usize,
    },
}

impl RotationOutcome {
    #[must_use]
    pub const fn rotated(&self) -> bool {
        matches!(self, Self::Rotated { .. })
    }
}

/// Stateless driver; the counter lives in [`VersionService`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchRotator;

impl BatchRotator {
    /// Clone every document of the current batch into `current + 1` and
    /// commit the new counter. Prior documents are never modified.
    ///
    /// When the current batch holds no documents the counter is not
    /// advanced at all, so the next rotation retries the same batch instead
    /// of skipping over an empty one. See [`RotationOutcome::NoPriorDocuments`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the new batch already holds
    /// documents; the counter is left untouched in both cases.
    pub fn rotate<S: DocumentStore + ?Sized>(
        &self,
        version: &VersionService,
        store: &S,
    ) -> Result<RotationOutcome, RotationError> {
        let _guard = version.lock_transitions();
        let VersionState::Active {
            patch_version,
            batch,
        } = version.state()
        else {
            log::debug!("rotation skipped: no active patch version");
            return Ok(RotationOutcome::Idle);
        };

        let next = batch.saturating_add(1);
        let mut prior: Vec<MatrixDocument> = Vec::new();
        for ledger in Ledger::ALL {
            let prefix = BatchPrefix::new(ledger, patch_version.as_str(), batch);
            prior.extend(store.find_batch(&prefix)?);
        }
        if prior.is_empty() {
            log::warn!("rotation skipped: batch {patch_version}/{batch} holds no documents");
            return Ok(RotationOutcome::NoPriorDocuments {
                patch_version,
                batch,
            });
        }

        let seeded: Vec<MatrixDocument> = prior.iter().map(|doc| doc.rebatched(next)).collect();
        let documents = seeded.len();
        for doc in &seeded {
            log::debug!("seeding {} ({:016x})", doc.key, doc.fingerprint());
        }
        store.put_all(seeded)?;
        version.commit_batch(&patch_version, next)?;
        log::info!("rotated {patch_version} batch {batch} -> {next} ({documents} documents)");

        Ok(RotationOutcome::Rotated {
            patch_version,
            from: batch,
            to: next,
            documents,
        })
    }
}
