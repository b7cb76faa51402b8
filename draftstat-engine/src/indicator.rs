//! Read-side snapshots of the latest complete batch.
//!
//! Readers look at batch `current - 1`: it is no longer written to, so every
//! report computed from it is stable. Batch 1 has no predecessor and yields
//! [`Snapshot::ColdStart`].

use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};

use crate::document::{BatchPrefix, Ledger, MatrixDocument};
use crate::store::{DocumentStore, StoreError};
use crate::version::VersionState;

/// A report, or the explicit signal that no complete batch exists yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Snapshot<T> {
    ColdStart,
    #[serde(rename_all = "camelCase")]
    Ready {
        patch_version: String,
        batch: u32,
        data: T,
    },
}

impl<T> Snapshot<T> {
    #[must_use]
    pub const fn is_cold_start(&self) -> bool {
        matches!(self, Self::ColdStart)
    }

    #[must_use]
    pub const fn data(&self) -> Option<&T> {
        match self {
            Self::ColdStart => None,
            Self::Ready { data, .. } => Some(data),
        }
    }

    /// Transform the payload, keeping the batch identity.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Snapshot<U> {
        match self {
            Self::ColdStart => Snapshot::ColdStart,
            Self::Ready {
                patch_version,
                batch,
                data,
            } => Snapshot::Ready {
                patch_version,
                batch,
                data: f(data),
            },
        }
    }

    /// Like [`Self::map`] for fallible transforms.
    ///
    /// # Errors
    ///
    /// Propagates the error of `f`.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Snapshot<U>, E> {
        match self {
            Self::ColdStart => Ok(Snapshot::ColdStart),
            Self::Ready {
                patch_version,
                batch,
                data,
            } => Ok(Snapshot::Ready {
                patch_version,
                batch,
                data: f(data)?,
            }),
        }
    }
}

/// Patch version and number of the latest complete batch.
#[must_use]
pub fn complete_batch(state: &VersionState) -> Option<(&str, u32)> {
    match state {
        VersionState::Active {
            patch_version,
            batch,
        } if *batch > 1 => Some((patch_version.as_str(), batch - 1)),
        _ => None,
    }
}

/// Pick and win documents of the latest complete batch.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn load_complete_batch<S: DocumentStore + ?Sized>(
    state: &VersionState,
    store: &S,
) -> Result<Snapshot<BatchDocuments>, StoreError> {
    let Some((patch_version, batch)) = complete_batch(state) else {
        return Ok(Snapshot::ColdStart);
    };
    let pick = store.find_batch(&BatchPrefix::new(Ledger::Pick, patch_version, batch))?;
    let win = store.find_batch(&BatchPrefix::new(Ledger::Win, patch_version, batch))?;
    Ok(Snapshot::Ready {
        patch_version: patch_version.to_string(),
        batch,
        data: BatchDocuments { pick, win },
    })
}

/// Documents of one batch, split by ledger.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct BatchDocuments {
    pub pick: Vec<MatrixDocument>,
    pub win: Vec<MatrixDocument>,
}

impl BatchDocuments {
    /// Copy keeping only the `-1/-1` matrix of each document.
    #[must_use]
    pub fn aggregate_only(&self) -> Self {
        Self {
            pick: self.pick.iter().map(MatrixDocument::aggregate_only).collect(),
            win: self.win.iter().map(MatrixDocument::aggregate_only).collect(),
        }
    }
}

pub type IndicatorSnapshot = Snapshot<BatchDocuments>;

/// Process-wide last computed indicator, replaced after each rotation.
#[derive(Debug, Default)]
pub struct IndicatorCache {
    current: RwLock<Option<Arc<IndicatorSnapshot>>>,
}

impl IndicatorCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self) -> Option<Arc<IndicatorSnapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recompute from the store and install the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read; the old entry stays.
    pub fn refresh<S: DocumentStore + ?Sized>(
        &self,
        state: &VersionState,
        store: &S,
    ) -> Result<Arc<IndicatorSnapshot>, StoreError> {
        let next = Arc::new(load_complete_batch(state, store)?.map(|docs| docs.aggregate_only()));
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(next.clone());
        Ok(next)
    }
}
