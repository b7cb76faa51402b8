//! Current patch version and batch counter, and the patch-switch lifecycle.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use thiserror::Error;

use crate::constants::FIRST_BATCH;
use crate::document::{Ledger, skeleton_documents};
use crate::pool::PoolConfiguration;
use crate::store::{DocumentStore, StoreError};

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("patch version must not be empty")]
    EmptyPatchVersion,
    #[error("pool is configured for patch {pool:?}, not {requested}")]
    PoolNotConfirmed {
        requested: String,
        pool: Option<String>,
    },
    #[error("batch counter moved: expected {patch_version}/{expected}, found {found}")]
    BatchMoved {
        patch_version: String,
        expected: u32,
        found: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Lifecycle of the version registry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum VersionState {
    #[default]
    Uninitialized,
    #[serde(rename_all = "camelCase")]
    Active { patch_version: String, batch: u32 },
}

impl VersionState {
    #[must_use]
    pub fn patch_version(&self) -> Option<&str> {
        match self {
            Self::Uninitialized => None,
            Self::Active { patch_version, .. } => Some(patch_version),
        }
    }

    #[must_use]
    pub const fn batch(&self) -> Option<u32> {
        match self {
            Self::Uninitialized => None,
            Self::Active { batch, .. } => Some(*batch),
        }
    }
}

/// Result of [`VersionService::update_patch_version`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum PatchSwitch {
    /// Target equals the active patch.
    Unchanged,
    /// Documents already existed; the latest batch was adopted.
    Reattached { batch: u32 },
    /// No documents existed; batch 1 skeletons were written.
    Created { documents: usize },
}

#[derive(Debug, Default)]
pub struct VersionService {
    state: RwLock<VersionState>,
    transitions: Mutex<()>,
}

impl VersionService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> VersionState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Serializes patch switches and batch rotations.
    pub(crate) fn lock_transitions(&self) -> MutexGuard<'_, ()> {
        self.transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch the active patch version.
    ///
    /// The pool must already be configured for `target`. Existing documents
    /// for `target` are re-attached at their latest batch; otherwise batch 1
    /// skeletons are generated for both ledgers.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool does not confirm the target or the store
    /// fails; the previous state stays active.
    pub fn update_patch_version<S: DocumentStore + ?Sized>(
        &self,
        target: &str,
        pool: &PoolConfiguration,
        store: &S,
    ) -> Result<PatchSwitch, VersionError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(VersionError::EmptyPatchVersion);
        }
        let _guard = self.lock_transitions();

        if self.state().patch_version() == Some(target) {
            return Ok(PatchSwitch::Unchanged);
        }
        if pool.patch_version() != Some(target) {
            return Err(VersionError::PoolNotConfirmed {
                requested: target.to_string(),
                pool: pool.patch_version().map(str::to_string),
            });
        }

        let mut latest = None;
        for ledger in Ledger::ALL {
            latest = latest.max(store.latest_batch(ledger, target)?);
        }

        let (switch, batch) = match latest {
            Some(batch) => (PatchSwitch::Reattached { batch }, batch),
            None => {
                let documents = skeleton_documents(pool, target, FIRST_BATCH);
                let count = documents.len();
                store.put_all(documents)?;
                (PatchSwitch::Created { documents: count }, FIRST_BATCH)
            }
        };

        self.set(VersionState::Active {
            patch_version: target.to_string(),
            batch,
        });
        log::info!("patch version switched to {target} at batch {batch} ({switch:?})");
        Ok(switch)
    }

    /// Adopt a newer batch of the active patch written by another process.
    ///
    /// Returns the adopted batch, or `None` when the state was already
    /// current or no patch is active. The batch never moves backwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn sync_latest_batch<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
    ) -> Result<Option<u32>, VersionError> {
        let _guard = self.lock_transitions();
        let VersionState::Active {
            patch_version,
            batch,
        } = self.state()
        else {
            return Ok(None);
        };
        let mut latest = None;
        for ledger in Ledger::ALL {
            latest = latest.max(store.latest_batch(ledger, &patch_version)?);
        }
        match latest {
            Some(latest) if latest > batch => {
                log::info!("patch {patch_version}: batch {batch} superseded by {latest} in the store");
                self.set(VersionState::Active {
                    patch_version,
                    batch: latest,
                });
                Ok(Some(latest))
            }
            _ => Ok(None),
        }
    }

    /// Commit a batch advance prepared by the rotator.
    ///
    /// The caller must hold [`Self::lock_transitions`].
    pub(crate) fn commit_batch(&self, patch_version: &str, next: u32) -> Result<(), VersionError> {
        let current = self.state();
        let expected = next.saturating_sub(1);
        if current.patch_version() != Some(patch_version) || current.batch() != Some(expected) {
            return Err(VersionError::BatchMoved {
                patch_version: patch_version.to_string(),
                expected,
                found: format!("{current:?}"),
            });
        }
        self.set(VersionState::Active {
            patch_version: patch_version.to_string(),
            batch: next,
        });
        Ok(())
    }

    fn set(&self, next: VersionState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{BatchPrefix, MatrixDocument};
    use crate::pool::PoolUpdate;
    use crate::store::MemoryStore;
    use std::collections::BTreeMap;

    fn pool(patch: &str) -> PoolConfiguration {
        PoolConfiguration::from_update(&PoolUpdate {
            patch_version: patch.to_string(),
            class_pool: vec![1, 2],
            card_pools: BTreeMap::from([(1, vec![10, 20, 30]), (2, vec![40, 50])]),
            map_pool: vec![5],
            player_count_pool: vec![2],
            ..PoolUpdate::default()
        })
        .unwrap()
    }

    #[test]
    fn first_switch_creates_skeletons_for_both_ledgers() {
        let store = MemoryStore::new();
        let service = VersionService::new();
        let switch = service.update_patch_version("3", &pool("3"), &store).unwrap();
        assert_eq!(switch, PatchSwitch::Created { documents: 8 });
        assert_eq!(
            service.state(),
            VersionState::Active {
                patch_version: "3".to_string(),
                batch: 1
            }
        );
        for ledger in Ledger::ALL {
            let batch = store.find_batch(&BatchPrefix::new(ledger, "3", 1)).unwrap();
            assert_eq!(batch.len(), 4);
        }
        assert_eq!(
            service.update_patch_version("3", &pool("3"), &store).unwrap(),
            PatchSwitch::Unchanged
        );
    }

    #[test]
    fn switch_requires_confirmed_pool() {
        let store = MemoryStore::new();
        let service = VersionService::new();
        let err = service
            .update_patch_version("4", &pool("3"), &store)
            .unwrap_err();
        assert!(matches!(err, VersionError::PoolNotConfirmed { .. }));
        assert_eq!(service.state(), VersionState::Uninitialized);
        assert!(store.is_empty());
    }

    #[test]
    fn existing_documents_are_reattached_without_regeneration() {
        let store = MemoryStore::new();
        let pool = pool("3");
        let mut seeded: Vec<MatrixDocument> = skeleton_documents(&pool, "3", 1);
        seeded.extend(skeleton_documents(&pool, "3", 2));
        store.put_all(seeded).unwrap();
        let before = store.len();

        let service = VersionService::new();
        let switch = service.update_patch_version("3", &pool, &store).unwrap();
        assert_eq!(switch, PatchSwitch::Reattached { batch: 2 });
        assert_eq!(service.state().batch(), Some(2));
        assert_eq!(store.len(), before);
    }

    #[test]
    fn sync_adopts_batches_written_elsewhere() {
        let store = MemoryStore::new();
        let pool = pool("3");
        let service = VersionService::new();
        assert_eq!(service.sync_latest_batch(&store).unwrap(), None);
        service.update_patch_version("3", &pool, &store).unwrap();
        assert_eq!(service.sync_latest_batch(&store).unwrap(), None);

        store.put_all(skeleton_documents(&pool, "3", 2)).unwrap();
        assert_eq!(service.sync_latest_batch(&store).unwrap(), Some(2));
        assert_eq!(service.state().batch(), Some(2));
        assert_eq!(service.sync_latest_batch(&store).unwrap(), None);
    }

    #[test]
    fn commit_batch_checks_expected_predecessor() {
        let store = MemoryStore::new();
        let service = VersionService::new();
        service.update_patch_version("3", &pool("3"), &store).unwrap();
        let _guard = service.lock_transitions();
        assert!(service.commit_batch("3", 3).is_err());
        service.commit_batch("3", 2).unwrap();
        assert_eq!(service.state().batch(), Some(2));
    }
}
