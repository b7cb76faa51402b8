//! Persistence of matrix documents with optimistic concurrency.
//!
//! Every write is a compare-and-swap on [`MatrixDocument::version`]:
//! `None` inserts and conflicts if the key already exists, `Some(v)` replaces
//! and conflicts unless the stored version is still `v`. A successful write
//! stores version `v + 1` (or `1` on insert).

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::document::{BatchPrefix, DocumentKey, Ledger, MatrixDocument};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("version conflict on {key}: expected {expected:?}, found {found:?}")]
    Conflict {
        key: DocumentKey,
        expected: Option<u64>,
        found: Option<u64>,
    },
    #[error("document {key} appears more than once in one write")]
    DuplicateKey { key: DocumentKey },
    #[error("patch version `{patch_version}` cannot be used as a storage path")]
    InvalidPatchVersion { patch_version: String },
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// True for errors a caller may resolve by re-reading and retrying.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Backing collection for pick and win matrix documents.
pub trait DocumentStore: Send + Sync {
    /// Load one document.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &DocumentKey) -> Result<Option<MatrixDocument>, StoreError>;

    /// Write several documents as one unit; either every version check
    /// passes and all are stored, or nothing is written.
    ///
    /// Returns the new version of each document, in input order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when any version check fails.
    fn put_all(&self, documents: Vec<MatrixDocument>) -> Result<Vec<u64>, StoreError>;

    /// All documents of one batch, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn find_batch(&self, prefix: &BatchPrefix) -> Result<Vec<MatrixDocument>, StoreError>;

    /// Highest batch number holding at least one document.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn latest_batch(&self, ledger: Ledger, patch_version: &str)
    -> Result<Option<u32>, StoreError>;

    /// Write one document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the version check fails.
    fn put(&self, document: MatrixDocument) -> Result<u64, StoreError> {
        let versions = self.put_all(vec![document])?;
        Ok(versions.first().copied().unwrap_or(1))
    }

    /// True when any document exists for the patch version.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn exists_for_patch(&self, ledger: Ledger, patch_version: &str) -> Result<bool, StoreError> {
        Ok(self.latest_batch(ledger, patch_version)?.is_some())
    }
}

impl<T: DocumentStore + ?Sized> DocumentStore for Box<T> {
    fn get(&self, key: &DocumentKey) -> Result<Option<MatrixDocument>, StoreError> {
        (**self).get(key)
    }

    fn put_all(&self, documents: Vec<MatrixDocument>) -> Result<Vec<u64>, StoreError> {
        (**self).put_all(documents)
    }

    fn find_batch(&self, prefix: &BatchPrefix) -> Result<Vec<MatrixDocument>, StoreError> {
        (**self).find_batch(prefix)
    }

    fn latest_batch(
        &self,
        ledger: Ledger,
        patch_version: &str,
    ) -> Result<Option<u32>, StoreError> {
        (**self).latest_batch(ledger, patch_version)
    }
}

impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    fn get(&self, key: &DocumentKey) -> Result<Option<MatrixDocument>, StoreError> {
        (**self).get(key)
    }

    fn put_all(&self, documents: Vec<MatrixDocument>) -> Result<Vec<u64>, StoreError> {
        (**self).put_all(documents)
    }

    fn find_batch(&self, prefix: &BatchPrefix) -> Result<Vec<MatrixDocument>, StoreError> {
        (**self).find_batch(prefix)
    }

    fn latest_batch(
        &self,
        ledger: Ledger,
        patch_version: &str,
    ) -> Result<Option<u32>, StoreError> {
        (**self).latest_batch(ledger, patch_version)
    }
}

/// Version check shared by the backends.
pub(crate) fn check_version(
    document: &MatrixDocument,
    stored: Option<u64>,
) -> Result<u64, StoreError> {
    match (document.version, stored) {
        (None, None) => Ok(1),
        (Some(expected), Some(found)) if expected == found => Ok(found.saturating_add(1)),
        (expected, found) => Err(StoreError::Conflict {
            key: document.key.clone(),
            expected,
            found,
        }),
    }
}

/// Reject batches that name one key twice.
pub(crate) fn check_unique(documents: &[MatrixDocument]) -> Result<(), StoreError> {
    let mut keys: Vec<&DocumentKey> = documents.iter().map(|document| &document.key).collect();
    keys.sort_unstable();
    match keys.windows(2).find(|pair| pair[0] == pair[1]) {
        Some(pair) => Err(StoreError::DuplicateKey {
            key: pair[0].clone(),
        }),
        None => Ok(()),
    }
}
