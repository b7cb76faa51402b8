use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use super::{DocumentStore, StoreError, check_unique, check_version};
use crate::document::{BatchPrefix, DocumentKey, Ledger, MatrixDocument, MatrixKind};

/// In-process store; contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<BTreeMap<DocumentKey, MatrixDocument>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, key: &DocumentKey) -> Result<Option<MatrixDocument>, StoreError> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        Ok(documents.get(key).cloned())
    }

    fn put_all(&self, documents: Vec<MatrixDocument>) -> Result<Vec<u64>, StoreError> {
        check_unique(&documents)?;
        let mut stored = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let versions = documents
            .iter()
            .map(|document| {
                let current = stored.get(&document.key).and_then(|existing| existing.version);
                check_version(document, current)
            })
            .collect::<Result<Vec<_>, _>>()?;
        for (mut document, version) in documents.into_iter().zip(&versions) {
            document.version = Some(*version);
            stored.insert(document.key.clone(), document);
        }
        Ok(versions)
    }

    fn find_batch(&self, prefix: &BatchPrefix) -> Result<Vec<MatrixDocument>, StoreError> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        Ok(documents
            .range(prefix.lower_bound()..=prefix.upper_bound())
            .map(|(_, document)| document.clone())
            .collect())
    }

    fn latest_batch(
        &self,
        ledger: Ledger,
        patch_version: &str,
    ) -> Result<Option<u32>, StoreError> {
        let lower = DocumentKey::new(ledger, patch_version, 0, MatrixKind::Coexistence, i32::MIN);
        let upper =
            DocumentKey::new(ledger, patch_version, u32::MAX, MatrixKind::Transition, i32::MAX);
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        Ok(documents
            .range(lower..=upper)
            .next_back()
            .map(|(key, _)| key.batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::exercise_store;

    #[test]
    fn memory_store_honours_contract() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        exercise_store(&store);
        assert_eq!(store.len(), 4);
    }
}
