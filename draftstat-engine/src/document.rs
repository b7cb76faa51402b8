//! Matrix documents and the structured key scheme that addresses them.
//!
//! A document is identified by `(ledger, patch_version, batch, kind, class_code)`.
//! Keys order field by field, so all documents of one batch form a contiguous
//! key range addressed by a [`BatchPrefix`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;
use std::str::FromStr;
use twox_hash::XxHash64;

use crate::constants::{COEXISTENCE_TAG, TRANSITION_TAG, WILDCARD};
use crate::matrix::FrequencyMatrix;
use crate::pool::{ClassCardPool, PoolConfiguration};

/// Which collection a document belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Ledger {
    /// Every draft.
    Pick,
    /// Drafts of the winning player(s) only.
    Win,
}

impl Ledger {
    pub const ALL: [Self; 2] = [Self::Pick, Self::Win];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pick => "pick",
            Self::Win => "win",
        }
    }
}

impl fmt::Display for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Matrix family.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum MatrixKind {
    /// Cards held together by one player in one match.
    #[serde(rename = "C")]
    Coexistence,
    /// Cards drafted after other cards.
    #[serde(rename = "T")]
    Transition,
}

impl MatrixKind {
    pub const ALL: [Self; 2] = [Self::Coexistence, Self::Transition];

    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Coexistence => COEXISTENCE_TAG,
            Self::Transition => TRANSITION_TAG,
        }
    }
}

impl fmt::Display for MatrixKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// `(map_id, player_count)` addressing one matrix inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextKey {
    pub map_id: i32,
    pub player_count: i32,
}

impl ContextKey {
    /// The fully wildcarded key holding cross-context totals.
    pub const AGGREGATE: Self = Self::new(WILDCARD, WILDCARD);

    #[must_use]
    pub const fn new(map_id: i32, player_count: i32) -> Self {
        Self {
            map_id,
            player_count,
        }
    }

    /// Keys one game updates: `{map_id, -1} x {player_count, -1}`.
    #[must_use]
    pub fn targets(map_id: i32, player_count: i32) -> SmallVec<[Self; 4]> {
        let mut keys = SmallVec::new();
        for map in [map_id, WILDCARD] {
            for players in [player_count, WILDCARD] {
                let key = Self::new(map, players);
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.map_id, self.player_count)
    }
}

impl FromStr for ContextKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (map, players) = s
            .split_once('/')
            .ok_or_else(|| format!("context key `{s}` is not map/players"))?;
        let map_id = map
            .trim()
            .parse()
            .map_err(|_| format!("invalid map id in `{s}`"))?;
        let player_count = players
            .trim()
            .parse()
            .map_err(|_| format!("invalid player count in `{s}`"))?;
        Ok(Self::new(map_id, player_count))
    }
}

impl Serialize for ContextKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContextKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Cartesian product of map and player-count pools.
#[must_use]
pub fn generate_context_keys(map_pool: &[i32], player_count_pool: &[i32]) -> Vec<ContextKey> {
    let mut keys: Vec<ContextKey> = map_pool
        .iter()
        .flat_map(|&map| {
            player_count_pool
                .iter()
                .map(move |&players| ContextKey::new(map, players))
        })
        .collect();
    if !keys.contains(&ContextKey::AGGREGATE) {
        keys.push(ContextKey::AGGREGATE);
    }
    keys
}

/// Structured identity of a matrix document.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct DocumentKey {
    pub ledger: Ledger,
    pub patch_version: String,
    pub batch: u32,
    pub kind: MatrixKind,
    pub class_code: i32,
}

impl DocumentKey {
    #[must_use]
    pub fn new(
        ledger: Ledger,
        patch_version: impl Into<String>,
        batch: u32,
        kind: MatrixKind,
        class_code: i32,
    ) -> Self {
        Self {
            ledger,
            patch_version: patch_version.into(),
            batch,
            kind,
            class_code,
        }
    }

    /// Prefix of the batch this key belongs to.
    #[must_use]
    pub fn batch_prefix(&self) -> BatchPrefix {
        BatchPrefix::new(self.ledger, self.patch_version.clone(), self.batch)
    }

    /// Same document in another batch.
    #[must_use]
    pub fn with_batch(&self, batch: u32) -> Self {
        Self {
            batch,
            ..self.clone()
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.patch_version, self.batch, self.kind, self.class_code
        )
    }
}

/// All documents of one ledger, patch version and batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchPrefix {
    pub ledger: Ledger,
    pub patch_version: String,
    pub batch: u32,
}

impl BatchPrefix {
    #[must_use]
    pub fn new(ledger: Ledger, patch_version: impl Into<String>, batch: u32) -> Self {
        Self {
            ledger,
            patch_version: patch_version.into(),
            batch,
        }
    }

    /// Smallest key inside the prefix.
    #[must_use]
    pub fn lower_bound(&self) -> DocumentKey {
        DocumentKey::new(
            self.ledger,
            self.patch_version.clone(),
            self.batch,
            MatrixKind::Coexistence,
            i32::MIN,
        )
    }

    /// Largest key inside the prefix.
    #[must_use]
    pub fn upper_bound(&self) -> DocumentKey {
        DocumentKey::new(
            self.ledger,
            self.patch_version.clone(),
            self.batch,
            MatrixKind::Transition,
            i32::MAX,
        )
    }

    #[must_use]
    pub fn contains(&self, key: &DocumentKey) -> bool {
        key.ledger == self.ledger
            && key.batch == self.batch
            && key.patch_version == self.patch_version
    }
}

impl fmt::Display for BatchPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}/", self.ledger, self.patch_version, self.batch)
    }
}

/// Frequency matrices of one class, one matrix kind and one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixDocument {
    pub key: DocumentKey,
    pub card_pool: Vec<i32>,
    pub matrices: BTreeMap<ContextKey, FrequencyMatrix>,
    /// Optimistic-concurrency token; `None` until first persisted.
    #[serde(default)]
    pub version: Option<u64>,
}

impl MatrixDocument {
    /// Zeroed document with one matrix per context key.
    #[must_use]
    pub fn skeleton(key: DocumentKey, pool: &ClassCardPool, contexts: &[ContextKey]) -> Self {
        let matrices = contexts
            .iter()
            .map(|&context| (context, FrequencyMatrix::skeleton(pool.len())))
            .collect();
        Self {
            key,
            card_pool: pool.cards().to_vec(),
            matrices,
            version: None,
        }
    }

    #[must_use]
    pub fn matrix(&self, context: ContextKey) -> Option<&FrequencyMatrix> {
        self.matrices.get(&context)
    }

    pub fn matrix_mut(&mut self, context: ContextKey) -> Option<&mut FrequencyMatrix> {
        self.matrices.get_mut(&context)
    }

    /// The `-1/-1` matrix.
    #[must_use]
    pub fn aggregate(&self) -> Option<&FrequencyMatrix> {
        self.matrix(ContextKey::AGGREGATE)
    }

    /// Copy of this document for another batch with a cleared version.
    #[must_use]
    pub fn rebatched(&self, batch: u32) -> Self {
        Self {
            key: self.key.with_batch(batch),
            card_pool: self.card_pool.clone(),
            matrices: self.matrices.clone(),
            version: None,
        }
    }

    /// Copy keeping only the aggregate matrix.
    #[must_use]
    pub fn aggregate_only(&self) -> Self {
        let matrices = self
            .aggregate()
            .map(|matrix| BTreeMap::from([(ContextKey::AGGREGATE, matrix.clone())]))
            .unwrap_or_default();
        Self {
            key: self.key.clone(),
            card_pool: self.card_pool.clone(),
            matrices,
            version: self.version,
        }
    }

    /// Content hash over card pool and cells, ignoring key and version.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        for card in &self.card_pool {
            hasher.write_i32(*card);
        }
        for (context, matrix) in &self.matrices {
            hasher.write_i32(context.map_id);
            hasher.write_i32(context.player_count);
            for cell in matrix.rows().iter().flatten() {
                hasher.write_u64(*cell);
            }
        }
        hasher.finish()
    }
}

/// Fresh zeroed documents for every class, kind and ledger of a batch.
#[must_use]
pub fn skeleton_documents(
    pool: &PoolConfiguration,
    patch_version: &str,
    batch: u32,
) -> Vec<MatrixDocument> {
    let contexts = generate_context_keys(pool.map_pool(), pool.player_count_pool());
    let mut documents = Vec::new();
    for ledger in Ledger::ALL {
        for &class_code in pool.class_pool() {
            let Some(class_pool) = pool.class(class_code) else {
                continue;
            };
            for kind in MatrixKind::ALL {
                let key = DocumentKey::new(ledger, patch_version, batch, kind, class_code);
                documents.push(MatrixDocument::skeleton(key, class_pool, &contexts));
            }
        }
    }
    documents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolUpdate;

    fn pool() -> PoolConfiguration {
        PoolConfiguration::from_update(&PoolUpdate {
            patch_version: "3".to_string(),
            class_pool: vec![1, 2],
            card_pools: BTreeMap::from([(1, vec![10, 20, 30]), (2, vec![40])]),
            map_pool: vec![5],
            player_count_pool: vec![2],
            ..PoolUpdate::default()
        })
        .unwrap()
    }

    #[test]
    fn context_keys_cover_product_with_aggregate() {
        let keys = generate_context_keys(&[-1, 5], &[-1, 2]);
        assert_eq!(keys.len(), 4);
        assert!(keys.contains(&ContextKey::AGGREGATE));
        assert!(keys.contains(&ContextKey::new(5, 2)));

        let keys = generate_context_keys(&[5], &[2]);
        assert_eq!(keys, vec![ContextKey::new(5, 2), ContextKey::AGGREGATE]);
    }

    #[test]
    fn targets_dedupe_wildcard_games() {
        let keys = ContextKey::targets(5, 2);
        assert_eq!(keys.len(), 4);
        assert_eq!(keys[0].to_string(), "5/2");
        assert_eq!(keys[3], ContextKey::AGGREGATE);
        assert_eq!(ContextKey::targets(-1, 2).len(), 2);
    }

    #[test]
    fn context_key_roundtrips_as_json_map_key() {
        let map = BTreeMap::from([(ContextKey::new(5, -1), 1)]);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"5/-1":1}"#);
        let back: BTreeMap<ContextKey, i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
        assert!("5".parse::<ContextKey>().is_err());
    }

    #[test]
    fn batch_prefix_bounds_do_not_leak_into_neighbours() {
        let prefix = BatchPrefix::new(Ledger::Pick, "3", 1);
        let inside = DocumentKey::new(Ledger::Pick, "3", 1, MatrixKind::Transition, 7);
        let batch_ten = DocumentKey::new(Ledger::Pick, "3", 10, MatrixKind::Coexistence, 7);
        let win = DocumentKey::new(Ledger::Win, "3", 1, MatrixKind::Coexistence, 7);
        assert!(prefix.contains(&inside));
        assert!(!prefix.contains(&batch_ten));
        assert!(!prefix.contains(&win));
        assert!(prefix.lower_bound() <= inside && inside <= prefix.upper_bound());
        assert!(batch_ten > prefix.upper_bound());
        assert_eq!(inside.to_string(), "3/1/T/7");
    }

    #[test]
    fn skeletons_cover_every_class_kind_and_ledger() {
        let pool = pool();
        let documents = skeleton_documents(&pool, "3", 1);
        assert_eq!(documents.len(), 2 * 2 * 2);
        for document in &documents {
            let cards = pool.class(document.key.class_code).unwrap().len();
            assert_eq!(document.matrices.len(), 4);
            assert!(document.matrices.values().all(|m| m.has_shape(cards)));
            assert_eq!(document.version, None);
        }
    }

    #[test]
    fn rebatched_clears_version_and_keeps_cells() {
        let pool = pool();
        let mut document = skeleton_documents(&pool, "3", 1).remove(0);
        document.version = Some(4);
        document
            .matrix_mut(ContextKey::AGGREGATE)
            .unwrap()
            .apply(&[crate::matrix::Cell::diagonal(0)])
            .unwrap();
        let next = document.rebatched(2);
        assert_eq!(next.key.batch, 2);
        assert_eq!(next.version, None);
        assert_eq!(next.matrices, document.matrices);
        assert_eq!(next.fingerprint(), document.fingerprint());

        let extract = document.aggregate_only();
        assert_eq!(extract.matrices.len(), 1);
        assert_ne!(extract.fingerprint(), document.fingerprint());
    }
}
