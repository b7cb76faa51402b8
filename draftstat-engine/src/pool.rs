//! Pool configuration: patch version, class card pools and context pools.
//!
//! The active configuration is replaced wholesale by an administrative update
//! and handed out as an immutable [`Arc`] snapshot, so a reader holding a
//! snapshot never observes a half-applied update.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

use crate::constants::WILDCARD;

/// Errors raised when a pool update violates configuration invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("patch version must not be empty")]
    EmptyPatchVersion,
    #[error("class pool must not be empty")]
    EmptyClassPool,
    #[error("class {class_code} has no card pool")]
    MissingCardPool { class_code: i32 },
    #[error("class {class_code} has an empty card pool")]
    EmptyCardPool { class_code: i32 },
    #[error("card {card_id} appears more than once in class {class_code}")]
    DuplicateCard { class_code: i32, card_id: i32 },
    #[error("class code {class_code} appears more than once")]
    DuplicateClass { class_code: i32 },
}

/// Administrative replacement payload for the whole pool.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolUpdate {
    pub patch_version: String,
    #[serde(default)]
    pub class_pool: Vec<i32>,
    #[serde(default)]
    pub card_pools: BTreeMap<i32, Vec<i32>>,
    #[serde(default)]
    pub map_pool: Vec<i32>,
    #[serde(default)]
    pub player_count_pool: Vec<i32>,
    /// Upgrade-reinforce card id mapped to the upgrade card it strengthens.
    #[serde(default)]
    pub upgrade_cards: BTreeMap<i32, i32>,
    #[serde(default)]
    pub card_names: BTreeMap<i32, String>,
}

/// Ordered card pool of one class and its inverse index.
///
/// The position of a card in the sorted pool is its matrix row/column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassCardPool {
    cards: Vec<i32>,
    index: HashMap<i32, usize>,
}

impl ClassCardPool {
    fn new(class_code: i32, mut cards: Vec<i32>) -> Result<Self, PoolError> {
        if cards.is_empty() {
            return Err(PoolError::EmptyCardPool { class_code });
        }
        cards.sort_unstable();
        if let Some(pair) = cards.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(PoolError::DuplicateCard {
                class_code,
                card_id: pair[0],
            });
        }
        let index = cards
            .iter()
            .enumerate()
            .map(|(position, &card)| (card, position))
            .collect();
        Ok(Self { cards, index })
    }

    /// Card ids in matrix order.
    #[must_use]
    pub fn cards(&self) -> &[i32] {
        &self.cards
    }

    /// Matrix index of a card id, if the card belongs to this class.
    #[must_use]
    pub fn index_of(&self, card_id: i32) -> Option<usize> {
        self.index.get(&card_id).copied()
    }

    /// Card id at a matrix index.
    #[must_use]
    pub fn card_at(&self, index: usize) -> Option<i32> {
        self.cards.get(index).copied()
    }

    /// Pool size K; also the index of the "no prior card" row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// Immutable snapshot of the pool registry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PoolConfiguration {
    patch_version: Option<String>,
    class_pool: Vec<i32>,
    map_pool: Vec<i32>,
    player_count_pool: Vec<i32>,
    classes: BTreeMap<i32, ClassCardPool>,
    upgrade_cards: BTreeMap<i32, i32>,
    card_names: BTreeMap<i32, String>,
}

impl PoolConfiguration {
    /// Build a validated configuration from an update payload.
    ///
    /// Class, map and player-count pools are sorted; the wildcard `-1` is
    /// added to the map and player-count pools when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if any pool invariant is violated.
    pub fn from_update(update: &PoolUpdate) -> Result<Self, PoolError> {
        let patch_version = update.patch_version.trim();
        if patch_version.is_empty() {
            return Err(PoolError::EmptyPatchVersion);
        }
        if update.class_pool.is_empty() {
            return Err(PoolError::EmptyClassPool);
        }

        let mut class_pool = update.class_pool.clone();
        class_pool.sort_unstable();
        if let Some(pair) = class_pool.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(PoolError::DuplicateClass {
                class_code: pair[0],
            });
        }

        let mut classes = BTreeMap::new();
        for &class_code in &class_pool {
            let cards = update
                .card_pools
                .get(&class_code)
                .ok_or(PoolError::MissingCardPool { class_code })?;
            classes.insert(class_code, ClassCardPool::new(class_code, cards.clone())?);
        }

        Ok(Self {
            patch_version: Some(patch_version.to_string()),
            class_pool,
            map_pool: with_wildcard(&update.map_pool),
            player_count_pool: with_wildcard(&update.player_count_pool),
            classes,
            upgrade_cards: update.upgrade_cards.clone(),
            card_names: update.card_names.clone(),
        })
    }

    /// Patch version this pool was published for; `None` before the first update.
    #[must_use]
    pub fn patch_version(&self) -> Option<&str> {
        self.patch_version.as_deref()
    }

    #[must_use]
    pub fn class_pool(&self) -> &[i32] {
        &self.class_pool
    }

    #[must_use]
    pub fn map_pool(&self) -> &[i32] {
        &self.map_pool
    }

    #[must_use]
    pub fn player_count_pool(&self) -> &[i32] {
        &self.player_count_pool
    }

    #[must_use]
    pub fn class(&self, class_code: i32) -> Option<&ClassCardPool> {
        self.classes.get(&class_code)
    }

    #[must_use]
    pub fn card_name(&self, card_id: i32) -> Option<&str> {
        self.card_names.get(&card_id).map(String::as_str)
    }

    #[must_use]
    pub fn upgrade_cards(&self) -> &BTreeMap<i32, i32> {
        &self.upgrade_cards
    }

    /// Upgrade relations inside one class as `(reinforce_index, upgrade_index)`.
    ///
    /// Relations whose cards are not both in the class pool are ignored.
    #[must_use]
    pub fn upgrade_pairs(&self, class_code: i32) -> Vec<(usize, usize)> {
        let Some(pool) = self.class(class_code) else {
            return Vec::new();
        };
        self.upgrade_cards
            .iter()
            .filter_map(|(&reinforce, &upgrade)| {
                Some((pool.index_of(reinforce)?, pool.index_of(upgrade)?))
            })
            .collect()
    }

    /// Echo the configuration back in update form.
    #[must_use]
    pub fn to_update(&self) -> PoolUpdate {
        PoolUpdate {
            patch_version: self.patch_version.clone().unwrap_or_default(),
            class_pool: self.class_pool.clone(),
            card_pools: self
                .classes
                .iter()
                .map(|(&class_code, pool)| (class_code, pool.cards.clone()))
                .collect(),
            map_pool: self.map_pool.clone(),
            player_count_pool: self.player_count_pool.clone(),
            upgrade_cards: self.upgrade_cards.clone(),
            card_names: self.card_names.clone(),
        }
    }
}

fn with_wildcard(values: &[i32]) -> Vec<i32> {
    let mut pool = values.to_vec();
    pool.push(WILDCARD);
    pool.sort_unstable();
    pool.dedup();
    pool
}

/// Synchronized holder of the active pool configuration.
#[derive(Debug, Default)]
pub struct PoolService {
    current: RwLock<Arc<PoolConfiguration>>,
}

impl PoolService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current immutable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<PoolConfiguration> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate and atomically install a new pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the update is invalid; the previous pool stays active.
    pub fn replace(&self, update: &PoolUpdate) -> Result<Arc<PoolConfiguration>, PoolError> {
        let next = Arc::new(PoolConfiguration::from_update(update)?);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next.clone();
        log::info!(
            "pool updated for patch {} ({} classes)",
            next.patch_version().unwrap_or_default(),
            next.class_pool().len()
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_update() -> PoolUpdate {
        PoolUpdate {
            patch_version: "7".to_string(),
            class_pool: vec![2, 1],
            card_pools: BTreeMap::from([(1, vec![30, 10, 20]), (2, vec![200, 100])]),
            map_pool: vec![5, 3],
            player_count_pool: vec![2, -1],
            upgrade_cards: BTreeMap::from([(30, 10), (999, 10)]),
            card_names: BTreeMap::from([(10, "Spark".to_string())]),
        }
    }

    #[test]
    fn update_sorts_pools_and_adds_wildcards() {
        let pool = PoolConfiguration::from_update(&sample_update()).unwrap();
        assert_eq!(pool.patch_version(), Some("7"));
        assert_eq!(pool.class_pool(), &[1, 2]);
        assert_eq!(pool.map_pool(), &[-1, 3, 5]);
        assert_eq!(pool.player_count_pool(), &[-1, 2]);

        let class = pool.class(1).unwrap();
        assert_eq!(class.cards(), &[10, 20, 30]);
        for (position, &card) in class.cards().iter().enumerate() {
            assert_eq!(class.index_of(card), Some(position));
            assert_eq!(class.card_at(position), Some(card));
        }
        assert_eq!(class.index_of(99), None);
        assert_eq!(pool.card_name(10), Some("Spark"));
    }

    #[test]
    fn upgrade_pairs_only_cover_class_cards() {
        let pool = PoolConfiguration::from_update(&sample_update()).unwrap();
        assert_eq!(pool.upgrade_pairs(1), vec![(2, 0)]);
        assert!(pool.upgrade_pairs(2).is_empty());
        assert!(pool.upgrade_pairs(42).is_empty());
    }

    #[test]
    fn invalid_updates_are_rejected() {
        let mut update = sample_update();
        update.card_pools.remove(&2);
        assert_eq!(
            PoolConfiguration::from_update(&update),
            Err(PoolError::MissingCardPool { class_code: 2 })
        );

        let mut update = sample_update();
        update.card_pools.insert(1, vec![10, 10]);
        assert_eq!(
            PoolConfiguration::from_update(&update),
            Err(PoolError::DuplicateCard {
                class_code: 1,
                card_id: 10
            })
        );

        let mut update = sample_update();
        update.patch_version = " ".to_string();
        assert_eq!(
            PoolConfiguration::from_update(&update),
            Err(PoolError::EmptyPatchVersion)
        );
    }

    #[test]
    fn service_keeps_previous_pool_on_failure() {
        let service = PoolService::new();
        assert_eq!(service.snapshot().patch_version(), None);
        service.replace(&sample_update()).unwrap();
        let held = service.snapshot();

        let mut broken = sample_update();
        broken.class_pool.clear();
        assert!(service.replace(&broken).is_err());
        assert_eq!(service.snapshot(), held);
    }

    #[test]
    fn update_parses_from_camel_case_json() {
        let json = r#"{
            "patchVersion": "12",
            "classPool": [1],
            "cardPools": { "1": [3, 1, 2] },
            "mapPool": [4],
            "playerCountPool": [2, 3],
            "upgradeCards": { "3": 1 },
            "cardNames": { "1": "Ember" }
        }"#;
        let update: PoolUpdate = serde_json::from_str(json).unwrap();
        let pool = PoolConfiguration::from_update(&update).unwrap();
        assert_eq!(pool.class(1).unwrap().cards(), &[1, 2, 3]);
        assert_eq!(pool.to_update().map_pool, vec![-1, 4]);
    }
}
