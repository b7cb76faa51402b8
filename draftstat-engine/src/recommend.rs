//! Next-pick recommendation from transition frequencies.
//!
//! The synergy of a card with a deck is the mean, over deck cards `d`, of
//! `T[d][c] / T[d][d]`: how often `c` was drafted after `d`, relative to all
//! transitions out of `d`. An open candidate is ranked against every card
//! that could replace it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::document::{ContextKey, DocumentKey, Ledger, MatrixKind};
use crate::indicator::{Snapshot, complete_batch};
use crate::matrix::FrequencyMatrix;
use crate::numbers::{ratio, usize_to_f64};
use crate::pool::{ClassCardPool, PoolConfiguration};
use crate::store::{DocumentStore, StoreError};
use crate::version::VersionState;

#[derive(Debug, Error)]
pub enum RecommendError {
    #[error("class {0} is not in the pool")]
    UnknownClass(i32),
    #[error("card {card_id} is not in the pool of class {class_code}")]
    UnknownCard { class_code: i32, card_id: i32 },
    #[error("document {key} has no matrix for context {context}")]
    MissingMatrix { key: DocumentKey, context: ContextKey },
    #[error("matrix of class {class_code} covers {found} cards, pool has {expected}")]
    ShapeMismatch {
        class_code: i32,
        expected: usize,
        found: usize,
    },
    #[error("document {key} was built for cards {stored:?}, pool lists {live:?}")]
    PoolMismatch {
        key: DocumentKey,
        stored: Vec<i32>,
        live: Vec<i32>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn aggregate_context() -> ContextKey {
    ContextKey::AGGREGATE
}

/// Draft situation to score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendRequest {
    pub class_code: i32,
    #[serde(default)]
    pub deck: Vec<i32>,
    #[serde(default)]
    pub open: Vec<i32>,
    #[serde(default = "aggregate_context")]
    pub context: ContextKey,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub card_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub score: f64,
    /// Share of alternatives scoring strictly higher; `0.0` is the best pick.
    pub rank: f64,
}

/// Mean synergy of `candidate` with the deck.
///
/// An empty deck scores against the "no prior card" row, normalized by that
/// row's total since it has no diagonal cell.
#[must_use]
pub fn synergy_score(matrix: &FrequencyMatrix, deck: &[usize], candidate: usize) -> f64 {
    if deck.is_empty() {
        let row = matrix.no_card_row();
        let up = matrix.get(row, candidate).unwrap_or(0);
        return ratio(up, matrix.row_sum(row));
    }
    let scores: Vec<f64> = deck
        .iter()
        .filter(|&&card| card != candidate)
        .map(|&card| ratio(matrix.get(card, candidate).unwrap_or(0), matrix.diagonal(card)))
        .collect();
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / usize_to_f64(scores.len())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecommendationScorer {
    upgrade_weighting: bool,
}

impl RecommendationScorer {
    #[must_use]
    pub const fn new(config: &EngineConfig) -> Self {
        Self {
            upgrade_weighting: config.upgrade_weighting,
        }
    }

    /// Score against the transition matrix of the latest complete batch.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown classes or cards, a missing matrix, or a
    /// store failure.
    pub fn recommend<S: DocumentStore + ?Sized>(
        &self,
        request: &RecommendRequest,
        pool: &PoolConfiguration,
        state: &VersionState,
        store: &S,
    ) -> Result<Snapshot<Vec<Recommendation>>, RecommendError> {
        let Some(class) = pool.class(request.class_code) else {
            return Err(RecommendError::UnknownClass(request.class_code));
        };
        let Some((patch_version, batch)) = complete_batch(state) else {
            return Ok(Snapshot::ColdStart);
        };
        let key = DocumentKey::new(
            Ledger::Pick,
            patch_version,
            batch,
            MatrixKind::Transition,
            request.class_code,
        );
        let document = store.get(&key)?;
        if let Some(doc) = &document
            && doc.card_pool != class.cards()
        {
            return Err(RecommendError::PoolMismatch {
                key,
                stored: doc.card_pool.clone(),
                live: class.cards().to_vec(),
            });
        }
        let Some(matrix) = document.as_ref().and_then(|doc| doc.matrix(request.context)) else {
            return Err(RecommendError::MissingMatrix {
                key,
                context: request.context,
            });
        };
        Ok(Snapshot::Ready {
            patch_version: patch_version.to_string(),
            batch,
            data: self.score(request, pool, matrix)?,
        })
    }

    /// Score every open card of `request` against `matrix`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown classes or cards, or a matrix that does
    /// not match the class pool.
    pub fn score(
        &self,
        request: &RecommendRequest,
        pool: &PoolConfiguration,
        matrix: &FrequencyMatrix,
    ) -> Result<Vec<Recommendation>, RecommendError> {
        let class_code = request.class_code;
        let class = pool
            .class(class_code)
            .ok_or(RecommendError::UnknownClass(class_code))?;
        if !matrix.has_shape(class.len()) {
            return Err(RecommendError::ShapeMismatch {
                class_code,
                expected: class.len(),
                found: matrix.card_count(),
            });
        }

        let weighted;
        let matrix = if self.upgrade_weighting {
            let mut scratch = matrix.clone();
            scratch.fold_upgrades(&pool.upgrade_pairs(class_code));
            weighted = scratch;
            &weighted
        } else {
            matrix
        };

        let deck = indices(class, class_code, &request.deck)?;
        let open = indices(class, class_code, &request.open)?;
        let taken: BTreeSet<usize> = deck.iter().chain(&open).copied().collect();
        let replaceable: Vec<usize> = (0..class.len()).filter(|i| !taken.contains(i)).collect();
        let alternatives: Vec<f64> = replaceable
            .iter()
            .map(|&card| synergy_score(matrix, &deck, card))
            .collect();

        Ok(open
            .iter()
            .zip(&request.open)
            .map(|(&index, &card_id)| {
                let score = synergy_score(matrix, &deck, index);
                let better = alternatives.iter().filter(|&&other| other > score).count();
                Recommendation {
                    card_id,
                    name: pool.card_name(card_id).map(str::to_string),
                    score,
                    rank: usize_to_f64(better) / usize_to_f64(alternatives.len() + 1),
                }
            })
            .collect())
    }
}

fn indices(
    class: &ClassCardPool,
    class_code: i32,
    cards: &[i32],
) -> Result<Vec<usize>, RecommendError> {
    cards
        .iter()
        .map(|&card_id| {
            class
                .index_of(card_id)
                .ok_or(RecommendError::UnknownCard {
                    class_code,
                    card_id,
                })
        })
        .collect()
}
