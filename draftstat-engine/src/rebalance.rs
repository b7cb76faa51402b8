//! Pick-rate, win-rate and win-given-pick rankings for balance review.
//!
//! All figures come from the aggregate `-1/-1` coexistence matrices, whose
//! diagonal cells count picks. Dividing a diagonal sum by the pick
//! multiplicity turns it into a number of matches.

use serde::Serialize;
use std::cmp::Ordering;
use thiserror::Error;

use crate::config::DraftShape;
use crate::document::{ContextKey, Ledger, MatrixDocument, MatrixKind};
use crate::indicator::{BatchDocuments, Snapshot, load_complete_batch};
use crate::matrix::FrequencyMatrix;
use crate::numbers::ratio;
use crate::pool::PoolConfiguration;
use crate::store::{DocumentStore, StoreError};
use crate::version::VersionState;

#[derive(Debug, Error)]
pub enum RebalanceError {
    #[error("class {0} is not in the pool")]
    UnknownClass(i32),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Class,
    Card,
}

/// `count / total`, with a zero total yielding `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CountRatio {
    pub count: u64,
    pub total: u64,
    pub rate: f64,
}

impl CountRatio {
    #[must_use]
    pub fn new(count: u64, total: u64) -> Self {
        Self {
            count,
            total,
            rate: ratio(count, total),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceEntry {
    pub kind: EntryKind,
    pub id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub pick: CountRatio,
    pub win: CountRatio,
    pub win_given_pick: f64,
}

impl RebalanceEntry {
    fn new(
        kind: EntryKind,
        id: i32,
        name: Option<String>,
        pick: CountRatio,
        win: CountRatio,
    ) -> Self {
        Self {
            kind,
            id,
            name,
            win_given_pick: ratio(win.count, pick.count),
            pick,
            win,
        }
    }
}

/// Descending win-given-pick, then descending pick rate, then ascending id.
fn ranking_order(a: &RebalanceEntry, b: &RebalanceEntry) -> Ordering {
    b.win_given_pick
        .total_cmp(&a.win_given_pick)
        .then_with(|| b.pick.rate.total_cmp(&a.pick.rate))
        .then_with(|| a.id.cmp(&b.id))
}

#[derive(Debug, Clone, Copy)]
pub struct RebalanceAnalyzer {
    multiplicity: u64,
}

impl RebalanceAnalyzer {
    #[must_use]
    pub const fn new(draft: DraftShape) -> Self {
        Self {
            multiplicity: draft.pick_multiplicity(),
        }
    }

    fn matches(&self, matrix: Option<&FrequencyMatrix>) -> u64 {
        let diagonal = matrix.map_or(0, FrequencyMatrix::diagonal_sum);
        diagonal.checked_div(self.multiplicity).unwrap_or(0)
    }

    /// Class ranking over the latest complete batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn classes<S: DocumentStore + ?Sized>(
        &self,
        pool: &PoolConfiguration,
        state: &VersionState,
        store: &S,
    ) -> Result<Snapshot<Vec<RebalanceEntry>>, StoreError> {
        Ok(load_complete_batch(state, store)?.map(|docs| self.rank_classes(pool, &docs)))
    }

    /// Card ranking of one class over the latest complete batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the class is unknown or the store cannot be read.
    pub fn cards<S: DocumentStore + ?Sized>(
        &self,
        class_code: i32,
        pool: &PoolConfiguration,
        state: &VersionState,
        store: &S,
    ) -> Result<Snapshot<Vec<RebalanceEntry>>, RebalanceError> {
        if pool.class(class_code).is_none() {
            return Err(RebalanceError::UnknownClass(class_code));
        }
        load_complete_batch(state, store)?
            .try_map(|docs| self.rank_cards(pool, class_code, &docs))
    }

    /// Rank every class of the pool.
    #[must_use]
    pub fn rank_classes(
        &self,
        pool: &PoolConfiguration,
        docs: &BatchDocuments,
    ) -> Vec<RebalanceEntry> {
        let counts: Vec<(i32, u64, u64)> = pool
            .class_pool()
            .iter()
            .map(|&class_code| {
                let pick = self.matches(aggregate(&docs.pick, Ledger::Pick, class_code));
                let win = self.matches(aggregate(&docs.win, Ledger::Win, class_code));
                (class_code, pick, win)
            })
            .collect();
        let total_picks: u64 = counts.iter().map(|&(_, pick, _)| pick).sum();
        let total_wins: u64 = counts.iter().map(|&(_, _, win)| win).sum();

        let mut entries: Vec<RebalanceEntry> = counts
            .into_iter()
            .map(|(class_code, pick, win)| {
                RebalanceEntry::new(
                    EntryKind::Class,
                    class_code,
                    None,
                    CountRatio::new(pick, total_picks),
                    CountRatio::new(win, total_wins),
                )
            })
            .collect();
        entries.sort_by(ranking_order);
        entries
    }

    /// Rank the cards of one class.
    ///
    /// # Errors
    ///
    /// Returns an error if the class is unknown.
    pub fn rank_cards(
        &self,
        pool: &PoolConfiguration,
        class_code: i32,
        docs: &BatchDocuments,
    ) -> Result<Vec<RebalanceEntry>, RebalanceError> {
        let class = pool
            .class(class_code)
            .ok_or(RebalanceError::UnknownClass(class_code))?;
        let pick_doc = coexistence(&docs.pick, Ledger::Pick, class_code);
        let win_doc = coexistence(&docs.win, Ledger::Win, class_code);
        for document in pick_doc.iter().chain(&win_doc) {
            if document.card_pool != class.cards() {
                log::warn!(
                    "{} indexes cards {:?}, pool now lists {:?}",
                    document.key,
                    document.card_pool,
                    class.cards()
                );
            }
        }
        let total_picks = self.matches(pick_doc.and_then(MatrixDocument::aggregate));
        let total_wins = self.matches(win_doc.and_then(MatrixDocument::aggregate));

        let mut entries: Vec<RebalanceEntry> = class
            .cards()
            .iter()
            .map(|&card_id| {
                let pick = card_diagonal(pick_doc, card_id);
                let win = card_diagonal(win_doc, card_id);
                RebalanceEntry::new(
                    EntryKind::Card,
                    card_id,
                    pool.card_name(card_id).map(str::to_string),
                    CountRatio::new(pick, total_picks),
                    CountRatio::new(win, total_wins),
                )
            })
            .collect();
        entries.sort_by(ranking_order);
        Ok(entries)
    }
}

fn coexistence(
    documents: &[MatrixDocument],
    ledger: Ledger,
    class_code: i32,
) -> Option<&MatrixDocument> {
    let document = documents.iter().find(|doc| {
        doc.key.ledger == ledger
            && doc.key.kind == MatrixKind::Coexistence
            && doc.key.class_code == class_code
    });
    if document.is_none() {
        log::warn!("no {ledger} coexistence document for class {class_code}");
    }
    document
}

fn aggregate(
    documents: &[MatrixDocument],
    ledger: Ledger,
    class_code: i32,
) -> Option<&FrequencyMatrix> {
    coexistence(documents, ledger, class_code)?.matrix(ContextKey::AGGREGATE)
}

/// Pick count of `card_id`, looked up through the document's own card pool.
fn card_diagonal(document: Option<&MatrixDocument>, card_id: i32) -> u64 {
    document
        .and_then(|doc| {
            let index = doc.card_pool.iter().position(|&id| id == card_id)?;
            Some(doc.matrix(ContextKey::AGGREGATE)?.diagonal(index))
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::skeleton_documents;
    use crate::matrix::Cell;
    use crate::pool::PoolUpdate;
    use std::collections::BTreeMap;

    const SINGLE_PICK_ROUNDS: DraftShape = DraftShape {
        rounds: 3,
        picks_per_round: 1,
    };

    fn pool() -> PoolConfiguration {
        PoolConfiguration::from_update(&PoolUpdate {
            patch_version: "3".to_string(),
            class_pool: vec![1, 2],
            card_pools: BTreeMap::from([(1, vec![10, 20, 30]), (2, vec![40, 50, 60])]),
            card_names: BTreeMap::from([(10, "Spark".to_string())]),
            ..PoolUpdate::default()
        })
        .unwrap()
    }

    fn bump(docs: &mut [MatrixDocument], ledger: Ledger, class: i32, picks: &[usize]) {
        let doc = docs
            .iter_mut()
            .find(|doc| {
                doc.key.ledger == ledger
                    && doc.key.kind == MatrixKind::Coexistence
                    && doc.key.class_code == class
            })
            .unwrap();
        let cells: Vec<Cell> = picks.iter().map(|&i| Cell::diagonal(i)).collect();
        doc.matrix_mut(ContextKey::AGGREGATE).unwrap().apply(&cells).unwrap();
    }

    fn batch(pool: &PoolConfiguration) -> BatchDocuments {
        let (pick, win): (Vec<MatrixDocument>, Vec<MatrixDocument>) = skeleton_documents(pool, "3", 1)
            .into_iter()
            .partition(|doc| doc.key.ledger == Ledger::Pick);
        let mut docs = BatchDocuments { pick, win };
        // class 1: two matches, one win; class 2: one match, one win
        bump(&mut docs.pick, Ledger::Pick, 1, &[0, 1, 2]);
        bump(&mut docs.pick, Ledger::Pick, 1, &[0, 1, 2]);
        bump(&mut docs.win, Ledger::Win, 1, &[0, 1, 2]);
        bump(&mut docs.pick, Ledger::Pick, 2, &[0, 1, 2]);
        bump(&mut docs.win, Ledger::Win, 2, &[0, 1, 2]);
        docs
    }

    #[test]
    fn classes_rank_by_win_given_pick() {
        let pool = pool();
        let analyzer = RebalanceAnalyzer::new(SINGLE_PICK_ROUNDS);
        let entries = analyzer.rank_classes(&pool, &batch(&pool));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, 2);
        assert_eq!(entries[0].pick, CountRatio::new(1, 3));
        assert!((entries[0].win_given_pick - 1.0).abs() < f64::EPSILON);
        assert_eq!(entries[1].id, 1);
        assert!((entries[1].pick.rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((entries[1].win.rate - 0.5).abs() < f64::EPSILON);
        assert!((entries[1].win_given_pick - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn cards_carry_names_and_zero_safe_rates() {
        let pool = pool();
        let mut docs = batch(&pool);
        // card 10 gets picked once more without winning
        bump(&mut docs.pick, Ledger::Pick, 1, &[0]);
        let analyzer = RebalanceAnalyzer::new(SINGLE_PICK_ROUNDS);
        let entries = analyzer.rank_cards(&pool, 1, &docs).unwrap();
        assert_eq!(entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![20, 30, 10]);
        let spark = &entries[2];
        assert_eq!(spark.name.as_deref(), Some("Spark"));
        assert_eq!(spark.pick, CountRatio::new(3, 2));
        assert!((spark.win_given_pick - 1.0 / 3.0).abs() < 1e-9);

        let empty = BatchDocuments::default();
        let entries = analyzer.rank_cards(&pool, 2, &empty).unwrap();
        assert!(entries.iter().all(|e| e.pick.rate == 0.0 && e.win_given_pick == 0.0));
        assert_eq!(entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![40, 50, 60]);
        assert!(matches!(
            analyzer.rank_cards(&pool, 9, &empty),
            Err(RebalanceError::UnknownClass(9))
        ));
    }

    #[test]
    fn equal_win_given_pick_falls_back_to_pick_rate() {
        let pool = pool();
        let (pick, win): (Vec<MatrixDocument>, Vec<MatrixDocument>) = skeleton_documents(&pool, "3", 1)
            .into_iter()
            .partition(|doc| doc.key.ledger == Ledger::Pick);
        let mut docs = BatchDocuments { pick, win };
        // cards 20 and 30 both win every pick; 30 is picked twice as often
        bump(&mut docs.pick, Ledger::Pick, 1, &[0, 1, 2]);
        bump(&mut docs.pick, Ledger::Pick, 1, &[2]);
        bump(&mut docs.win, Ledger::Win, 1, &[1, 2]);
        bump(&mut docs.win, Ledger::Win, 1, &[2]);

        let analyzer = RebalanceAnalyzer::new(SINGLE_PICK_ROUNDS);
        let entries = analyzer.rank_cards(&pool, 1, &docs).unwrap();
        assert_eq!(entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![30, 20, 10]);
        assert!((entries[0].win_given_pick - entries[1].win_given_pick).abs() < f64::EPSILON);
        assert!(entries[0].pick.rate > entries[1].pick.rate);
    }

    #[test]
    fn cards_are_read_through_the_document_card_pool() {
        let pool = pool();
        let docs = batch(&pool);
        let swapped = PoolConfiguration::from_update(&PoolUpdate {
            patch_version: "3".to_string(),
            class_pool: vec![1, 2],
            card_pools: BTreeMap::from([(1, vec![30, 20, 70]), (2, vec![40, 50, 60])]),
            ..PoolUpdate::default()
        })
        .unwrap();
        let analyzer = RebalanceAnalyzer::new(SINGLE_PICK_ROUNDS);
        let entries = analyzer.rank_cards(&swapped, 1, &docs).unwrap();
        let by_id = |id: i32| entries.iter().find(|e| e.id == id).unwrap();
        assert_eq!(by_id(30).pick.count, 2);
        assert_eq!(by_id(20).pick.count, 2);
        assert_eq!(by_id(70).pick.count, 0);
        assert_eq!(by_id(70).win.count, 0);
    }

    #[test]
    fn default_shape_counts_nine_picks_per_match() {
        let pool = pool();
        let docs = batch(&pool);
        let analyzer = RebalanceAnalyzer::new(DraftShape::default());
        let entries = analyzer.rank_classes(&pool, &docs);
        assert!(entries.iter().all(|e| e.pick.count == 0));

        let mut docs = docs;
        for _ in 0..3 {
            bump(&mut docs.pick, Ledger::Pick, 2, &[0, 1, 2]);
        }
        let entries = analyzer.rank_classes(&pool, &docs);
        let class_two = entries.iter().find(|e| e.id == 2).unwrap();
        assert_eq!(class_two.pick.count, 1);
    }

    #[test]
    fn cold_start_before_second_batch() {
        let pool = pool();
        let store = crate::store::MemoryStore::new();
        let state = VersionState::Active {
            patch_version: "3".to_string(),
            batch: 1,
        };
        let analyzer = RebalanceAnalyzer::new(SINGLE_PICK_ROUNDS);
        assert!(analyzer.classes(&pool, &state, &store).unwrap().is_cold_start());
        assert!(analyzer.cards(1, &pool, &state, &store).unwrap().is_cold_start());
    }
}
