//! Conversion of one player's draft into matrix cell increments.

use rand::Rng;

use crate::matrix::Cell;
use crate::pool::ClassCardPool;

/// A card id that is not part of the player's class pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownCard {
    pub round: usize,
    pub card_id: i32,
}

/// Map each round's card ids to class-local matrix indices.
///
/// # Errors
///
/// Returns the first card id missing from the pool.
pub fn resolve_rounds(
    rounds: &[&[i32]],
    pool: &ClassCardPool,
) -> Result<Vec<Vec<usize>>, UnknownCard> {
    rounds
        .iter()
        .enumerate()
        .map(|(round, cards)| {
            cards
                .iter()
                .map(|&card_id| {
                    pool.index_of(card_id).ok_or(UnknownCard {
                        round: round + 1,
                        card_id,
                    })
                })
                .collect()
        })
        .collect()
}

/// Every ordered pair of the merged picks, self-pairs included.
///
/// With `n` merged picks this yields `n * n` cells and each pick's diagonal
/// gains `n`.
#[must_use]
pub fn coexistence_deltas(rounds: &[Vec<usize>]) -> Vec<Cell> {
    let merged: Vec<usize> = rounds.iter().flatten().copied().collect();
    merged
        .iter()
        .flat_map(|&row| merged.iter().map(move |&col| Cell::new(row, col)))
        .collect()
}

/// Directed pick-order increments.
///
/// * first-round picks follow the "no prior card" row;
/// * each unordered pair inside a round gets one increment in a random
///   direction plus a diagonal increment on the chosen row;
/// * every earlier pick points at every pick of the next round, with a
///   diagonal increment on the earlier pick.
pub fn transition_deltas<R: Rng + ?Sized>(
    rounds: &[Vec<usize>],
    no_card_row: usize,
    rng: &mut R,
) -> Vec<Cell> {
    let mut cells = Vec::new();
    let mut earlier: Vec<usize> = Vec::new();

    for (round, picks) in rounds.iter().enumerate() {
        if round == 0 {
            cells.extend(picks.iter().map(|&pick| Cell::new(no_card_row, pick)));
        } else {
            for &old in &earlier {
                for &pick in picks {
                    cells.push(Cell::new(old, pick));
                    cells.push(Cell::diagonal(old));
                }
            }
        }

        for (i, &first) in picks.iter().enumerate() {
            for &second in &picks[i + 1..] {
                let (from, to) = if rng.gen_bool(0.5) {
                    (first, second)
                } else {
                    (second, first)
                };
                cells.push(Cell::new(from, to));
                cells.push(Cell::diagonal(from));
            }
        }

        earlier.extend_from_slice(picks);
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{PoolConfiguration, PoolUpdate};
    use crate::rng::CountingRng;
    use std::collections::BTreeMap;

    fn count(cells: &[Cell], cell: Cell) -> usize {
        cells.iter().filter(|&&c| c == cell).count()
    }

    #[test]
    fn resolve_reports_unknown_cards_with_round() {
        let pool = PoolConfiguration::from_update(&PoolUpdate {
            patch_version: "3".to_string(),
            class_pool: vec![1],
            card_pools: BTreeMap::from([(1, vec![30, 10, 20])]),
            ..PoolUpdate::default()
        })
        .unwrap();
        let class = pool.class(1).unwrap();
        let rounds: [&[i32]; 3] = [&[10], &[20, 30], &[]];
        let resolved = resolve_rounds(&rounds, class).unwrap();
        assert_eq!(resolved, vec![vec![0], vec![1, 2], vec![]]);

        let rounds: [&[i32]; 2] = [&[10], &[99]];
        let err = resolve_rounds(&rounds, class).unwrap_err();
        assert_eq!(err, UnknownCard { round: 2, card_id: 99 });
    }

    #[test]
    fn coexistence_is_full_cross_product() {
        let cells = coexistence_deltas(&[vec![0], vec![1], vec![2]]);
        assert_eq!(cells.len(), 9);
        for i in 0..3 {
            assert_eq!(count(&cells, Cell::diagonal(i)), 1);
            for j in 0..3 {
                assert_eq!(count(&cells, Cell::new(i, j)), 1);
            }
        }
    }

    #[test]
    fn single_pick_rounds_chain_forward() {
        let mut rng = CountingRng::from_seed(1);
        let cells = transition_deltas(&[vec![0], vec![1], vec![2]], 3, &mut rng);
        // no intra-round pairs, so no random draws
        assert_eq!(rng.draws(), 0);
        assert_eq!(count(&cells, Cell::new(3, 0)), 1);
        assert_eq!(count(&cells, Cell::new(0, 1)), 1);
        assert_eq!(count(&cells, Cell::new(0, 2)), 1);
        assert_eq!(count(&cells, Cell::new(1, 2)), 1);
        assert_eq!(count(&cells, Cell::diagonal(0)), 2);
        assert_eq!(count(&cells, Cell::diagonal(1)), 1);
        assert_eq!(count(&cells, Cell::diagonal(2)), 0);
        assert_eq!(cells.len(), 7);
    }

    #[test]
    fn intra_round_pairs_pick_one_direction() {
        let mut rng = CountingRng::from_seed(99);
        let cells = transition_deltas(&[vec![0, 1], vec![], vec![]], 2, &mut rng);
        assert!(rng.draws() >= 1);
        assert_eq!(count(&cells, Cell::new(2, 0)), 1);
        assert_eq!(count(&cells, Cell::new(2, 1)), 1);
        let forward = count(&cells, Cell::new(0, 1));
        let backward = count(&cells, Cell::new(1, 0));
        assert_eq!(forward + backward, 1);
        let chosen = if forward == 1 { 0 } else { 1 };
        assert_eq!(count(&cells, Cell::diagonal(chosen)), 1);
        assert_eq!(cells.len(), 4);
    }

    #[test]
    fn same_seed_same_directions() {
        let rounds = [vec![0, 1, 2], vec![3, 4], vec![]];
        let a = transition_deltas(&rounds, 5, &mut CountingRng::from_seed(5));
        let b = transition_deltas(&rounds, 5, &mut CountingRng::from_seed(5));
        assert_eq!(a, b);
    }
}
