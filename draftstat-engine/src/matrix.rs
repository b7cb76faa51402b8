//! Frequency matrices and their coordinate-update primitives.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{UPGRADE_WEIGHT_DENOMINATOR, UPGRADE_WEIGHT_NUMERATOR};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatrixError {
    #[error("cell ({row}, {col}) outside a {rows}x{cols} matrix")]
    OutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
}

/// One directed cell increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
}

impl Cell {
    #[must_use]
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    #[must_use]
    pub const fn diagonal(index: usize) -> Self {
        Self::new(index, index)
    }
}

/// (K+1) x K counter matrix for a class pool of K cards.
///
/// Rows `0..K` and columns `0..K` follow the class card pool order; row `K`
/// is the "no prior card" state used by first-round transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrequencyMatrix {
    rows: Vec<Vec<u64>>,
}

impl FrequencyMatrix {
    /// Zero matrix for a pool of `card_count` cards.
    #[must_use]
    pub fn skeleton(card_count: usize) -> Self {
        Self {
            rows: vec![vec![0; card_count]; card_count + 1],
        }
    }

    /// Number of cards K (columns).
    #[must_use]
    pub fn card_count(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Index of the "no prior card" row.
    #[must_use]
    pub fn no_card_row(&self) -> usize {
        self.card_count()
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<u64> {
        self.rows.get(row)?.get(col).copied()
    }

    /// Pick count of a card (its diagonal cell); 0 when out of range.
    #[must_use]
    pub fn diagonal(&self, index: usize) -> u64 {
        self.get(index, index).unwrap_or(0)
    }

    /// Sum of all diagonal cells.
    #[must_use]
    pub fn diagonal_sum(&self) -> u64 {
        (0..self.card_count()).map(|i| self.diagonal(i)).sum()
    }

    #[must_use]
    pub fn row_sum(&self, row: usize) -> u64 {
        self.rows.get(row).map_or(0, |cells| cells.iter().sum())
    }

    /// Borrow the raw rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<u64>] {
        &self.rows
    }

    /// True when this matrix has the shape expected for `card_count` cards.
    #[must_use]
    pub fn has_shape(&self, card_count: usize) -> bool {
        self.rows.len() == card_count + 1 && self.rows.iter().all(|row| row.len() == card_count)
    }

    /// Check that every cell of `cells` lies inside the matrix.
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range cell.
    pub fn check(&self, cells: &[Cell]) -> Result<(), MatrixError> {
        let rows = self.row_count();
        let cols = self.card_count();
        match cells.iter().find(|cell| cell.row >= rows || cell.col >= cols) {
            Some(cell) => Err(MatrixError::OutOfBounds {
                row: cell.row,
                col: cell.col,
                rows,
                cols,
            }),
            None => Ok(()),
        }
    }

    /// Increment every listed cell by one. Validates all cells first, so an
    /// error leaves the matrix untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if any cell is out of range.
    pub fn apply(&mut self, cells: &[Cell]) -> Result<(), MatrixError> {
        self.check(cells)?;
        for cell in cells {
            let slot = &mut self.rows[cell.row][cell.col];
            *slot = slot.saturating_add(1);
        }
        Ok(())
    }

    /// Fold a share of each upgrade card's column into its reinforce card's
    /// column, skipping the rows of the two cards themselves.
    ///
    /// `pairs` holds `(reinforce_index, upgrade_index)`; pairs outside the
    /// matrix are ignored.
    pub fn fold_upgrades(&mut self, pairs: &[(usize, usize)]) {
        let cols = self.card_count();
        for &(reinforce, upgrade) in pairs {
            if reinforce >= cols || upgrade >= cols {
                continue;
            }
            for (row, cells) in self.rows.iter_mut().enumerate().take(cols) {
                if row == reinforce || row == upgrade {
                    continue;
                }
                let parent = cells[upgrade].saturating_mul(UPGRADE_WEIGHT_NUMERATOR)
                    / UPGRADE_WEIGHT_DENOMINATOR;
                cells[reinforce] = cells[reinforce].saturating_add(parent);
            }
        }
    }
}
