//! Ticket Generation
//!
//! A ticket is a 3×9 grid. Each row holds exactly five numbers, column `c`
//! holds numbers from `10c+1..=10c+10` (the last column `81..=90`), and the
//! numbers in a column increase from top to bottom.

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::warn;

use crate::core::rng::DeterministicRng;
use crate::{MAX_NUMBER, TICKET_COLUMNS, TICKET_ROWS, NUMBERS_PER_ROW};

/// Attempts to find an unused value for one cell before giving up.
pub const MAX_CELL_ATTEMPTS: u32 = 100;

/// Whole-ticket regenerations before [`generate_ticket`] gives up.
pub const MAX_TICKET_ATTEMPTS: u32 = 8;

/// Numbers filled on a valid ticket.
pub const NUMBERS_PER_TICKET: usize = TICKET_ROWS * NUMBERS_PER_ROW;

/// One row of a ticket; `None` is an empty cell.
pub type TicketRow = [Option<u8>; TICKET_COLUMNS];

/// Ticket generation and validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TicketError {
    /// No unused value could be found for a cell within the retry budget.
    #[error("generation anomaly: no free value for row {row}, column {column}")]
    GenerationAnomaly {
        /// Row of the unfilled cell.
        row: usize,
        /// Column of the unfilled cell.
        column: usize,
    },

    /// A row does not hold exactly five numbers.
    #[error("row {row} holds {count} numbers")]
    RowCount {
        /// Offending row.
        row: usize,
        /// Numbers found.
        count: usize,
    },

    /// A value sits outside its column's range.
    #[error("{value} is outside the range of column {column}")]
    OutOfRange {
        /// Offending value.
        value: u8,
        /// Column it was found in.
        column: usize,
    },

    /// A column is not increasing top to bottom.
    #[error("column {column} is not increasing")]
    ColumnOrder {
        /// Offending column.
        column: usize,
    },

    /// The same value appears twice.
    #[error("{0} appears more than once")]
    Duplicate(u8),
}

/// Inclusive value range for a ticket column.
pub fn column_range(column: usize) -> (u8, u8) {
    let min = (column * 10 + 1) as u8;
    let max = if column == TICKET_COLUMNS - 1 {
        MAX_NUMBER
    } else {
        ((column + 1) * 10) as u8
    };
    (min, max)
}

/// A player's ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    rows: [TicketRow; TICKET_ROWS],
}

impl Ticket {
    /// Build a ticket from explicit rows. No invariants are checked;
    /// call [`Ticket::validate`] when the rows come from outside.
    pub fn from_rows(rows: [TicketRow; TICKET_ROWS]) -> Self {
        Self { rows }
    }

    /// Generate one ticket, trying each cell at most `cell_attempts` times.
    ///
    /// Returns [`TicketError::GenerationAnomaly`] if a cell could not be
    /// filled within that budget; the partially filled ticket is discarded.
    pub fn generate_with_attempts(rng: &mut DeterministicRng, cell_attempts: u32) -> Result<Self, TicketError> {
        let mut rows = [[None; TICKET_COLUMNS]; TICKET_ROWS];
        let mut used = BTreeSet::new();

        for (row, cells) in rows.iter_mut().enumerate() {
            for column in rng.sample_indices(TICKET_COLUMNS, NUMBERS_PER_ROW) {
                let (min, max) = column_range(column);

                let value = (0..cell_attempts)
                    .map(|_| rng.next_int_range(min as i32, max as i32) as u8)
                    .find(|candidate| !used.contains(candidate));

                match value {
                    Some(value) => {
                        used.insert(value);
                        cells[column] = Some(value);
                    }
                    None => {
                        warn!(row, column, "ticket generation anomaly: cell left empty");
                        return Err(TicketError::GenerationAnomaly { row, column });
                    }
                }
            }
        }

        let mut ticket = Self { rows };
        ticket.sort_columns();
        Ok(ticket)
    }

    /// Re-sort each column's filled values so they increase downwards.
    /// Empty cells keep their positions.
    fn sort_columns(&mut self) {
        for column in 0..TICKET_COLUMNS {
            let mut values: Vec<u8> = self.rows.iter()
                .filter_map(|row| row[column])
                .collect();
            values.sort_unstable();

            let mut values = values.into_iter();
            for row in self.rows.iter_mut() {
                if row[column].is_some() {
                    row[column] = values.next();
                }
            }
        }
    }

    /// Rows of the ticket.
    pub fn rows(&self) -> &[TicketRow; TICKET_ROWS] {
        &self.rows
    }

    /// A single row.
    pub fn row(&self, index: usize) -> Option<&TicketRow> {
        self.rows.get(index)
    }

    /// Filled values of one row, left to right.
    pub fn row_numbers(&self, index: usize) -> Vec<u8> {
        self.row(index)
            .map(|row| row.iter().flatten().copied().collect())
            .unwrap_or_default()
    }

    /// All filled values, row by row.
    pub fn numbers(&self) -> impl Iterator<Item = u8> + '_ {
        self.rows.iter().flat_map(|row| row.iter().flatten().copied())
    }

    /// Whether the ticket carries `number`.
    pub fn contains(&self, number: u8) -> bool {
        self.numbers().any(|n| n == number)
    }

    /// Check every structural invariant.
    pub fn validate(&self) -> Result<(), TicketError> {
        let mut seen = BTreeSet::new();

        for (row_idx, row) in self.rows.iter().enumerate() {
            let count = row.iter().flatten().count();
            if count != NUMBERS_PER_ROW {
                return Err(TicketError::RowCount { row: row_idx, count });
            }

            for (column, value) in row.iter().enumerate() {
                let Some(value) = *value else { continue };
                let (min, max) = column_range(column);
                if value < min || value > max {
                    return Err(TicketError::OutOfRange { value, column });
                }
                if !seen.insert(value) {
                    return Err(TicketError::Duplicate(value));
                }
            }
        }

        for column in 0..TICKET_COLUMNS {
            let values: Vec<u8> = self.rows.iter().filter_map(|row| row[column]).collect();
            if values.windows(2).any(|w| w[0] >= w[1]) {
                return Err(TicketError::ColumnOrder { column });
            }
        }

        Ok(())
    }
}

/// Generate a valid ticket, regenerating after an anomaly.
///
/// Fails only if [`MAX_TICKET_ATTEMPTS`] consecutive generations hit an
/// anomaly, reporting the last one.
pub fn generate_ticket(rng: &mut DeterministicRng) -> Result<Ticket, TicketError> {
    regenerate(rng, MAX_CELL_ATTEMPTS)
}

fn regenerate(rng: &mut DeterministicRng, cell_attempts: u32) -> Result<Ticket, TicketError> {
    let mut last_error = None;

    for attempt in 1..=MAX_TICKET_ATTEMPTS {
        match Ticket::generate_with_attempts(rng, cell_attempts) {
            Ok(ticket) => return Ok(ticket),
            Err(e) => {
                warn!(attempt, error = %e, "regenerating ticket");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or(TicketError::GenerationAnomaly { row: 0, column: 0 }))
}

// =============================================================================
// TESTS
// =============================================================================
