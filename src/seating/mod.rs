//! Seat selection and pricing for a single booking attempt.
//!
//! A [`SeatMap`] describes the physical layout of a bus (row labels, column
//! numbers and the seats already taken on a trip). A [`SeatSelection`] is the
//! per-visit state a customer mutates by toggling seats and changing the number
//! of seats they want to buy. Every reachable state keeps the selection free of
//! duplicates and occupied seats, never larger than the desired count, and the
//! total always equal to `price_per_seat × selected`.
//!
//! None of the operations fail: unknown seats, occupied seats and attempts to
//! go past the desired count are ignored, out-of-range counts are clamped.
//! Only building the configuration can return a [`SeatingError`].

pub mod map;
pub mod pricing;
pub mod selection;

pub use map::{SeatId, SeatMap};
pub use pricing::compute_total;
pub use selection::{SeatSelection, SelectionSnapshot};

/// Errors raised while building a seat map or a selection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeatingError {
    #[error("seat map needs at least one row")]
    EmptyRows,
    #[error("seat map needs at least one column")]
    EmptyColumns,
    #[error("seat map has more rows ({0}) than available row letters")]
    TooManyRows(usize),
    #[error("seat id {0} appears more than once in the seat map")]
    DuplicateSeat(String),
    #[error("trip has no available seats")]
    NoAvailableSeats,
}
