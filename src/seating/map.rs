use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;

use super::SeatingError;

const ROW_LETTERS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Seat identifier: row label followed by the column number (`"A1"`, `"J5"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeatId(String);

impl SeatId {
    pub fn new(row: &str, column: u32) -> Self {
        SeatId(format!("{}{}", row, column))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SeatId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SeatId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for SeatId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for SeatId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Immutable seat layout of one bus for one trip.
///
/// Built once per booking attempt. Occupied seats that are not part of the
/// grid are dropped, so `occupied ⊆ seats` always holds.
#[derive(Debug, Clone)]
pub struct SeatMap {
    rows: Vec<String>,
    columns: Vec<u32>,
    seats: HashSet<SeatId>,
    occupied: HashSet<SeatId>,
}

impl SeatMap {
    pub fn new<I, S>(rows: Vec<String>, columns: Vec<u32>, occupied: I) -> Result<Self, SeatingError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if rows.is_empty() {
            return Err(SeatingError::EmptyRows);
        }
        if columns.is_empty() {
            return Err(SeatingError::EmptyColumns);
        }

        let mut seats = HashSet::with_capacity(rows.len() * columns.len());
        for row in &rows {
            for &column in &columns {
                let id = SeatId::new(row, column);
                if seats.contains(&id) {
                    return Err(SeatingError::DuplicateSeat(id.into_string()));
                }
                seats.insert(id);
            }
        }

        let occupied = occupied
            .into_iter()
            .filter_map(|seat| seats.get(seat.as_ref()).cloned())
            .collect();

        Ok(Self { rows, columns, seats, occupied })
    }

    /// Rows `A, B, C, …` and columns `1..=column_count`, the layout every bus
    /// in the fleet uses.
    pub fn lettered<I, S>(row_count: usize, column_count: u32, occupied: I) -> Result<Self, SeatingError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if row_count > ROW_LETTERS.len() {
            return Err(SeatingError::TooManyRows(row_count));
        }
        let rows = ROW_LETTERS
            .chars()
            .take(row_count)
            .map(String::from)
            .collect();
        let columns = (1..=column_count).collect();
        Self::new(rows, columns, occupied)
    }

    pub fn rows(&self) -> &[String] {
        &self.rows
    }

    pub fn columns(&self) -> &[u32] {
        &self.columns
    }

    pub fn capacity(&self) -> usize {
        self.seats.len()
    }

    pub fn free_capacity(&self) -> usize {
        self.seats.len() - self.occupied.len()
    }

    pub fn contains(&self, seat: &str) -> bool {
        self.seats.contains(seat)
    }

    pub fn is_occupied(&self, seat: &str) -> bool {
        self.occupied.contains(seat)
    }

    pub fn is_selectable(&self, seat: &str) -> bool {
        self.contains(seat) && !self.is_occupied(seat)
    }

    /// Canonical id for a seat string, if it belongs to this map.
    pub fn resolve(&self, seat: &str) -> Option<&SeatId> {
        self.seats.get(seat)
    }

    /// All seat ids in row-major order.
    pub fn seat_ids(&self) -> impl Iterator<Item = SeatId> + '_ {
        self.rows
            .iter()
            .flat_map(move |row| self.columns.iter().map(move |&column| SeatId::new(row, column)))
    }

    /// Occupied seats in row-major order.
    pub fn occupied_seats(&self) -> Vec<SeatId> {
        self.seat_ids()
            .filter(|seat| self.occupied.contains(seat))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lettered_map_has_rows_times_columns_seats() {
        let map = SeatMap::lettered(10, 5, ["A1", "B3"]).unwrap();
        assert_eq!(map.capacity(), 50);
        assert_eq!(map.free_capacity(), 48);
        assert_eq!(map.rows().first().map(String::as_str), Some("A"));
        assert_eq!(map.rows().last().map(String::as_str), Some("J"));
        assert_eq!(map.columns(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn seat_ids_are_row_major() {
        let map = SeatMap::lettered(2, 2, Vec::<String>::new()).unwrap();
        let ids: Vec<String> = map.seat_ids().map(SeatId::into_string).collect();
        assert_eq!(ids, vec!["A1", "A2", "B1", "B2"]);
    }

    #[test]
    fn unknown_occupied_seats_are_dropped() {
        let map = SeatMap::lettered(2, 2, ["A1", "Z9", "hello"]).unwrap();
        assert_eq!(map.occupied_seats(), vec![SeatId::new("A", 1)]);
        assert!(map.is_occupied("A1"));
        assert!(!map.is_occupied("Z9"));
    }

    #[test]
    fn selectable_means_known_and_free() {
        let map = SeatMap::lettered(10, 5, ["A1"]).unwrap();
        assert!(map.is_selectable("A2"));
        assert!(!map.is_selectable("A1"));
        assert!(!map.is_selectable("A6"));
        assert!(!map.is_selectable("K1"));
        assert!(!map.is_selectable("a2"));
    }

    #[test]
    fn rejects_degenerate_layouts() {
        assert_eq!(
            SeatMap::lettered(0, 5, Vec::<String>::new()).unwrap_err(),
            SeatingError::EmptyRows
        );
        assert_eq!(
            SeatMap::lettered(3, 0, Vec::<String>::new()).unwrap_err(),
            SeatingError::EmptyColumns
        );
        assert_eq!(
            SeatMap::lettered(27, 4, Vec::<String>::new()).unwrap_err(),
            SeatingError::TooManyRows(27)
        );
    }

    #[test]
    fn rejects_ambiguous_seat_ids() {
        // "A" + 11 and "A1" + 1 both spell "A11"
        let err = SeatMap::new(
            vec!["A".to_string(), "A1".to_string()],
            vec![1, 11],
            Vec::<String>::new(),
        )
        .unwrap_err();
        assert_eq!(err, SeatingError::DuplicateSeat("A11".to_string()));
    }
}
