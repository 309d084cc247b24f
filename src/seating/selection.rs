use serde::Serialize;
use std::fmt;

use super::{compute_total, SeatId, SeatMap, SeatingError};

/// Called synchronously after every mutation that changed the selection.
pub type SelectionListener = Box<dyn FnMut(&SelectionSnapshot) + Send>;

/// What the booking flow sees after each change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionSnapshot {
    pub selected_seats: Vec<SeatId>,
    pub total_amount: u64,
}

/// Seat selection state for one trip during one visit to the seat picker.
pub struct SeatSelection {
    map: SeatMap,
    price_per_seat: u64,
    available_seats: u32,
    desired_seat_count: u32,
    /// Click order is preserved.
    selected: Vec<SeatId>,
    listener: Option<SelectionListener>,
}

impl SeatSelection {
    /// Starts an empty selection with a desired count of one seat.
    pub fn new(map: SeatMap, price_per_seat: u64, available_seats: u32) -> Result<Self, SeatingError> {
        if available_seats == 0 {
            return Err(SeatingError::NoAvailableSeats);
        }
        Ok(Self {
            map,
            price_per_seat,
            available_seats,
            desired_seat_count: 1,
            selected: Vec::new(),
            listener: None,
        })
    }

    /// Registers the change listener, replacing any previous one.
    pub fn on_change<F>(&mut self, listener: F)
    where
        F: FnMut(&SelectionSnapshot) + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
    }

    /// Selects a free seat or deselects a selected one.
    ///
    /// Unknown and occupied seats are ignored. Adding a seat when the
    /// selection already holds `desired_seat_count` seats is ignored too;
    /// nothing is evicted to make room. Deselecting is always allowed.
    /// Returns whether the selection changed.
    pub fn toggle_seat(&mut self, seat: &str) -> bool {
        let id = match self.map.resolve(seat) {
            Some(id) if !self.map.is_occupied(seat) => id.clone(),
            _ => return false,
        };

        if let Some(pos) = self.selected.iter().position(|s| *s == id) {
            self.selected.remove(pos);
        } else if self.selected.len() < self.desired_seat_count as usize {
            self.selected.push(id);
        } else {
            return false;
        }

        self.notify();
        true
    }

    /// Sets how many seats the customer wants, clamped to `[1, available_seats]`.
    ///
    /// A selection longer than the new count keeps its earliest seats.
    /// Returns the clamped count.
    pub fn set_desired_seat_count(&mut self, count: i64) -> u32 {
        let clamped = count.clamp(1, i64::from(self.available_seats)) as u32;
        self.desired_seat_count = clamped;

        if self.selected.len() > clamped as usize {
            self.selected.truncate(clamped as usize);
            self.notify();
        }
        clamped
    }

    pub fn selected_seats(&self) -> &[SeatId] {
        &self.selected
    }

    pub fn desired_seat_count(&self) -> u32 {
        self.desired_seat_count
    }

    pub fn available_seats(&self) -> u32 {
        self.available_seats
    }

    pub fn price_per_seat(&self) -> u64 {
        self.price_per_seat
    }

    pub fn seat_map(&self) -> &SeatMap {
        &self.map
    }

    pub fn total_amount(&self) -> u64 {
        compute_total(&self.selected, self.price_per_seat)
    }

    pub fn is_at_capacity(&self) -> bool {
        self.selected.len() >= self.desired_seat_count as usize
    }

    /// Payment can start once at least one seat is selected.
    pub fn can_proceed(&self) -> bool {
        !self.selected.is_empty()
    }

    pub fn snapshot(&self) -> SelectionSnapshot {
        SelectionSnapshot {
            selected_seats: self.selected.clone(),
            total_amount: self.total_amount(),
        }
    }

    fn notify(&mut self) {
        if self.listener.is_none() {
            return;
        }
        let snapshot = self.snapshot();
        if let Some(listener) = self.listener.as_mut() {
            listener(&snapshot);
        }
    }
}

impl fmt::Debug for SeatSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeatSelection")
            .field("price_per_seat", &self.price_per_seat)
            .field("available_seats", &self.available_seats)
            .field("desired_seat_count", &self.desired_seat_count)
            .field("selected", &self.selected)
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}
