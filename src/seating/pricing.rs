use super::SeatId;

/// Total charged for a selection, in FCFA.
///
/// FCFA has no subunit here, so the amount is an exact integer product.
/// Saturates instead of overflowing.
pub fn compute_total(selected: &[SeatId], price_per_seat: u64) -> u64 {
    price_per_seat.saturating_mul(selected.len() as u64)
}
