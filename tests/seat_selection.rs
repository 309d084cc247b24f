use bus_booking::seating::{SeatMap, SeatSelection};

fn douala_yaounde_vip() -> SeatSelection {
    let map = SeatMap::lettered(10, 5, ["A1", "B3"]).unwrap();
    SeatSelection::new(map, 5000, 15).unwrap()
}

fn selected(s: &SeatSelection) -> Vec<&str> {
    s.selected_seats().iter().map(|seat| seat.as_str()).collect()
}

#[test]
fn booking_walkthrough() {
    let mut s = douala_yaounde_vip();
    assert_eq!(s.set_desired_seat_count(2), 2);

    assert!(s.toggle_seat("A2"));
    assert_eq!(selected(&s), vec!["A2"]);
    assert_eq!(s.total_amount(), 5000);

    assert!(s.toggle_seat("B2"));
    assert_eq!(selected(&s), vec!["A2", "B2"]);
    assert_eq!(s.total_amount(), 10_000);

    // capacity reached
    assert!(!s.toggle_seat("C1"));
    assert_eq!(selected(&s), vec!["A2", "B2"]);
    assert_eq!(s.total_amount(), 10_000);

    // occupied
    assert!(!s.toggle_seat("A1"));
    assert_eq!(selected(&s), vec!["A2", "B2"]);

    assert!(s.toggle_seat("A2"));
    assert_eq!(selected(&s), vec!["B2"]);
    assert_eq!(s.total_amount(), 5000);
}

#[test]
fn lowering_the_count_drops_latest_seats() {
    let mut s = douala_yaounde_vip();
    s.set_desired_seat_count(2);
    s.toggle_seat("A2");
    s.toggle_seat("B2");

    assert_eq!(s.set_desired_seat_count(1), 1);
    assert_eq!(selected(&s), vec!["A2"]);
    assert_eq!(s.total_amount(), 5000);
}

#[test]
fn three_seats_truncated_to_two() {
    let mut s = douala_yaounde_vip();
    s.set_desired_seat_count(3);
    s.toggle_seat("E4");
    s.toggle_seat("C1");
    s.toggle_seat("J5");

    s.set_desired_seat_count(2);
    assert_eq!(selected(&s), vec!["E4", "C1"]);
}

#[test]
fn desired_count_is_clamped_to_trip_capacity() {
    let mut s = douala_yaounde_vip();
    assert_eq!(s.set_desired_seat_count(0), 1);
    assert_eq!(s.set_desired_seat_count(15 + 5), 15);
}

#[test]
fn proceed_requires_a_seat() {
    let mut s = douala_yaounde_vip();
    assert!(!s.can_proceed());
    s.toggle_seat("D3");
    assert!(s.can_proceed());
    s.toggle_seat("D3");
    assert!(!s.can_proceed());
}
