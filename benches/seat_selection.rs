use bus_booking::seating::{SeatMap, SeatSelection};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn full_bus_walk(c: &mut Criterion) {
    let occupied = ["A1", "B3", "C4", "E2", "F5", "H1", "I3"];
    let seats: Vec<String> = SeatMap::lettered(10, 5, occupied)
        .unwrap()
        .seat_ids()
        .map(|seat| seat.into_string())
        .collect();

    c.bench_function("toggle every seat on a 10x5 bus", |b| {
        b.iter(|| {
            let map = SeatMap::lettered(10, 5, occupied).unwrap();
            let mut selection = SeatSelection::new(map, 5000, 43).unwrap();
            selection.set_desired_seat_count(43);
            for seat in &seats {
                selection.toggle_seat(black_box(seat));
            }
            selection.set_desired_seat_count(black_box(10));
            black_box(selection.total_amount())
        })
    });
}

criterion_group!(benches, full_bus_walk);
criterion_main!(benches);
