//! Benchmark for EventSeries stabbing and range queries.
//!
//! Checks that the seam index keeps point queries cheap as the series
//! grows, compared with the cost of building the series in the first
//! place.

use audio_features::{Event, EventSeries};
use std::time::Instant;

fn build_series(events: usize) -> EventSeries {
    let mut series = EventSeries::new();
    for i in 0..events {
        let frame = (i as i64 * 37) % 1_000_000;
        if i % 3 == 0 {
            series.add(Event::new(frame));
        } else {
            series.add(Event::new(frame).with_duration(400 + (i as i64 % 5) * 250));
        }
    }
    series
}

fn bench_queries(series: &EventSeries, label: &str) {
    let queries = 10_000;

    let start = Instant::now();
    let mut hits = 0usize;
    for q in 0..queries {
        let frame = (q as i64 * 101) % 1_000_000;
        hits += series.events_covering(frame).len();
    }
    let covering = start.elapsed();

    let start = Instant::now();
    let mut spanned = 0usize;
    for q in 0..queries / 10 {
        let frame = (q as i64 * 977) % 1_000_000;
        spanned += series.events_spanning(frame, 5_000).len();
    }
    let spanning = start.elapsed();

    println!(
        "{label}: {queries} covering queries in {:.2?} ({hits} hits), {} spanning queries in {:.2?} ({spanned} hits)",
        covering,
        queries / 10,
        spanning
    );
}

fn main() {
    for &events in &[1_000usize, 10_000, 100_000] {
        let start = Instant::now();
        let series = build_series(events);
        let built = start.elapsed();
        println!("built series of {events} events in {built:.2?}");
        bench_queries(&series, &format!("{events} events"));
    }
}
