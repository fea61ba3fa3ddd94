//! Benchmarks for feature extraction and template matching.
//!
//! Run with: cargo bench --bench matching

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gesture_bridge::pose::{
    extract_features, DetectedHand, HandFrame, Handedness, LandmarkPoint, LibraryOptions, PoseLibrary, LANDMARK_COUNT,
};
use gesture_bridge::store::MemoryStore;
use std::sync::Arc;

/// Open hand with a deterministic per-sample wobble
fn hand(seed: usize) -> Vec<LandmarkPoint> {
    (0..LANDMARK_COUNT)
        .map(|i| {
            let wobble = ((seed * 31 + i * 7) % 11) as f64 * 0.001;
            if i == 0 {
                LandmarkPoint::new(0.5 + wobble, 0.8, 0.0)
            } else {
                let finger = (i - 1) / 4;
                let segment = (i - 1) % 4;
                LandmarkPoint::new(
                    0.38 + finger as f64 * 0.06 + wobble,
                    0.7 - segment as f64 * 0.07 - wobble,
                    -0.01 * segment as f64,
                )
            }
        })
        .collect()
}

fn frame(seed: usize) -> HandFrame {
    HandFrame::analyze(DetectedHand {
        landmarks: hand(seed),
        handedness: Handedness::Right,
        score: 0.95,
    })
}

fn bench_extract_features(c: &mut Criterion) {
    let landmarks = hand(3);
    c.bench_function("extract_features", |b| b.iter(|| extract_features(black_box(&landmarks))));
}

fn bench_match_hand(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_hand");

    for samples_per_slot in [1usize, 8, 24] {
        let mut library = PoseLibrary::new(
            LibraryOptions {
                max_samples_per_slot: samples_per_slot,
                ..LibraryOptions::default()
            },
            Arc::new(MemoryStore::new()),
            None,
        );
        for slot in 0..3 {
            for n in 0..samples_per_slot {
                let _ = library.capture_at(slot, &frame(slot * 100 + n), None);
            }
        }

        let query = frame(7).feature;
        group.bench_with_input(BenchmarkId::from_parameter(samples_per_slot), &query, |b, query| {
            b.iter(|| library.match_hand(black_box(query)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_extract_features, bench_match_hand);
criterion_main!(benches);
