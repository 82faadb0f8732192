// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Performance benchmarks for CLAVIATURE
//!
//! Run with: cargo bench
//!
//! These benchmarks measure the realtime-path costs:
//! - staging table submit/drain cycles
//! - a full callback block with playback active
//! - key matrix updates

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use claviature::recording::record_pipeline;
use claviature::{
    note_feed, Engine, KeyMatrix, Outbox, OutputPort, TakeHandle, TimedEvent, Transport,
};

/// Port that accepts every reservation into a fixed scratch buffer.
struct NullPort {
    scratch: [u8; 3],
}

impl OutputPort for NullPort {
    fn reserve(&mut self, _frame: u32, len: usize) -> Option<&mut [u8]> {
        Some(&mut self.scratch[..len])
    }
}

/// Benchmark the staging table round trip (producer + consumer side)
fn bench_outbox_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("outbox");

    for capacity in [8usize, 16, 64].iter() {
        group.bench_with_input(
            BenchmarkId::new("submit_drain", capacity),
            capacity,
            |b, &capacity| {
                let outbox = Outbox::with_capacity(capacity);
                b.iter(|| {
                    for n in 0..capacity {
                        outbox.submit(0xB0, n as u8, black_box(64), 3);
                    }
                    let mut from = 0;
                    while let Some(i) = outbox.next_ready(from) {
                        black_box(outbox.drain(i));
                        from = i + 1;
                    }
                })
            },
        );
    }

    group.bench_function("coalesced_submit", |b| {
        let outbox = Outbox::with_capacity(16);
        outbox.submit(0xB0, 1, 64, 3);
        b.iter(|| black_box(outbox.submit(0xB0, 1, 64, 3)))
    });

    group.finish();
}

/// Benchmark one callback block with looped playback running
fn bench_playback_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("playback_block");

    for block in [64u32, 256, 1024].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(block), block, |b, &block| {
            let outbox = Arc::new(Outbox::new());
            let transport = Arc::new(Transport::new());
            let take = TakeHandle::new();
            let (recorder, consolidator) = record_pipeline(256, take.clone());
            let (tx, _rx) = note_feed(128);
            let mut engine = Engine::new(
                Arc::clone(&outbox),
                Arc::clone(&transport),
                take.clone(),
                recorder,
                tx,
            );

            // A dense take: one event due every four frames.
            let events: Vec<TimedEvent> = (0..64)
                .map(|n| TimedEvent::new(0x90, (n % 128) as u8, 100, 3, 4))
                .collect();
            take.replace(events);
            transport.begin_play();

            let mut port = NullPort { scratch: [0; 3] };
            b.iter(|| {
                engine.process_block(black_box(&[]), &mut port, block);
            });

            consolidator.stop();
        });
    }

    group.finish();
}

/// Benchmark key matrix updates (UI-side cost per note edge)
fn bench_key_matrix(c: &mut Criterion) {
    c.bench_function("key_matrix_set_clear", |b| {
        let mut matrix = KeyMatrix::new();
        b.iter(|| {
            for note in 0..128u8 {
                matrix.set(black_box(note), true);
            }
            black_box(matrix.count());
            matrix.clear();
        })
    });
}

criterion_group!(
    benches,
    bench_outbox_cycle,
    bench_playback_block,
    bench_key_matrix
);
criterion_main!(benches);
