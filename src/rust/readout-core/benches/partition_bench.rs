// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use readout_common::ModuleId;
use readout_core::partition::tone_requests;
use readout_core::{ModuleMap, PartitionLimits, partition};
use std::hint::black_box;

fn nco_table() -> ModuleMap<f64> {
    [(1, 5e8), (2, 1.1e9), (3, 1.7e9), (4, 2.1e9)]
        .into_iter()
        .filter_map(|(m, f)| ModuleId::new(m).ok().map(|m| (m, f + 1e3)))
        .collect()
}

fn bench_partition(c: &mut Criterion) {
    let table = nco_table();
    let limits = PartitionLimits {
        bandwidth: 325e6,
        full_scale_dbm: 1.0,
        max_channels_per_module: 1024,
    };
    let mut group = c.benchmark_group("partition");
    for &size in &[64usize, 512, 2048] {
        // Spread evenly over the band covered by all modules.
        let frequencies: Vec<f64> = (0..size)
            .map(|i| 3e8 + 2e9 * i as f64 / size as f64)
            .collect();
        let requests = tone_requests(&frequencies, &vec![-20.0; size]).unwrap();
        group.bench_with_input(BenchmarkId::new("tones", size), &requests, |b, requests| {
            b.iter(|| black_box(partition(&table, requests, &limits).unwrap()));
        });
    }
    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let table = nco_table();
    let limits = PartitionLimits {
        bandwidth: 325e6,
        full_scale_dbm: 1.0,
        max_channels_per_module: 1024,
    };
    let frequencies: Vec<f64> = (0..2048).map(|i| 3e8 + 2e9 * i as f64 / 2048.0).collect();
    let requests = tone_requests(&frequencies, &vec![-20.0; 2048]).unwrap();
    let partition = partition(&table, &requests, &limits).unwrap();
    c.bench_function("merge_2048", |b| {
        b.iter(|| {
            let per_module: ModuleMap<Vec<usize>> = partition
                .modules()
                .iter()
                .map(|(m, channels)| (m, channels.iter().map(|c| c.channel).collect()))
                .collect();
            black_box(partition.merge(per_module).unwrap())
        });
    });
}

criterion_group!(benches, bench_partition, bench_merge);
criterion_main!(benches);
