//! Benchmarks for the per-file feature fold.
//!
//! Performance budgets:
//! - Parse + fold 10k rows x 20 attribute columns: **< 50ms**
//! - Fold pre-parsed 10k rows into a warm store: **< 20ms**

use chrono::NaiveDate;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use disklife_core::aggregate::AggregationEngine;
use disklife_core::config::FeatureConfig;
use disklife_core::snapshot::{AttributeKey, AttributeNaming, SnapshotReader, SnapshotRow};
use std::fmt::Write;
use std::hint::black_box;

const ATTRIBUTE_INDICES: [u8; 10] = [1, 3, 4, 5, 7, 9, 10, 12, 194, 197];

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, d).unwrap_or_default()
}

fn snapshot_text(drives: usize) -> String {
    let mut text = String::from("date,serial_number,model,capacity_bytes,failure");
    for idx in ATTRIBUTE_INDICES {
        let _ = write!(text, ",smart_{idx}_normalized,smart_{idx}_raw");
    }
    text.push('\n');
    for n in 0..drives {
        let _ = write!(text, "2020-01-02,SN{n:08},MODEL{},4000787030016,0", n % 7);
        for idx in ATTRIBUTE_INDICES {
            let _ = write!(text, ",{},{}", 100 - (idx % 50), n * usize::from(idx));
        }
        text.push('\n');
    }
    text
}

fn rows(drives: usize, d: u32) -> Vec<SnapshotRow> {
    (0..drives)
        .map(|n| SnapshotRow {
            date: day(d),
            serial_number: format!("SN{n:08}"),
            model: format!("MODEL{}", n % 7),
            capacity_bytes: 4_000_787_030_016,
            failure: false,
            attributes: ATTRIBUTE_INDICES
                .iter()
                .map(|idx| (AttributeKey::raw(*idx), (n * usize::from(*idx)) as f64))
                .collect(),
        })
        .collect()
}

fn columns() -> Vec<AttributeKey> {
    ATTRIBUTE_INDICES
        .iter()
        .flat_map(|idx| [AttributeKey::normalized(*idx), AttributeKey::raw(*idx)])
        .collect()
}

fn warm_engine(drives: usize) -> AggregationEngine {
    let mut engine = AggregationEngine::new(&FeatureConfig::default());
    let _ = engine.fold_rows(day(1), &columns(), rows(drives, 1).into_iter().map(Ok), false);
    engine
}

fn bench_parse_and_fold(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate_parse_and_fold");
    let naming = AttributeNaming::default();
    for drives in [1_000usize, 10_000] {
        let text = snapshot_text(drives);
        group.throughput(Throughput::Elements(drives as u64));
        group.bench_with_input(BenchmarkId::from_parameter(drives), &text, |b, text| {
            b.iter_batched(
                || warm_engine(drives),
                |mut engine| {
                    let reader =
                        SnapshotReader::from_reader("bench.csv", day(2), text.as_bytes(), &naming);
                    if let Ok(reader) = reader {
                        black_box(engine.fold_reader(reader, false).ok());
                    }
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_fold_rows(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate_fold_rows");
    let columns = columns();
    for drives in [1_000usize, 10_000] {
        let input = rows(drives, 2);
        group.throughput(Throughput::Elements(drives as u64));
        group.bench_with_input(BenchmarkId::from_parameter(drives), &input, |b, input| {
            b.iter_batched(
                || (warm_engine(drives), input.clone()),
                |(mut engine, input)| {
                    black_box(
                        engine
                            .fold_rows(day(2), &columns, input.into_iter().map(Ok), false)
                            .ok(),
                    );
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse_and_fold, bench_fold_rows);
criterion_main!(benches);
