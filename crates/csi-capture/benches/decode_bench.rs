//! Decoding benchmarks
//!
//! Run with: cargo bench --package csi-capture

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use csi_capture::bits::{BitReader, BitWriter};
use csi_capture::decoder::intel::csi_byte_len;
use csi_capture::prelude::*;

/// Bit stream of `samples` signed values of `width` bits.
fn packed_samples(samples: usize, width: u32) -> Vec<u8> {
    let mut writer = BitWriter::new();
    let half = 1i32 << (width - 1);
    for i in 0..samples {
        writer.push((i as i32 * 37) % half - half / 2, width);
    }
    writer.finish()
}

/// Intel capture of `records` 3x3 beamforming records.
fn intel_capture(records: usize) -> Vec<u8> {
    let csi_len = csi_byte_len(3, 3);
    let mut data = Vec::new();
    for i in 0..records {
        let mut body = Vec::with_capacity(20 + csi_len);
        body.extend_from_slice(&(i as u32).to_le_bytes());
        body.extend_from_slice(&(i as u16).to_le_bytes());
        body.extend_from_slice(&[0, 0]);
        body.extend_from_slice(&[3, 3, 40, 42, 39, (-92i8) as u8, 30, 0b10_01_00]);
        body.extend_from_slice(&(csi_len as u16).to_le_bytes());
        body.extend_from_slice(&0x4101u16.to_le_bytes());
        body.extend((0..csi_len).map(|k| (k * 7 + i) as u8));

        data.extend_from_slice(&((body.len() + 1) as u16).to_be_bytes());
        data.push(0xbb);
        data.extend(body);
    }
    data
}

/// Benchmark raw signed bit extraction
fn bench_bit_reader(c: &mut Criterion) {
    let mut group = c.benchmark_group("Bit Reader");
    group.measurement_time(Duration::from_secs(5));

    for &width in &[8u32, 10] {
        let samples = 30 * 9 * 2 * 64;
        let data = packed_samples(samples, width);

        group.throughput(Throughput::Elements(samples as u64));
        group.bench_with_input(BenchmarkId::new("read_signed", width), &data, |b, data| {
            b.iter(|| {
                let mut reader = BitReader::new(black_box(data));
                let mut acc = 0i64;
                for _ in 0..samples {
                    acc += i64::from(reader.read_signed(width).unwrap());
                }
                acc
            });
        });
    }

    group.finish();
}

/// Benchmark a full Intel bulk read
fn bench_intel_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("Intel Bulk Read");
    group.measurement_time(Duration::from_secs(5));

    for &records in &[100usize, 1_000, 10_000] {
        let data = intel_capture(records);
        let config = SessionConfig::new(DeviceConfig::Intel(IntelConfig {
            nrxnum: 3,
            ntxnum: 3,
            payload_slot: 0,
        }));

        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::new("read", records), &data, |b, data| {
            b.iter(|| {
                let mut session = ParseSession::new(config.clone()).unwrap();
                session.read(black_box(data)).unwrap()
            });
        });
    }

    group.finish();
}

/// Benchmark scaling plus spatial-mapping removal over a decoded capture
fn bench_intel_scale(c: &mut Criterion) {
    let mut group = c.benchmark_group("Intel Scaling");
    let data = intel_capture(1_000);
    let config = SessionConfig::new(DeviceConfig::Intel(IntelConfig {
        nrxnum: 3,
        ntxnum: 3,
        payload_slot: 0,
    }));
    let mut decoded = ParseSession::new(config).unwrap();
    decoded.read(&data).unwrap();

    group.throughput(Throughput::Elements(decoded.len() as u64));
    group.bench_function("scale_in_place_sm", |b| {
        b.iter_batched(
            || decoded.clone(),
            |mut session| session.scale_in_place(true).unwrap(),
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_bit_reader, bench_intel_read, bench_intel_scale);
criterion_main!(benches);
