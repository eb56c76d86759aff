//! Benchmarks for the store path
//!
//! Tests the packet-arrival budget for:
//! - Queue append/pop cycles at the MTU limiter depth
//! - Loss-detector gap planning on the hot path
//! - Fragment coalescing of split AAC payloads
//!
//! Platform: Cross-platform (no codec library required, CI-safe)

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use airsink::plc::LossDetector;
use airsink::pool::FramePool;
use airsink::queue::PacketQueue;
use airsink::reorder::Coalescer;
use airsink::{CodecProfile, PacketHeader};

fn bench_queue_cycle(c: &mut Criterion) {
    let profile = CodecProfile::aac_lc();
    let mut group = c.benchmark_group("queue_cycle");
    group.throughput(Throughput::Elements(profile.mtu_limit as u64));

    group.bench_function("append_pop_full_depth", |b| {
        let pool = FramePool::new(profile.pool_frames);
        let mut queue = PacketQueue::new(profile.mtu_limit, profile.readbuf_size, pool.clone());
        let payload = vec![0xA5u8; 256];

        b.iter(|| {
            for seq in 0..profile.mtu_limit as u16 {
                let frame = pool
                    .alloc(PacketHeader::new(seq, u32::from(seq) * 1024), payload.clone())
                    .unwrap();
                queue.append(frame).unwrap();
            }
            while let Some(frame) = queue.pop_front() {
                pool.release(black_box(frame));
            }
        });
    });
    group.finish();
}

fn bench_gap_planning(c: &mut Criterion) {
    let detector = LossDetector::new(1024, None);
    let marker = {
        let pool = FramePool::new(4);
        let mut queue = PacketQueue::new(4, 900, pool.clone());
        let frame = pool.alloc(PacketHeader::new(100, 100 * 1024), vec![1; 64]).unwrap();
        queue.append(frame).unwrap();
        queue.marker()
    };

    c.bench_function("plc_plan_two_missing", |b| {
        let incoming = PacketHeader::new(103, 102 * 1024);
        b.iter(|| black_box(detector.plan(marker, black_box(&incoming), 5, 25)));
    });
}

fn bench_coalescing(c: &mut Criterion) {
    c.bench_function("coalesce_split_frame", |b| {
        let mut coalescer = Coalescer::new(900);
        let first = vec![0xFFu8; 400];
        let second = vec![0x01u8; 400];

        b.iter(|| {
            coalescer.push(PacketHeader::new(1, 1024), black_box(&first));
            black_box(coalescer.push(PacketHeader::new(2, 2048), black_box(&second)));
        });
    });
}

criterion_group!(benches, bench_queue_cycle, bench_gap_planning, bench_coalescing);
criterion_main!(benches);
