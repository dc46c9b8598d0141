//! Stress run - readers against contended writers
//!
//! Spawns writer threads bumping a two-field snapshot through the contended
//! path while readers check every snapshot for tearing.
//!
//! RUST_LOG=venom_seqlock=debug cargo run --release --example stress

use bytemuck::NoUninit;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use venom_seqlock::SeqLock;

const WRITERS: usize = 2;
const READERS: usize = 4;
const RUN_FOR: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Default, NoUninit)]
#[repr(C)]
struct Snapshot {
    seq: u64,
    check: u64,
}

struct Stats {
    reads: AtomicU64,
    writes: AtomicU64,
    torn: AtomicU64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let lock = Arc::new(SeqLock::new(Snapshot::default()));
    let stats = Arc::new(Stats {
        reads: AtomicU64::new(0),
        writes: AtomicU64::new(0),
        torn: AtomicU64::new(0),
    });
    let stop = Arc::new(AtomicBool::new(false));
    let start = Arc::new(Barrier::new(WRITERS + READERS + 1));

    println!("═══════════════════════════════════════════════════════════════");
    println!("{} writers, {} readers, {:?}", WRITERS, READERS, RUN_FOR);
    println!("═══════════════════════════════════════════════════════════════");

    let mut handles = Vec::new();

    for _ in 0..WRITERS {
        let (lock, stats, stop, start) = (
            Arc::clone(&lock),
            Arc::clone(&stats),
            Arc::clone(&stop),
            Arc::clone(&start),
        );
        handles.push(thread::spawn(move || {
            start.wait();
            while !stop.load(Ordering::Relaxed) {
                lock.update(|s| {
                    s.seq += 1;
                    s.check = !s.seq;
                });
                stats.writes.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    for _ in 0..READERS {
        let (lock, stats, stop, start) = (
            Arc::clone(&lock),
            Arc::clone(&stats),
            Arc::clone(&stop),
            Arc::clone(&start),
        );
        handles.push(thread::spawn(move || {
            start.wait();
            while !stop.load(Ordering::Relaxed) {
                let s = lock.read();
                if s.check != !s.seq && s.seq != 0 {
                    stats.torn.fetch_add(1, Ordering::Relaxed);
                }
                stats.reads.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    start.wait();
    let began = Instant::now();
    thread::sleep(RUN_FOR);
    stop.store(true, Ordering::Relaxed);

    for h in handles {
        h.join().expect("worker panicked");
    }
    let elapsed = began.elapsed().as_secs_f64();

    let reads = stats.reads.load(Ordering::Relaxed);
    let writes = stats.writes.load(Ordering::Relaxed);
    let torn = stats.torn.load(Ordering::Relaxed);
    let last = lock.read();

    println!("reads:   {:>12} ({:.2} M/s)", reads, reads as f64 / elapsed / 1e6);
    println!("writes:  {:>12} ({:.2} M/s)", writes, writes as f64 / elapsed / 1e6);
    println!("torn:    {:>12}", torn);
    println!("version: {:>12}", lock.version());

    assert_eq!(torn, 0, "torn reads observed");
    assert_eq!(last.seq, writes, "lost or duplicated writes");
    println!("✅ OK");
}
