//! Multi-threaded behavior of the writer and reader protocols

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use venom_seqlock::{ExponentialBackoff, RawSeqLock, SeqLock};

const READERS: usize = 4;

/// Two fields a writer always sets to the same value
#[derive(Default)]
struct Pair {
    lock: RawSeqLock,
    a: AtomicU64,
    b: AtomicU64,
}

impl Pair {
    fn load(&self) -> (u64, u64) {
        self.lock
            .read(|| (self.a.load(Ordering::Relaxed), self.b.load(Ordering::Relaxed)))
    }
}

/// Counter mutated with plain loads/stores, serialized only by the seqlock
struct Counter {
    lock: RawSeqLock,
    value: UnsafeCell<u64>,
}

// SAFETY: `value` is only touched while holding the write lock
unsafe impl Sync for Counter {}

#[test]
fn single_writer_never_tears() {
    let pair = Arc::new(Pair::default());
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let pair = Arc::clone(&pair);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last = 0u64;
                let mut reads = 0u64;
                while !done.load(Ordering::Relaxed) || reads == 0 {
                    let (a, b) = pair.load();
                    assert_eq!(a, b, "torn read");
                    assert!(a >= last);
                    last = a;
                    reads += 1;
                }
            })
        })
        .collect();

    for i in 1..=20_000u64 {
        let _guard = pair.lock.write_lock_exclusive();
        pair.a.store(i, Ordering::Relaxed);
        pair.b.store(i, Ordering::Relaxed);
    }
    done.store(true, Ordering::Relaxed);

    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(pair.load(), (20_000, 20_000));
    assert_eq!(pair.lock.version(), 40_000);
}

#[test]
fn typed_lock_never_tears() {
    let lock = Arc::new(SeqLock::new([0u64; 8]));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    let data = lock.read();
                    assert!(data.iter().all(|&v| v == data[0]), "torn read: {:?}", data);
                }
            })
        })
        .collect();

    for i in 1..=20_000u64 {
        // SAFETY: this thread is the only writer
        unsafe { lock.write_exclusive([i; 8]) };
    }
    done.store(true, Ordering::Relaxed);

    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(lock.read(), [20_000; 8]);
}

#[test]
fn contended_writers_lose_no_updates() {
    const WRITERS: usize = 4;
    const SESSIONS: u64 = 10_000;

    let counter = Arc::new(Counter {
        lock: RawSeqLock::new(),
        value: UnsafeCell::new(0),
    });
    let start = Arc::new(Barrier::new(WRITERS));

    let writers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let counter = Arc::clone(&counter);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..SESSIONS {
                    let _guard = counter.lock.write_lock_spin();
                    // SAFETY: write lock held
                    unsafe { *counter.value.get() += 1 };
                }
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }

    let total = WRITERS as u64 * SESSIONS;
    assert_eq!(unsafe { *counter.value.get() }, total);
    assert_eq!(counter.lock.version() as u64, 2 * total);
}

#[test]
fn typed_contended_updates() {
    const WRITERS: usize = 4;
    const SESSIONS: u64 = 5_000;

    let lock = Arc::new(SeqLock::new(0u64));

    let writers: Vec<_> = (0..WRITERS)
        .map(|i| {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                for _ in 0..SESSIONS {
                    if i % 2 == 0 {
                        lock.update(|v| *v += 1);
                    } else {
                        let mut guard = lock.lock_with(ExponentialBackoff::new());
                        guard.update(|v| *v += 1);
                    }
                }
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    assert_eq!(lock.read(), WRITERS as u64 * SESSIONS);
}

#[test]
fn writer_sessions_are_totally_ordered() {
    const WRITERS: usize = 4;
    const SESSIONS: usize = 2_000;

    let lock = Arc::new(RawSeqLock::new());

    let writers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let mut seen = Vec::with_capacity(SESSIONS);
                for _ in 0..SESSIONS {
                    let guard = lock.write_lock_spin();
                    seen.push(guard.version());
                    guard.write_unlock();
                }
                seen
            })
        })
        .collect();

    let mut versions: Vec<usize> = writers
        .into_iter()
        .flat_map(|w| w.join().unwrap())
        .collect();
    versions.sort_unstable();

    // every session got its own odd value, each one past the previous release
    let expected: Vec<usize> = (0..WRITERS * SESSIONS).map(|k| 2 * k + 1).collect();
    assert_eq!(versions, expected);
}

#[test]
fn counter_increases_after_every_unlock() {
    let lock = RawSeqLock::new();
    let mut last = lock.version();

    for i in 0..100 {
        let guard = if i % 2 == 0 {
            lock.write_lock_exclusive()
        } else {
            lock.write_lock_spin()
        };
        guard.write_unlock();

        let now = lock.version();
        assert!(now > last);
        assert_eq!(now % 2, 0);
        last = now;
    }
}

#[test]
fn reader_retries_bounded_by_overlapping_writes() {
    const SESSIONS: u64 = 5_000;

    let pair = Arc::new(Pair::default());

    let writer = {
        let pair = Arc::clone(&pair);
        thread::spawn(move || {
            for i in 1..=SESSIONS {
                let _guard = pair.lock.write_lock_spin();
                pair.a.store(i, Ordering::Relaxed);
                pair.b.store(i, Ordering::Relaxed);
            }
        })
    };

    while !writer.is_finished() {
        let before = pair.lock.version();
        let mut runs = 0usize;
        let (a, b) = pair.lock.read(|| {
            runs += 1;
            (pair.a.load(Ordering::Relaxed), pair.b.load(Ordering::Relaxed))
        });
        let after = pair.lock.version();

        assert_eq!(a, b);
        // each failed run consumed at least one writer session
        assert!(runs <= (after - before) / 2 + 1, "runs={} before={} after={}", runs, before, after);
    }

    writer.join().unwrap();

    // no writers left: clean on the first attempt
    let (_, attempts) = pair.lock.read_counted(|| pair.a.load(Ordering::Relaxed));
    assert_eq!(attempts, 1);
}

#[test]
fn failed_attempts_leave_no_effects() {
    const WIDTH: usize = 8;

    struct Row {
        lock: RawSeqLock,
        cells: [AtomicU64; WIDTH],
    }

    let row = Arc::new(Row {
        lock: RawSeqLock::new(),
        cells: Default::default(),
    });
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let row = Arc::clone(&row);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut i = 0u64;
            while !done.load(Ordering::Relaxed) {
                i += 1;
                let _guard = row.lock.write_lock_spin();
                for cell in &row.cells {
                    cell.store(i, Ordering::Relaxed);
                }
            }
        })
    };

    let mut total_runs = 0usize;
    for _ in 0..2_000 {
        let mut collected = Vec::with_capacity(WIDTH);
        let len = row.lock.read(|| {
            // reset local state: only the clean attempt may count
            collected.clear();
            collected.extend(row.cells.iter().map(|c| c.load(Ordering::Relaxed)));
            total_runs += 1;
            collected.len()
        });

        assert_eq!(len, WIDTH);
        assert_eq!(collected.len(), WIDTH);
        assert!(collected.iter().all(|&v| v == collected[0]));
    }

    done.store(true, Ordering::Relaxed);
    writer.join().unwrap();
    assert!(total_runs >= 2_000);
}

#[test]
fn reader_waits_out_active_writer() {
    // lock=1 (writer mid-session): the reader must not accept until 2
    let pair = Arc::new(Pair::default());
    let guard_taken = Arc::new(Barrier::new(2));

    let guard = pair.lock.write_lock_exclusive();
    assert_eq!(pair.lock.version(), 1);

    let reader = {
        let pair = Arc::clone(&pair);
        let guard_taken = Arc::clone(&guard_taken);
        thread::spawn(move || {
            guard_taken.wait();
            let mut runs = 0;
            let (value, attempts) = pair.lock.read_counted(|| {
                runs += 1;
                (pair.a.load(Ordering::Relaxed), pair.b.load(Ordering::Relaxed))
            });
            (value, attempts, runs)
        })
    };

    guard_taken.wait();
    thread::sleep(Duration::from_millis(20));
    pair.a.store(5, Ordering::Relaxed);
    pair.b.store(5, Ordering::Relaxed);
    drop(guard);
    assert_eq!(pair.lock.version(), 2);

    let (value, attempts, runs) = reader.join().unwrap();
    assert_eq!(value, (5, 5));
    assert!(attempts >= 2);
    // body never ran while the odd value was visible
    assert_eq!(runs, 1);
}
