//! Ordering tests for the reducer/read drain loop
//!
//! Deterministic properties run on a single-threaded driver; the
//! multi-threaded tests only check mutual exclusion and lost-update freedom.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::Mutex;
use proptest::prelude::*;
use rstest::rstest;
use state_store::{impl_state, Store, StoreConfig};

#[derive(Clone, Debug, PartialEq)]
struct Ledger {
    total: i64,
    entries: Vec<i64>,
    loading: bool,
}

impl_state!(Ledger { total, entries, loading });

fn ledger() -> Ledger {
    Ledger { total: 0, entries: Vec::new(), loading: false }
}

#[derive(Debug, Clone)]
enum Op {
    Add(i64),
    Scale(i64),
    Reset,
}

impl Op {
    fn apply(&self, state: &Ledger) -> Ledger {
        let mut next = state.clone();
        match self {
            Op::Add(n) => next.total += n,
            Op::Scale(n) => next.total *= n,
            Op::Reset => next.total = 0,
        }
        next.entries.push(next.total);
        next
    }
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (-50i64..50).prop_map(Op::Add),
        (-3i64..4).prop_map(Op::Scale),
        Just(Op::Reset),
    ]
}

fn record(store: &Store<Ledger>) -> Arc<Mutex<Vec<Ledger>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    store.add_listener(move |s: &Ledger| sink.lock().push(s.clone()));
    seen
}

// ============================================================================
// Sequential fold
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The final state equals the left fold of all writes in submission order
    #[test]
    fn prop_final_state_is_sequential_fold(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let store = Store::new(ledger());

        for op in ops.clone() {
            store.write(move |s| op.apply(s));
        }

        let expected = ops.iter().fold(ledger(), |state, op| op.apply(&state));
        prop_assert_eq!(store.snapshot(), expected);
    }

    /// Every write that changes state produces exactly one notification
    #[test]
    fn prop_one_notification_per_change(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let store = Store::new(ledger());
        let seen = record(&store);

        // Submit the whole batch from inside a read so nothing drains in between
        let writer = store.clone();
        let batch = ops.clone();
        store.read(move |_| {
            for op in batch {
                writer.write(move |s| op.apply(s));
            }
        });

        let mut expected = Vec::new();
        let mut state = ledger();
        for op in &ops {
            let next = op.apply(&state);
            if next != state {
                expected.push(next.clone());
            }
            state = next;
        }
        prop_assert_eq!(&*seen.lock(), &expected);
    }

    /// Reads interleaved with writes observe exactly the writes queued before them
    #[test]
    fn prop_read_after_write(adds in prop::collection::vec(-20i64..20, 1..30)) {
        let store = Store::new(ledger());
        let mismatches = Arc::new(AtomicUsize::new(0));
        let mut running = 0i64;

        for n in adds {
            running += n;
            store.write(move |s| Ledger { total: s.total + n, ..s.clone() });
            let expected = running;
            let mismatches = Arc::clone(&mismatches);
            store.read(move |s| {
                if s.total != expected {
                    mismatches.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        prop_assert_eq!(mismatches.load(Ordering::SeqCst), 0);
    }
}

// ============================================================================
// Read-then-write guards
// ============================================================================

#[rstest]
#[case(2)]
#[case(5)]
#[case(20)]
fn test_guarded_load_runs_once(#[case] attempts: usize) {
    let store = Store::with_config(ledger(), StoreConfig::debug().with_name("ledger"));
    let seen = record(&store);
    let network_calls = Arc::new(AtomicUsize::new(0));

    let outer = store.clone();
    let calls = Arc::clone(&network_calls);
    store.read(move |_| {
        for _ in 0..attempts {
            let writer = outer.clone();
            let calls = Arc::clone(&calls);
            outer.read(move |s| {
                if s.loading {
                    return;
                }
                writer.write(|s| Ledger { loading: true, ..s.clone() });
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
    });

    assert_eq!(network_calls.load(Ordering::SeqCst), 1);
    assert_eq!(seen.lock().len(), 1);
    assert!(seen.lock()[0].loading);
}

#[test]
fn test_idempotent_writes_are_silent() {
    let store = Store::new(ledger());
    let seen = record(&store);

    for _ in 0..10 {
        store.write(|s| s.clone());
        store.write(|s| Ledger { loading: s.loading, ..s.clone() });
    }

    assert!(seen.lock().is_empty());
}

#[test]
fn test_disposed_store_is_inert() {
    let store = Store::new(ledger());
    let seen = record(&store);

    store.dispose();
    for n in 0..5 {
        store.write(move |s| Ledger { total: s.total + n, ..s.clone() });
        store.read(|_| panic!("reads must not run after dispose"));
    }
    store.dispose();

    assert!(seen.lock().is_empty());
    assert_eq!(store.pending(), (0, 0));
}

// ============================================================================
// Multi-threaded mutual exclusion
// ============================================================================

#[test]
fn test_concurrent_writes_are_not_lost() {
    const THREADS: usize = 8;
    const WRITES: i64 = 250;

    let store = Store::new(ledger());
    let seen = record(&store);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..WRITES {
                    store.write(|s| Ledger { total: s.total + 1, ..s.clone() });
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let expected = THREADS as i64 * WRITES;
    assert_eq!(store.snapshot().total, expected);

    // Notifications arrive in production order: 1, 2, ..., expected
    let totals: Vec<i64> = seen.lock().iter().map(|s| s.total).collect();
    assert_eq!(totals, (1..=expected).collect::<Vec<_>>());
}

#[test]
fn test_drains_never_overlap() {
    const THREADS: usize = 6;

    let store = Store::new(ledger());
    let inside = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = store.clone();
            let inside = Arc::clone(&inside);
            let overlaps = Arc::clone(&overlaps);
            thread::spawn(move || {
                for _ in 0..200 {
                    let inside_write = Arc::clone(&inside);
                    let overlaps_write = Arc::clone(&overlaps);
                    store.write(move |s| {
                        if inside_write.fetch_add(1, Ordering::SeqCst) != 0 {
                            overlaps_write.fetch_add(1, Ordering::SeqCst);
                        }
                        let next = Ledger { total: s.total + 1, ..s.clone() };
                        inside_write.fetch_sub(1, Ordering::SeqCst);
                        next
                    });

                    let inside_read = Arc::clone(&inside);
                    let overlaps_read = Arc::clone(&overlaps);
                    store.read(move |_| {
                        if inside_read.fetch_add(1, Ordering::SeqCst) != 0 {
                            overlaps_read.fetch_add(1, Ordering::SeqCst);
                        }
                        inside_read.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(store.snapshot().total, (THREADS * 200) as i64);
}

#[test]
fn test_caller_returns_after_its_read_ran() {
    let store = Store::new(ledger());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    let done = Arc::new(AtomicUsize::new(0));
                    let flag = Arc::clone(&done);
                    store.read(move |_| {
                        flag.fetch_add(1, Ordering::SeqCst);
                    });
                    assert_eq!(done.load(Ordering::SeqCst), 1);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}
