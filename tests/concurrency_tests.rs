//! Concurrency Tests
//!
//! Exercises per-key atomicity and capacity bounds with many threads
//! sharing one store.

use std::sync::{Arc, Barrier};
use std::thread;

use mini_store::cache::{RejectAll, Store};
use mini_store::config::StoreConfig;
use mini_store::error::{AccessError, StoreError};

// == Helper Functions ==

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mini_store=warn".into()),
        )
        .with_test_writer()
        .try_init();
}

fn shared_store(capacity: Option<usize>, shards: usize) -> Arc<Store<u64, Vec<u64>>> {
    let mut builder = StoreConfig::builder().shards(shards);
    if let Some(capacity) = capacity {
        builder = builder.capacity(capacity);
    }
    Arc::new(Store::new(builder.build().unwrap()))
}

/// A value whose every element equals its writer id, so a torn write shows
/// up as mixed elements.
fn stamped(writer: u64) -> Vec<u64> {
    vec![writer; 64]
}

#[test]
fn concurrent_puts_on_one_key_never_tear() {
    init_tracing();
    let store = shared_store(None, 4);
    let writers = 8u64;
    let barrier = Arc::new(Barrier::new(writers as usize + 1));

    thread::scope(|scope| {
        for writer in 0..writers {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            scope.spawn(move || {
                barrier.wait();
                for _ in 0..500 {
                    store.put(7, stamped(writer)).unwrap();
                }
            });
        }

        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        scope.spawn(move || {
            barrier.wait();
            for _ in 0..2000 {
                if let Some(value) = store.get(&7).unwrap() {
                    let first = value[0];
                    assert!(first < writers);
                    assert!(value.iter().all(|v| *v == first), "torn value observed");
                }
            }
        });
    });

    let value = store.get(&7).unwrap().expect("key should be present");
    assert!(value.iter().all(|v| *v == value[0]));
    assert_eq!(store.len(), 1);
}

#[test]
fn concurrent_put_and_remove_leave_a_consistent_count() {
    init_tracing();
    let store = shared_store(None, 8);

    thread::scope(|scope| {
        for worker in 0..4u64 {
            let store = Arc::clone(&store);
            scope.spawn(move || {
                for i in 0..1000u64 {
                    let key = i % 50;
                    if (i + worker) % 3 == 0 {
                        store.remove(&key).unwrap();
                    } else {
                        store.put(key, stamped(worker)).unwrap();
                    }
                }
            });
        }
    });

    let live = (0..50u64)
        .filter(|key| store.contains_key(key).unwrap())
        .count();
    assert_eq!(store.len(), live);
}

#[test]
fn concurrent_inserts_respect_capacity() {
    init_tracing();
    let capacity = 32;
    let store = shared_store(Some(capacity), 8);

    thread::scope(|scope| {
        for worker in 0..8u64 {
            let store = Arc::clone(&store);
            scope.spawn(move || {
                for i in 0..500u64 {
                    store.put(worker * 10_000 + i, stamped(worker)).unwrap();
                }
            });
        }
    });

    assert!(
        store.len() <= capacity,
        "store holds {} entries, capacity is {}",
        store.len(),
        capacity
    );
}

#[test]
fn unevictable_store_keeps_every_entry() {
    init_tracing();
    let config = StoreConfig::<u64, Vec<u64>>::builder()
        .capacity(4)
        .advisor(RejectAll)
        .build()
        .unwrap();
    let store = Arc::new(Store::new(config));

    thread::scope(|scope| {
        for worker in 0..4u64 {
            let store = Arc::clone(&store);
            scope.spawn(move || {
                for i in 0..10u64 {
                    store.put(worker * 100 + i, stamped(worker)).unwrap();
                }
            });
        }
    });

    assert_eq!(store.len(), 40);
}

#[test]
fn remove_then_absent_under_contention() {
    init_tracing();
    let store = shared_store(None, 2);

    thread::scope(|scope| {
        for worker in 0..4u64 {
            let store = Arc::clone(&store);
            scope.spawn(move || {
                for i in 0..200u64 {
                    let key = worker * 1000 + i;
                    store.put(key, stamped(worker)).unwrap();
                    store.remove(&key).unwrap();
                    assert!(!store.contains_key(&key).unwrap());
                }
            });
        }
    });

    assert!(store.is_empty());
}

#[test]
fn puts_racing_close_leave_nothing_behind() {
    init_tracing();

    for _ in 0..20 {
        let store = shared_store(None, 4);
        let barrier = Arc::new(Barrier::new(5));

        thread::scope(|scope| {
            for worker in 0..4u64 {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                scope.spawn(move || {
                    barrier.wait();
                    for i in 0.. {
                        match store.put(worker * 100_000 + i, stamped(worker)) {
                            Ok(()) => {}
                            Err(StoreError::Access(AccessError::Closed)) => break,
                            Err(err) => panic!("unexpected error: {}", err),
                        }
                    }
                });
            }

            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            scope.spawn(move || {
                barrier.wait();
                thread::yield_now();
                store.close();
            });
        });

        assert!(store.is_closed());
        assert!(store.is_empty(), "{} entries survived close", store.len());
    }
}
