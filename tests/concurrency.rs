//! Concurrent access to a single window store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tollgate::clock::{Clock, ManualClock};
use tollgate::ratelimit::{LimitDefinition, LimitRegistry, LimiterId, StoreSettings, WindowStore};

const LIMIT: u64 = 10;
const WINDOW: Duration = Duration::from_secs(10 * 60);
const WORKERS: usize = 10;
const REPETITIONS_PER_WORKER: usize = 50;

fn frozen_store() -> (Arc<WindowStore>, Arc<ManualClock>, LimiterId) {
    let start = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let limit = LimitDefinition::new(LIMIT, WINDOW).unwrap();
    let id = limit.id;
    let store = WindowStore::with_clock(
        LimitRegistry::new(vec![limit]),
        StoreSettings::default(),
        clock.clone(),
    );
    (Arc::new(store), clock, id)
}

/// Hammer `host` from half the workers and random hosts from the other half.
///
/// Returns (admitted, rejected retry-after values) for `host`.
async fn stress(store: &Arc<WindowStore>, id: LimiterId, host: &str) -> (usize, Vec<u64>) {
    let admitted = Arc::new(AtomicUsize::new(0));
    let mut tasks = Vec::new();

    for _ in 0..WORKERS {
        let worker_store = store.clone();
        let admitted = admitted.clone();
        let host = host.to_string();
        tasks.push(tokio::spawn(async move {
            let mut retries = Vec::new();
            for _ in 0..REPETITIONS_PER_WORKER {
                match worker_store.process_request(id, &host).unwrap() {
                    None => {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                    Some(retry_after) => retries.push(retry_after),
                }
                tokio::task::yield_now().await;
            }
            retries
        }));

        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..REPETITIONS_PER_WORKER {
                let random_host = uuid::Uuid::new_v4().to_string();
                assert_eq!(store.process_request(id, &random_host).unwrap(), None);
                tokio::task::yield_now().await;
            }
            Vec::new()
        }));
    }

    let retries: Vec<u64> = join_all(tasks)
        .await
        .into_iter()
        .flat_map(|result| result.unwrap())
        .collect();

    (admitted.load(Ordering::SeqCst), retries)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_limit_admitted_under_contention() {
    let (store, _clock, id) = frozen_store();

    let (admitted, retries) = stress(&store, id, "hostUnderTheTest").await;

    assert_eq!(admitted, LIMIT as usize);
    assert_eq!(retries.len(), WORKERS * REPETITIONS_PER_WORKER - LIMIT as usize);
    assert!(retries.iter().all(|retry| *retry == WINDOW.as_secs()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lockout_then_reset_then_lockout() {
    let (store, clock, id) = frozen_store();
    let host = "hostUnderTheTest";

    let (admitted, _) = stress(&store, id, host).await;
    assert_eq!(admitted, LIMIT as usize);
    assert_eq!(store.process_request(id, host).unwrap(), Some(WINDOW.as_secs()));

    clock.advance(WINDOW + Duration::from_secs(60));

    let (admitted, retries) = stress(&store, id, host).await;
    assert_eq!(admitted, LIMIT as usize);
    assert!(retries.iter().all(|retry| *retry == WINDOW.as_secs()));
    assert_eq!(store.process_request(id, host).unwrap(), Some(WINDOW.as_secs()));
}

#[test]
fn test_exactly_limit_admitted_across_threads() {
    let (store, _clock, id) = frozen_store();
    let admitted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            let admitted = admitted.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    if store.process_request(id, "shared").unwrap().is_none() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), LIMIT as usize);
    assert_eq!(store.remaining(id, "shared"), Some(LIMIT as i64 - 800));
}

#[test]
fn test_purge_races_decisions_without_disturbing_counts() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 20;
    const HOT_KEYS: usize = 4;
    const CALLS_PER_KEY: usize = 25;
    const COLD_KEYS_PER_THREAD: usize = 10;
    const MAX: u64 = 10;
    const SHORT_WINDOW: Duration = Duration::from_secs(2);

    let start = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let limit = LimitDefinition::new(MAX, SHORT_WINDOW).unwrap();
    let id = limit.id;
    let settings = StoreSettings {
        purge_hit_size: 10,
        purge_hit_duration: Duration::from_millis(1),
        ..StoreSettings::default()
    };
    let store = Arc::new(WindowStore::with_clock(
        LimitRegistry::new(vec![limit]),
        settings,
        clock.clone(),
    ));
    let hot_keys: Vec<String> = (0..HOT_KEYS).map(|i| format!("hot-{}", i)).collect();

    for round in 0..ROUNDS {
        let admitted: Arc<Vec<AtomicUsize>> =
            Arc::new((0..HOT_KEYS).map(|_| AtomicUsize::new(0)).collect());
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|thread| {
                let store = store.clone();
                let admitted = admitted.clone();
                let barrier = barrier.clone();
                let hot_keys = hot_keys.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    for call in 0..CALLS_PER_KEY {
                        for (index, key) in hot_keys.iter().enumerate() {
                            if store.process_request(id, key).unwrap().is_none() {
                                admitted[index].fetch_add(1, Ordering::SeqCst);
                            }
                        }
                        if call < COLD_KEYS_PER_THREAD {
                            let cold = format!("cold-{}-{}-{}", round, thread, call);
                            assert_eq!(store.process_request(id, &cold).unwrap(), None);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let calls = (THREADS * CALLS_PER_KEY) as i64;
        for (index, key) in hot_keys.iter().enumerate() {
            assert_eq!(admitted[index].load(Ordering::SeqCst), MAX as usize);
            assert_eq!(store.remaining(id, key), Some(MAX as i64 - calls));
        }
        assert!(store.len() <= HOT_KEYS + THREADS * COLD_KEYS_PER_THREAD);
        if round > 0 {
            // Records of the previous round were expired, so a sweep ran this round.
            assert_eq!(store.last_purge(), Some(clock.now()));
        }

        clock.advance(SHORT_WINDOW + Duration::from_secs(1));
    }
}
