//! Integration tests for the search cache layer.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use trackhound_core::{ManualClock, ResultDescriptor, SearchCache, Store};

async fn setup_cache(auto_cleanup: bool) -> (SearchCache, Store, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_at(Duration::from_secs(1_700_000_000)));
    let store = Store::open_in_memory(clock.clone()).await.unwrap();
    let cache = SearchCache::new(store.clone(), Duration::from_secs(24 * 3600), auto_cleanup);
    (cache, store, clock)
}

fn results() -> Vec<ResultDescriptor> {
    vec![ResultDescriptor {
        username: "peer".to_string(),
        filename: "Teardrop.flac".to_string(),
        size: 25_000_000,
        bit_rate: None,
        bit_depth: Some(24),
        sample_rate: Some(96_000),
    }]
}

#[tokio::test]
async fn test_one_hour_entry_expires_before_two_hour_entry() {
    let (cache, _store, clock) = setup_cache(false).await;
    assert!(
        cache
            .save_results("one hour", &results(), Some(Duration::from_secs(3600)))
            .await
    );
    assert!(
        cache
            .save_results("two hours", &results(), Some(Duration::from_secs(7200)))
            .await
    );

    clock.advance(Duration::from_secs(3601));
    assert!(cache.get_cached_results("one hour").await.is_none());
    assert_eq!(cache.get_cached_results("two hours").await, Some(results()));

    clock.advance(Duration::from_secs(3600));
    assert!(cache.get_cached_results("two hours").await.is_none());
}

#[tokio::test]
async fn test_empty_results_are_not_cached() {
    let (cache, store, _clock) = setup_cache(false).await;
    assert!(!cache.save_results("nothing", &[], None).await);
    assert!(cache.get_cached_results("nothing").await.is_none());
    assert_eq!(store.cache_entry_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_lookup_ignores_case_and_spacing() {
    let (cache, _store, _clock) = setup_cache(false).await;
    cache
        .save_results("Massive Attack Teardrop", &results(), None)
        .await;
    assert_eq!(
        cache.get_cached_results("  massive   ATTACK teardrop ").await,
        Some(results())
    );
}

#[tokio::test]
async fn test_search_with_cache_runs_search_once() {
    let (cache, _store, _clock) = setup_cache(false).await;
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let found: Result<Vec<ResultDescriptor>, String> = cache
            .search_with_cache("Teardrop", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(results())
            })
            .await;
        assert_eq!(found.unwrap(), results());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_search_with_cache_does_not_cache_errors_or_empty() {
    let (cache, _store, _clock) = setup_cache(false).await;
    let calls = AtomicUsize::new(0);

    let failed: Result<Vec<ResultDescriptor>, String> = cache
        .search_with_cache("q", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("offline".to_string())
        })
        .await;
    assert!(failed.is_err());

    for _ in 0..2 {
        let empty: Result<Vec<ResultDescriptor>, String> = cache
            .search_with_cache("q", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            })
            .await;
        assert!(empty.unwrap().is_empty());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_auto_cleanup_sweeps_on_read() {
    let (cache, store, clock) = setup_cache(true).await;
    cache
        .save_results("stale", &results(), Some(Duration::from_secs(10)))
        .await;
    cache
        .save_results("fresh", &results(), Some(Duration::from_secs(1000)))
        .await;
    clock.advance(Duration::from_secs(11));

    assert!(cache.get_cached_results("fresh").await.is_some());
    assert_eq!(store.cache_entry_count().await.unwrap(), 1);
}
