mod common;

use common::*;
use ferry_core::store_path::StorePath;
use ferry_push::{Concurrency, PushError, push_closure};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

fn input(path: &StorePath) -> PathBuf {
    PathBuf::from(path.to_path_string())
}

fn recording_factory(log: EventLog) -> Arc<impl Fn(&StorePath) -> RecordingStrategy + Send + Sync> {
    Arc::new(move |path: &StorePath| RecordingStrategy::for_path(path, &log))
}

#[tokio::test]
async fn closure_with_one_present_path_uploads_exactly_two() {
    let api = MockCacheApi::new();
    let store = MockStore::new();
    let foo = store_path('a', "foo");
    let bar = store_path('b', "bar");
    let baz = store_path('c', "baz");
    store.add(&bar, b"bar", &[], None);
    store.add(&baz, b"baz", &[bar.clone()], None);
    store.add(&foo, b"foo", &[bar.clone(), baz.clone()], None);
    api.mark_present(&bar);
    let ctx = context(api.clone(), store.clone(), cache());
    let log = EventLog::new();

    let report = push_closure(
        &ctx,
        Concurrency::bounded(4),
        recording_factory(log.clone()),
        &[input(&foo)],
    )
    .await
    .unwrap();

    assert_eq!(api.bulk_calls.load(Ordering::SeqCst), 1);
    assert_eq!(api.head_calls.load(Ordering::SeqCst), 0);
    assert_eq!(api.upload_count(), 2);
    assert_eq!(report.uploaded(), 2);
    assert!(report.is_success());
    assert_eq!(report.already_present, vec![bar.clone()]);
    assert_eq!(log.events_for(&bar.basename()), vec![Event::AlreadyPresent]);
    assert_eq!(
        api.uploaded_hashes(),
        BTreeSet::from([foo.hash().to_string(), baz.hash().to_string()])
    );
}

#[tokio::test]
async fn results_match_missing_set_exactly() {
    let api = MockCacheApi::new();
    let store = MockStore::new();
    let chars = ['a', 'b', 'c', 'd', 'f', 'g', 'h', 'i', 'j', 'k'];
    let paths: Vec<StorePath> = chars
        .iter()
        .enumerate()
        .map(|(i, c)| store_path(*c, &format!("pkg-{i}")))
        .collect();
    for (i, path) in paths.iter().enumerate() {
        // Each path depends on the next two, forming a shared-dependency chain.
        let refs: Vec<StorePath> = paths.iter().skip(i + 1).take(2).cloned().collect();
        store.add(path, format!("content-{i}").as_bytes(), &refs, None);
    }
    for path in paths.iter().step_by(3) {
        api.mark_present(path);
    }
    let ctx = context(api.clone(), store.clone(), cache());
    let log = EventLog::new();

    let report = push_closure(
        &ctx,
        Concurrency::bounded(3),
        recording_factory(log.clone()),
        &[input(&paths[0]), input(&paths[1])],
    )
    .await
    .unwrap();

    let expected_missing: BTreeSet<StorePath> = paths
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 3 != 0)
        .map(|(_, p)| p.clone())
        .collect();
    let reported: Vec<StorePath> = report.results.iter().map(|(p, _)| p.clone()).collect();
    let reported_set: BTreeSet<StorePath> = reported.iter().cloned().collect();

    assert_eq!(reported.len(), reported_set.len(), "duplicate results");
    assert_eq!(reported_set, expected_missing);
    assert_eq!(api.upload_count(), expected_missing.len());
    assert_eq!(log.count(|e| *e == Event::Done), expected_missing.len());
    assert_eq!(report.already_present.len(), paths.len() - expected_missing.len());
}

#[tokio::test]
async fn failing_path_does_not_cancel_siblings() {
    let api = MockCacheApi::new();
    let store = MockStore::new();
    let foo = store_path('a', "foo");
    let bar = store_path('b', "bar");
    let baz = store_path('c', "baz");
    store.add(&bar, b"bar", &[], None);
    store.add(&baz, b"baz", &[], None);
    store.add(&foo, b"foo", &[bar.clone(), baz.clone()], None);
    store.corrupt_recorded_hash(&bar);
    let ctx = context(api.clone(), store.clone(), cache());
    let log = EventLog::new();

    let report = push_closure(
        &ctx,
        Concurrency::Unbounded,
        recording_factory(log.clone()),
        &[input(&foo)],
    )
    .await
    .unwrap();

    assert_eq!(report.results.len(), 3);
    assert!(!report.is_success());
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, &bar);
    assert!(matches!(failures[0].1, PushError::HashMismatch { .. }));
    assert_eq!(report.uploaded(), 2);
    assert!(api.narinfo_for(&bar).is_none());
    assert!(api.narinfo_for(&foo).is_some());
}

#[tokio::test]
async fn fully_cached_closure_uploads_nothing() {
    let api = MockCacheApi::new();
    let store = MockStore::new();
    let foo = store_path('a', "foo");
    store.add(&foo, b"foo", &[], None);
    api.mark_present(&foo);
    let ctx = context(api.clone(), store.clone(), cache());
    let log = EventLog::new();

    let report = push_closure(
        &ctx,
        Concurrency::Sequential,
        recording_factory(log.clone()),
        &[input(&foo)],
    )
    .await
    .unwrap();

    assert!(report.results.is_empty());
    assert_eq!(report.already_present, vec![foo.clone()]);
    assert_eq!(api.upload_count(), 0);
    assert_eq!(store.dumps.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_input_skips_the_bulk_probe() {
    let api = MockCacheApi::new();
    let store = MockStore::new();
    let ctx = context(api.clone(), store.clone(), cache());

    let report = push_closure(
        &ctx,
        Concurrency::default(),
        recording_factory(EventLog::new()),
        &[],
    )
    .await
    .unwrap();

    assert!(report.results.is_empty());
    assert_eq!(api.bulk_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn uploads_use_each_paths_own_strategy() {
    let api = MockCacheApi::new();
    let store = MockStore::new();
    let foo = store_path('a', "foo");
    let bar = store_path('b', "bar");
    store.add(&bar, b"bar", &[], None);
    store.add(&foo, b"foo", &[bar.clone()], None);
    let ctx = context(api.clone(), store.clone(), cache());
    let log = EventLog::new();

    push_closure(
        &ctx,
        Concurrency::bounded(2),
        recording_factory(log.clone()),
        &[input(&foo)],
    )
    .await
    .unwrap();

    for path in [&foo, &bar] {
        let events = log.events_for(&path.basename());
        assert_eq!(events.len(), 2, "{path}: {events:?}");
        assert!(matches!(events[0], Event::Attempt { attempt: 1, .. }));
        assert_eq!(events[1], Event::Done);
    }
    assert_eq!(api.narinfos.lock().unwrap().len(), 2);
}
