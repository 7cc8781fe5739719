//! End-to-end orchestrator behavior over real stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use stash_cache::{Memo, MemoBuilder};
use stash_core::{
    computation, Args, ComputationDescriptor, ComputationFingerprint, NumericArray, StashResult,
    SupportedContentType,
};
use stash_storage::{Collection, FeedStore};
use stash_test_utils::{assertions, fixtures, init_tracing, CallCounter};
use url::Url;

fn make_bigger(store: Arc<dyn FeedStore>, counter: CallCounter) -> Memo<Map<String, Value>> {
    let (descriptor, body) = computation!("make_bigger", move |args: &Args| -> StashResult<Map<String, Value>> {
        counter.tick();
        let input = args
            .get(0)
            .and_then(|v| v.as_json())
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let mut out = input.clone();
        for (name, value) in &input {
            if let Some(n) = value.as_i64() {
                out.insert(format!("{}_bigger", name), json!(n * 10));
            }
        }
        Ok(out)
    });
    MemoBuilder::json(descriptor, store, body)
        .build()
        .expect("build should succeed")
}

#[test]
fn test_make_bigger_computes_once() {
    init_tracing();
    let temp = fixtures::temp_store();
    let counter = CallCounter::new();
    let memo = make_bigger(temp.shared(), counter.clone());
    let args = Args::new().arg(json!({"a": 10, "b": 3}));

    let expected = json!({"a": 10, "b": 3, "a_bigger": 100, "b_bigger": 30});
    let first = memo.call(&args).expect("first call");
    assert_eq!(Value::Object(first), expected);
    let second = memo.call(&args).expect("second call");
    assert_eq!(Value::Object(second), expected);
    assert_eq!(counter.count(), 1);
}

#[test]
fn test_value_equal_arguments_hit_the_same_entry() {
    let temp = fixtures::temp_store();
    let counter = CallCounter::new();
    let memo = make_bigger(temp.shared(), counter.clone());

    let built_one_way: Value = serde_json::from_str(r#"{"b": 3, "a": 10}"#).expect("parse");
    memo.call(&Args::new().arg(json!({"a": 10, "b": 3})))
        .expect("call");
    memo.call(&Args::new().arg(built_one_way)).expect("call");
    assert_eq!(counter.count(), 1);
    assert_eq!(memo.iter_keys().expect("keys").count(), 1);
}

#[test]
fn test_read_hook_runs_once_per_hit() {
    let temp = fixtures::temp_store();
    let reads = Arc::new(AtomicUsize::new(0));
    let hook_reads = Arc::clone(&reads);
    let counter = CallCounter::new();
    let body_counter = counter.clone();
    let memo = MemoBuilder::json(
        ComputationDescriptor::new("hooked", "|_| 42"),
        temp.shared(),
        move |_: &Args| {
            body_counter.tick();
            Ok(42i64)
        },
    )
    .with_read_hook(move |_: &i64| {
        hook_reads.fetch_add(1, Ordering::SeqCst);
    })
    .build()
    .expect("build should succeed");

    assert_eq!(memo.call(&Args::new()).expect("call"), 42);
    let after_first = reads.load(Ordering::SeqCst);
    assert_eq!(memo.call(&Args::new()).expect("call"), 42);
    assert_eq!(reads.load(Ordering::SeqCst), after_first + 1);
    assert_eq!(counter.count(), 1);
}

#[test]
fn test_two_memos_sharing_a_store_are_segregated() {
    let temp = fixtures::temp_store();
    let square = MemoBuilder::json(
        ComputationDescriptor::new("square", "|n| n * n"),
        temp.shared(),
        |args: &Args| Ok(args.get(0).and_then(|v| v.as_json()).and_then(Value::as_i64).unwrap_or(0).pow(2)),
    )
    .build()
    .expect("build should succeed");
    let negate = MemoBuilder::json(
        ComputationDescriptor::new("negate", "|n| -n"),
        temp.shared(),
        |args: &Args| Ok(-args.get(0).and_then(|v| v.as_json()).and_then(Value::as_i64).unwrap_or(0)),
    )
    .build()
    .expect("build should succeed");

    for n in 0..4i64 {
        square.call(&Args::new().arg(n)).expect("square");
    }
    for n in 0..2i64 {
        negate.call(&Args::new().arg(n)).expect("negate");
    }

    let square_keys: Vec<_> = square
        .iter_keys()
        .expect("keys")
        .map(|k| k.expect("key"))
        .collect();
    let negate_keys: Vec<_> = negate
        .iter_keys()
        .expect("keys")
        .map(|k| k.expect("key"))
        .collect();
    assert_eq!(square_keys.len(), 4);
    assert_eq!(negate_keys.len(), 2);
    assert!(square_keys.iter().all(|k| k.belongs_to(square.identifier(), '_')));
    assert!(negate_keys.iter().all(|k| k.belongs_to(negate.identifier(), '_')));

    let square_feed: Vec<_> = square.feed(None).expect("feed").map(|e| e.expect("entry")).collect();
    let negate_feed: Vec<_> = negate.feed(None).expect("feed").map(|e| e.expect("entry")).collect();
    assert_eq!(square_feed.len(), 4);
    assert_eq!(negate_feed.len(), 2);
    assert!(square_feed.iter().all(|e| e.key.belongs_to(square.identifier(), '_')));

    let err = square
        .feed(Some(&negate_feed[0].timestamp))
        .err()
        .expect("foreign offset is rejected");
    assert!(!err.is_missing_key());
}

#[test]
fn test_feed_resumes_after_offset() {
    let temp = fixtures::temp_store();
    let memo = make_bigger(temp.shared(), CallCounter::new());
    for n in 0..5i64 {
        memo.call(&Args::new().arg(json!({ "n": n }))).expect("call");
    }
    let all: Vec<_> = memo.feed(None).expect("feed").map(|e| e.expect("entry")).collect();
    assert_eq!(all.len(), 5);
    let tail: Vec<_> = memo
        .feed(Some(&all[1].timestamp))
        .expect("feed")
        .map(|e| e.expect("entry"))
        .collect();
    assert_eq!(tail, all[2..].to_vec());
    assert_eq!(memo.most_recent_key().expect("latest"), Some(all[4].key.clone()));
}

#[test]
fn test_tiered_read_through_serves_remote_only_values() {
    let (local, remote, tiered) = fixtures::temp_tiered();
    let counter = CallCounter::new();
    let memo = make_bigger(tiered, counter.clone());
    let args = Args::new().arg(json!({"a": 1}));
    let key = memo.key(&args).expect("key");

    remote
        .put(key.as_bytes(), br#"{"a":1,"a_bigger":10}"#, Some("application/json"))
        .expect("remote put");
    let value = memo.call(&args).expect("call");
    assert_eq!(Value::Object(value), json!({"a": 1, "a_bigger": 10}));
    assert_eq!(counter.count(), 0);
    assert!(local.store.contains(key.as_bytes()).expect("backfilled"));

    let meta = memo.meta(&args).expect("meta");
    assert_eq!(meta.content_type, "application/json");
}

#[test]
fn test_remote_failure_surfaces_after_local_write() {
    let local = fixtures::temp_store();
    let tiered: Arc<dyn FeedStore> = Arc::new(stash_storage::TieredStore::new(
        local.store.clone(),
        Arc::new(stash_test_utils::UnreachableRemote),
    ));
    let memo = make_bigger(tiered, CallCounter::new());
    let args = Args::new().arg(json!({"a": 2}));

    assertions::assert_tier_inconsistency(&memo.call(&args));
    assert!(local
        .store
        .contains(memo.key(&args).expect("key").as_bytes())
        .expect("contains"));
}

#[test]
fn test_meta_uses_public_base_url() {
    let temp = fixtures::temp_store();
    let base = Url::parse("http://localhost:5000/").expect("url");
    let store: Arc<dyn FeedStore> = Arc::new(temp.store.clone().with_public_base_url(base));
    let memo = MemoBuilder::json(
        ComputationDescriptor::new("greet", "|_| hi"),
        store,
        |_: &Args| Ok(json!("hi")),
    )
    .with_identity(ComputationFingerprint::Literal("greet".to_string()))
    .build()
    .expect("build should succeed");
    memo.call(&Args::new()).expect("call");

    let meta = memo.most_recent_meta().expect("meta").expect("some meta");
    let uri = meta.public_uri.expect("public uri");
    assert_eq!(uri.host_str(), Some("localhost"));
    assert!(uri.path().starts_with("/functions/greet/greet_"));
}

#[test]
fn test_array_series_appends() {
    let temp = fixtures::temp_store();
    let counter = CallCounter::new();
    let tick = counter.clone();
    let memo = MemoBuilder::array_series("samples", temp.shared(), move |_: &Args| {
        let n = tick.tick() as f64;
        NumericArray::from_f64(vec![2], &[n, n + 0.5]).map_err(Into::into)
    })
    .build()
    .expect("build should succeed");

    for _ in 0..3 {
        memo.call(&Args::new()).expect("call");
    }
    assert_eq!(counter.count(), 3);
    assert_eq!(memo.content_type(), SupportedContentType::TimeSeries.as_str());
    assert_eq!(memo.feed(None).expect("feed").count(), 3);

    let key = memo.most_recent_key().expect("latest").expect("key");
    let value = memo.get_value(&key).expect("value");
    assert_eq!(value.to_f64_vec(), Some(vec![2.0, 2.5]));
}

#[test]
fn test_concurrent_callers_share_one_store() {
    const THREADS: usize = 8;
    const CALLS: i64 = 20;
    const DISTINCT: i64 = 5;
    let temp = fixtures::temp_store();
    let counter = CallCounter::new();
    let memo = Arc::new(make_bigger(temp.shared(), counter.clone()));

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let memo = Arc::clone(&memo);
            scope.spawn(move || {
                for i in 0..CALLS {
                    let n = (i + t as i64) % DISTINCT;
                    let value = memo
                        .call(&Args::new().arg(json!({ "n": n })))
                        .expect("call should succeed");
                    assert_eq!(Value::Object(value), json!({"n": n, "n_bigger": n * 10}));
                }
            });
        }
    });

    // racing misses may each compute, but every write lands in the feed
    let computed = counter.count();
    assert!(computed >= DISTINCT as usize);
    assert!(computed <= THREADS * CALLS as usize);
    assert_eq!(memo.stats().computations, computed as u64);
    assert_eq!(memo.iter_keys().expect("keys").count(), DISTINCT as usize);

    let feed: Vec<_> = memo
        .feed(None)
        .expect("feed should succeed")
        .collect::<StashResult<_>>()
        .expect("feed entries should decode");
    assert_eq!(feed.len(), computed);
    assert!(feed.windows(2).all(|pair| pair[0].timestamp < pair[1].timestamp));

    for n in 0..DISTINCT {
        let args = Args::new().arg(json!({ "n": n }));
        let key = memo.key(&args).expect("key should succeed");
        let stored = memo.get_value(&key).expect("stored value should decode");
        assert_eq!(Value::Object(stored), json!({"n": n, "n_bigger": n * 10}));
    }
}
