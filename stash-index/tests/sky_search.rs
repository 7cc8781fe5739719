//! Indexing and ranked search over a live orchestrator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use stash_cache::{Memo, MemoBuilder};
use stash_core::{Args, ComputationDescriptor, Key};
use stash_index::{IndexEngine, SearchIndex};
use stash_storage::Collection;
use stash_test_utils::fixtures::{self, TempStore};

type Documents = Map<String, Value>;

fn corpus(temp: &TempStore) -> Arc<Memo<Documents>> {
    let memo = MemoBuilder::json(
        ComputationDescriptor::new("corpus", "|docs| docs"),
        temp.shared(),
        |args: &Args| {
            Ok(args
                .get(0)
                .and_then(|v| v.as_json())
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default())
        },
    )
    .build()
    .expect("build should succeed");
    Arc::new(memo)
}

fn words(_key: &Key, docs: &Documents, _args: &Args) -> Vec<(String, Value)> {
    let mut pairs = Vec::new();
    for (name, text) in docs {
        let text = text.as_str().unwrap_or_default();
        for word in text.split_whitespace() {
            pairs.push((word.to_lowercase(), json!({"key": name, "text": text})));
        }
    }
    pairs
}

fn sky_documents() -> Args {
    Args::new().arg(json!({
        "a": "lights in the sky",
        "b": "look to the sky",
        "c": "I look at the sky and the sky looks at me",
    }))
}

fn ranked_keys(results: &[Value]) -> Vec<String> {
    results
        .iter()
        .filter_map(|doc| doc.get("key").and_then(Value::as_str).map(str::to_string))
        .collect()
}

#[test]
fn test_sky_search_ranks_most_mentions_first() {
    stash_test_utils::init_tracing();
    let temp = fixtures::temp_store();
    let source = corpus(&temp);
    let engine = IndexEngine::new("words", Arc::clone(&source), words, true).expect("open index");

    source.call(&sky_documents()).expect("call");

    let keys = ranked_keys(&engine.search("sky").expect("search"));
    assert_eq!(keys.len(), 3);
    assert_eq!(keys[0], "c");
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(sorted, vec!["a", "b", "c"]);

    let ranked = engine.search_ranked("sky").expect("search");
    assert_eq!(ranked[0].matches, 2);
    assert_eq!(ranked[1].matches, 1);
}

#[test]
fn test_prefix_queries_match_sub_key_prefixes() {
    let temp = fixtures::temp_store();
    let source = corpus(&temp);
    let engine = IndexEngine::new("words", Arc::clone(&source), words, true).expect("open index");
    source.call(&sky_documents()).expect("call");

    let keys = ranked_keys(&engine.search("loo").expect("search"));
    assert_eq!(keys[0], "c");
    assert_eq!(keys.len(), 2);
    assert!(engine.search("nowhere").expect("search").is_empty());
}

#[test]
fn test_index_catches_up_once() {
    let temp = fixtures::temp_store();
    let source = corpus(&temp);
    source.call(&sky_documents()).expect("call");
    source
        .call(&Args::new().arg(json!({"d": "blue sky"})))
        .expect("call");

    let engine = IndexEngine::new("words", Arc::clone(&source), words, false).expect("open index");
    assert!(engine.search("sky").expect("search").is_empty());

    assert_eq!(engine.index().expect("index"), 2);
    assert_eq!(engine.processed(), 2);
    assert_eq!(engine.index().expect("index"), 0);
    assert_eq!(engine.processed(), 2);

    let latest = source.feed(None).expect("feed").last().expect("entry").expect("entry");
    assert_eq!(engine.offset().expect("offset"), Some(latest.timestamp));
    assert_eq!(ranked_keys(&engine.search("sky").expect("search")).len(), 4);
}

#[test]
fn test_offset_survives_reopen() {
    let temp = fixtures::temp_store();
    let source = corpus(&temp);
    source.call(&sky_documents()).expect("call");
    {
        let engine =
            IndexEngine::new("words", Arc::clone(&source), words, false).expect("open index");
        assert_eq!(engine.index().expect("index"), 1);
    }

    let engine = IndexEngine::new("words", Arc::clone(&source), words, false).expect("reopen index");
    assert_eq!(engine.index().expect("index"), 0);
    source
        .call(&Args::new().arg(json!({"e": "sky high"})))
        .expect("call");
    assert_eq!(engine.index().expect("index"), 1);
}

#[test]
fn test_documents_without_key_are_skipped() {
    let temp = fixtures::temp_store();
    let source = corpus(&temp);
    let engine = IndexEngine::new(
        "mixed",
        Arc::clone(&source),
        |_: &Key, docs: &Documents, _: &Args| {
            docs.iter()
                .map(|(name, text)| {
                    if name == "bad" {
                        (name.clone(), json!({"text": text}))
                    } else {
                        (name.clone(), json!({"key": name, "text": text}))
                    }
                })
                .collect()
        },
        false,
    )
    .expect("open index");

    source
        .call(&Args::new().arg(json!({"bad": "x", "good": "y", "also": "z"})))
        .expect("call");
    assert_eq!(engine.index().expect("index should not abort"), 1);
    assert!(engine.search("bad").expect("search").is_empty());
    assert_eq!(engine.search("good").expect("search").len(), 1);
    assert_eq!(engine.search("also").expect("search").len(), 1);
}

#[test]
fn test_dropping_engine_removes_listener() {
    let temp = fixtures::temp_store();
    let source = corpus(&temp);
    let engine = IndexEngine::new("words", Arc::clone(&source), words, true).expect("open index");
    assert_eq!(source.listener_count(), 1);
    drop(engine);
    assert_eq!(source.listener_count(), 0);
    source.call(&sky_documents()).expect("call without listeners");
}

#[test]
fn test_search_through_trait_object() {
    let temp = fixtures::temp_store();
    let source = corpus(&temp);
    let engine = IndexEngine::new("words", Arc::clone(&source), words, false).expect("open index");
    source.call(&sky_documents()).expect("call");

    let index: Arc<dyn SearchIndex> = engine;
    assert_eq!(index.name(), "words");
    assert_eq!(index.source_identifier(), source.identifier());
    assert_eq!(index.catch_up().expect("catch up"), 1);
    assert_eq!(ranked_keys(&index.search("sky").expect("search"))[0], "c");
}

#[test]
fn test_index_name_must_not_be_reserved() {
    let temp = fixtures::temp_store();
    let source = corpus(&temp);
    assert!(IndexEngine::new("feed", Arc::clone(&source), words, false).is_err());
    assert!(IndexEngine::new("data", source, words, false).is_err());
}

#[test]
fn test_deleted_value_does_not_stall_index() {
    let temp = fixtures::temp_store();
    let source = corpus(&temp);
    let kept = Args::new().arg(json!({"k": "kept words"}));
    let gone = Args::new().arg(json!({"g": "gone words"}));
    source.call(&kept).expect("call should succeed");
    source.call(&gone).expect("call should succeed");

    let gone_key = source.key(&gone).expect("key should succeed");
    source
        .store()
        .delete(gone_key.as_bytes())
        .expect("delete should succeed");

    let engine = IndexEngine::new("words", Arc::clone(&source), words, false).expect("open index");
    assert_eq!(engine.index().expect("index should succeed"), 1);
    assert_eq!(ranked_keys(&engine.search("kept").expect("search")), vec!["k"]);
    assert!(engine.search("gone").expect("search").is_empty());

    // the skipped entry was the newest, so the offset must sit on it
    let latest = source.feed(None).expect("feed").last().expect("entry").expect("entry");
    assert_eq!(engine.offset().expect("offset"), Some(latest.timestamp));
    assert_eq!(engine.index().expect("index should succeed"), 0);
}

#[test]
fn test_index_runs_while_source_is_written() {
    const WRITES: usize = 40;
    let temp = fixtures::temp_store();
    let source = corpus(&temp);
    let engine = IndexEngine::new("words", Arc::clone(&source), words, false).expect("open index");
    let done = AtomicBool::new(false);

    let mut indexed = 0;
    std::thread::scope(|scope| {
        let writer = Arc::clone(&source);
        let done = &done;
        scope.spawn(move || {
            for i in 0..WRITES {
                let args = Args::new().arg(json!({ format!("d{i}"): format!("shared word{i}") }));
                writer.call(&args).expect("call should succeed");
            }
            done.store(true, Ordering::SeqCst);
        });

        while !done.load(Ordering::SeqCst) {
            indexed += engine.index().expect("index should succeed");
        }
    });
    indexed += engine.index().expect("index should succeed");

    assert_eq!(indexed, WRITES);
    assert_eq!(engine.processed(), WRITES as u64);
    assert_eq!(engine.search("shared").expect("search").len(), WRITES);
    assert_eq!(ranked_keys(&engine.search("word17").expect("search")), vec!["d17"]);

    let latest = source.feed(None).expect("feed").last().expect("entry").expect("entry");
    assert_eq!(engine.offset().expect("offset"), Some(latest.timestamp));
}
