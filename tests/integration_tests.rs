//! Integration tests for the qmd library.
//!
//! Each test opens its own store, either in memory or in a temporary
//! directory, and drives it through the public `Qmd` handle.

use std::sync::Arc;
use std::thread;

use qmd::commands::Qmd;
use qmd::config::Config;
use qmd::entry::{MetaValue, Metadata};
use qmd::error::QmdError;
use qmd::search::SearchOptions;
use qmd::storage::{Store, TimeRange};
use tempfile::TempDir;

fn qmd() -> Qmd {
    Qmd::open_in_memory().expect("open in-memory store")
}

fn add(qmd: &Qmd, id: &str, content: &str) {
    qmd.add(id, content, &Metadata::new()).expect("add entry");
}

fn search_ids(qmd: &Qmd, query: &str) -> Vec<String> {
    qmd.search(query, SearchOptions::default())
        .expect("search")
        .into_iter()
        .map(|hit| hit.entry.id)
        .collect()
}

// =============================================================================
// Entries
// =============================================================================

#[test]
fn upsert_round_trips_content_exactly() {
    let qmd = qmd();
    let content = "  Leading space\n\ttabs and ünïcödé\n";
    add(&qmd, "n1", content);
    assert_eq!(qmd.get("n1").unwrap().content, content);
}

#[test]
fn upsert_same_id_replaces() {
    let qmd = qmd();
    add(&qmd, "n1", "first version");
    add(&qmd, "n1", "second version");

    assert_eq!(qmd.get("n1").unwrap().content, "second version");
    assert_eq!(qmd.store().count().unwrap(), 1);
    assert_eq!(search_ids(&qmd, "second"), vec!["n1"]);
    assert!(search_ids(&qmd, "first").is_empty());
}

#[test]
fn metadata_is_searchable_and_preserved() {
    let qmd = qmd();
    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), MetaValue::from("journal"));
    qmd.add("n1", "plain text", &metadata).unwrap();

    assert_eq!(qmd.get("n1").unwrap().metadata, metadata);
    assert_eq!(search_ids(&qmd, "journal"), vec!["n1"]);
}

#[test]
fn delete_removes_every_trace() {
    let qmd = qmd();
    add(&qmd, "a", "alpha note");
    add(&qmd, "b", "beta note");
    qmd.tag("a", "x", None).unwrap();
    qmd.relate("a", "b", "related").unwrap();
    qmd.relate("b", "a", "related").unwrap();

    assert!(qmd.delete("a").unwrap());

    assert!(matches!(qmd.get("a"), Err(QmdError::NotFound(_))));
    assert!(qmd.graph().tags_of("a").unwrap().is_empty());
    assert!(qmd.graph().related_to("a", None, 20).unwrap().is_empty());
    assert!(qmd.graph().related_to("b", None, 20).unwrap().is_empty());
    assert!(qmd.graph().entries_by_tag("x", 10).unwrap().is_empty());
    assert_eq!(search_ids(&qmd, "note"), vec!["b"]);
    qmd.store().check_index().unwrap();
}

// =============================================================================
// Search
// =============================================================================

#[test]
fn search_is_conjunctive_over_tokens() {
    let qmd = qmd();
    add(&qmd, "quick", "The quick brown fox");
    add(&qmd, "lazy", "Lazy dog sleeps");
    add(&qmd, "both", "A fox and a dog");

    assert_eq!(search_ids(&qmd, "fox dog"), vec!["both"]);
    assert_eq!(search_ids(&qmd, "FOX").len(), 2);
}

#[test]
fn empty_query_is_empty_not_error() {
    let qmd = qmd();
    add(&qmd, "a", "anything");
    assert!(search_ids(&qmd, "").is_empty());
    assert!(search_ids(&qmd, "  \t").is_empty());
}

#[test]
fn operator_characters_never_error() {
    let qmd = qmd();
    add(&qmd, "a", "rust notes");

    for query in ["\"unbalanced", "rust AND", "NOT rust", "(rust", "rust:", "-rust", "^"] {
        assert!(
            qmd.search(query, SearchOptions::default()).is_ok(),
            "query {query:?} errored"
        );
    }
    assert_eq!(search_ids(&qmd, "\"unbalanced rust"), Vec::<String>::new());
    assert_eq!(search_ids(&qmd, "(rust"), vec!["a"]);
}

#[test]
fn phrase_prefix_and_or_queries() {
    let qmd = qmd();
    add(&qmd, "a", "memory safety without garbage collection");
    add(&qmd, "b", "safety memory is reversed here");
    add(&qmd, "c", "collections framework");

    assert_eq!(search_ids(&qmd, "\"memory safety\""), vec!["a"]);

    let mut prefixed = search_ids(&qmd, "collect*");
    prefixed.sort();
    assert_eq!(prefixed, vec!["a", "c"]);

    let mut either = search_ids(&qmd, "garbage OR framework");
    either.sort();
    assert_eq!(either, vec!["a", "c"]);
}

#[test]
fn search_limit_is_honoured() {
    let qmd = qmd();
    for i in 0..15 {
        add(&qmd, &format!("n{i}"), "shared keyword");
    }

    assert_eq!(search_ids(&qmd, "keyword").len(), 10);
    let hits = qmd
        .search("keyword", SearchOptions { limit: 3, semantic: false })
        .unwrap();
    assert_eq!(hits.len(), 3);
}

#[test]
fn equal_relevance_prefers_newest() {
    let qmd = qmd();
    let store = qmd.store();
    store.upsert_at("old", "same words", &Metadata::new(), 100).unwrap();
    store.upsert_at("new", "same words", &Metadata::new(), 200).unwrap();

    assert_eq!(search_ids(&qmd, "same"), vec!["new", "old"]);
}

// =============================================================================
// Timeline and dedupe
// =============================================================================

#[test]
fn timeline_returns_newest_first() {
    let qmd = qmd();
    add(&qmd, "e1", "one");
    add(&qmd, "e2", "two");
    add(&qmd, "e3", "three");

    let ids: Vec<_> = qmd
        .timeline(TimeRange::default(), 2)
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec!["e3", "e2"]);
}

#[test]
fn dedupe_keeps_one_per_content() {
    let qmd = qmd();
    add(&qmd, "1", "same");
    add(&qmd, "2", "same");
    add(&qmd, "3", "diff");

    let report = qmd.dedupe().unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.groups, 1);
    assert_eq!(qmd.store().count().unwrap(), 2);
    assert!(qmd.get("1").is_ok());
    assert!(qmd.get("2").is_err());
}

// =============================================================================
// Graph
// =============================================================================

#[test]
fn tagging_twice_yields_one_tag() {
    let qmd = qmd();
    add(&qmd, "e", "entry");
    qmd.tag("e", "x", None).unwrap();
    qmd.tag("e", "x", None).unwrap();

    let tags = qmd.graph().tags_of("e").unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].name, "x");
}

#[test]
fn relation_types_filter_traversal() {
    let qmd = qmd();
    add(&qmd, "a", "source");
    add(&qmd, "b", "target");
    qmd.relate("a", "b", "cites").unwrap();

    let cites = qmd.graph().related_to("a", Some("cites"), 20).unwrap();
    assert_eq!(cites.len(), 1);
    assert_eq!(cites[0].id, "b");
    assert!(
        qmd.graph()
            .related_to("a", Some("other-type"), 20)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn context_of_missing_entry_is_not_found() {
    let qmd = qmd();
    assert!(matches!(qmd.context("missing"), Err(QmdError::NotFound(_))));
}

// =============================================================================
// Persistence and concurrency
// =============================================================================

#[test]
fn store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let config = Config::default();

    {
        let qmd = Qmd::open(&config, dir.path(), None).unwrap();
        add(&qmd, "a", "persistent note");
        qmd.tag("a", "keep", None).unwrap();
    }

    let reopened = Qmd::open(&config, dir.path(), None).unwrap();
    assert!(dir.path().join("memory").join("qmd.db").exists());
    assert_eq!(search_ids(&reopened, "persistent"), vec!["a"]);
    assert_eq!(reopened.graph().tags_of("a").unwrap()[0].name, "keep");
}

#[test]
fn concurrent_writers_keep_index_consistent() {
    let store = Arc::new(Store::open_in_memory().unwrap());

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..25 {
                    let id = format!("w{worker}-{i}");
                    store
                        .upsert(&id, &format!("worker {worker} note {i}"), &Metadata::new())
                        .unwrap();
                    if i % 5 == 0 {
                        store.delete(&id).unwrap();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.count().unwrap(), 80);
    store.check_index().unwrap();
    assert_eq!(store.search("worker", 200, None).unwrap().len(), 80);
}
