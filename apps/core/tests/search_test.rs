use pretty_assertions::assert_eq;
use tabhop_core::model::{RecordKind, ResultRecord};
use tabhop_core::overlay::{direct_search_url, OverlaySearch};
use tabhop_core::phonetic::augment_all;
use tabhop_core::search::{IndexError, SearchIndex, SerializedIndex};
use tabhop_core::settings::{BangShortcut, SearchEngine};

fn records() -> Vec<ResultRecord> {
    augment_all(vec![
        ResultRecord::history("h1", "Q4_Report.xlsx", "https://drive.com/q4", None),
        ResultRecord::tab("7", "Q4 Report draft", "https://docs.com/q4", None),
        ResultRecord::bookmark("b1", "季度报告", "https://wiki.com/jdbg", None),
    ])
}

fn shipped(records: &[ResultRecord]) -> SerializedIndex {
    SearchIndex::build(records).serialize().unwrap()
}

#[test]
fn typo_query_returns_expected_match() {
    let items = records();
    let index = SearchIndex::build(&items);

    let hits = index.search("q4 reort", 10);

    assert!(hits.len() >= 2);
    assert!(hits.iter().all(|hit| hit.record < 2));
}

#[test]
fn pinyin_initials_find_han_titles() {
    let items = records();
    let index = SearchIndex::build(&items);

    let hits = index.search("jdbg", 5);

    assert_eq!(hits[0].record, 2);
}

#[test]
fn index_survives_the_message_boundary() {
    let items = records();
    let blob = shipped(&items);
    let wire = serde_json::to_string(&blob).unwrap();

    let received: SerializedIndex = serde_json::from_str(&wire).unwrap();
    let index = SearchIndex::deserialize(&received).unwrap();

    index.check_records(items.len()).unwrap();
    assert_eq!(index, SearchIndex::build(&items));
}

#[test]
fn rejects_foreign_version_and_keys() {
    let items = records();
    let mut value = serde_json::to_value(shipped(&items)).unwrap();
    value["version"] = 99.into();
    let wrong_version: SerializedIndex = serde_json::from_value(value.clone()).unwrap();
    assert!(matches!(
        SearchIndex::deserialize(&wrong_version),
        Err(IndexError::Version { found: 99, .. })
    ));

    value["version"] = 1.into();
    value["keys"] = serde_json::json!(["title", "url"]);
    let wrong_keys: SerializedIndex = serde_json::from_value(value).unwrap();
    assert!(matches!(
        SearchIndex::deserialize(&wrong_keys),
        Err(IndexError::Malformed(_))
    ));
}

#[test]
fn record_count_mismatch_is_detected() {
    let items = records();
    let index = SearchIndex::build(&items[..2]);

    assert_eq!(
        index.check_records(items.len()),
        Err(IndexError::RecordMismatch {
            indexed: 2,
            provided: 3,
        })
    );
}

#[test]
fn overlay_reuses_matching_index_and_rebuilds_stale_one() {
    let items = records();

    let fresh = OverlaySearch::from_response(items.clone(), Some(shipped(&items)));
    let stale = OverlaySearch::from_response(items.clone(), Some(shipped(&items[..1])));
    let missing = OverlaySearch::from_response(items.clone(), None);

    assert!(!fresh.rebuilt_index());
    assert!(stale.rebuilt_index());
    assert!(missing.rebuilt_index());
    assert_eq!(stale.search("jdbg", None, SearchEngine::Google)[0].id, "b1");
}

#[test]
fn overlay_groups_tabs_first_and_dedupes_titles() {
    let items = augment_all(vec![
        ResultRecord::history("h1", "Rust Book", "https://doc.rust-lang.org/book/", None),
        ResultRecord::tab("3", "Rust Book", "https://doc.rust-lang.org/book/ch01", None),
        ResultRecord::bookmark("b1", "Rust Blog", "https://blog.rust-lang.org", None),
        ResultRecord::tab("4", "Rust Playground", "https://play.rust-lang.org", None),
    ]);
    let overlay = OverlaySearch::from_response(items.clone(), Some(shipped(&items)));

    let rows = overlay.search("rust", None, SearchEngine::Google);

    let ids: Vec<(&str, &str)> = rows.iter().map(|r| (r.kind.name(), r.id.as_str())).collect();
    // The history entry wins the "Rust Book" title, so the tab with the same title is dropped.
    assert_eq!(ids, vec![("tab", "4"), ("history", "h1"), ("bookmark", "b1")]);
}

#[test]
fn bang_row_leads_and_engine_row_fills_empty_results() {
    let items = records();
    let overlay = OverlaySearch::from_response(items.clone(), Some(shipped(&items)));
    let gh = BangShortcut::new("gh", "GitHub", "https://github.com/search?q={query}");

    let with_bang = overlay.search("q4", Some(&gh), SearchEngine::Google);
    assert_eq!(with_bang[0].id, "bang-search-gh");
    assert_eq!(with_bang[0].url, "https://github.com/search?q=q4");
    assert!(matches!(with_bang[0].kind, RecordKind::BangSearch { .. }));
    assert!(with_bang.len() > 1);

    let nothing = overlay.search("zzzzzzzz", None, SearchEngine::Bing);
    assert_eq!(nothing.len(), 1);
    assert_eq!(nothing[0].kind, RecordKind::Search);
    assert_eq!(nothing[0].url, "https://www.bing.com/search?q=zzzzzzzz");

    assert!(overlay.search("   ", Some(&gh), SearchEngine::Google).is_empty());
}

#[test]
fn limit_caps_fuzzy_hits_only() {
    let items = records();
    let overlay = OverlaySearch::from_response(items.clone(), None).with_limit(1);
    let gh = BangShortcut::new("gh", "GitHub", "https://github.com/search?q={query}");

    let rows = overlay.search("q4", Some(&gh), SearchEngine::Google);

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id, "bang-search-gh");
}

#[test]
fn direct_search_prefers_the_bang() {
    let gh = BangShortcut::new("gh", "GitHub", "https://github.com/search?q={query}");

    assert_eq!(
        direct_search_url("axum router", Some(&gh), SearchEngine::Google),
        "https://github.com/search?q=axum%20router"
    );
    assert_eq!(
        direct_search_url("axum", None, SearchEngine::Google),
        "https://www.google.com/search?q=axum"
    );
}
