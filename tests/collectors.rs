use remarque::collect::{KeyCollector, LatestPerGroup, LinkedRefs, accept_all};
use remarque::index::{Doc, IndexQuery, SearchIndex, schema};

fn remark(doc_id: &str, remark_id: &str, created: &str) -> Doc {
    Doc::new()
        .keyword(schema::DOC_ID, doc_id)
        .keyword(schema::REMARK_ID, remark_id)
        .keyword(schema::REMARK_CREATED, created)
}

fn latest_of(index: &SearchIndex) -> std::collections::HashMap<String, String> {
    let mut collector =
        LatestPerGroup::new(schema::DOC_ID, schema::REMARK_ID, schema::REMARK_CREATED);
    index.scan(&IndexQuery::MatchAll, &mut collector);
    collector.into_latest().into_iter().collect()
}

#[test]
fn greatest_key_wins_regardless_of_visitation_order() {
    let mut forward = SearchIndex::builder();
    forward
        .add(remark("DOC-1", "1", "2023-01-01"))
        .add(remark("DOC-1", "2", "2023-01-02"));
    let forward = forward.build();

    let mut reversed = SearchIndex::builder();
    reversed
        .add(remark("DOC-1", "2", "2023-01-02"))
        .add(remark("DOC-1", "1", "2023-01-01"));
    let reversed = reversed.build();

    assert_eq!(latest_of(&forward).get("DOC-1").map(String::as_str), Some("2"));
    assert_eq!(latest_of(&reversed).get("DOC-1").map(String::as_str), Some("2"));
}

#[test]
fn equal_keys_prefer_the_most_recently_visited() {
    let mut index = SearchIndex::builder();
    index
        .add(remark("DOC-1", "1", "2023-01-01"))
        .add(remark("DOC-1", "2", "2023-01-01"));
    let index = index.build();

    assert_eq!(latest_of(&index).get("DOC-1").map(String::as_str), Some("2"));
}

#[test]
fn groups_are_tracked_independently_across_segments() {
    let mut index = SearchIndex::builder();
    index
        .add(remark("DOC-1", "1", "2023-01-05"))
        .add(remark("DOC-2", "2", "2023-01-01"))
        .commit_segment()
        .add(remark("DOC-1", "3", "2023-01-02"))
        .add(remark("DOC-2", "4", "2023-01-03"));
    let index = index.build();

    let latest = latest_of(&index);
    assert_eq!(latest.get("DOC-1").map(String::as_str), Some("1"));
    assert_eq!(latest.get("DOC-2").map(String::as_str), Some("4"));
}

#[test]
fn only_matching_documents_are_visited() {
    let mut index = SearchIndex::builder();
    index
        .add(remark("DOC-1", "1", "2023-01-01"))
        .add(remark("DOC-2", "2", "2023-01-02"));
    let index = index.build();

    let mut collector =
        LatestPerGroup::new(schema::DOC_ID, schema::REMARK_ID, schema::REMARK_CREATED);
    index.scan(&IndexQuery::term(schema::DOC_ID, "DOC-2"), &mut collector);
    let latest = collector.into_latest();
    assert_eq!(latest.len(), 1);
    assert!(latest.contains_key("DOC-2"));
}

fn linked(links: &[&[&str]]) -> SearchIndex {
    let mut index = SearchIndex::builder();
    for (i, values) in links.iter().enumerate() {
        index.add(
            Doc::new()
                .keyword(schema::DOC_ID, &format!("{i}"))
                .multi(schema::DOC_LINKS, values),
        );
    }
    index.build()
}

#[test]
fn linked_refs_extract_the_id_after_the_marker() {
    let index = linked(&[
        &["rel=duplicates d:200", "rel=blocks d:300"],
        &["rel=duplicates d:201"],
    ]);
    let mut collector = LinkedRefs::new(schema::DOC_LINKS, schema::LINK_ID_MARKER, |value| {
        value.starts_with("rel=duplicates ")
    });
    index.scan(&IndexQuery::MatchAll, &mut collector);
    let mut ids: Vec<String> = collector.into_ids().into_iter().collect();
    ids.sort();
    assert_eq!(ids, vec!["200".to_string(), "201".to_string()]);
}

#[test]
fn values_without_the_marker_are_skipped() {
    let index = linked(&[&["rel=duplicates malformed", "rel=duplicates d:200"]]);
    let mut collector = LinkedRefs::new(schema::DOC_LINKS, schema::LINK_ID_MARKER, accept_all);
    index.scan(&IndexQuery::MatchAll, &mut collector);
    let ids = collector.into_ids();
    assert_eq!(ids.len(), 1);
    assert!(ids.contains("200"));
}

#[test]
fn duplicate_references_collapse_by_set_semantics() {
    let index = linked(&[&["rel=blocks d:300"], &["rel=duplicates d:300"]]);
    let mut collector = LinkedRefs::new(schema::DOC_LINKS, schema::LINK_ID_MARKER, accept_all);
    index.scan(&IndexQuery::MatchAll, &mut collector);
    assert_eq!(collector.into_ids().len(), 1);
}

#[test]
fn key_collector_accumulates_distinct_column_values() {
    let mut index = SearchIndex::builder();
    index
        .add(remark("DOC-1", "1", "2023-01-01"))
        .add(remark("DOC-1", "2", "2023-01-02"))
        .commit_segment()
        .add(remark("DOC-2", "3", "2023-01-03"));
    let index = index.build();

    let mut collector = KeyCollector::new(schema::DOC_ID);
    index.scan(&IndexQuery::MatchAll, &mut collector);
    let mut keys: Vec<String> = collector.into_keys().into_iter().collect();
    keys.sort();
    assert_eq!(keys, vec!["DOC-1".to_string(), "DOC-2".to_string()]);
}
