//! A minimal segmented inverted index over remark and document records.
//!
//! The index is immutable once built. Segments are independently
//! scannable units: each keeps keyword postings (term -> bitmap of
//! ordinals, ordered so range queries can walk terms lexically),
//! tokenized text postings for body-style fields, and per-ordinal
//! column values for the scan collectors. Queries evaluate per segment
//! to a [`RoaringBitmap`] of ordinals and combine into a
//! [`RoaringTreemap`] of global document ids.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::BuildHasherDefault;
use std::ops::Bound::{Included, Unbounded};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use roaring::{RoaringBitmap, RoaringTreemap};
use seahash::SeaHasher;
use tracing::warn;

use crate::error::Result;

pub type FieldHasher = BuildHasherDefault<SeaHasher>;

// ------------- Schema -------------
/// Index field names shared by the lowering engine, the collectors and
/// the built-in functions.
pub mod schema {
    pub const DOC_ID: &str = "doc_id";
    pub const DOC_LINKS: &str = "doc_links";
    pub const PROJECT_ID: &str = "project_id";
    pub const REMARK_ID: &str = "remark_id";
    pub const REMARK_AUTHOR: &str = "remark_author";
    pub const REMARK_BODY: &str = "remark_body";
    pub const REMARK_CREATED: &str = "remark_created";
    pub const REMARK_LEVEL: &str = "remark_level";
    pub const REMARK_LEVEL_ROLE: &str = "remark_level_role";

    /// Marker preceding the referenced document id inside a link value.
    pub const LINK_ID_MARKER: &str = "d:";
}

/// Encode an instant as a lexically sortable term so that range
/// queries and collector comparisons agree on ordering.
pub fn encode_instant(instant: &DateTime<Utc>) -> String {
    instant.format("%Y%m%d%H%M%S%3f").to_string()
}

/// Lowercased alphanumeric tokens of a body-style text.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

// ------------- Queries -------------
/// The structured query model that predicate lowering targets.
///
/// `Range` bounds are inclusive; `None` leaves the end open. `Bool`
/// combines `must` clauses conjunctively and `should` clauses
/// disjunctively; a `Bool` with no clauses at all matches nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexQuery {
    MatchAll,
    MatchNone,
    Term { field: String, value: String },
    Range { field: String, lower: Option<String>, upper: Option<String> },
    Text { field: String, text: String },
    IdSet { field: String, ids: BTreeSet<String> },
    Bool { must: Vec<IndexQuery>, should: Vec<IndexQuery> },
}

impl IndexQuery {
    pub fn term(field: &str, value: impl Into<String>) -> Self {
        IndexQuery::Term { field: field.to_string(), value: value.into() }
    }
    pub fn all_of(must: Vec<IndexQuery>) -> Self {
        IndexQuery::Bool { must, should: Vec::new() }
    }
    pub fn any_of(should: Vec<IndexQuery>) -> Self {
        IndexQuery::Bool { must: Vec::new(), should }
    }
    pub fn is_match_none(&self) -> bool {
        matches!(self, IndexQuery::MatchNone)
    }
}

// ------------- Documents -------------
/// One record on its way into a segment. Fields are written as keyword
/// terms (exact match, column-stored), tokenized text, or multi-valued
/// keyword lists (column-stored only).
#[derive(Debug, Default)]
pub struct Doc {
    keywords: Vec<(String, String)>,
    texts: Vec<(String, String)>,
    multis: Vec<(String, Vec<String>)>,
}

impl Doc {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn keyword(mut self, field: &str, value: &str) -> Self {
        self.keywords.push((field.to_string(), value.to_string()));
        self
    }
    pub fn text(mut self, field: &str, value: &str) -> Self {
        self.texts.push((field.to_string(), value.to_string()));
        self
    }
    pub fn multi(mut self, field: &str, values: &[&str]) -> Self {
        self.multis
            .push((field.to_string(), values.iter().map(|v| v.to_string()).collect()));
        self
    }
}

// ------------- Segments -------------
pub type Column = Vec<Option<Arc<str>>>;
pub type MultiColumn = Vec<Vec<Arc<str>>>;

pub struct Segment {
    doc_count: u32,
    postings: HashMap<String, BTreeMap<String, RoaringBitmap>, FieldHasher>,
    text_postings: HashMap<String, HashMap<String, RoaringBitmap, FieldHasher>, FieldHasher>,
    columns: HashMap<String, Arc<Column>, FieldHasher>,
    multi_columns: HashMap<String, Arc<MultiColumn>, FieldHasher>,
}

impl Segment {
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }
    /// Per-ordinal values of a single-valued keyword field. Loaded once
    /// per segment by collectors.
    pub fn column(&self, field: &str) -> Option<Arc<Column>> {
        self.columns.get(field).map(Arc::clone)
    }
    /// Per-ordinal values of a multi-valued keyword field.
    pub fn multi_column(&self, field: &str) -> Option<Arc<MultiColumn>> {
        self.multi_columns.get(field).map(Arc::clone)
    }

    fn eval(&self, query: &IndexQuery) -> RoaringBitmap {
        match query {
            IndexQuery::MatchAll => {
                let mut all = RoaringBitmap::new();
                all.insert_range(0..self.doc_count);
                all
            }
            IndexQuery::MatchNone => RoaringBitmap::new(),
            IndexQuery::Term { field, value } => self
                .postings
                .get(field)
                .and_then(|terms| terms.get(value))
                .cloned()
                .unwrap_or_default(),
            IndexQuery::Range { field, lower, upper } => {
                let mut hits = RoaringBitmap::new();
                if let (Some(lo), Some(hi)) = (lower, upper) {
                    if lo > hi {
                        return hits;
                    }
                }
                if let Some(terms) = self.postings.get(field) {
                    let lo = lower.as_deref().map(Included).unwrap_or(Unbounded);
                    let hi = upper.as_deref().map(Included).unwrap_or(Unbounded);
                    for (_, bitmap) in terms.range::<str, _>((lo, hi)) {
                        hits |= bitmap;
                    }
                }
                hits
            }
            IndexQuery::Text { field, text } => {
                let tokens = tokenize(text);
                if tokens.is_empty() {
                    return RoaringBitmap::new();
                }
                let Some(terms) = self.text_postings.get(field) else {
                    return RoaringBitmap::new();
                };
                let mut hits: Option<RoaringBitmap> = None;
                for token in tokens {
                    let bitmap = terms.get(&token).cloned().unwrap_or_default();
                    hits = Some(match hits {
                        Some(mut acc) => {
                            acc &= &bitmap;
                            acc
                        }
                        None => bitmap,
                    });
                }
                hits.unwrap_or_default()
            }
            IndexQuery::IdSet { field, ids } => {
                let mut hits = RoaringBitmap::new();
                if let Some(terms) = self.postings.get(field) {
                    for id in ids {
                        if let Some(bitmap) = terms.get(id) {
                            hits |= bitmap;
                        }
                    }
                }
                hits
            }
            IndexQuery::Bool { must, should } => {
                if must.is_empty() && should.is_empty() {
                    return RoaringBitmap::new();
                }
                let mut hits: Option<RoaringBitmap> = None;
                for clause in must {
                    let bitmap = self.eval(clause);
                    hits = Some(match hits {
                        Some(mut acc) => {
                            acc &= &bitmap;
                            acc
                        }
                        None => bitmap,
                    });
                }
                if !should.is_empty() {
                    let mut any = RoaringBitmap::new();
                    for clause in should {
                        any |= self.eval(clause);
                    }
                    hits = Some(match hits {
                        Some(mut acc) => {
                            acc &= &any;
                            acc
                        }
                        None => any,
                    });
                }
                hits.unwrap_or_default()
            }
        }
    }
}

#[derive(Default)]
struct SegmentBuilder {
    doc_count: u32,
    postings: HashMap<String, BTreeMap<String, RoaringBitmap>, FieldHasher>,
    text_postings: HashMap<String, HashMap<String, RoaringBitmap, FieldHasher>, FieldHasher>,
    columns: HashMap<String, Column, FieldHasher>,
    multi_columns: HashMap<String, MultiColumn, FieldHasher>,
}

impl SegmentBuilder {
    fn add(&mut self, doc: Doc) {
        let ordinal = self.doc_count;
        for (field, value) in doc.keywords {
            self.postings
                .entry(field.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(ordinal);
            let column = self.columns.entry(field).or_default();
            column.resize(ordinal as usize, None);
            column.push(Some(Arc::from(value.as_str())));
        }
        for (field, value) in doc.texts {
            for token in tokenize(&value) {
                self.text_postings
                    .entry(field.clone())
                    .or_default()
                    .entry(token)
                    .or_default()
                    .insert(ordinal);
            }
        }
        for (field, values) in doc.multis {
            let column = self.multi_columns.entry(field).or_default();
            column.resize(ordinal as usize, Vec::new());
            column.push(values.iter().map(|v| Arc::from(v.as_str())).collect());
        }
        self.doc_count += 1;
    }

    fn seal(self) -> Segment {
        let doc_count = self.doc_count;
        let columns = self
            .columns
            .into_iter()
            .map(|(field, mut column)| {
                column.resize(doc_count as usize, None);
                (field, Arc::new(column))
            })
            .collect();
        let multi_columns = self
            .multi_columns
            .into_iter()
            .map(|(field, mut column)| {
                column.resize(doc_count as usize, Vec::new());
                (field, Arc::new(column))
            })
            .collect();
        Segment {
            doc_count,
            postings: self.postings,
            text_postings: self.text_postings,
            columns,
            multi_columns,
        }
    }
}

// ------------- Index -------------
/// Streaming receiver for a scan. `begin_segment` is called once per
/// segment so implementations can load the columns they need before
/// any `visit`; ordinals are delivered in unspecified order.
pub trait Collector {
    fn begin_segment(&mut self, segment: &Arc<Segment>) -> Result<()>;
    fn visit(&mut self, ordinal: u32);
}

/// An immutable snapshot of sealed segments.
pub struct SearchIndex {
    segments: Vec<Arc<Segment>>,
}

impl SearchIndex {
    pub fn builder() -> IndexBuilder {
        IndexBuilder::default()
    }
    pub fn segments(&self) -> &[Arc<Segment>] {
        &self.segments
    }
    pub fn doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count() as u64).sum()
    }

    /// Evaluate a query to the set of matching global document ids.
    pub fn search(&self, query: &IndexQuery) -> RoaringTreemap {
        let mut result = RoaringTreemap::new();
        let mut base = 0u64;
        for segment in &self.segments {
            for ordinal in segment.eval(query) {
                result.insert(base + ordinal as u64);
            }
            base += segment.doc_count() as u64;
        }
        result
    }

    /// Stream matching documents through a collector, segment by
    /// segment. A segment whose columns cannot be loaded is skipped
    /// with a warning and the scan keeps whatever was accumulated.
    pub fn scan(&self, query: &IndexQuery, collector: &mut dyn Collector) {
        for segment in &self.segments {
            if let Err(e) = collector.begin_segment(segment) {
                warn!(error = %e, "skipping segment during scan");
                continue;
            }
            for ordinal in segment.eval(query) {
                collector.visit(ordinal);
            }
        }
    }
}

#[derive(Default)]
pub struct IndexBuilder {
    sealed: Vec<Arc<Segment>>,
    current: SegmentBuilder,
}

impl IndexBuilder {
    pub fn add(&mut self, doc: Doc) -> &mut Self {
        self.current.add(doc);
        self
    }
    /// Seal the segment under construction; later docs start a new one.
    pub fn commit_segment(&mut self) -> &mut Self {
        if self.current.doc_count > 0 {
            let builder = std::mem::take(&mut self.current);
            self.sealed.push(Arc::new(builder.seal()));
        }
        self
    }
    pub fn build(mut self) -> SearchIndex {
        self.commit_segment();
        SearchIndex { segments: self.sealed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SearchIndex {
        let mut builder = SearchIndex::builder();
        builder
            .add(
                Doc::new()
                    .keyword(schema::REMARK_AUTHOR, "alice-key")
                    .keyword(schema::REMARK_CREATED, "20230101120000000")
                    .text(schema::REMARK_BODY, "needs another review"),
            )
            .add(
                Doc::new()
                    .keyword(schema::REMARK_AUTHOR, "bob-key")
                    .keyword(schema::REMARK_CREATED, "20230104120000000")
                    .text(schema::REMARK_BODY, "review finished"),
            )
            .commit_segment()
            .add(
                Doc::new()
                    .keyword(schema::REMARK_AUTHOR, "alice-key")
                    .keyword(schema::REMARK_CREATED, "20230202120000000")
                    .text(schema::REMARK_BODY, "ship it"),
            );
        builder.build()
    }

    #[test]
    fn term_query_spans_segments() {
        let index = sample();
        let hits = index.search(&IndexQuery::term(schema::REMARK_AUTHOR, "alice-key"));
        assert_eq!(hits.iter().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn range_query_is_inclusive_and_open_ended() {
        let index = sample();
        let hits = index.search(&IndexQuery::Range {
            field: schema::REMARK_CREATED.to_string(),
            lower: Some("20230104120000000".to_string()),
            upper: None,
        });
        assert_eq!(hits.iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn text_query_requires_all_tokens() {
        let index = sample();
        let hits = index.search(&IndexQuery::Text {
            field: schema::REMARK_BODY.to_string(),
            text: "Review needs".to_string(),
        });
        assert_eq!(hits.iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn empty_bool_matches_nothing() {
        let index = sample();
        let hits = index.search(&IndexQuery::all_of(Vec::new()));
        assert!(hits.is_empty());
    }

    #[test]
    fn instants_encode_lexically_sortable() {
        use chrono::TimeZone;
        let earlier = Utc.with_ymd_and_hms(2023, 1, 4, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2023, 1, 4, 23, 59, 59).unwrap();
        assert!(encode_instant(&earlier) < encode_instant(&later));
        assert_eq!(encode_instant(&earlier), "20230104000000000");
    }
}
