use criterion::{Criterion, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use remarque::directory::{FixedZones, StaticDirectory, StaticRoles};
use remarque::index::{Doc, IndexQuery, SearchIndex, schema};
use remarque::lower::{FieldSchema, MessageSet, PredicateCompiler};
use remarque::predicate::parse_clauses;

const PREDICATE: &str = "by: \"alice\" on: \"2023-01-04\" like: \"needs review\"";

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("parse predicate", |b| {
        b.iter(|| {
            let mut errors = MessageSet::new();
            parse_clauses(black_box(PREDICATE), &mut errors)
        })
    });

    let mut directory = StaticDirectory::new();
    let alice = directory.add_user("alice-key", "alice", "Alice");
    let compiler = PredicateCompiler::new(
        Arc::new(directory),
        Arc::new(StaticRoles::new()),
        Arc::new(FixedZones::utc()),
        FieldSchema::remarks(),
    );
    c.bench_function("lower predicate", |b| {
        b.iter(|| compiler.compile(&alice, &[], black_box(PREDICATE)))
    });

    let mut builder = SearchIndex::builder();
    for i in 0..100_000u32 {
        builder.add(
            Doc::new()
                .keyword(schema::DOC_ID, &format!("{}", i / 10))
                .keyword(schema::REMARK_ID, &format!("{i}"))
                .keyword(schema::REMARK_AUTHOR, if i % 2 == 0 { "alice-key" } else { "bob-key" })
                .keyword(schema::REMARK_CREATED, &format!("202301{:02}000000000", i % 28 + 1)),
        );
        if i % 10_000 == 9_999 {
            builder.commit_segment();
        }
    }
    let index = builder.build();
    let term = IndexQuery::term(schema::REMARK_AUTHOR, "alice-key");
    c.bench_function("term search 100k", |b| b.iter(|| index.search(black_box(&term))));

    let range = IndexQuery::Range {
        field: schema::REMARK_CREATED.to_string(),
        lower: Some("20230110000000000".to_string()),
        upper: Some("20230120000000000".to_string()),
    };
    c.bench_function("range search 100k", |b| b.iter(|| index.search(black_box(&range))));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
