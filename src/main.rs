//! Command line runner: builds a small demo dataset, registers the
//! built-in functions plus any script definitions found in the
//! configured directory, and evaluates one query.
//!
//! Usage:
//!   remarque '<predicate>'            lower a predicate and search remarks
//!   remarque <function> [args...]     invoke a registered function

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use remarque::config::Settings;
use remarque::directory::{DateTimeSupport, FixedZones, StaticDirectory, StaticRoles, User};
use remarque::error::Result;
use remarque::function::{
    LatestRemarkFunction, LinkedDocumentsFunction, QueryContext, SearchFunction,
};
use remarque::index::{Doc, IndexQuery, SearchIndex, encode_instant, schema};
use remarque::lower::{FieldSchema, PredicateCompiler};
use remarque::registry::{FunctionRegistry, InMemoryHost, load_scripts_from_dir};
use remarque::script::LuaScriptEngine;

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let settings = Settings::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_filter.clone())),
        )
        .init();

    let (user, context, registry) = demo(&settings)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(first) = args.first() else {
        eprintln!("usage: remarque '<predicate>' | remarque <function> [args...]");
        return Ok(());
    };

    let query = match registry.function(first)? {
        Some(function) => {
            info!(function = %function.name(), "invoking registered function");
            function.build_query(&context, &args[1..])?
        }
        None => {
            let predicate = args.join(" ");
            match context.compiler().compile(&user, &[], &predicate) {
                Ok(remark_query) => {
                    let remarks = context.remarks().search(&remark_query);
                    println!("matching remarks: {:?}", remarks.iter().collect::<Vec<_>>());
                    return Ok(());
                }
                Err(messages) => {
                    for message in messages.messages() {
                        eprintln!("{message}");
                    }
                    IndexQuery::MatchNone
                }
            }
        }
    };

    let documents = context.documents().search(&query);
    println!("matching documents: {:?}", documents.iter().collect::<Vec<_>>());
    Ok(())
}

fn demo(settings: &Settings) -> Result<(Arc<User>, QueryContext, FunctionRegistry)> {
    let mut directory = StaticDirectory::new();
    let alice = directory.add_user("alice-key", "alice", "Alice");
    let bob = directory.add_user("bob-key", "bob", "Bob");
    let reviewers = directory.add_group("reviewers");
    directory.add_member(&reviewers, &alice);

    let mut roles = StaticRoles::new();
    let maintainer = roles.add_role(1, "Maintainer");
    let platform = roles.add_project(10, "PLAT", "Platform");
    roles.add_project(11, "DOCS", "Documentation");
    roles.add_actor(&maintainer, &platform, &bob);

    let compiler = Arc::new(PredicateCompiler::new(
        Arc::new(directory),
        Arc::new(roles),
        Arc::new(FixedZones::utc()),
        FieldSchema::remarks(),
    ));

    let dates = FixedZones::utc();
    let mut remarks = SearchIndex::builder();
    for (doc_id, remark_id, author, day, body) in [
        ("100", "1", "alice-key", "2023-01-04", "please take another look"),
        ("100", "2", "bob-key", "2023-01-05", "done, merging"),
        ("101", "3", "alice-key", "2023-01-04", "blocked on review"),
    ] {
        let created = dates
            .parse(day)
            .map(|at| encode_instant(&at))
            .unwrap_or_default();
        remarks.add(
            Doc::new()
                .keyword(schema::DOC_ID, doc_id)
                .keyword(schema::REMARK_ID, remark_id)
                .keyword(schema::REMARK_AUTHOR, author)
                .keyword(schema::PROJECT_ID, "10")
                .keyword(schema::REMARK_CREATED, &created)
                .text(schema::REMARK_BODY, body),
        );
    }
    let remarks = Arc::new(remarks.build());

    let mut documents = SearchIndex::builder();
    documents
        .add(
            Doc::new()
                .keyword(schema::DOC_ID, "100")
                .keyword(schema::PROJECT_ID, "10")
                .multi(schema::DOC_LINKS, &["rel=duplicates d:101"]),
        )
        .add(
            Doc::new()
                .keyword(schema::DOC_ID, "101")
                .keyword(schema::PROJECT_ID, "10"),
        );
    let documents = Arc::new(documents.build());

    let host = Arc::new(InMemoryHost::new());
    let engine = Arc::new(LuaScriptEngine::new());
    let registry = FunctionRegistry::new(host, engine);
    registry.register_builtin(Arc::new(LatestRemarkFunction))?;
    registry.register_builtin(Arc::new(LinkedDocumentsFunction))?;

    let scripts_dir = Path::new(&settings.scripts_dir);
    if scripts_dir.is_dir() {
        match load_scripts_from_dir(&registry, scripts_dir) {
            Ok(count) => info!(count, "loaded script definitions"),
            Err(e) => warn!(error = %e, "unable to load script definitions"),
        }
    }

    let context = QueryContext::new(
        Arc::clone(&alice),
        Vec::new(),
        remarks,
        documents,
        compiler,
    );
    Ok((alice, context, registry))
}
