//! Search functions: the capability adapters wrapping compiled scripts
//! and the built-in functions composed from collectors and the
//! lowering engine.
//!
//! A function never fails a search: invalid predicate text or a script
//! runtime error degrades to a query that matches nothing, with the
//! explanation logged.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::collect::{KeyCollector, LatestPerGroup, LinkedRefs};
use crate::directory::User;
use crate::error::Result;
use crate::index::{IndexQuery, SearchIndex, schema};
use crate::lower::PredicateCompiler;
use crate::script::{CompiledScript, Probe};

// ------------- QueryContext -------------
/// Everything a function sees at query-evaluation time: the requesting
/// identity, the pre-determined project scope, snapshots of the remark
/// and document indexes, and the predicate compiler.
pub struct QueryContext {
    user: Arc<User>,
    scope: Vec<String>,
    remarks: Arc<SearchIndex>,
    documents: Arc<SearchIndex>,
    compiler: Arc<PredicateCompiler>,
}

impl QueryContext {
    pub fn new(
        user: Arc<User>,
        scope: Vec<String>,
        remarks: Arc<SearchIndex>,
        documents: Arc<SearchIndex>,
        compiler: Arc<PredicateCompiler>,
    ) -> Self {
        Self { user, scope, remarks, documents, compiler }
    }
    pub fn user(&self) -> &User {
        &self.user
    }
    pub fn scope(&self) -> &[String] {
        &self.scope
    }
    pub fn remarks(&self) -> &SearchIndex {
        &self.remarks
    }
    pub fn documents(&self) -> &SearchIndex {
        &self.documents
    }
    pub fn compiler(&self) -> &PredicateCompiler {
        &self.compiler
    }
}

// ------------- SearchFunction -------------
/// The uniform shape every registered function is adapted to.
pub trait SearchFunction: Send + Sync {
    fn module_key(&self) -> &str;
    fn name(&self) -> &str;
    /// Whether the function enumerates values rather than producing a
    /// document query.
    fn is_list(&self) -> bool;
    /// The documents-index query for this invocation.
    fn build_query(&self, ctx: &QueryContext, args: &[String]) -> Result<IndexQuery>;
    /// Values enumerated by value-producing functions; empty otherwise.
    fn values(&self, _ctx: &QueryContext, _args: &[String]) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
    /// The compiled chunk retained for release on unregistration.
    /// Only value-producing script adapters keep one.
    fn retained_script(&self) -> Option<&CompiledScript> {
        None
    }
}

// ------------- Classification -------------
/// Outcome of classifying a compiled script by capability. Exactly one
/// adapter variant is chosen; anything else is a rejection with the
/// diagnostic to log.
pub enum Classified {
    Values(ValuesFunctionAdapter),
    Query(QueryFunctionAdapter),
    Rejected { reason: String, script: CompiledScript },
}

/// Decide which of the two recognized capabilities a compiled script
/// implements. A script defining `init` must make it callable and it
/// must run cleanly before any capability counts.
pub fn classify(script: CompiledScript, module_key: String, name: String) -> Classified {
    match script.probe("init") {
        Probe::NotCallable => {
            return Classified::Rejected {
                reason: "init is defined but not callable".to_string(),
                script,
            };
        }
        Probe::Function => {
            if let Err(e) = script.call_init() {
                return Classified::Rejected { reason: format!("init failed: {e}"), script };
            }
        }
        Probe::Absent => (),
    }
    match (script.probe("get_values"), script.probe("get_query")) {
        (Probe::Function, _) => {
            Classified::Values(ValuesFunctionAdapter { module_key, name, script })
        }
        (_, Probe::Function) => {
            Classified::Query(QueryFunctionAdapter { module_key, name, script })
        }
        _ => Classified::Rejected {
            reason: "script defines neither get_values nor get_query".to_string(),
            script,
        },
    }
}

/// Turn a set of matching remarks into a query over the documents they
/// belong to.
fn docs_matching_remarks(ctx: &QueryContext, remark_query: &IndexQuery) -> IndexQuery {
    let mut collector = KeyCollector::new(schema::DOC_ID);
    ctx.remarks().scan(remark_query, &mut collector);
    let ids: BTreeSet<String> = collector.into_keys().into_iter().collect();
    if ids.is_empty() {
        IndexQuery::MatchNone
    } else {
        IndexQuery::IdSet { field: schema::DOC_ID.to_string(), ids }
    }
}

// ------------- Script adapters -------------
/// Wraps a value-enumerating script. Owns the compiled chunk so it can
/// be released when the function is unregistered.
pub struct ValuesFunctionAdapter {
    module_key: String,
    name: String,
    script: CompiledScript,
}

impl SearchFunction for ValuesFunctionAdapter {
    fn module_key(&self) -> &str {
        &self.module_key
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn is_list(&self) -> bool {
        true
    }
    fn values(&self, _ctx: &QueryContext, args: &[String]) -> Result<Vec<String>> {
        match self.script.call_values(args) {
            Ok(values) => Ok(values),
            Err(e) => {
                warn!(function = %self.name, error = %e, "values script failed");
                Ok(Vec::new())
            }
        }
    }
    fn build_query(&self, ctx: &QueryContext, args: &[String]) -> Result<IndexQuery> {
        let ids: BTreeSet<String> = self.values(ctx, args)?.into_iter().collect();
        if ids.is_empty() {
            return Ok(IndexQuery::MatchNone);
        }
        Ok(IndexQuery::IdSet { field: schema::DOC_ID.to_string(), ids })
    }
    fn retained_script(&self) -> Option<&CompiledScript> {
        Some(&self.script)
    }
}

/// Wraps a query-producing script: the script returns a raw predicate
/// string, which is lowered and applied to the remark index.
pub struct QueryFunctionAdapter {
    module_key: String,
    name: String,
    script: CompiledScript,
}

impl SearchFunction for QueryFunctionAdapter {
    fn module_key(&self) -> &str {
        &self.module_key
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn is_list(&self) -> bool {
        false
    }
    fn build_query(&self, ctx: &QueryContext, args: &[String]) -> Result<IndexQuery> {
        let predicate = match self.script.call_query(args) {
            Ok(predicate) => predicate,
            Err(e) => {
                warn!(function = %self.name, error = %e, "query script failed");
                return Ok(IndexQuery::MatchNone);
            }
        };
        match ctx.compiler().compile(ctx.user(), ctx.scope(), &predicate) {
            Ok(remark_query) => Ok(docs_matching_remarks(ctx, &remark_query)),
            Err(messages) => {
                warn!(function = %self.name, %messages, "predicate failed validation");
                Ok(IndexQuery::MatchNone)
            }
        }
    }
}

// ------------- Built-in functions -------------
/// `latestRemark(predicate)`: documents whose most recent remark
/// matches the predicate. The latest remark per document is determined
/// by a full scan first, so an older matching remark never qualifies.
pub struct LatestRemarkFunction;

impl LatestRemarkFunction {
    pub const NAME: &'static str = "latestRemark";
}

impl SearchFunction for LatestRemarkFunction {
    fn module_key(&self) -> &str {
        "builtin-latest-remark"
    }
    fn name(&self) -> &str {
        Self::NAME
    }
    fn is_list(&self) -> bool {
        false
    }
    fn build_query(&self, ctx: &QueryContext, args: &[String]) -> Result<IndexQuery> {
        let mut latest = LatestPerGroup::new(
            schema::DOC_ID,
            schema::REMARK_ID,
            schema::REMARK_CREATED,
        );
        ctx.remarks().scan(&IndexQuery::MatchAll, &mut latest);
        let latest_ids: BTreeSet<String> = latest.into_latest().into_values().collect();
        debug!(count = latest_ids.len(), "collected latest remarks");
        if latest_ids.is_empty() {
            return Ok(IndexQuery::MatchNone);
        }

        let Some(predicate) = args.first() else {
            warn!("latestRemark invoked without a predicate argument");
            return Ok(IndexQuery::MatchNone);
        };
        match ctx.compiler().compile(ctx.user(), ctx.scope(), predicate) {
            Ok(remark_query) => {
                let restricted = IndexQuery::all_of(vec![
                    remark_query,
                    IndexQuery::IdSet {
                        field: schema::REMARK_ID.to_string(),
                        ids: latest_ids,
                    },
                ]);
                Ok(docs_matching_remarks(ctx, &restricted))
            }
            Err(messages) => {
                error!(%messages, "got errors while building query");
                Ok(IndexQuery::MatchNone)
            }
        }
    }
}

/// `linkedDocuments(relation)`: documents referenced through the link
/// field, optionally restricted to one relation name. Link values look
/// like `rel=<relation> d:<doc id>`.
pub struct LinkedDocumentsFunction;

impl LinkedDocumentsFunction {
    pub const NAME: &'static str = "linkedDocuments";
}

impl SearchFunction for LinkedDocumentsFunction {
    fn module_key(&self) -> &str {
        "builtin-linked-documents"
    }
    fn name(&self) -> &str {
        Self::NAME
    }
    fn is_list(&self) -> bool {
        false
    }
    fn build_query(&self, ctx: &QueryContext, args: &[String]) -> Result<IndexQuery> {
        let relation = args.first().cloned().filter(|r| !r.is_empty());
        let prefix = relation.map(|r| format!("rel={r} "));
        let mut collector =
            LinkedRefs::new(schema::DOC_LINKS, schema::LINK_ID_MARKER, move |value| {
                match &prefix {
                    Some(prefix) => value.starts_with(prefix.as_str()),
                    None => true,
                }
            });
        ctx.documents().scan(&IndexQuery::MatchAll, &mut collector);
        let ids: BTreeSet<String> = collector.into_ids().into_iter().collect();
        debug!(count = ids.len(), "collected linked documents");
        if ids.is_empty() {
            return Ok(IndexQuery::MatchNone);
        }
        Ok(IndexQuery::IdSet { field: schema::DOC_ID.to_string(), ids })
    }
}
