//! Remarque – scripted search functions over a remark index.
//!
//! Remarque is the extension core of a remark (comment) search
//! subsystem: operators register user-authored, dynamically compiled
//! search functions that extend the host's query language, and those
//! functions may embed a small textual predicate sub-language that is
//! compiled into structured boolean queries over index fields.
//!
//! ## Modules
//! * [`predicate`] – Lexer/grammar and extraction for the predicate
//!   sub-language (`by`, `like`, `on`, `before`, `after`, `inRole`,
//!   `inGroup`, `roleLevel`, `groupLevel`).
//! * [`lower`] – Resolution of extracted clauses against identity,
//!   role and date services into an [`index::IndexQuery`], collecting
//!   every validation error into a [`lower::MessageSet`].
//! * [`index`] – A minimal segmented inverted index with term, range,
//!   text and id-set queries.
//! * [`collect`] – Streaming per-segment scan collectors ("latest per
//!   group", "linked references", key sets).
//! * [`script`] – Compilation of Lua function scripts with explicit
//!   release of compiled chunks.
//! * [`function`] – Capability adapters around compiled scripts and
//!   the built-in search functions.
//! * [`registry`] – Race-free register/replace/unregister of functions
//!   against the host module system.
//! * [`directory`] – Identity/role/date service traits plus in-memory
//!   implementations.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use remarque::directory::{FixedZones, StaticDirectory, StaticRoles};
//! use remarque::lower::{FieldSchema, PredicateCompiler};
//!
//! let mut directory = StaticDirectory::new();
//! let alice = directory.add_user("alice-key", "alice", "Alice");
//! let compiler = PredicateCompiler::new(
//!     Arc::new(directory),
//!     Arc::new(StaticRoles::new()),
//!     Arc::new(FixedZones::utc()),
//!     FieldSchema::remarks(),
//! );
//! let query = compiler.compile(&alice, &[], "by: \"alice\"").unwrap();
//! assert!(!query.is_match_none());
//! ```
//!
//! ## Error handling
//! Validation-class problems (malformed predicate text, unknown users,
//! groups, roles or dates) never become crate errors: they travel as
//! ordered messages in a [`lower::MessageSet`], and the enclosing
//! search function degrades to a query matching nothing. The
//! [`error::RemarqueError`] enum is reserved for programmer-error and
//! infrastructure conditions.

pub mod collect;
pub mod config;
pub mod directory;
pub mod error;
pub mod function;
pub mod index;
pub mod lower;
pub mod predicate;
pub mod registry;
pub mod script;
