//! Lowering of extracted predicate clauses into index queries.
//!
//! Each recognized field is resolved independently against the
//! directory, role and date services; a field that fails to resolve
//! adds a message to the [`MessageSet`] without stopping the others.
//! The output is all-or-nothing: any accumulated message discards the
//! composed query.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::directory::{DateTimeSupport, Directory, Project, RoleCatalog, User};
use crate::index::{IndexQuery, encode_instant, schema};
use crate::predicate::{Field, parse_clauses};

// ------------- MessageSet -------------
/// Ordered, de-duplicated collection of human-readable validation
/// errors accumulated while compiling one predicate string.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MessageSet {
    messages: Vec<String>,
}

impl MessageSet {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.messages.contains(&message) {
            self.messages.push(message);
        }
    }
    pub fn has_any_errors(&self) -> bool {
        !self.messages.is_empty()
    }
    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

impl fmt::Display for MessageSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.messages.join("; "))
    }
}

// ------------- FieldSchema -------------
/// The index fields one entity type stores its data in. Keeping these
/// as parameters lets the same lowering engine serve any entity that
/// carries author/created/body/visibility fields.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub created: &'static str,
    pub author: &'static str,
    pub body: &'static str,
    pub level: &'static str,
    pub level_role: &'static str,
    pub project: &'static str,
}

impl FieldSchema {
    pub fn remarks() -> Self {
        Self {
            created: schema::REMARK_CREATED,
            author: schema::REMARK_AUTHOR,
            body: schema::REMARK_BODY,
            level: schema::REMARK_LEVEL,
            level_role: schema::REMARK_LEVEL_ROLE,
            project: schema::PROJECT_ID,
        }
    }
}

/// The literal a predicate author writes to mean "whoever is running
/// the query".
const CURRENT_USER: &str = "currentUser()";

// ------------- PredicateCompiler -------------
pub struct PredicateCompiler {
    directory: Arc<dyn Directory>,
    roles: Arc<dyn RoleCatalog>,
    dates: Arc<dyn DateTimeSupport>,
    schema: FieldSchema,
}

impl PredicateCompiler {
    pub fn new(
        directory: Arc<dyn Directory>,
        roles: Arc<dyn RoleCatalog>,
        dates: Arc<dyn DateTimeSupport>,
        schema: FieldSchema,
    ) -> Self {
        Self { directory, roles, dates, schema }
    }

    /// Compile a raw predicate string for `user`, optionally scoped to
    /// a pre-determined set of project identifiers. Returns the
    /// composed conjunction, or every collected syntax and resolution
    /// error when anything failed to validate.
    pub fn compile(
        &self,
        user: &User,
        scope: &[String],
        input: &str,
    ) -> Result<IndexQuery, MessageSet> {
        let mut messages = MessageSet::new();
        let clauses = parse_clauses(input, &mut messages);
        debug!(?clauses, "parsed predicate values");

        let mut must: Vec<IndexQuery> = Vec::new();
        for (field, value) in clauses.iter() {
            match field {
                Field::By => self.lower_by(user, value, &mut must, &mut messages),
                Field::Like => must.push(IndexQuery::Text {
                    field: self.schema.body.to_string(),
                    text: value.to_string(),
                }),
                Field::On => self.lower_on(user, value, &mut must, &mut messages),
                Field::Before => self.lower_open_range(field, value, &mut must, &mut messages),
                Field::After => self.lower_open_range(field, value, &mut must, &mut messages),
                Field::InRole => self.lower_in_role(scope, value, &mut must, &mut messages),
                Field::InGroup => self.lower_in_group(value, &mut must, &mut messages),
                Field::RoleLevel => self.lower_role_level(value, &mut must, &mut messages),
                Field::GroupLevel => self.lower_group_level(value, &mut must, &mut messages),
            }
        }

        if messages.has_any_errors() {
            return Err(messages);
        }
        Ok(IndexQuery::all_of(must))
    }

    fn lower_by(
        &self,
        user: &User,
        value: &str,
        must: &mut Vec<IndexQuery>,
        messages: &mut MessageSet,
    ) {
        let author_key = if value.eq_ignore_ascii_case(CURRENT_USER) {
            Some(user.key().to_string())
        } else {
            self.directory
                .user_by_name(value)
                .or_else(|| self.directory.user_by_key(value))
                .map(|by_user| by_user.key().to_string())
        };
        match author_key {
            Some(key) => must.push(IndexQuery::term(self.schema.author, key)),
            None => messages.add_error(format!("Unable to find user \"{value}\"")),
        }
    }

    fn lower_on(
        &self,
        user: &User,
        value: &str,
        must: &mut Vec<IndexQuery>,
        messages: &mut MessageSet,
    ) {
        let instant = if self.dates.validate(value) {
            self.dates.parse(value)
        } else {
            None
        };
        let zone = self.dates.time_zone_for(user);
        let bounds =
            instant.and_then(|at| day_bounds(&zone, at.with_timezone(&zone).date_naive()));
        match bounds {
            Some((since, until)) => must.push(IndexQuery::Range {
                field: self.schema.created.to_string(),
                lower: Some(encode_instant(&since)),
                upper: Some(encode_instant(&until)),
            }),
            None => messages.add_error("\"on\" date is invalid"),
        }
    }

    fn lower_open_range(
        &self,
        field: Field,
        value: &str,
        must: &mut Vec<IndexQuery>,
        messages: &mut MessageSet,
    ) {
        let instant = if self.dates.validate(value) {
            self.dates.parse(value)
        } else {
            None
        };
        match instant {
            Some(at) => {
                let encoded = encode_instant(&at);
                let (lower, upper) = match field {
                    Field::Before => (None, Some(encoded)),
                    _ => (Some(encoded), None),
                };
                must.push(IndexQuery::Range {
                    field: self.schema.created.to_string(),
                    lower,
                    upper,
                });
            }
            None => messages.add_error(format!("\"{}\" date is invalid", field.keyword())),
        }
    }

    fn lower_in_role(
        &self,
        scope: &[String],
        value: &str,
        must: &mut Vec<IndexQuery>,
        messages: &mut MessageSet,
    ) {
        let Some(role) = self.roles.role_by_name(value) else {
            messages.add_error(format!("Role \"{value}\" wasn't found"));
            return;
        };

        // An explicit scope restricts resolution to those projects;
        // otherwise every project is considered.
        let projects: Vec<Arc<Project>> = if !scope.is_empty() {
            let mut resolved = Vec::new();
            for entry in scope {
                let project = match entry.parse::<u64>() {
                    Ok(id) => self.roles.project_by_id(id),
                    Err(_) => self
                        .roles
                        .project_by_key(entry)
                        .or_else(|| self.roles.project_by_name(entry)),
                };
                match project {
                    Some(project) => resolved.push(project),
                    None => warn!(entry = %entry, "unable to find determined project"),
                }
            }
            resolved
        } else {
            self.roles.all_projects()
        };

        let mut per_project: Vec<IndexQuery> = Vec::new();
        for project in &projects {
            let Some(actors) = self.roles.role_actors(&role, project) else {
                continue;
            };
            let authors = actors
                .iter()
                .map(|actor| IndexQuery::term(self.schema.author, actor.key()))
                .collect();
            per_project.push(IndexQuery::all_of(vec![
                IndexQuery::term(self.schema.project, project.id().to_string()),
                IndexQuery::any_of(authors),
            ]));
        }
        must.push(IndexQuery::any_of(per_project));
    }

    fn lower_in_group(&self, value: &str, must: &mut Vec<IndexQuery>, messages: &mut MessageSet) {
        match self.directory.group_by_name(value) {
            Some(group) => {
                let authors = self
                    .directory
                    .members_of(&group)
                    .iter()
                    .map(|member| IndexQuery::term(self.schema.author, member.key()))
                    .collect();
                must.push(IndexQuery::any_of(authors));
            }
            None => messages.add_error(format!("Group \"{value}\" wasn't found")),
        }
    }

    fn lower_role_level(&self, value: &str, must: &mut Vec<IndexQuery>, messages: &mut MessageSet) {
        match self.roles.role_by_name(value) {
            Some(role) => must.push(IndexQuery::term(
                self.schema.level_role,
                role.id().to_string(),
            )),
            None => messages.add_error(format!("Role \"{value}\" wasn't found")),
        }
    }

    fn lower_group_level(&self, value: &str, must: &mut Vec<IndexQuery>, messages: &mut MessageSet) {
        match self.directory.group_by_name(value) {
            Some(_) => must.push(IndexQuery::term(self.schema.level, value)),
            None => messages.add_error(format!("Group \"{value}\" wasn't found")),
        }
    }
}

/// Start and end of `day` in `zone`, as UTC instants. The end is the
/// last representable millisecond so a closed range covers the whole
/// local day.
fn day_bounds(zone: &FixedOffset, day: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = zone.from_local_datetime(&day.and_time(NaiveTime::MIN)).single()?;
    let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999)?;
    let end = zone.from_local_datetime(&day.and_time(end_of_day)).single()?;
    Some((start.with_timezone(&Utc), end.with_timezone(&Utc)))
}
