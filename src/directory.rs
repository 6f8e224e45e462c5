//! Identity, role/project and date resolution services.
//!
//! The lowering engine only sees the traits; the `Static*` types are
//! in-memory implementations so the crate can run and be tested
//! without the host platform's directory.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

// ------------- Constructs -------------
// Fields are encapsulated and only exposed through getters, which
// yields true immutability for objects after creation.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct User {
    key: String,
    name: String,
    display_name: String,
}

impl User {
    pub fn new(key: String, name: String, display_name: String) -> Self {
        Self { key, name, display_name }
    }
    pub fn key(&self) -> &str {
        &self.key
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Group {
    name: String,
}

impl Group {
    pub fn new(name: String) -> Self {
        Self { name }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Role {
    id: u64,
    name: String,
}

impl Role {
    pub fn new(id: u64, name: String) -> Self {
        Self { id, name }
    }
    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Project {
    id: u64,
    key: String,
    name: String,
}

impl Project {
    pub fn new(id: u64, key: String, name: String) -> Self {
        Self { id, key, name }
    }
    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn key(&self) -> &str {
        &self.key
    }
    pub fn name(&self) -> &str {
        &self.name
    }
}

// ------------- Service traits -------------
pub trait Directory: Send + Sync {
    fn user_by_name(&self, name: &str) -> Option<Arc<User>>;
    fn user_by_key(&self, key: &str) -> Option<Arc<User>>;
    fn group_by_name(&self, name: &str) -> Option<Arc<Group>>;
    fn members_of(&self, group: &Group) -> Vec<Arc<User>>;
}

pub trait RoleCatalog: Send + Sync {
    fn role_by_name(&self, name: &str) -> Option<Arc<Role>>;
    /// The identities holding `role` in `project`, or `None` when the
    /// pair has no actor table at all.
    fn role_actors(&self, role: &Role, project: &Project) -> Option<Vec<Arc<User>>>;
    fn project_by_id(&self, id: u64) -> Option<Arc<Project>>;
    fn project_by_key(&self, key: &str) -> Option<Arc<Project>>;
    fn project_by_name(&self, name: &str) -> Option<Arc<Project>>;
    fn all_projects(&self) -> Vec<Arc<Project>>;
}

pub trait DateTimeSupport: Send + Sync {
    fn validate(&self, literal: &str) -> bool;
    fn parse(&self, literal: &str) -> Option<DateTime<Utc>>;
    fn time_zone_for(&self, user: &User) -> FixedOffset;
}

// ------------- In-memory implementations -------------
#[derive(Default)]
pub struct StaticDirectory {
    by_name: HashMap<String, Arc<User>>,
    by_key: HashMap<String, Arc<User>>,
    groups: HashMap<String, Arc<Group>>,
    memberships: HashMap<String, Vec<Arc<User>>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add_user(&mut self, key: &str, name: &str, display_name: &str) -> Arc<User> {
        let user = Arc::new(User::new(
            key.to_string(),
            name.to_string(),
            display_name.to_string(),
        ));
        self.by_name.insert(name.to_string(), Arc::clone(&user));
        self.by_key.insert(key.to_string(), Arc::clone(&user));
        user
    }
    pub fn add_group(&mut self, name: &str) -> Arc<Group> {
        let group = Arc::new(Group::new(name.to_string()));
        self.groups.insert(name.to_string(), Arc::clone(&group));
        group
    }
    pub fn add_member(&mut self, group: &Group, user: &Arc<User>) {
        self.memberships
            .entry(group.name().to_string())
            .or_default()
            .push(Arc::clone(user));
    }
}

impl Directory for StaticDirectory {
    fn user_by_name(&self, name: &str) -> Option<Arc<User>> {
        self.by_name.get(name).map(Arc::clone)
    }
    fn user_by_key(&self, key: &str) -> Option<Arc<User>> {
        self.by_key.get(key).map(Arc::clone)
    }
    fn group_by_name(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.get(name).map(Arc::clone)
    }
    fn members_of(&self, group: &Group) -> Vec<Arc<User>> {
        self.memberships.get(group.name()).cloned().unwrap_or_default()
    }
}

#[derive(Default)]
pub struct StaticRoles {
    roles: HashMap<String, Arc<Role>>,
    projects: Vec<Arc<Project>>,
    actors: HashMap<(u64, u64), Vec<Arc<User>>>,
}

impl StaticRoles {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add_role(&mut self, id: u64, name: &str) -> Arc<Role> {
        let role = Arc::new(Role::new(id, name.to_string()));
        self.roles.insert(name.to_string(), Arc::clone(&role));
        role
    }
    pub fn add_project(&mut self, id: u64, key: &str, name: &str) -> Arc<Project> {
        let project = Arc::new(Project::new(id, key.to_string(), name.to_string()));
        self.projects.push(Arc::clone(&project));
        project
    }
    pub fn add_actor(&mut self, role: &Role, project: &Project, user: &Arc<User>) {
        self.actors
            .entry((role.id(), project.id()))
            .or_default()
            .push(Arc::clone(user));
    }
}

impl RoleCatalog for StaticRoles {
    fn role_by_name(&self, name: &str) -> Option<Arc<Role>> {
        self.roles.get(name).map(Arc::clone)
    }
    fn role_actors(&self, role: &Role, project: &Project) -> Option<Vec<Arc<User>>> {
        self.actors.get(&(role.id(), project.id())).cloned()
    }
    fn project_by_id(&self, id: u64) -> Option<Arc<Project>> {
        self.projects.iter().find(|p| p.id() == id).map(Arc::clone)
    }
    fn project_by_key(&self, key: &str) -> Option<Arc<Project>> {
        self.projects.iter().find(|p| p.key() == key).map(Arc::clone)
    }
    fn project_by_name(&self, name: &str) -> Option<Arc<Project>> {
        self.projects.iter().find(|p| p.name() == name).map(Arc::clone)
    }
    fn all_projects(&self) -> Vec<Arc<Project>> {
        self.projects.clone()
    }
}

lazy_static! {
    static ref DATE_LITERAL: Regex =
        Regex::new(r"^\d{4}-\d{2}-\d{2}( \d{2}:\d{2})?$").unwrap();
}

/// Date support with one fixed-offset zone per user and a default for
/// everyone else. Literals are `YYYY-MM-DD` or `YYYY-MM-DD HH:MM`,
/// interpreted in the default zone.
pub struct FixedZones {
    default_zone: FixedOffset,
    zones: HashMap<String, FixedOffset>,
}

impl FixedZones {
    pub fn new(default_zone: FixedOffset) -> Self {
        Self { default_zone, zones: HashMap::new() }
    }
    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }
    pub fn set_zone(&mut self, user_key: &str, zone: FixedOffset) {
        self.zones.insert(user_key.to_string(), zone);
    }

    fn parse_local(literal: &str) -> Option<NaiveDateTime> {
        if let Ok(at) = NaiveDateTime::parse_from_str(literal, "%Y-%m-%d %H:%M") {
            return Some(at);
        }
        NaiveDate::parse_from_str(literal, "%Y-%m-%d")
            .ok()
            .map(|date| date.and_time(NaiveTime::MIN))
    }
}

impl DateTimeSupport for FixedZones {
    fn validate(&self, literal: &str) -> bool {
        DATE_LITERAL.is_match(literal) && Self::parse_local(literal).is_some()
    }
    fn parse(&self, literal: &str) -> Option<DateTime<Utc>> {
        let local = Self::parse_local(literal)?;
        self.default_zone
            .from_local_datetime(&local)
            .single()
            .map(|at| at.with_timezone(&Utc))
    }
    fn time_zone_for(&self, user: &User) -> FixedOffset {
        self.zones.get(user.key()).copied().unwrap_or(self.default_zone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_resolution_by_name_and_key() {
        let mut directory = StaticDirectory::new();
        directory.add_user("u-1", "alice", "Alice A.");
        assert!(directory.user_by_name("alice").is_some());
        assert!(directory.user_by_key("u-1").is_some());
        assert!(directory.user_by_name("u-1").is_none());
    }

    #[test]
    fn date_literals() {
        let dates = FixedZones::utc();
        assert!(dates.validate("2023-01-04"));
        assert!(dates.validate("2023-01-04 16:30"));
        assert!(!dates.validate("2023-13-04"));
        assert!(!dates.validate("yesterday"));
        let at = dates.parse("2023-01-04 16:30").unwrap();
        assert_eq!(at.to_rfc3339(), "2023-01-04T16:30:00+00:00");
    }

    #[test]
    fn zones_shift_parsing_per_user() {
        let mut dates = FixedZones::utc();
        let user = User::new("u-1".into(), "alice".into(), "Alice".into());
        dates.set_zone("u-1", FixedOffset::east_opt(3 * 3600).unwrap());
        assert_eq!(
            dates.time_zone_for(&user),
            FixedOffset::east_opt(3 * 3600).unwrap()
        );
    }
}
