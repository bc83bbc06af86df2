//! Permission model.
//!
//! A grant ties a permission to a grantee, which is either a system role or a
//! group. Grant sets are always replaced wholesale per permission: the caller
//! passes the complete new list and receives the diff to persist.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::events::{Loggable, Severity};
use crate::models::dictionary::{FieldPermission, SystemRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Grantee {
    Role(SystemRole),
    Group(Uuid),
}

/// Roles and group memberships a principal holds for one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GranteeContext {
    pub roles: HashSet<SystemRole>,
    pub groups: HashSet<Uuid>,
}

impl GranteeContext {
    pub fn new(
        roles: impl IntoIterator<Item = SystemRole>,
        groups: impl IntoIterator<Item = Uuid>,
    ) -> Self {
        Self {
            roles: roles.into_iter().collect(),
            groups: groups.into_iter().collect(),
        }
    }

    pub fn matches(&self, grantee: &Grantee) -> bool {
        match grantee {
            Grantee::Role(role) => self.roles.contains(role),
            Grantee::Group(group) => self.groups.contains(group),
        }
    }

    pub fn matches_any<'a>(&self, grantees: impl IntoIterator<Item = &'a Grantee>) -> bool {
        grantees.into_iter().any(|g| self.matches(g))
    }
}

/// Rows to delete and rows to insert to move from one grant set to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantDiff<T> {
    pub removed: Vec<T>,
    pub added: Vec<T>,
}

impl<T: Ord + Clone> GrantDiff<T> {
    pub fn between(existing: &BTreeSet<T>, requested: &BTreeSet<T>) -> Self {
        Self {
            removed: existing.difference(requested).cloned().collect(),
            added: requested.difference(existing).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Grants of every permission value `P` on a single entity.
#[derive(Debug, Clone)]
pub struct PermissionTable<P> {
    grants: BTreeMap<P, BTreeSet<Grantee>>,
}

impl<P> Default for PermissionTable<P> {
    fn default() -> Self {
        Self { grants: BTreeMap::new() }
    }
}

impl<P: Copy + Ord> PermissionTable<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_grants(grants: impl IntoIterator<Item = (P, Grantee)>) -> Self {
        let mut table = Self::new();
        for (permission, grantee) in grants {
            table.grants.entry(permission).or_default().insert(grantee);
        }
        table
    }

    pub fn roles(&self, permission: P) -> BTreeSet<SystemRole> {
        self.grantees(permission)
            .filter_map(|g| match g {
                Grantee::Role(role) => Some(*role),
                Grantee::Group(_) => None,
            })
            .collect()
    }

    pub fn groups(&self, permission: P) -> BTreeSet<Uuid> {
        self.grantees(permission)
            .filter_map(|g| match g {
                Grantee::Group(id) => Some(*id),
                Grantee::Role(_) => None,
            })
            .collect()
    }

    fn grantees(&self, permission: P) -> impl Iterator<Item = &Grantee> {
        self.grants.get(&permission).into_iter().flatten()
    }

    /// Replaces the role grants of `permission`, leaving its group grants and
    /// every other permission untouched.
    pub fn set_roles_permission(
        &mut self,
        permission: P,
        roles: impl IntoIterator<Item = SystemRole>,
    ) -> GrantDiff<SystemRole> {
        let requested: BTreeSet<SystemRole> = roles.into_iter().collect();
        let diff = GrantDiff::between(&self.roles(permission), &requested);
        self.apply(permission, &diff.removed, &diff.added, |r| Grantee::Role(*r));
        diff
    }

    /// Replaces the group grants of `permission`. Ids outside `known_groups`
    /// are dropped without error.
    pub fn set_groups_permission(
        &mut self,
        permission: P,
        groups: impl IntoIterator<Item = Uuid>,
        known_groups: &HashSet<Uuid>,
    ) -> GrantDiff<Uuid> {
        let requested: BTreeSet<Uuid> = groups
            .into_iter()
            .filter(|id| known_groups.contains(id))
            .collect();
        let diff = GrantDiff::between(&self.groups(permission), &requested);
        self.apply(permission, &diff.removed, &diff.added, |g| Grantee::Group(*g));
        diff
    }

    fn apply<T>(&mut self, permission: P, removed: &[T], added: &[T], to_grantee: impl Fn(&T) -> Grantee) {
        let set = self.grants.entry(permission).or_default();
        for item in removed {
            set.remove(&to_grantee(item));
        }
        for item in added {
            set.insert(to_grantee(item));
        }
        if set.is_empty() {
            self.grants.remove(&permission);
        }
    }

    pub fn has_permission(&self, permission: P, ctx: &GranteeContext) -> bool {
        ctx.matches_any(self.grantees(permission))
    }

    /// All permissions the context holds on this entity.
    pub fn permissions_of(&self, ctx: &GranteeContext) -> BTreeSet<P> {
        self.grants
            .iter()
            .filter(|(_, grantees)| ctx.matches_any(grantees.iter()))
            .map(|(permission, _)| *permission)
            .collect()
    }
}

/// Effective access to a field for display: read-write wins over read-only.
pub fn field_access(
    table: &PermissionTable<FieldPermission>,
    ctx: &GranteeContext,
) -> Option<FieldPermission> {
    if table.has_permission(FieldPermission::ReadWrite, ctx) {
        Some(FieldPermission::ReadWrite)
    } else if table.has_permission(FieldPermission::ReadOnly, ctx) {
        Some(FieldPermission::ReadOnly)
    } else {
        None
    }
}

/// Audit record of a grant-set replacement.
#[derive(Debug, Clone, Serialize)]
pub struct GrantChange {
    pub subject_id: Uuid,
    /// What the grants are attached to, e.g. `template.permission` or `state.transition`.
    pub scope: &'static str,
    pub key: String,
    pub removed: Vec<Grantee>,
    pub added: Vec<Grantee>,
}

impl GrantChange {
    pub fn new(subject_id: Uuid, scope: &'static str, key: impl Into<String>) -> Self {
        Self {
            subject_id,
            scope,
            key: key.into(),
            removed: Vec::new(),
            added: Vec::new(),
        }
    }

    pub fn roles(subject_id: Uuid, scope: &'static str, key: impl Into<String>, diff: &GrantDiff<SystemRole>) -> Self {
        Self {
            subject_id,
            scope,
            key: key.into(),
            removed: diff.removed.iter().map(|r| Grantee::Role(*r)).collect(),
            added: diff.added.iter().map(|r| Grantee::Role(*r)).collect(),
        }
    }

    pub fn groups(subject_id: Uuid, scope: &'static str, key: impl Into<String>, diff: &GrantDiff<Uuid>) -> Self {
        Self {
            subject_id,
            scope,
            key: key.into(),
            removed: diff.removed.iter().map(|g| Grantee::Group(*g)).collect(),
            added: diff.added.iter().map(|g| Grantee::Group(*g)).collect(),
        }
    }

    pub fn merge(mut self, other: GrantChange) -> Self {
        self.removed.extend(other.removed);
        self.added.extend(other.added);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

impl Loggable for GrantChange {
    fn entity_type() -> &'static str { "grant" }
    fn subject_id(&self) -> Uuid { self.subject_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dictionary::TemplatePermission;

    use SystemRole::{Anyone, Author, Responsible};
    use TemplatePermission::{CreateIssues, EditIssues, ViewIssues};

    #[test]
    fn replacing_roles_leaves_exactly_the_new_set() {
        let mut table = PermissionTable::new();
        table.set_roles_permission(EditIssues, [Anyone, Author]);
        let diff = table.set_roles_permission(EditIssues, [Author, Responsible]);

        assert_eq!(diff.removed, vec![Anyone]);
        assert_eq!(diff.added, vec![Responsible]);
        assert_eq!(table.roles(EditIssues), BTreeSet::from([Author, Responsible]));
    }

    #[test]
    fn replacing_one_permission_does_not_touch_others() {
        let group = Uuid::new_v4();
        let known = HashSet::from([group]);
        let mut table = PermissionTable::new();
        table.set_roles_permission(ViewIssues, [Anyone]);
        table.set_groups_permission(EditIssues, [group], &known);

        table.set_roles_permission(EditIssues, [Author]);
        table.set_roles_permission(EditIssues, [Responsible]);

        assert_eq!(table.roles(ViewIssues), BTreeSet::from([Anyone]));
        assert_eq!(table.groups(EditIssues), BTreeSet::from([group]));
        assert_eq!(table.roles(EditIssues), BTreeSet::from([Responsible]));
    }

    #[test]
    fn setting_the_same_roles_twice_is_a_no_op() {
        let mut table = PermissionTable::new();
        table.set_roles_permission(CreateIssues, [Author]);
        let diff = table.set_roles_permission(CreateIssues, [Author, Author]);
        assert!(diff.is_empty());
    }

    #[test]
    fn unknown_groups_are_dropped() {
        let known_group = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let mut table = PermissionTable::new();

        let diff = table.set_groups_permission(CreateIssues, [known_group, stranger], &HashSet::from([known_group]));

        assert_eq!(diff.added, vec![known_group]);
        assert_eq!(table.groups(CreateIssues), BTreeSet::from([known_group]));
    }

    #[test]
    fn has_permission_matches_roles_or_groups() {
        let devs = Uuid::new_v4();
        let mut table = PermissionTable::new();
        table.set_roles_permission(ViewIssues, [Author]);
        table.set_groups_permission(EditIssues, [devs], &HashSet::from([devs]));

        let author = GranteeContext::new([Author], []);
        let developer = GranteeContext::new([Anyone], [devs]);

        assert!(table.has_permission(ViewIssues, &author));
        assert!(!table.has_permission(EditIssues, &author));
        assert!(table.has_permission(EditIssues, &developer));
        assert!(!table.has_permission(ViewIssues, &developer));
        assert_eq!(table.permissions_of(&developer), BTreeSet::from([EditIssues]));
    }

    #[test]
    fn read_write_outranks_read_only_for_display() {
        let mut table = PermissionTable::new();
        table.set_roles_permission(FieldPermission::ReadOnly, [Anyone]);
        table.set_roles_permission(FieldPermission::ReadWrite, [Responsible]);

        let anyone = GranteeContext::new([Anyone], []);
        let responsible = GranteeContext::new([Anyone, Responsible], []);

        assert_eq!(field_access(&table, &anyone), Some(FieldPermission::ReadOnly));
        assert_eq!(field_access(&table, &responsible), Some(FieldPermission::ReadWrite));
        assert_eq!(field_access(&table, &GranteeContext::default()), None);
        // Storage keeps the grants apart.
        assert!(!table.has_permission(FieldPermission::ReadOnly, &GranteeContext::new([Responsible], [])));
    }
}
