use std::collections::HashSet;

use uuid::Uuid;

use crate::models::dictionary::SystemRole;
use crate::workflow::GranteeContext;

/// Principal represents the authenticated user with their resolved grantees.
///
/// `roles` always contains [`SystemRole::Anyone`]; issue-specific roles such
/// as author or responsible are added per evaluation.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub is_admin: bool,
    pub is_disabled: bool,
    pub roles: HashSet<SystemRole>,
    pub groups: HashSet<Uuid>,
}

impl Principal {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            is_admin: false,
            is_disabled: false,
            roles: HashSet::from([SystemRole::Anyone]),
            groups: HashSet::new(),
        }
    }

    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    pub fn with_disabled(mut self, is_disabled: bool) -> Self {
        self.is_disabled = is_disabled;
        self
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = SystemRole>) -> Self {
        self.roles.extend(roles);
        self
    }

    pub fn with_groups(mut self, groups: impl IntoIterator<Item = Uuid>) -> Self {
        self.groups = groups.into_iter().collect();
        self
    }

    pub fn is_active(&self) -> bool {
        !self.is_disabled
    }

    pub fn is_admin(&self) -> bool {
        self.is_active() && self.is_admin
    }

    pub fn is_member_of(&self, group_id: Uuid) -> bool {
        self.groups.contains(&group_id)
    }

    /// Grantee context for this principal plus issue-specific roles.
    pub fn grantees(&self, contextual_roles: &[SystemRole]) -> GranteeContext {
        GranteeContext::new(
            self.roles.iter().chain(contextual_roles).copied(),
            self.groups.iter().copied(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyone_is_always_held() {
        let principal = Principal::new(Uuid::new_v4()).with_roles([SystemRole::Author]);
        assert!(principal.roles.contains(&SystemRole::Anyone));
        assert!(principal.roles.contains(&SystemRole::Author));
    }

    #[test]
    fn disabled_admin_is_not_admin() {
        let principal = Principal::new(Uuid::new_v4()).with_admin(true).with_disabled(true);
        assert!(!principal.is_admin());
    }

    #[test]
    fn grantees_merge_contextual_roles() {
        let group = Uuid::new_v4();
        let principal = Principal::new(Uuid::new_v4()).with_groups([group]);
        let ctx = principal.grantees(&[SystemRole::Responsible]);
        assert!(ctx.roles.contains(&SystemRole::Responsible));
        assert!(ctx.roles.contains(&SystemRole::Anyone));
        assert!(ctx.groups.contains(&group));
    }
}
