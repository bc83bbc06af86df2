use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::Loggable;
use crate::models::dictionary::{SystemRole, TemplatePermission};
use crate::models::validation::{check_length, check_optional_length, Violation};

pub const MAX_NAME: usize = 50;
pub const MAX_PREFIX: usize = 5;
pub const MAX_DESCRIPTION: usize = 100;
pub const MAX_DAYS: i32 = 100;

/// Issue template of a project.
///
/// `is_locked` means the template is opened for structural editing: its
/// states, fields and transitions may change, and no new issues may be filed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Template {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub prefix: String,
    pub description: Option<String>,
    /// Days after which an open issue is considered critical.
    pub critical_age: Option<i32>,
    /// Days after which a closed issue can no longer be edited.
    pub frozen_time: Option<i32>,
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Template {
    fn entity_type() -> &'static str { "template" }
    fn subject_id(&self) -> Uuid { self.id }
}

impl Template {
    pub fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        check_length(&mut violations, "name", &self.name, MAX_NAME);
        check_length(&mut violations, "prefix", &self.prefix, MAX_PREFIX);
        check_optional_length(&mut violations, "description", self.description.as_deref(), MAX_DESCRIPTION);

        for (property, value) in [("critical_age", self.critical_age), ("frozen_time", self.frozen_time)] {
            if let Some(days) = value {
                if !(1..=MAX_DAYS).contains(&days) {
                    violations.push(Violation::new(
                        property,
                        days,
                        format!("This value should be between 1 and {MAX_DAYS}."),
                    ));
                }
            }
        }

        violations
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TemplateCreateRequest {
    pub project_id: Uuid,
    #[schema(example = "Bug report")]
    pub name: String,
    #[schema(example = "BUG")]
    pub prefix: String,
    pub description: Option<String>,
    pub critical_age: Option<i32>,
    pub frozen_time: Option<i32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TemplateUpdateRequest {
    pub name: Option<String>,
    pub prefix: Option<String>,
    pub description: Option<String>,
    pub critical_age: Option<i32>,
    pub frozen_time: Option<i32>,
}

/// Grantees holding a single template permission.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TemplatePermissionGrants {
    pub permission: TemplatePermission,
    pub roles: Vec<SystemRole>,
    pub groups: Vec<Uuid>,
}

/// Replaces the grantees of one permission; omitted lists are left untouched.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SetTemplatePermissionRequest {
    pub permission: TemplatePermission,
    pub roles: Option<Vec<SystemRole>>,
    pub groups: Option<Vec<Uuid>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> Template {
        let now = Utc::now();
        Template {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            name: "Bug report".to_string(),
            prefix: "BUG".to_string(),
            description: None,
            critical_age: Some(5),
            frozen_time: None,
            is_locked: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn valid_template_has_no_violations() {
        assert!(template().validate().is_empty());
    }

    #[test]
    fn prefix_and_age_are_bounded() {
        let mut t = template();
        t.prefix = "TOOLONG".to_string();
        t.frozen_time = Some(0);
        let violations = t.validate();
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].property, "prefix");
        assert_eq!(violations[1].property, "frozen_time");
    }
}
