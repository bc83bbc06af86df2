use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::events::{Loggable, Severity};
use crate::models::validation::{check_length, check_optional_length, Violation};

pub const MAX_NAME: usize = 25;
pub const MAX_DESCRIPTION: usize = 100;

/// A set of users. Groups without a project are global.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Group {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Group {
    fn entity_type() -> &'static str { "group" }
    fn subject_id(&self) -> Uuid { self.id }
}

impl Group {
    pub fn is_global(&self) -> bool {
        self.project_id.is_none()
    }

    /// Whether the group may be granted anything inside `project_id`.
    pub fn is_visible_in(&self, project_id: Uuid) -> bool {
        self.project_id.map_or(true, |own| own == project_id)
    }

    pub fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        check_length(&mut violations, "name", &self.name, MAX_NAME);
        check_optional_length(&mut violations, "description", self.description.as_deref(), MAX_DESCRIPTION);
        violations
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Membership {
    pub group_id: Uuid,
    pub users: Vec<Uuid>,
}

impl Loggable for Membership {
    fn entity_type() -> &'static str { "membership" }
    fn subject_id(&self) -> Uuid { self.group_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GroupCreateRequest {
    pub project_id: Option<Uuid>,
    #[schema(example = "Developers")]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GroupUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetMembersRequest {
    pub users: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct GroupListQuery {
    pub project_id: Option<Uuid>,
}
