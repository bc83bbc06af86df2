use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::Loggable;
use crate::models::validation::{check_length, check_optional_length, Violation};

pub const MAX_NAME: usize = 50;
pub const MAX_DESCRIPTION: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_suspended: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Project {
    fn entity_type() -> &'static str { "project" }
    fn subject_id(&self) -> Uuid { self.id }
}

impl Project {
    pub fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        check_length(&mut violations, "name", &self.name, MAX_NAME);
        check_optional_length(&mut violations, "description", self.description.as_deref(), MAX_DESCRIPTION);
        violations
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectCreateRequest {
    #[schema(example = "Support Desk")]
    pub name: String,
    #[schema(example = "Customer support requests")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_suspended: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectUpdateRequest {
    #[schema(example = "Support Desk")]
    pub name: Option<String>,
    pub description: Option<String>,
}
