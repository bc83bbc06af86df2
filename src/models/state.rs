use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::Loggable;
use crate::models::dictionary::{StateResponsible, StateType, SystemRole};
use crate::models::validation::{check_length, Violation};

pub const MAX_NAME: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct State {
    pub id: Uuid,
    pub template_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub state_type: StateType,
    pub responsible: StateResponsible,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for State {
    fn entity_type() -> &'static str { "state" }
    fn subject_id(&self) -> Uuid { self.id }
}

impl State {
    pub fn is_final(&self) -> bool {
        self.state_type.is_final()
    }

    pub fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        check_length(&mut violations, "name", &self.name, MAX_NAME);
        violations
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StateCreateRequest {
    pub template_id: Uuid,
    #[schema(example = "Assigned")]
    pub name: String,
    #[serde(rename = "type")]
    pub state_type: StateType,
    /// Defaults to `remove` for final states and `keep` otherwise.
    pub responsible: Option<StateResponsible>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StateUpdateRequest {
    pub name: Option<String>,
    pub responsible: Option<StateResponsible>,
}

/// Grantees allowed to move an issue along one edge.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransitionGrants {
    pub to_state_id: Uuid,
    pub roles: Vec<SystemRole>,
    pub groups: Vec<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetTransitionRequest {
    pub to_state_id: Uuid,
    pub roles: Option<Vec<SystemRole>>,
    pub groups: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetResponsibleGroupsRequest {
    pub groups: Vec<Uuid>,
}
