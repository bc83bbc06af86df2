use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::Loggable;
use crate::models::dictionary::{FieldPermission, FieldType, SystemRole};
use crate::models::validation::{check_length, check_optional_length, Violation};

pub const MAX_NAME: usize = 50;
pub const MAX_DESCRIPTION: usize = 1000;
pub const MAX_ITEM_TEXT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Field {
    pub id: Uuid,
    pub state_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub description: Option<String>,
    pub is_required: bool,
    /// Normalized type-specific parameters, see `workflow::field_params`.
    #[schema(value_type = Object)]
    pub parameters: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Field {
    fn entity_type() -> &'static str { "field" }
    fn subject_id(&self) -> Uuid { self.id }
}

impl Field {
    pub fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        check_length(&mut violations, "name", &self.name, MAX_NAME);
        check_optional_length(&mut violations, "description", self.description.as_deref(), MAX_DESCRIPTION);
        violations
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FieldCreateRequest {
    pub state_id: Uuid,
    #[schema(example = "Severity")]
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub description: Option<String>,
    #[serde(default)]
    pub is_required: bool,
    #[schema(value_type = Object)]
    pub parameters: Option<Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FieldUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_required: Option<bool>,
    #[schema(value_type = Object)]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FieldPermissionGrants {
    pub permission: FieldPermission,
    pub roles: Vec<SystemRole>,
    pub groups: Vec<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetFieldPermissionRequest {
    pub permission: FieldPermission,
    pub roles: Option<Vec<SystemRole>>,
    pub groups: Option<Vec<Uuid>>,
}

/// Caller's effective access to a field; `None` means hidden.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FieldAccess {
    pub field_id: Uuid,
    pub access: Option<FieldPermission>,
}

/// Option of a `list` field.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListItem {
    pub id: Uuid,
    pub field_id: Uuid,
    pub value: i32,
    pub text: String,
}

impl Loggable for ListItem {
    fn entity_type() -> &'static str { "list_item" }
    fn subject_id(&self) -> Uuid { self.id }
}

impl ListItem {
    pub fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        if self.value < 1 {
            violations.push(Violation::new("value", self.value, "This value should be 1 or more."));
        }
        check_length(&mut violations, "text", &self.text, MAX_ITEM_TEXT);
        violations
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ListItemCreateRequest {
    pub value: i32,
    pub text: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ListItemUpdateRequest {
    pub value: Option<i32>,
    pub text: Option<String>,
}
