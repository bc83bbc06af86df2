use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::validation::{check_length, Violation};

pub const MAX_EMAIL: usize = 254;
pub const MAX_FULLNAME: usize = 50;
pub const THEMES: &[&str] = &["azure", "emerald", "mars", "nord", "solarized"];
pub const DEFAULT_LOCALE: &str = "en_US";
pub const DEFAULT_THEME: &str = "azure";
pub const DEFAULT_TIMEZONE: &str = "UTC";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub fullname: String,
    pub is_admin: bool,
    pub is_disabled: bool,
    pub locale: String,
    pub theme: String,
    pub timezone: String,
    pub auth_failures: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl crate::events::Loggable for User {
    fn entity_type() -> &'static str { "user" }
    fn subject_id(&self) -> Uuid { self.id }
}

impl User {
    /// Locked out by too many failed logins.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map_or(false, |until| until > now)
    }

    pub fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        check_length(&mut violations, "email", &self.email, MAX_EMAIL);
        if !self.email.contains('@') {
            violations.push(Violation::new("email", &self.email, "This value is not a valid email address."));
        }
        check_length(&mut violations, "fullname", &self.fullname, MAX_FULLNAME);
        check_length(&mut violations, "locale", &self.locale, 5);
        if !THEMES.contains(&self.theme.as_str()) {
            violations.push(Violation::new("theme", &self.theme, "The value you selected is not a valid choice."));
        }
        check_length(&mut violations, "timezone", &self.timezone, 50);
        violations
    }
}

#[derive(Debug, Clone)]
pub struct DbUser {
    pub id: Uuid,
    pub email: String,
    pub fullname: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub is_disabled: bool,
    pub locale: String,
    pub theme: String,
    pub timezone: String,
    pub auth_failures: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbUser> for User {
    fn from(value: DbUser) -> Self {
        User {
            id: value.id,
            email: value.email,
            fullname: value.fullname,
            is_admin: value.is_admin,
            is_disabled: value.is_disabled,
            locale: value.locale,
            theme: value.theme,
            timezone: value.timezone,
            auth_failures: value.auth_failures,
            locked_until: value.locked_until,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserCreateRequest {
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "Ada Lovelace")]
    pub fullname: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_disabled: bool,
    pub locale: Option<String>,
    pub theme: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserUpdateRequest {
    pub email: Option<String>,
    pub fullname: Option<String>,
    pub is_admin: Option<bool>,
    pub locale: Option<String>,
    pub theme: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetPasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}
