//! Command handlers.
//!
//! Each mutating handler loads its subject, asks the voter, validates, writes
//! inside one transaction and then emits an activity event.

pub mod auth;
pub mod fields;
pub mod groups;
pub mod health;
pub mod projects;
pub mod states;
pub mod templates;
pub mod users;
pub mod workflow;

use axum::http::HeaderMap;
use sqlx::SqliteConnection;

use crate::app::AppState;
use crate::authz::{ensure_granted, Action, Subject, TemplateSubject};
use crate::db::grants::load_template_permissions;
use crate::errors::AppResult;
use crate::events::{log_activity_with_context, Loggable, RequestContext};
use crate::jwt::AuthUser;
use crate::models::template::Template;

/// Emits `<entity>.<action>` attributed to the calling user.
pub(crate) fn audit<T: Loggable>(
    state: &AppState,
    auth: &AuthUser,
    headers: &HeaderMap,
    action: &str,
    entity: &T,
    old: Option<&T>,
) {
    log_activity_with_context(
        &state.event_bus,
        action,
        Some(auth.user_id),
        entity,
        old,
        Some(RequestContext::from_headers(headers)),
    );
}

/// Reads of a template's states, edges and fields need the same grant as the template itself.
pub(crate) async fn ensure_template_visible(
    state: &AppState,
    conn: &mut SqliteConnection,
    auth: &AuthUser,
    template: &Template,
) -> AppResult<()> {
    let permissions = load_template_permissions(conn, template.id).await?;
    let subject = Subject::Template(TemplateSubject::new(template).with_permissions(&permissions));
    ensure_granted(state.voter.as_ref(), &auth.principal, Action::ViewTemplate, &subject)
}

/// Trims a user-supplied name; blank input stays blank so validation reports it.
pub(crate) fn clean(value: &str) -> String {
    value.trim().to_string()
}

/// Empty optional strings are stored as NULL.
pub(crate) fn clean_opt(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

