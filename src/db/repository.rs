//! Load-by-id and listing queries.
//!
//! Every function takes a `SqliteConnection` so handlers can run the same
//! reads on a pooled connection or inside an open transaction.

use std::collections::HashSet;

use sqlx::SqliteConnection;
use uuid::Uuid;

use super::row_parsers::{
    db_user_from_row, field_from_row, group_from_row, list_item_from_row, project_from_row,
    state_from_row, template_from_row,
};
use crate::authz::Principal;
use crate::errors::{AppError, AppResult};
use crate::models::dictionary::StateType;
use crate::models::field::{Field, ListItem};
use crate::models::group::Group;
use crate::models::project::Project;
use crate::models::state::State;
use crate::models::template::Template;
use crate::models::user::DbUser;

const PROJECT_COLUMNS: &str = "id, name, description, is_suspended, created_at, updated_at";
const TEMPLATE_COLUMNS: &str =
    "id, project_id, name, prefix, description, critical_age, frozen_time, is_locked, created_at, updated_at";
const STATE_COLUMNS: &str = "id, template_id, name, type, responsible, created_at, updated_at";
const FIELD_COLUMNS: &str =
    "id, state_id, name, type, description, is_required, parameters, created_at, updated_at";
const GROUP_COLUMNS: &str = "id, project_id, name, description, created_at, updated_at";
const USER_COLUMNS: &str = "id, email, fullname, password_hash, is_admin, is_disabled, locale, theme, timezone, auth_failures, locked_until, created_at, updated_at";

pub async fn fetch_project(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Project> {
    let row = sqlx::query(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("project not found"))?;
    project_from_row(&row)
}

pub async fn list_projects(conn: &mut SqliteConnection) -> AppResult<Vec<Project>> {
    let rows = sqlx::query(&format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY name"))
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(project_from_row).collect()
}

pub async fn fetch_template(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Template> {
    let row = sqlx::query(&format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("template not found"))?;
    template_from_row(&row)
}

pub async fn list_templates(conn: &mut SqliteConnection, project_id: Uuid) -> AppResult<Vec<Template>> {
    let rows = sqlx::query(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE project_id = ? ORDER BY name"
    ))
    .bind(project_id.to_string())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(template_from_row).collect()
}

pub async fn fetch_state(conn: &mut SqliteConnection, id: Uuid) -> AppResult<State> {
    let row = sqlx::query(&format!("SELECT {STATE_COLUMNS} FROM states WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("state not found"))?;
    state_from_row(&row)
}

pub async fn list_states(conn: &mut SqliteConnection, template_id: Uuid) -> AppResult<Vec<State>> {
    let rows = sqlx::query(&format!(
        "SELECT {STATE_COLUMNS} FROM states WHERE template_id = ? ORDER BY name"
    ))
    .bind(template_id.to_string())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(state_from_row).collect()
}

pub async fn initial_state(conn: &mut SqliteConnection, template_id: Uuid) -> AppResult<Option<State>> {
    let row = sqlx::query(&format!(
        "SELECT {STATE_COLUMNS} FROM states WHERE template_id = ? AND type = ?"
    ))
    .bind(template_id.to_string())
    .bind(StateType::Initial.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(state_from_row).transpose()
}

/// Loads a state together with its template.
pub async fn fetch_state_with_template(
    conn: &mut SqliteConnection,
    state_id: Uuid,
) -> AppResult<(State, Template)> {
    let state = fetch_state(conn, state_id).await?;
    let template = fetch_template(conn, state.template_id).await?;
    Ok((state, template))
}

pub async fn fetch_field(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Field> {
    let row = sqlx::query(&format!("SELECT {FIELD_COLUMNS} FROM fields WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("field not found"))?;
    field_from_row(&row)
}

/// Loads a field with the state and template it belongs to.
pub async fn fetch_field_with_template(
    conn: &mut SqliteConnection,
    field_id: Uuid,
) -> AppResult<(Field, State, Template)> {
    let field = fetch_field(conn, field_id).await?;
    let (state, template) = fetch_state_with_template(conn, field.state_id).await?;
    Ok((field, state, template))
}

pub async fn list_fields(conn: &mut SqliteConnection, state_id: Uuid) -> AppResult<Vec<Field>> {
    let rows = sqlx::query(&format!(
        "SELECT {FIELD_COLUMNS} FROM fields WHERE state_id = ? ORDER BY name"
    ))
    .bind(state_id.to_string())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(field_from_row).collect()
}

pub async fn fetch_list_item(conn: &mut SqliteConnection, field_id: Uuid, id: Uuid) -> AppResult<ListItem> {
    let row = sqlx::query("SELECT id, field_id, value, text FROM list_items WHERE id = ? AND field_id = ?")
        .bind(id.to_string())
        .bind(field_id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("list item not found"))?;
    list_item_from_row(&row)
}

pub async fn list_items(conn: &mut SqliteConnection, field_id: Uuid) -> AppResult<Vec<ListItem>> {
    let rows = sqlx::query("SELECT id, field_id, value, text FROM list_items WHERE field_id = ? ORDER BY value")
        .bind(field_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(list_item_from_row).collect()
}

pub async fn list_item_ids(conn: &mut SqliteConnection, field_id: Uuid) -> AppResult<HashSet<Uuid>> {
    Ok(list_items(conn, field_id).await?.into_iter().map(|item| item.id).collect())
}

pub async fn fetch_group(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Group> {
    let row = sqlx::query(&format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("group not found"))?;
    group_from_row(&row)
}

/// Global groups plus, when given, the groups of one project.
pub async fn list_groups(conn: &mut SqliteConnection, project_id: Option<Uuid>) -> AppResult<Vec<Group>> {
    let rows = match project_id {
        Some(project_id) => {
            sqlx::query(&format!(
                "SELECT {GROUP_COLUMNS} FROM groups WHERE project_id IS NULL OR project_id = ? ORDER BY name"
            ))
            .bind(project_id.to_string())
            .fetch_all(&mut *conn)
            .await?
        }
        None => {
            sqlx::query(&format!("SELECT {GROUP_COLUMNS} FROM groups ORDER BY name"))
                .fetch_all(&mut *conn)
                .await?
        }
    };
    rows.iter().map(group_from_row).collect()
}

/// Ids of the groups that may be granted within `project_id`.
pub async fn visible_group_ids(conn: &mut SqliteConnection, project_id: Uuid) -> AppResult<HashSet<Uuid>> {
    Ok(list_groups(conn, Some(project_id))
        .await?
        .into_iter()
        .map(|group| group.id)
        .collect())
}

pub async fn group_members(conn: &mut SqliteConnection, group_id: Uuid) -> AppResult<Vec<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT user_id FROM membership WHERE group_id = ? ORDER BY user_id")
        .bind(group_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
    ids.iter().map(|s| parse_uuid(s)).collect()
}

pub async fn user_group_ids(conn: &mut SqliteConnection, user_id: Uuid) -> AppResult<HashSet<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT group_id FROM membership WHERE user_id = ?")
        .bind(user_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
    ids.iter().map(|s| parse_uuid(s)).collect()
}

pub async fn fetch_user(conn: &mut SqliteConnection, id: Uuid) -> AppResult<DbUser> {
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    db_user_from_row(&row)
}

pub async fn fetch_user_by_email(conn: &mut SqliteConnection, email: &str) -> AppResult<Option<DbUser>> {
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
        .bind(email)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(db_user_from_row).transpose()
}

pub async fn list_users(conn: &mut SqliteConnection) -> AppResult<Vec<DbUser>> {
    let rows = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY fullname"))
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(db_user_from_row).collect()
}

pub async fn existing_user_ids(conn: &mut SqliteConnection) -> AppResult<HashSet<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM users")
        .fetch_all(&mut *conn)
        .await?;
    ids.iter().map(|s| parse_uuid(s)).collect()
}

/// Resolves the principal behind a token subject. `None` when the user no
/// longer exists.
pub async fn load_principal(conn: &mut SqliteConnection, user_id: Uuid) -> AppResult<Option<Principal>> {
    let user = match fetch_user(conn, user_id).await {
        Ok(user) => user,
        Err(AppError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    let groups = user_group_ids(conn, user_id).await?;

    Ok(Some(
        Principal::new(user.id)
            .with_admin(user.is_admin)
            .with_disabled(user.is_disabled)
            .with_groups(groups),
    ))
}

pub(crate) fn parse_uuid(s: &str) -> AppResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))
}
