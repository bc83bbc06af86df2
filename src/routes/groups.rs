use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::{audit, clean, clean_opt};
use crate::app::AppState;
use crate::authz::{ensure_granted, Action, Subject};
use crate::db::grants;
use crate::db::repository::{self, existing_user_ids, fetch_group, fetch_project, group_members};
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::group::{Group, GroupCreateRequest, GroupListQuery, GroupUpdateRequest, Membership, SetMembersRequest};
use crate::models::validation::ensure_valid;
use crate::utils::utc_now;

/// Group names are unique among the global groups and within each project.
async fn ensure_unique_name(conn: &mut SqliteConnection, group: &Group) -> AppResult<()> {
    let taken: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM groups WHERE name = ? AND project_id IS ? AND id != ?")
        .bind(&group.name)
        .bind(group.project_id.map(|id| id.to_string()))
        .bind(group.id.to_string())
        .fetch_one(&mut *conn)
        .await?;
    if taken > 0 {
        return Err(AppError::conflict("group with this name already exists"));
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/api/groups",
    tag = "Groups",
    params(GroupListQuery),
    responses((status = 200, description = "Global groups, plus the project's groups when a project is given", body = [Group]))
)]
pub async fn list_groups(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<GroupListQuery>,
) -> AppResult<Json<Vec<Group>>> {
    let mut conn = state.pool.acquire().await?;
    Ok(Json(repository::list_groups(&mut conn, query.project_id).await?))
}

#[utoipa::path(
    post,
    path = "/api/groups",
    tag = "Groups",
    request_body = GroupCreateRequest,
    responses(
        (status = 201, description = "Group created", body = Group),
        (status = 409, description = "Name already used in this scope")
    )
)]
pub async fn create_group(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<GroupCreateRequest>,
) -> AppResult<(StatusCode, Json<Group>)> {
    ensure_granted(state.voter.as_ref(), &auth.principal, Action::CreateGroup, &Subject::None)?;

    let mut tx = state.begin_write().await?;
    if let Some(project_id) = payload.project_id {
        fetch_project(&mut tx, project_id).await?;
    }

    let now = utc_now();
    let group = Group {
        id: Uuid::new_v4(),
        project_id: payload.project_id,
        name: clean(&payload.name),
        description: clean_opt(payload.description),
        created_at: now,
        updated_at: now,
    };
    ensure_valid(group.validate())?;
    ensure_unique_name(&mut tx, &group).await?;

    sqlx::query(
        "INSERT INTO groups (id, project_id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(group.id.to_string())
    .bind(group.project_id.map(|id| id.to_string()))
    .bind(&group.name)
    .bind(&group.description)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "created", &group, None);
    Ok((StatusCode::CREATED, Json(group)))
}

#[utoipa::path(
    get,
    path = "/api/groups/{id}",
    tag = "Groups",
    params(("id" = Uuid, Path, description = "Group id")),
    responses((status = 200, description = "Group detail", body = Group))
)]
pub async fn get_group(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Group>> {
    let mut conn = state.pool.acquire().await?;
    Ok(Json(fetch_group(&mut conn, id).await?))
}

#[utoipa::path(
    put,
    path = "/api/groups/{id}",
    tag = "Groups",
    params(("id" = Uuid, Path, description = "Group id")),
    request_body = GroupUpdateRequest,
    responses((status = 200, description = "Group updated", body = Group))
)]
pub async fn update_group(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<GroupUpdateRequest>,
) -> AppResult<Json<Group>> {
    let mut tx = state.begin_write().await?;
    let old = fetch_group(&mut tx, id).await?;
    ensure_granted(state.voter.as_ref(), &auth.principal, Action::UpdateGroup, &Subject::Group(&old))?;

    let mut group = old.clone();
    if let Some(name) = payload.name.as_deref() {
        group.name = clean(name);
    }
    if payload.description.is_some() {
        group.description = clean_opt(payload.description);
    }
    group.updated_at = utc_now();
    ensure_valid(group.validate())?;
    ensure_unique_name(&mut tx, &group).await?;

    sqlx::query("UPDATE groups SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.updated_at)
        .bind(group.id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "updated", &group, Some(&old));
    Ok(Json(group))
}

#[utoipa::path(
    delete,
    path = "/api/groups/{id}",
    tag = "Groups",
    params(("id" = Uuid, Path, description = "Group id")),
    responses((status = 204, description = "Group deleted along with every grant it held"))
)]
pub async fn delete_group(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut tx = state.begin_write().await?;
    let group = fetch_group(&mut tx, id).await?;
    ensure_granted(state.voter.as_ref(), &auth.principal, Action::DeleteGroup, &Subject::Group(&group))?;

    sqlx::query("DELETE FROM groups WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "deleted", &group, None);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/groups/{id}/members",
    tag = "Groups",
    params(("id" = Uuid, Path, description = "Group id")),
    responses((status = 200, description = "Member user ids", body = Membership))
)]
pub async fn get_members(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Membership>> {
    let mut conn = state.pool.acquire().await?;
    fetch_group(&mut conn, id).await?;
    Ok(Json(Membership {
        group_id: id,
        users: group_members(&mut conn, id).await?,
    }))
}

#[utoipa::path(
    put,
    path = "/api/groups/{id}/members",
    tag = "Groups",
    params(("id" = Uuid, Path, description = "Group id")),
    request_body = SetMembersRequest,
    responses((status = 200, description = "Members after replacement; unknown users are ignored", body = Membership))
)]
pub async fn set_members(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetMembersRequest>,
) -> AppResult<Json<Membership>> {
    let mut tx = state.begin_write().await?;
    let group = fetch_group(&mut tx, id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::ManageGroupMembers,
        &Subject::Group(&group),
    )?;

    let known = existing_user_ids(&mut tx).await?;
    let diff = grants::set_members(&mut tx, group.id, payload.users, &known).await?;
    let membership = Membership {
        group_id: group.id,
        users: group_members(&mut tx, group.id).await?,
    };
    tx.commit().await?;

    if !diff.is_empty() {
        audit(&state, &auth, &headers, "changed", &membership, None);
    }
    Ok(Json(membership))
}
