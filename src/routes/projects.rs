use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

use super::{audit, clean, clean_opt};
use crate::app::AppState;
use crate::authz::{ensure_granted, Action, Subject};
use crate::db::repository::{fetch_project, list_projects as load_projects};
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::project::{Project, ProjectCreateRequest, ProjectUpdateRequest};
use crate::models::validation::ensure_valid;
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/api/projects",
    tag = "Projects",
    responses((status = 200, description = "List projects", body = [Project]))
)]
pub async fn list_projects(State(state): State<AppState>, _auth: AuthUser) -> AppResult<Json<Vec<Project>>> {
    let mut conn = state.pool.acquire().await?;
    Ok(Json(load_projects(&mut conn).await?))
}

#[utoipa::path(
    post,
    path = "/api/projects",
    tag = "Projects",
    request_body = ProjectCreateRequest,
    responses(
        (status = 201, description = "Project created", body = Project),
        (status = 403, description = "Admin required"),
        (status = 409, description = "Name already in use")
    )
)]
pub async fn create_project(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<ProjectCreateRequest>,
) -> AppResult<(StatusCode, Json<Project>)> {
    ensure_granted(state.voter.as_ref(), &auth.principal, Action::CreateProject, &Subject::None)?;

    let now = utc_now();
    let project = Project {
        id: Uuid::new_v4(),
        name: clean(&payload.name),
        description: clean_opt(payload.description),
        is_suspended: payload.is_suspended,
        created_at: now,
        updated_at: now,
    };
    ensure_valid(project.validate())?;

    let mut tx = state.begin_write().await?;
    sqlx::query(
        "INSERT INTO projects (id, name, description, is_suspended, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(project.id.to_string())
    .bind(&project.name)
    .bind(&project.description)
    .bind(project.is_suspended)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::from_write(e, "project"))?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "created", &project, None);
    Ok((StatusCode::CREATED, Json(project)))
}

#[utoipa::path(
    get,
    path = "/api/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Project detail", body = Project))
)]
pub async fn get_project(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Project>> {
    let mut conn = state.pool.acquire().await?;
    Ok(Json(fetch_project(&mut conn, id).await?))
}

#[utoipa::path(
    put,
    path = "/api/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = ProjectUpdateRequest,
    responses((status = 200, description = "Project updated", body = Project))
)]
pub async fn update_project(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProjectUpdateRequest>,
) -> AppResult<Json<Project>> {
    let mut tx = state.begin_write().await?;
    let old = fetch_project(&mut tx, id).await?;
    ensure_granted(state.voter.as_ref(), &auth.principal, Action::UpdateProject, &Subject::Project(&old))?;

    let mut project = old.clone();
    if let Some(name) = payload.name.as_deref() {
        project.name = clean(name);
    }
    if payload.description.is_some() {
        project.description = clean_opt(payload.description);
    }
    project.updated_at = utc_now();
    ensure_valid(project.validate())?;

    sqlx::query("UPDATE projects SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.updated_at)
        .bind(project.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::from_write(e, "project"))?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "updated", &project, Some(&old));
    Ok(Json(project))
}

#[utoipa::path(
    delete,
    path = "/api/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 204, description = "Project deleted with its templates and groups"))
)]
pub async fn delete_project(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut tx = state.begin_write().await?;
    let project = fetch_project(&mut tx, id).await?;
    ensure_granted(state.voter.as_ref(), &auth.principal, Action::DeleteProject, &Subject::Project(&project))?;

    sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "deleted", &project, None);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/projects/{id}/suspend",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Project suspended", body = Project))
)]
pub async fn suspend_project(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Project>> {
    toggle_suspension(state, auth, headers, id, true).await
}

#[utoipa::path(
    post,
    path = "/api/projects/{id}/resume",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Project resumed", body = Project))
)]
pub async fn resume_project(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Project>> {
    toggle_suspension(state, auth, headers, id, false).await
}

async fn toggle_suspension(
    state: AppState,
    auth: AuthUser,
    headers: HeaderMap,
    id: Uuid,
    suspend: bool,
) -> AppResult<Json<Project>> {
    let (action, event) = if suspend {
        (Action::SuspendProject, "suspended")
    } else {
        (Action::ResumeProject, "resumed")
    };

    let mut tx = state.begin_write().await?;
    let mut project = fetch_project(&mut tx, id).await?;
    ensure_granted(state.voter.as_ref(), &auth.principal, action, &Subject::Project(&project))?;

    project.is_suspended = suspend;
    project.updated_at = utc_now();
    sqlx::query("UPDATE projects SET is_suspended = ?, updated_at = ? WHERE id = ?")
        .bind(project.is_suspended)
        .bind(project.updated_at)
        .bind(project.id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&state, &auth, &headers, event, &project, None);
    Ok(Json(project))
}
