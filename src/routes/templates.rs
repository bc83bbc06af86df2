use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use super::{audit, clean, clean_opt};
use crate::app::AppState;
use crate::authz::{ensure_granted, Action, Subject, TemplateSubject};
use crate::db::grants::{load_template_permissions, set_template_groups, set_template_roles};
use crate::db::repository::{self, fetch_project, fetch_template, initial_state};
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::dictionary::TemplatePermission;
use crate::models::template::{
    SetTemplatePermissionRequest, Template, TemplateCreateRequest, TemplatePermissionGrants,
    TemplateUpdateRequest,
};
use crate::models::validation::ensure_valid;
use crate::utils::utc_now;
use crate::workflow::{GrantChange, PermissionTable};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TemplateListQuery {
    pub project_id: Uuid,
}

#[utoipa::path(
    get,
    path = "/api/templates",
    tag = "Templates",
    params(TemplateListQuery),
    responses((status = 200, description = "Templates of a project visible to the caller", body = [Template]))
)]
pub async fn list_templates(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<TemplateListQuery>,
) -> AppResult<Json<Vec<Template>>> {
    let mut conn = state.pool.acquire().await?;
    let templates = repository::list_templates(&mut conn, query.project_id).await?;

    let mut visible = Vec::with_capacity(templates.len());
    for template in templates {
        let permissions = load_template_permissions(&mut conn, template.id).await?;
        let subject = Subject::Template(TemplateSubject::new(&template).with_permissions(&permissions));
        if state.voter.is_granted(Some(&auth.principal), Action::ViewTemplate, &subject) {
            visible.push(template);
        }
    }
    Ok(Json(visible))
}

#[utoipa::path(
    post,
    path = "/api/templates",
    tag = "Templates",
    request_body = TemplateCreateRequest,
    responses(
        (status = 201, description = "Template created, opened for editing", body = Template),
        (status = 409, description = "Name or prefix already in use in the project")
    )
)]
pub async fn create_template(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<TemplateCreateRequest>,
) -> AppResult<(StatusCode, Json<Template>)> {
    let mut tx = state.begin_write().await?;
    let project = fetch_project(&mut tx, payload.project_id).await?;
    ensure_granted(state.voter.as_ref(), &auth.principal, Action::CreateTemplate, &Subject::Project(&project))?;

    let now = utc_now();
    let template = Template {
        id: Uuid::new_v4(),
        project_id: project.id,
        name: clean(&payload.name),
        prefix: clean(&payload.prefix),
        description: clean_opt(payload.description),
        critical_age: payload.critical_age,
        frozen_time: payload.frozen_time,
        is_locked: true,
        created_at: now,
        updated_at: now,
    };
    ensure_valid(template.validate())?;

    sqlx::query(
        "INSERT INTO templates (id, project_id, name, prefix, description, critical_age, frozen_time, is_locked, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(template.id.to_string())
    .bind(template.project_id.to_string())
    .bind(&template.name)
    .bind(&template.prefix)
    .bind(&template.description)
    .bind(template.critical_age)
    .bind(template.frozen_time)
    .bind(template.is_locked)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::from_write(e, "template with this name or prefix"))?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "created", &template, None);
    Ok((StatusCode::CREATED, Json(template)))
}

#[utoipa::path(
    get,
    path = "/api/templates/{id}",
    tag = "Templates",
    params(("id" = Uuid, Path, description = "Template id")),
    responses((status = 200, description = "Template detail", body = Template))
)]
pub async fn get_template(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Template>> {
    let mut conn = state.pool.acquire().await?;
    let template = fetch_template(&mut conn, id).await?;
    let permissions = load_template_permissions(&mut conn, id).await?;
    let subject = Subject::Template(TemplateSubject::new(&template).with_permissions(&permissions));
    ensure_granted(state.voter.as_ref(), &auth.principal, Action::ViewTemplate, &subject)?;
    Ok(Json(template))
}

#[utoipa::path(
    put,
    path = "/api/templates/{id}",
    tag = "Templates",
    params(("id" = Uuid, Path, description = "Template id")),
    request_body = TemplateUpdateRequest,
    responses((status = 200, description = "Template updated", body = Template))
)]
pub async fn update_template(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<TemplateUpdateRequest>,
) -> AppResult<Json<Template>> {
    let mut tx = state.begin_write().await?;
    let old = fetch_template(&mut tx, id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::UpdateTemplate,
        &Subject::Template(TemplateSubject::new(&old)),
    )?;

    let mut template = old.clone();
    if let Some(name) = payload.name.as_deref() {
        template.name = clean(name);
    }
    if let Some(prefix) = payload.prefix.as_deref() {
        template.prefix = clean(prefix);
    }
    if payload.description.is_some() {
        template.description = clean_opt(payload.description);
    }
    if payload.critical_age.is_some() {
        template.critical_age = payload.critical_age;
    }
    if payload.frozen_time.is_some() {
        template.frozen_time = payload.frozen_time;
    }
    template.updated_at = utc_now();
    ensure_valid(template.validate())?;

    sqlx::query(
        "UPDATE templates SET name = ?, prefix = ?, description = ?, critical_age = ?, frozen_time = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&template.name)
    .bind(&template.prefix)
    .bind(&template.description)
    .bind(template.critical_age)
    .bind(template.frozen_time)
    .bind(template.updated_at)
    .bind(template.id.to_string())
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::from_write(e, "template with this name or prefix"))?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "updated", &template, Some(&old));
    Ok(Json(template))
}

#[utoipa::path(
    delete,
    path = "/api/templates/{id}",
    tag = "Templates",
    params(("id" = Uuid, Path, description = "Template id")),
    responses((status = 204, description = "Template deleted with its states and fields"))
)]
pub async fn delete_template(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut tx = state.begin_write().await?;
    let template = fetch_template(&mut tx, id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::DeleteTemplate,
        &Subject::Template(TemplateSubject::new(&template)),
    )?;

    sqlx::query("DELETE FROM templates WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "deleted", &template, None);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/templates/{id}/lock",
    tag = "Templates",
    params(("id" = Uuid, Path, description = "Template id")),
    responses((status = 200, description = "Template opened for editing", body = Template))
)]
pub async fn lock_template(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Template>> {
    toggle_lock(state, auth, headers, id, true).await
}

#[utoipa::path(
    post,
    path = "/api/templates/{id}/unlock",
    tag = "Templates",
    params(("id" = Uuid, Path, description = "Template id")),
    responses(
        (status = 200, description = "Template released for use", body = Template),
        (status = 403, description = "Template has no initial state")
    )
)]
pub async fn unlock_template(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Template>> {
    toggle_lock(state, auth, headers, id, false).await
}

async fn toggle_lock(
    state: AppState,
    auth: AuthUser,
    headers: HeaderMap,
    id: Uuid,
    lock: bool,
) -> AppResult<Json<Template>> {
    let (action, event) = if lock {
        (Action::LockTemplate, "locked")
    } else {
        (Action::UnlockTemplate, "unlocked")
    };

    let mut tx = state.begin_write().await?;
    let mut template = fetch_template(&mut tx, id).await?;
    let has_initial_state = initial_state(&mut tx, id).await?.is_some();
    let subject = Subject::Template(TemplateSubject::new(&template).with_initial_state(has_initial_state));
    ensure_granted(state.voter.as_ref(), &auth.principal, action, &subject)?;

    template.is_locked = lock;
    template.updated_at = utc_now();
    sqlx::query("UPDATE templates SET is_locked = ?, updated_at = ? WHERE id = ?")
        .bind(template.is_locked)
        .bind(template.updated_at)
        .bind(template.id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&state, &auth, &headers, event, &template, None);
    Ok(Json(template))
}

fn grants_of(table: &PermissionTable<TemplatePermission>, permission: TemplatePermission) -> TemplatePermissionGrants {
    TemplatePermissionGrants {
        permission,
        roles: table.roles(permission).into_iter().collect(),
        groups: table.groups(permission).into_iter().collect(),
    }
}

#[utoipa::path(
    get,
    path = "/api/templates/{id}/permissions",
    tag = "Templates",
    params(("id" = Uuid, Path, description = "Template id")),
    responses((status = 200, description = "Grantees of every template permission", body = [TemplatePermissionGrants]))
)]
pub async fn get_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<TemplatePermissionGrants>>> {
    let mut conn = state.pool.acquire().await?;
    let template = fetch_template(&mut conn, id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::ManageTemplatePermissions,
        &Subject::Template(TemplateSubject::new(&template)),
    )?;

    let table = load_template_permissions(&mut conn, id).await?;
    Ok(Json(
        TemplatePermission::ALL
            .iter()
            .map(|p| grants_of(&table, *p))
            .collect(),
    ))
}

#[utoipa::path(
    put,
    path = "/api/templates/{id}/permissions",
    tag = "Templates",
    params(("id" = Uuid, Path, description = "Template id")),
    request_body = SetTemplatePermissionRequest,
    responses((status = 200, description = "Grantees of the permission after replacement", body = TemplatePermissionGrants))
)]
pub async fn set_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetTemplatePermissionRequest>,
) -> AppResult<Json<TemplatePermissionGrants>> {
    let mut tx = state.begin_write().await?;
    let template = fetch_template(&mut tx, id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::ManageTemplatePermissions,
        &Subject::Template(TemplateSubject::new(&template)),
    )?;

    let key = payload.permission.to_string();
    let mut change = GrantChange::new(template.id, "template.permission", &key);
    if let Some(roles) = payload.roles {
        let diff = set_template_roles(&mut tx, id, payload.permission, roles).await?;
        change = change.merge(GrantChange::roles(template.id, "template.permission", &key, &diff));
    }
    if let Some(groups) = payload.groups {
        let diff = set_template_groups(&mut tx, id, template.project_id, payload.permission, groups).await?;
        change = change.merge(GrantChange::groups(template.id, "template.permission", &key, &diff));
    }

    let table = load_template_permissions(&mut tx, id).await?;
    tx.commit().await?;

    if !change.is_empty() {
        audit(&state, &auth, &headers, "changed", &change, None);
    }
    Ok(Json(grants_of(&table, payload.permission)))
}
