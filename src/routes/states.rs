use axum::extract::{Path, Query, State as AxumState};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use sqlx::SqliteConnection;
use utoipa::IntoParams;
use uuid::Uuid;

use super::{audit, clean, ensure_template_visible};
use crate::app::AppState;
use crate::authz::{ensure_granted, Action, Subject, TemplateSubject};
use crate::db::grants::{
    self, load_responsible_groups, load_transition_graph, set_group_transitions, set_role_transitions,
};
use crate::db::repository::{self, fetch_state, fetch_state_with_template, fetch_template};
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::dictionary::{StateResponsible, StateType};
use crate::models::state::{
    SetResponsibleGroupsRequest, SetTransitionRequest, State, StateCreateRequest, StateUpdateRequest,
    TransitionGrants,
};
use crate::models::validation::ensure_valid;
use crate::utils::utc_now;
use crate::workflow::{check_edge, normalize_responsible, GrantChange, TransitionGraph};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StateListQuery {
    pub template_id: Uuid,
}

#[utoipa::path(
    get,
    path = "/api/states",
    tag = "States",
    params(StateListQuery),
    responses((status = 200, description = "States of a template", body = [State]))
)]
pub async fn list_states(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    Query(query): Query<StateListQuery>,
) -> AppResult<Json<Vec<State>>> {
    let mut conn = state.pool.acquire().await?;
    let template = fetch_template(&mut conn, query.template_id).await?;
    ensure_template_visible(&state, &mut conn, &auth, &template).await?;
    Ok(Json(repository::list_states(&mut conn, query.template_id).await?))
}

/// Turns the current initial state of a template, if any, into an intermediate one.
async fn demote_initial(conn: &mut SqliteConnection, template_id: Uuid) -> AppResult<Option<State>> {
    let Some(mut previous) = repository::initial_state(conn, template_id).await? else {
        return Ok(None);
    };
    previous.state_type = StateType::Intermediate;
    previous.updated_at = utc_now();
    sqlx::query("UPDATE states SET type = ?, updated_at = ? WHERE id = ?")
        .bind(previous.state_type.as_str())
        .bind(previous.updated_at)
        .bind(previous.id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(Some(previous))
}

#[utoipa::path(
    post,
    path = "/api/states",
    tag = "States",
    request_body = StateCreateRequest,
    responses(
        (status = 201, description = "State created", body = State),
        (status = 409, description = "Duplicate name, or a final state that does not remove the responsible")
    )
)]
pub async fn create_state(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<StateCreateRequest>,
) -> AppResult<(StatusCode, Json<State>)> {
    let mut tx = state.begin_write().await?;
    let template = fetch_template(&mut tx, payload.template_id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::CreateState,
        &Subject::Template(TemplateSubject::new(&template)),
    )?;

    let now = utc_now();
    let created = State {
        id: Uuid::new_v4(),
        template_id: template.id,
        name: clean(&payload.name),
        state_type: payload.state_type,
        responsible: normalize_responsible(payload.state_type, payload.responsible)?,
        created_at: now,
        updated_at: now,
    };
    ensure_valid(created.validate())?;

    let demoted = if created.state_type == StateType::Initial {
        demote_initial(&mut tx, template.id).await?
    } else {
        None
    };

    sqlx::query(
        "INSERT INTO states (id, template_id, name, type, responsible, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(created.id.to_string())
    .bind(created.template_id.to_string())
    .bind(&created.name)
    .bind(created.state_type.as_str())
    .bind(created.responsible.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::from_write(e, "state with this name"))?;
    tx.commit().await?;

    if let Some(previous) = demoted {
        audit(&state, &auth, &headers, "updated", &previous, None);
    }
    audit(&state, &auth, &headers, "created", &created, None);
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    get,
    path = "/api/states/{id}",
    tag = "States",
    params(("id" = Uuid, Path, description = "State id")),
    responses((status = 200, description = "State detail", body = State))
)]
pub async fn get_state(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<State>> {
    let mut conn = state.pool.acquire().await?;
    let (found, template) = fetch_state_with_template(&mut conn, id).await?;
    ensure_template_visible(&state, &mut conn, &auth, &template).await?;
    Ok(Json(found))
}

#[utoipa::path(
    put,
    path = "/api/states/{id}",
    tag = "States",
    params(("id" = Uuid, Path, description = "State id")),
    request_body = StateUpdateRequest,
    responses((status = 200, description = "State updated", body = State))
)]
pub async fn update_state(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<StateUpdateRequest>,
) -> AppResult<Json<State>> {
    let mut tx = state.begin_write().await?;
    let (old, template) = fetch_state_with_template(&mut tx, id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::UpdateState,
        &Subject::State { state: &old, template: &template },
    )?;

    let mut updated = old.clone();
    if let Some(name) = payload.name.as_deref() {
        updated.name = clean(name);
    }
    if payload.responsible.is_some() {
        updated.responsible = normalize_responsible(updated.state_type, payload.responsible)?;
    }
    updated.updated_at = utc_now();
    ensure_valid(updated.validate())?;

    sqlx::query("UPDATE states SET name = ?, responsible = ?, updated_at = ? WHERE id = ?")
        .bind(&updated.name)
        .bind(updated.responsible.as_str())
        .bind(updated.updated_at)
        .bind(updated.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::from_write(e, "state with this name"))?;

    if updated.responsible != StateResponsible::Assign {
        sqlx::query("DELETE FROM state_responsible_groups WHERE state_id = ?")
            .bind(updated.id.to_string())
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    audit(&state, &auth, &headers, "updated", &updated, Some(&old));
    Ok(Json(updated))
}

#[utoipa::path(
    delete,
    path = "/api/states/{id}",
    tag = "States",
    params(("id" = Uuid, Path, description = "State id")),
    responses((status = 204, description = "State deleted with its fields and transitions"))
)]
pub async fn delete_state(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut tx = state.begin_write().await?;
    let (deleted, template) = fetch_state_with_template(&mut tx, id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::DeleteState,
        &Subject::State { state: &deleted, template: &template },
    )?;

    sqlx::query("DELETE FROM states WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "deleted", &deleted, None);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/states/{id}/initial",
    tag = "States",
    params(("id" = Uuid, Path, description = "State id")),
    responses((status = 200, description = "State is now the initial one of its template", body = State))
)]
pub async fn set_initial_state(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<State>> {
    let mut tx = state.begin_write().await?;
    let (old, template) = fetch_state_with_template(&mut tx, id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::SetInitialState,
        &Subject::State { state: &old, template: &template },
    )?;

    let demoted = demote_initial(&mut tx, template.id).await?;

    let mut updated = old.clone();
    updated.state_type = StateType::Initial;
    if old.is_final() {
        updated.responsible = StateResponsible::Keep;
    }
    updated.updated_at = utc_now();
    sqlx::query("UPDATE states SET type = ?, responsible = ?, updated_at = ? WHERE id = ?")
        .bind(updated.state_type.as_str())
        .bind(updated.responsible.as_str())
        .bind(updated.updated_at)
        .bind(updated.id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    if let Some(previous) = demoted {
        audit(&state, &auth, &headers, "updated", &previous, None);
    }
    audit(&state, &auth, &headers, "updated", &updated, Some(&old));
    Ok(Json(updated))
}

fn edge_grants(graph: &TransitionGraph, from: Uuid, to: Uuid) -> TransitionGrants {
    TransitionGrants {
        to_state_id: to,
        roles: graph.roles(from, to).into_iter().collect(),
        groups: graph.groups(from, to).into_iter().collect(),
    }
}

#[utoipa::path(
    get,
    path = "/api/states/{id}/transitions",
    tag = "States",
    params(("id" = Uuid, Path, description = "Source state id")),
    responses((status = 200, description = "Outgoing edges and their grantees", body = [TransitionGrants]))
)]
pub async fn get_transitions(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<TransitionGrants>>> {
    let mut conn = state.pool.acquire().await?;
    let (from, template) = fetch_state_with_template(&mut conn, id).await?;
    ensure_template_visible(&state, &mut conn, &auth, &template).await?;
    let (_, graph) = load_transition_graph(&mut conn, from.template_id).await?;
    Ok(Json(
        graph
            .targets(from.id)
            .into_iter()
            .map(|to| edge_grants(&graph, from.id, to))
            .collect(),
    ))
}

#[utoipa::path(
    put,
    path = "/api/states/{id}/transitions",
    tag = "States",
    params(("id" = Uuid, Path, description = "Source state id")),
    request_body = SetTransitionRequest,
    responses(
        (status = 200, description = "Grantees of the edge after replacement", body = TransitionGrants),
        (status = 409, description = "Target belongs to another template")
    )
)]
pub async fn set_transition(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetTransitionRequest>,
) -> AppResult<Json<TransitionGrants>> {
    let mut tx = state.begin_write().await?;
    let (from, template) = fetch_state_with_template(&mut tx, id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::ManageTransitions,
        &Subject::State { state: &from, template: &template },
    )?;
    let to = fetch_state(&mut tx, payload.to_state_id).await?;
    check_edge(&from, &to)?;

    let key = to.id.to_string();
    let mut change = GrantChange::new(from.id, "state.transition", &key);
    if let Some(roles) = payload.roles {
        let diff = set_role_transitions(&mut tx, &from, &to, roles).await?;
        change = change.merge(GrantChange::roles(from.id, "state.transition", &key, &diff));
    }
    if let Some(groups) = payload.groups {
        let diff = set_group_transitions(&mut tx, &from, &to, template.project_id, groups).await?;
        change = change.merge(GrantChange::groups(from.id, "state.transition", &key, &diff));
    }

    let (_, graph) = load_transition_graph(&mut tx, template.id).await?;
    tx.commit().await?;

    if !change.is_empty() {
        audit(&state, &auth, &headers, "changed", &change, None);
    }
    Ok(Json(edge_grants(&graph, from.id, to.id)))
}

#[utoipa::path(
    get,
    path = "/api/states/{id}/responsible-groups",
    tag = "States",
    params(("id" = Uuid, Path, description = "State id")),
    responses((status = 200, description = "Groups whose members may become responsible", body = [Uuid]))
)]
pub async fn get_responsible_groups(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<Uuid>>> {
    let mut conn = state.pool.acquire().await?;
    let (_, template) = fetch_state_with_template(&mut conn, id).await?;
    ensure_template_visible(&state, &mut conn, &auth, &template).await?;
    Ok(Json(load_responsible_groups(&mut conn, id).await?.into_iter().collect()))
}

#[utoipa::path(
    put,
    path = "/api/states/{id}/responsible-groups",
    tag = "States",
    params(("id" = Uuid, Path, description = "State id")),
    request_body = SetResponsibleGroupsRequest,
    responses((status = 200, description = "Responsible groups after replacement", body = [Uuid]))
)]
pub async fn set_responsible_groups(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetResponsibleGroupsRequest>,
) -> AppResult<Json<Vec<Uuid>>> {
    let mut tx = state.begin_write().await?;
    let (target, template) = fetch_state_with_template(&mut tx, id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::ManageResponsibleGroups,
        &Subject::State { state: &target, template: &template },
    )?;

    let diff = grants::set_responsible_groups(&mut tx, target.id, template.project_id, payload.groups).await?;
    let groups = load_responsible_groups(&mut tx, target.id).await?;
    tx.commit().await?;

    let change = GrantChange::groups(target.id, "state.responsible", "groups", &diff);
    if !change.is_empty() {
        audit(&state, &auth, &headers, "changed", &change, None);
    }
    Ok(Json(groups.into_iter().collect()))
}
