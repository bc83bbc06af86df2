use std::collections::HashMap;

use axum::extract::{Path, Query, State as AxumState};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{ensure_granted, Action, Subject, TransitionSubject};
use crate::db::grants::{load_responsible_groups, load_transition_graph};
use crate::db::repository::{
    fetch_project, fetch_state, fetch_template, fetch_user, list_fields, list_item_ids, user_group_ids, visible_group_ids,
};
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::dictionary::{FieldType, StateResponsible, SystemRole};
use crate::models::state::State;
use crate::models::validation::{ensure_valid, Violation};
use crate::utils::utc_now;
use crate::workflow::{check_assignee, effective_policy, resolve_responsible, FieldParameters};

/// Issue move to evaluate without persisting anything.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TransitionRequest {
    pub from_state_id: Uuid,
    pub to_state_id: Uuid,
    /// Issue roles the caller holds (author, responsible).
    #[serde(default)]
    pub roles: Vec<SystemRole>,
    pub current_responsible: Option<Uuid>,
    /// Required when the target state assigns a responsible.
    pub responsible: Option<Uuid>,
    /// Values for the target state's fields, keyed by field id.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub fields: HashMap<Uuid, Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TransitionOutcome {
    pub to_state_id: Uuid,
    pub responsible: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RolesQuery {
    /// Comma separated issue roles, e.g. `author,responsible`.
    pub roles: Option<String>,
}

pub(crate) fn parse_roles(raw: Option<&str>) -> AppResult<Vec<SystemRole>> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(|code| code.parse::<SystemRole>())
        .collect()
}

#[utoipa::path(
    post,
    path = "/api/workflow/transition",
    tag = "Workflow",
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Transition allowed; responsible after the move", body = TransitionOutcome),
        (status = 400, description = "Missing responsible, disabled or foreign assignee, or invalid field value"),
        (status = 404, description = "Unknown state or assignee"),
        (status = 403, description = "Caller may not take this transition")
    )
)]
pub async fn dry_run_transition(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    Json(payload): Json<TransitionRequest>,
) -> AppResult<Json<TransitionOutcome>> {
    let mut conn = state.pool.acquire().await?;
    let from = fetch_state(&mut conn, payload.from_state_id).await?;
    let to = fetch_state(&mut conn, payload.to_state_id).await?;
    let template = fetch_template(&mut conn, from.template_id).await?;
    let project = fetch_project(&mut conn, template.project_id).await?;
    let (_, graph) = load_transition_graph(&mut conn, template.id).await?;

    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::ExecuteTransition,
        &Subject::Transition(TransitionSubject {
            project: &project,
            template: &template,
            from: &from,
            to: &to,
            graph: &graph,
            roles: &payload.roles,
        }),
    )?;

    let responsible = resolve_responsible(&to, payload.current_responsible, payload.responsible)?;
    if effective_policy(&to) == StateResponsible::Assign {
        if let Some(assignee) = responsible {
            let user = fetch_user(&mut conn, assignee).await?;
            if user.is_disabled {
                return Err(AppError::bad_request("the supplied responsible is disabled"));
            }
            let allowed = load_responsible_groups(&mut conn, to.id).await?;
            let project_groups = visible_group_ids(&mut conn, project.id).await?;
            let groups = user_group_ids(&mut conn, assignee).await?;
            check_assignee(&allowed, &project_groups, &groups)?;
        }
    }

    let today = utc_now().date_naive();
    let mut violations: Vec<Violation> = Vec::new();
    for field in list_fields(&mut conn, to.id).await? {
        match payload.fields.get(&field.id).filter(|v| !v.is_null()) {
            None if field.is_required => {
                violations.push(Violation::new(&field.name, "", "This value should not be blank."));
            }
            None => {}
            Some(value) => {
                let params = FieldParameters::parse(field.field_type, Some(&field.parameters))
                    .map_err(|e| AppError::internal(format!("stored parameters of '{}': {e}", field.name)))?;
                let items = if field.field_type == FieldType::List {
                    list_item_ids(&mut conn, field.id).await?
                } else {
                    Default::default()
                };
                violations.extend(params.validate_value(&field.name, value, today, &items));
            }
        }
    }
    ensure_valid(violations)?;

    tracing::debug!(user_id = %auth.user_id, from = %from.id, to = %to.id, "transition dry-run passed");
    Ok(Json(TransitionOutcome {
        to_state_id: to.id,
        responsible,
    }))
}

#[utoipa::path(
    get,
    path = "/api/states/{id}/allowed-transitions",
    tag = "Workflow",
    params(("id" = Uuid, Path, description = "Source state id"), RolesQuery),
    responses((status = 200, description = "States the caller may move an issue to", body = [State]))
)]
pub async fn allowed_transitions(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Query(query): Query<RolesQuery>,
) -> AppResult<Json<Vec<State>>> {
    let roles = parse_roles(query.roles.as_deref())?;

    let mut conn = state.pool.acquire().await?;
    let from = fetch_state(&mut conn, id).await?;
    let template = fetch_template(&mut conn, from.template_id).await?;
    let project = fetch_project(&mut conn, template.project_id).await?;
    let (states, graph) = load_transition_graph(&mut conn, template.id).await?;

    let allowed = states
        .into_iter()
        .filter(|to| {
            state.voter.is_granted(
                Some(&auth.principal),
                Action::ExecuteTransition,
                &Subject::Transition(TransitionSubject {
                    project: &project,
                    template: &template,
                    from: &from,
                    to,
                    graph: &graph,
                    roles: &roles,
                }),
            )
        })
        .collect();
    Ok(Json(allowed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_query_is_comma_separated() {
        let roles = parse_roles(Some("author, responsible")).unwrap();
        assert_eq!(roles, vec![SystemRole::Author, SystemRole::Responsible]);
        assert!(parse_roles(None).unwrap().is_empty());
        assert!(parse_roles(Some("")).unwrap().is_empty());
    }

    #[test]
    fn unknown_role_is_rejected() {
        let err = parse_roles(Some("author,owner")).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
