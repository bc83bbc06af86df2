use axum::extract::{Path, Query, State as AxumState};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use sqlx::SqliteConnection;
use utoipa::IntoParams;
use uuid::Uuid;

use super::workflow::{parse_roles, RolesQuery};
use super::{audit, clean, clean_opt, ensure_template_visible};
use crate::app::AppState;
use crate::authz::{ensure_granted, Action, Subject, TemplateSubject};
use crate::db::grants::{load_field_permissions, set_field_groups, set_field_roles};
use crate::db::repository::{
    self, fetch_field_with_template, fetch_list_item, fetch_state_with_template, list_item_ids,
};
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::dictionary::{FieldPermission, FieldType};
use crate::models::field::{
    Field, FieldAccess, FieldCreateRequest, FieldPermissionGrants, FieldUpdateRequest, ListItem, ListItemCreateRequest,
    ListItemUpdateRequest, SetFieldPermissionRequest,
};
use crate::models::validation::ensure_valid;
use crate::utils::utc_now;
use crate::workflow::{field_access, FieldParameters, GrantChange, PermissionTable};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FieldListQuery {
    pub state_id: Uuid,
}

/// Parses raw parameters for `field_type` and checks a list default against the field's items.
async fn checked_parameters(
    conn: &mut SqliteConnection,
    field_id: Uuid,
    field_type: FieldType,
    raw: Option<&serde_json::Value>,
) -> AppResult<FieldParameters> {
    let params = FieldParameters::parse(field_type, raw)?;
    if let Some(default) = params.list_default() {
        if !list_item_ids(conn, field_id).await?.contains(&default) {
            return Err(AppError::bad_request("default: must reference an item of this field"));
        }
    }
    Ok(params)
}

#[utoipa::path(
    get,
    path = "/api/fields",
    tag = "Fields",
    params(FieldListQuery),
    responses((status = 200, description = "Fields of a state", body = [Field]))
)]
pub async fn list_fields(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    Query(query): Query<FieldListQuery>,
) -> AppResult<Json<Vec<Field>>> {
    let mut conn = state.pool.acquire().await?;
    let (_, template) = fetch_state_with_template(&mut conn, query.state_id).await?;
    ensure_template_visible(&state, &mut conn, &auth, &template).await?;
    Ok(Json(repository::list_fields(&mut conn, query.state_id).await?))
}

#[utoipa::path(
    post,
    path = "/api/fields",
    tag = "Fields",
    request_body = FieldCreateRequest,
    responses(
        (status = 201, description = "Field created", body = Field),
        (status = 400, description = "Invalid parameters for the field type"),
        (status = 409, description = "Name already used in this state")
    )
)]
pub async fn create_field(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<FieldCreateRequest>,
) -> AppResult<(StatusCode, Json<Field>)> {
    let mut tx = state.begin_write().await?;
    let (owner, template) = fetch_state_with_template(&mut tx, payload.state_id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::CreateField,
        &Subject::State { state: &owner, template: &template },
    )?;

    let id = Uuid::new_v4();
    let params = checked_parameters(&mut tx, id, payload.field_type, payload.parameters.as_ref()).await?;
    let now = utc_now();
    let field = Field {
        id,
        state_id: owner.id,
        name: clean(&payload.name),
        field_type: payload.field_type,
        description: clean_opt(payload.description),
        is_required: payload.is_required,
        parameters: params.to_json(),
        created_at: now,
        updated_at: now,
    };
    ensure_valid(field.validate())?;

    sqlx::query(
        "INSERT INTO fields (id, state_id, name, type, description, is_required, parameters, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(field.id.to_string())
    .bind(field.state_id.to_string())
    .bind(&field.name)
    .bind(field.field_type.as_str())
    .bind(&field.description)
    .bind(field.is_required)
    .bind(field.parameters.to_string())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::from_write(e, "field with this name"))?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "created", &field, None);
    Ok((StatusCode::CREATED, Json(field)))
}

#[utoipa::path(
    get,
    path = "/api/fields/{id}",
    tag = "Fields",
    params(("id" = Uuid, Path, description = "Field id")),
    responses((status = 200, description = "Field detail", body = Field))
)]
pub async fn get_field(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Field>> {
    let mut conn = state.pool.acquire().await?;
    let (field, _, template) = fetch_field_with_template(&mut conn, id).await?;
    ensure_template_visible(&state, &mut conn, &auth, &template).await?;
    Ok(Json(field))
}

#[utoipa::path(
    put,
    path = "/api/fields/{id}",
    tag = "Fields",
    params(("id" = Uuid, Path, description = "Field id")),
    request_body = FieldUpdateRequest,
    responses((status = 200, description = "Field updated", body = Field))
)]
pub async fn update_field(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<FieldUpdateRequest>,
) -> AppResult<Json<Field>> {
    let mut tx = state.begin_write().await?;
    let (old, _, template) = fetch_field_with_template(&mut tx, id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::UpdateField,
        &Subject::Field { field: &old, template: &template },
    )?;

    let mut field = old.clone();
    if let Some(name) = payload.name.as_deref() {
        field.name = clean(name);
    }
    if payload.description.is_some() {
        field.description = clean_opt(payload.description);
    }
    if let Some(is_required) = payload.is_required {
        field.is_required = is_required;
    }
    if let Some(raw) = payload.parameters.as_ref() {
        field.parameters = checked_parameters(&mut tx, field.id, field.field_type, Some(raw))
            .await?
            .to_json();
    }
    field.updated_at = utc_now();
    ensure_valid(field.validate())?;

    sqlx::query(
        "UPDATE fields SET name = ?, description = ?, is_required = ?, parameters = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&field.name)
    .bind(&field.description)
    .bind(field.is_required)
    .bind(field.parameters.to_string())
    .bind(field.updated_at)
    .bind(field.id.to_string())
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::from_write(e, "field with this name"))?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "updated", &field, Some(&old));
    Ok(Json(field))
}

#[utoipa::path(
    delete,
    path = "/api/fields/{id}",
    tag = "Fields",
    params(("id" = Uuid, Path, description = "Field id")),
    responses((status = 204, description = "Field deleted with its permissions and list items"))
)]
pub async fn delete_field(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut tx = state.begin_write().await?;
    let (field, _, template) = fetch_field_with_template(&mut tx, id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::DeleteField,
        &Subject::Field { field: &field, template: &template },
    )?;

    sqlx::query("DELETE FROM fields WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "deleted", &field, None);
    Ok(StatusCode::NO_CONTENT)
}

fn grants_of(table: &PermissionTable<FieldPermission>, permission: FieldPermission) -> FieldPermissionGrants {
    FieldPermissionGrants {
        permission,
        roles: table.roles(permission).into_iter().collect(),
        groups: table.groups(permission).into_iter().collect(),
    }
}

#[utoipa::path(
    get,
    path = "/api/fields/{id}/permissions",
    tag = "Fields",
    params(("id" = Uuid, Path, description = "Field id")),
    responses((status = 200, description = "Grantees of every field permission", body = [FieldPermissionGrants]))
)]
pub async fn get_permissions(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<FieldPermissionGrants>>> {
    let mut conn = state.pool.acquire().await?;
    let (_, _, template) = fetch_field_with_template(&mut conn, id).await?;
    // Reading grants is allowed on live templates too
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::ManageTemplatePermissions,
        &Subject::Template(TemplateSubject::new(&template)),
    )?;

    let table = load_field_permissions(&mut conn, id).await?;
    Ok(Json(FieldPermission::ALL.iter().map(|p| grants_of(&table, *p)).collect()))
}

#[utoipa::path(
    get,
    path = "/api/fields/{id}/access",
    tag = "Fields",
    params(("id" = Uuid, Path, description = "Field id"), RolesQuery),
    responses((status = 200, description = "Strongest access the caller holds on the field", body = FieldAccess))
)]
pub async fn get_access(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Query(query): Query<RolesQuery>,
) -> AppResult<Json<FieldAccess>> {
    let roles = parse_roles(query.roles.as_deref())?;

    let mut conn = state.pool.acquire().await?;
    let (field, _, template) = fetch_field_with_template(&mut conn, id).await?;
    ensure_template_visible(&state, &mut conn, &auth, &template).await?;
    let table = load_field_permissions(&mut conn, field.id).await?;
    Ok(Json(FieldAccess {
        field_id: field.id,
        access: field_access(&table, &auth.principal.grantees(&roles)),
    }))
}

#[utoipa::path(
    put,
    path = "/api/fields/{id}/permissions",
    tag = "Fields",
    params(("id" = Uuid, Path, description = "Field id")),
    request_body = SetFieldPermissionRequest,
    responses((status = 200, description = "Grantees of the permission after replacement", body = FieldPermissionGrants))
)]
pub async fn set_permission(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetFieldPermissionRequest>,
) -> AppResult<Json<FieldPermissionGrants>> {
    let mut tx = state.begin_write().await?;
    let (field, _, template) = fetch_field_with_template(&mut tx, id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::ManageFieldPermissions,
        &Subject::Field { field: &field, template: &template },
    )?;

    let key = payload.permission.to_string();
    let mut change = GrantChange::new(field.id, "field.permission", &key);
    if let Some(roles) = payload.roles {
        let diff = set_field_roles(&mut tx, id, payload.permission, roles).await?;
        change = change.merge(GrantChange::roles(field.id, "field.permission", &key, &diff));
    }
    if let Some(groups) = payload.groups {
        let diff = set_field_groups(&mut tx, id, template.project_id, payload.permission, groups).await?;
        change = change.merge(GrantChange::groups(field.id, "field.permission", &key, &diff));
    }

    let table = load_field_permissions(&mut tx, id).await?;
    tx.commit().await?;

    if !change.is_empty() {
        audit(&state, &auth, &headers, "changed", &change, None);
    }
    Ok(Json(grants_of(&table, payload.permission)))
}

#[utoipa::path(
    get,
    path = "/api/fields/{id}/items",
    tag = "Fields",
    params(("id" = Uuid, Path, description = "Field id")),
    responses((status = 200, description = "Items of a list field ordered by value", body = [ListItem]))
)]
pub async fn list_items(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<ListItem>>> {
    let mut conn = state.pool.acquire().await?;
    let (_, _, template) = fetch_field_with_template(&mut conn, id).await?;
    ensure_template_visible(&state, &mut conn, &auth, &template).await?;
    Ok(Json(repository::list_items(&mut conn, id).await?))
}

#[utoipa::path(
    post,
    path = "/api/fields/{id}/items",
    tag = "Fields",
    params(("id" = Uuid, Path, description = "Field id")),
    request_body = ListItemCreateRequest,
    responses(
        (status = 201, description = "List item created", body = ListItem),
        (status = 409, description = "Value or text already used in this field")
    )
)]
pub async fn create_item(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<ListItemCreateRequest>,
) -> AppResult<(StatusCode, Json<ListItem>)> {
    let mut tx = state.begin_write().await?;
    let (field, _, template) = fetch_field_with_template(&mut tx, id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::CreateListItem,
        &Subject::Field { field: &field, template: &template },
    )?;

    let item = ListItem {
        id: Uuid::new_v4(),
        field_id: field.id,
        value: payload.value,
        text: clean(&payload.text),
    };
    ensure_valid(item.validate())?;

    sqlx::query("INSERT INTO list_items (id, field_id, value, text) VALUES (?, ?, ?, ?)")
        .bind(item.id.to_string())
        .bind(item.field_id.to_string())
        .bind(item.value)
        .bind(&item.text)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::from_write(e, "list item"))?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "created", &item, None);
    Ok((StatusCode::CREATED, Json(item)))
}

#[utoipa::path(
    put,
    path = "/api/fields/{id}/items/{item_id}",
    tag = "Fields",
    params(
        ("id" = Uuid, Path, description = "Field id"),
        ("item_id" = Uuid, Path, description = "List item id")
    ),
    request_body = ListItemUpdateRequest,
    responses((status = 200, description = "List item updated", body = ListItem))
)]
pub async fn update_item(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<ListItemUpdateRequest>,
) -> AppResult<Json<ListItem>> {
    let mut tx = state.begin_write().await?;
    let (field, _, template) = fetch_field_with_template(&mut tx, id).await?;
    let old = fetch_list_item(&mut tx, id, item_id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::UpdateListItem,
        &Subject::ListItem { item: &old, field: &field, template: &template },
    )?;

    let mut item = old.clone();
    if let Some(value) = payload.value {
        item.value = value;
    }
    if let Some(text) = payload.text.as_deref() {
        item.text = clean(text);
    }
    ensure_valid(item.validate())?;

    sqlx::query("UPDATE list_items SET value = ?, text = ? WHERE id = ?")
        .bind(item.value)
        .bind(&item.text)
        .bind(item.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::from_write(e, "list item"))?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "updated", &item, Some(&old));
    Ok(Json(item))
}

#[utoipa::path(
    delete,
    path = "/api/fields/{id}/items/{item_id}",
    tag = "Fields",
    params(
        ("id" = Uuid, Path, description = "Field id"),
        ("item_id" = Uuid, Path, description = "List item id")
    ),
    responses((status = 204, description = "List item deleted"))
)]
pub async fn delete_item(
    AxumState(state): AxumState<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let mut tx = state.begin_write().await?;
    let (field, _, template) = fetch_field_with_template(&mut tx, id).await?;
    let item = fetch_list_item(&mut tx, id, item_id).await?;
    ensure_granted(
        state.voter.as_ref(),
        &auth.principal,
        Action::DeleteListItem,
        &Subject::ListItem { item: &item, field: &field, template: &template },
    )?;

    sqlx::query("DELETE FROM list_items WHERE id = ?")
        .bind(item.id.to_string())
        .execute(&mut *tx)
        .await?;

    // A default pointing at the removed item is dropped.
    let params = FieldParameters::parse(field.field_type, Some(&field.parameters))?;
    if params.list_default() == Some(item.id) {
        let cleared = FieldParameters::List { default: None };
        sqlx::query("UPDATE fields SET parameters = ?, updated_at = ? WHERE id = ?")
            .bind(cleared.to_json().to_string())
            .bind(utc_now())
            .bind(field.id.to_string())
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    audit(&state, &auth, &headers, "deleted", &item, None);
    Ok(StatusCode::NO_CONTENT)
}
