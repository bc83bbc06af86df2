use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

use super::{audit, clean};
use crate::app::AppState;
use crate::authz::{ensure_granted, Action, Subject};
use crate::db::repository::{self, fetch_user};
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::user::{
    SetPasswordRequest, User, UserCreateRequest, UserUpdateRequest, DEFAULT_LOCALE, DEFAULT_THEME,
    DEFAULT_TIMEZONE,
};
use crate::models::validation::ensure_valid;
use crate::utils::{hash_password, utc_now};

#[utoipa::path(
    get,
    path = "/api/users",
    tag = "Users",
    responses((status = 200, description = "List users", body = [User]))
)]
pub async fn list_users(State(state): State<AppState>, _auth: AuthUser) -> AppResult<Json<Vec<User>>> {
    let mut conn = state.pool.acquire().await?;
    let users = repository::list_users(&mut conn).await?;
    Ok(Json(users.into_iter().map(User::from).collect()))
}

#[utoipa::path(
    post,
    path = "/api/users",
    tag = "Users",
    request_body = UserCreateRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<UserCreateRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    ensure_granted(state.voter.as_ref(), &auth.principal, Action::CreateUser, &Subject::None)?;

    let now = utc_now();
    let user = User {
        id: Uuid::new_v4(),
        email: clean(&payload.email).to_lowercase(),
        fullname: clean(&payload.fullname),
        is_admin: payload.is_admin,
        is_disabled: payload.is_disabled,
        locale: payload.locale.unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
        theme: payload.theme.unwrap_or_else(|| DEFAULT_THEME.to_string()),
        timezone: payload.timezone.unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
        auth_failures: 0,
        locked_until: None,
        created_at: now,
        updated_at: now,
    };
    ensure_valid(user.validate())?;
    let password_hash = hash_password(&payload.password)?;

    let mut tx = state.begin_write().await?;
    sqlx::query(
        "INSERT INTO users (id, email, fullname, password_hash, is_admin, is_disabled, locale, theme, timezone, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user.id.to_string())
    .bind(&user.email)
    .bind(&user.fullname)
    .bind(&password_hash)
    .bind(user.is_admin)
    .bind(user.is_disabled)
    .bind(&user.locale)
    .bind(&user.theme)
    .bind(&user.timezone)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::from_write(e, "user with this email"))?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "created", &user, None);
    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "User detail", body = User))
)]
pub async fn get_user(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<User>> {
    let mut conn = state.pool.acquire().await?;
    Ok(Json(fetch_user(&mut conn, id).await?.into()))
}

#[utoipa::path(
    put,
    path = "/api/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UserUpdateRequest,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 403, description = "Only admins may change email or admin flag")
    )
)]
pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<UserUpdateRequest>,
) -> AppResult<Json<User>> {
    let mut tx = state.begin_write().await?;
    let old: User = fetch_user(&mut tx, id).await?.into();
    ensure_granted(state.voter.as_ref(), &auth.principal, Action::UpdateUser, &Subject::User(&old))?;

    let is_admin = auth.principal.is_admin();
    let mut user = old.clone();

    if let Some(email) = payload.email.as_deref() {
        let email = clean(email).to_lowercase();
        if email != user.email && !is_admin {
            return Err(AppError::access_denied("only admins may change the email"));
        }
        user.email = email;
    }
    if let Some(flag) = payload.is_admin {
        if flag != user.is_admin {
            if !is_admin {
                return Err(AppError::access_denied("only admins may change the admin flag"));
            }
            if !flag && user.id == auth.user_id {
                return Err(AppError::access_denied("cannot revoke your own admin flag"));
            }
        }
        user.is_admin = flag;
    }
    if let Some(fullname) = payload.fullname.as_deref() {
        user.fullname = clean(fullname);
    }
    if let Some(locale) = payload.locale {
        user.locale = locale;
    }
    if let Some(theme) = payload.theme {
        user.theme = theme;
    }
    if let Some(timezone) = payload.timezone {
        user.timezone = timezone;
    }
    user.updated_at = utc_now();
    ensure_valid(user.validate())?;

    sqlx::query(
        "UPDATE users SET email = ?, fullname = ?, is_admin = ?, locale = ?, theme = ?, timezone = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&user.email)
    .bind(&user.fullname)
    .bind(user.is_admin)
    .bind(&user.locale)
    .bind(&user.theme)
    .bind(&user.timezone)
    .bind(user.updated_at)
    .bind(user.id.to_string())
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::from_write(e, "user with this email"))?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "updated", &user, Some(&old));
    Ok(Json(user))
}

#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 204, description = "User deleted with their memberships"))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut tx = state.begin_write().await?;
    let user: User = fetch_user(&mut tx, id).await?.into();
    ensure_granted(state.voter.as_ref(), &auth.principal, Action::DeleteUser, &Subject::User(&user))?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "deleted", &user, None);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/users/{id}/disable",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "User disabled", body = User))
)]
pub async fn disable_user(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<User>> {
    toggle_disabled(state, auth, headers, id, true).await
}

#[utoipa::path(
    post,
    path = "/api/users/{id}/enable",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "User enabled", body = User))
)]
pub async fn enable_user(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<User>> {
    toggle_disabled(state, auth, headers, id, false).await
}

async fn toggle_disabled(
    state: AppState,
    auth: AuthUser,
    headers: HeaderMap,
    id: Uuid,
    disable: bool,
) -> AppResult<Json<User>> {
    let (action, event) = if disable {
        (Action::DisableUser, "disabled")
    } else {
        (Action::EnableUser, "enabled")
    };

    let mut tx = state.begin_write().await?;
    let mut user: User = fetch_user(&mut tx, id).await?.into();
    ensure_granted(state.voter.as_ref(), &auth.principal, action, &Subject::User(&user))?;

    user.is_disabled = disable;
    user.updated_at = utc_now();
    sqlx::query("UPDATE users SET is_disabled = ?, updated_at = ? WHERE id = ?")
        .bind(user.is_disabled)
        .bind(user.updated_at)
        .bind(user.id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&state, &auth, &headers, event, &user, None);
    Ok(Json(user))
}

#[utoipa::path(
    post,
    path = "/api/users/{id}/unlock",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "Login lockout cleared", body = User))
)]
pub async fn unlock_user(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<User>> {
    let mut tx = state.begin_write().await?;
    let mut user: User = fetch_user(&mut tx, id).await?.into();
    ensure_granted(state.voter.as_ref(), &auth.principal, Action::UnlockUser, &Subject::User(&user))?;

    user.auth_failures = 0;
    user.locked_until = None;
    user.updated_at = utc_now();
    sqlx::query("UPDATE users SET auth_failures = 0, locked_until = NULL, updated_at = ? WHERE id = ?")
        .bind(user.updated_at)
        .bind(user.id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "unlocked", &user, None);
    Ok(Json(user))
}

#[utoipa::path(
    post,
    path = "/api/users/{id}/password",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = SetPasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "Password too short")
    )
)]
pub async fn set_password(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetPasswordRequest>,
) -> AppResult<StatusCode> {
    let mut tx = state.begin_write().await?;
    let user: User = fetch_user(&mut tx, id).await?.into();
    ensure_granted(state.voter.as_ref(), &auth.principal, Action::SetPassword, &Subject::User(&user))?;

    let password_hash = hash_password(&payload.password)?;
    sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(&password_hash)
        .bind(utc_now())
        .bind(user.id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&state, &auth, &headers, "password_changed", &user, None);
    Ok(StatusCode::NO_CONTENT)
}
