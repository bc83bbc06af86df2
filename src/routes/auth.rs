use axum::extract::State;
use axum::Json;
use chrono::Duration;

use crate::app::AppState;
use crate::db::repository;
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::user::{AuthResponse, DbUser, LoginRequest, User};
use crate::utils::{utc_now, verify_password};

/// Brute-force protection for password logins.
#[derive(Debug, Clone, Copy)]
pub struct LoginPolicy {
    /// Failed attempts before the account is locked.
    pub max_failures: i32,
    pub lock_minutes: i64,
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self {
            max_failures: 3,
            lock_minutes: 30,
        }
    }
}

impl LoginPolicy {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();
        let max_failures = std::env::var("MAX_AUTH_FAILURES")
            .map(|val| val.parse::<i32>())
            .unwrap_or(Ok(defaults.max_failures))
            .map_err(|_| AppError::configuration("MAX_AUTH_FAILURES must be a valid integer"))?;
        let lock_minutes = std::env::var("LOCK_MINUTES")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(defaults.lock_minutes))
            .map_err(|_| AppError::configuration("LOCK_MINUTES must be a valid integer"))?;

        if max_failures < 1 || lock_minutes < 1 {
            return Err(AppError::configuration(
                "MAX_AUTH_FAILURES and LOCK_MINUTES must be positive",
            ));
        }

        Ok(Self {
            max_failures,
            lock_minutes,
        })
    }
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials, disabled or locked account")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let mut conn = state.pool.acquire().await?;

    let db_user = repository::fetch_user_by_email(&mut conn, &payload.email.trim().to_lowercase())
        .await?
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    let now = utc_now();
    if db_user.is_disabled {
        return Err(AppError::unauthorized("account is disabled"));
    }
    if let Some(until) = db_user.locked_until.filter(|until| *until > now) {
        return Err(AppError::unauthorized(format!(
            "account is locked until {}",
            until.to_rfc3339()
        )));
    }

    drop(conn);

    if !verify_password(&payload.password, &db_user.password_hash)? {
        register_failure(&state, &db_user).await?;
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let mut tx = state.begin_write().await?;
    sqlx::query("UPDATE users SET auth_failures = 0, locked_until = NULL WHERE id = ?")
        .bind(db_user.id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let token = state.jwt.issue(db_user.id)?;
    let mut user: User = db_user.into();
    user.auth_failures = 0;
    user.locked_until = None;

    log_activity(&state.event_bus, "login", Some(user.id), &user);

    Ok(Json(AuthResponse { token, user }))
}

/// Counts a failed attempt and locks the account once the policy's limit is reached.
async fn register_failure(state: &AppState, db_user: &DbUser) -> AppResult<()> {
    let policy = state.login_policy;
    let mut tx = state.begin_write().await?;

    let failures: i32 = sqlx::query_scalar(
        "UPDATE users SET auth_failures = auth_failures + 1 WHERE id = ? RETURNING auth_failures",
    )
    .bind(db_user.id.to_string())
    .fetch_one(&mut *tx)
    .await?;

    if failures >= policy.max_failures {
        let until = utc_now() + Duration::minutes(policy.lock_minutes);
        sqlx::query("UPDATE users SET auth_failures = 0, locked_until = ? WHERE id = ?")
            .bind(until)
            .bind(db_user.id.to_string())
            .execute(&mut *tx)
            .await?;
        tracing::warn!(user_id = %db_user.id, %until, "account locked after repeated login failures");
    }
    tx.commit().await?;

    let mut user: User = db_user.clone().into();
    user.auth_failures = failures;
    log_activity(&state.event_bus, "login_failed", None, &user);
    Ok(())
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Current user", body = User))
)]
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<User>> {
    let mut conn = state.pool.acquire().await?;
    let db_user = repository::fetch_user(&mut conn, auth.user_id).await?;
    Ok(Json(db_user.into()))
}
