use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{Voter, WorkflowVoter};
use crate::db::{WriteLock, WriteTx};
use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::routes::auth::LoginPolicy;
use crate::routes::{auth, fields, groups, health, projects, states, templates, users, workflow};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub login_policy: LoginPolicy,
    pub event_bus: EventBus,
    pub voter: Arc<dyn Voter>,
    pub writes: WriteLock,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        jwt: JwtConfig,
        login_policy: LoginPolicy,
        event_bus: EventBus,
        writes: WriteLock,
    ) -> Self {
        Self {
            pool,
            jwt: Arc::new(jwt),
            login_policy,
            event_bus,
            voter: Arc::new(WorkflowVoter::new()),
            writes,
        }
    }

    /// Opens a transaction that may write, queued behind any other writer.
    pub async fn begin_write(&self) -> Result<WriteTx, sqlx::Error> {
        self.writes.begin(&self.pool).await
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let login_policy = LoginPolicy::from_env()?;

    let (event_bus, rx) = init_event_bus();
    let writes = WriteLock::new();
    tokio::spawn(start_activity_listener(rx, pool.clone(), writes.clone()));

    let state = AppState::new(pool, jwt_config, login_policy, event_bus, writes);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/me", get(auth::me));

    let project_routes = Router::new()
        .route("/", get(projects::list_projects).post(projects::create_project))
        .route(
            "/:id",
            get(projects::get_project)
                .put(projects::update_project)
                .delete(projects::delete_project),
        )
        .route("/:id/suspend", post(projects::suspend_project))
        .route("/:id/resume", post(projects::resume_project));

    let template_routes = Router::new()
        .route("/", get(templates::list_templates).post(templates::create_template))
        .route(
            "/:id",
            get(templates::get_template)
                .put(templates::update_template)
                .delete(templates::delete_template),
        )
        .route("/:id/lock", post(templates::lock_template))
        .route("/:id/unlock", post(templates::unlock_template))
        .route(
            "/:id/permissions",
            get(templates::get_permissions).put(templates::set_permission),
        );

    let state_routes = Router::new()
        .route("/", get(states::list_states).post(states::create_state))
        .route(
            "/:id",
            get(states::get_state)
                .put(states::update_state)
                .delete(states::delete_state),
        )
        .route("/:id/initial", post(states::set_initial_state))
        .route(
            "/:id/transitions",
            get(states::get_transitions).put(states::set_transition),
        )
        .route(
            "/:id/responsible-groups",
            get(states::get_responsible_groups).put(states::set_responsible_groups),
        )
        .route("/:id/allowed-transitions", get(workflow::allowed_transitions));

    let field_routes = Router::new()
        .route("/", get(fields::list_fields).post(fields::create_field))
        .route(
            "/:id",
            get(fields::get_field)
                .put(fields::update_field)
                .delete(fields::delete_field),
        )
        .route(
            "/:id/permissions",
            get(fields::get_permissions).put(fields::set_permission),
        )
        .route("/:id/access", get(fields::get_access))
        .route("/:id/items", get(fields::list_items).post(fields::create_item))
        .route(
            "/:id/items/:item_id",
            put(fields::update_item).delete(fields::delete_item),
        );

    let group_routes = Router::new()
        .route("/", get(groups::list_groups).post(groups::create_group))
        .route(
            "/:id",
            get(groups::get_group)
                .put(groups::update_group)
                .delete(groups::delete_group),
        )
        .route("/:id/members", get(groups::get_members).put(groups::set_members));

    let user_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route(
            "/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/:id/disable", post(users::disable_user))
        .route("/:id/enable", post(users::enable_user))
        .route("/:id/unlock", post(users::unlock_user))
        .route("/:id/password", post(users::set_password));

    let api_routes = Router::new()
        .route("/health", get(health::health))
        .nest("/projects", project_routes)
        .nest("/templates", template_routes)
        .nest("/states", state_routes)
        .nest("/fields", field_routes)
        .nest("/groups", group_routes)
        .nest("/users", user_routes)
        .route("/workflow/transition", post(workflow::dry_run_transition));

    let router = Router::new()
        .nest("/auth", auth_routes)
        .nest("/api", api_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
