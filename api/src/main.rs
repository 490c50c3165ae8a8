use std::net::SocketAddr;

use axum::Router;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod config;
mod error;
mod extract;
mod google;
mod inference;
mod middleware;
mod routes;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "AI Todo API",
        version = "0.1.0",
        description = "Personal to-do lists with Google sign-in and AI-assisted task planning."
    ),
    paths(
        routes::health::health_check,
        routes::auth::google_login,
        routes::auth::refresh,
        routes::todos::list_todos,
        routes::todos::create_todo,
        routes::todos::get_todo,
        routes::todos::replace_todo,
        routes::todos::update_todo,
        routes::todos::delete_todo,
        routes::todos::plan,
    ),
    components(schemas(
        HealthResponse,
        aitodo_core::error::ApiError,
        aitodo_core::users::User,
        aitodo_core::todos::Priority,
        aitodo_core::todos::Status,
        aitodo_core::todos::Todo,
        aitodo_core::todos::TodoSummary,
        aitodo_core::todos::CreateTodoRequest,
        aitodo_core::todos::UpdateTodoRequest,
        aitodo_core::planning::PlanningRequest,
        aitodo_core::planning::PrioritizedTask,
        aitodo_core::planning::PlanningResponse,
        routes::auth::GoogleAuthRequest,
        routes::auth::AuthResponse,
        routes::auth::RefreshRequest,
        routes::auth::RefreshResponse,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Assemble the full application: routes, rate limits, auth injection and
/// the outer HTTP layers.
fn build_app(app_state: state::AppState, config: &config::AppConfig) -> Router {
    let cors_layer = middleware::cors::build_cors_layer(&config.cors_origins);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::auth::google_router().layer(middleware::rate_limit::google_login_layer()))
        .merge(routes::auth::refresh_router().layer(middleware::rate_limit::refresh_layer()))
        .merge(routes::todos::router())
        .merge(routes::todos::plan_router().layer(middleware::rate_limit::plan_layer()))
        .layer(auth::InjectAuthLayer::new(
            app_state.tokens.clone(),
            app_state.db.clone(),
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(middleware::security_headers::apply))
                .layer(cors_layer),
        )
        .with_state(app_state)
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aitodo_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = match config::AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    if config.inference.token.is_none() {
        tracing::warn!("GITHUB_TOKEN is not set; task planning will answer 503");
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let app_state = state::AppState::new(pool, &config);
    let app = build_app(app_state, &config);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("AI Todo API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server error");
}
