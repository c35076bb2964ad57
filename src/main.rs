use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod error;
mod login;
mod state;

use auth::backend::StaticAuthBackend;
use auth::session::SessionStore;
use config::Config;
use login::flow::LoginFlowStore;
use state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(login::routes::home))
        .route(
            "/login",
            get(login::routes::login_page).post(login::routes::login_submit),
        )
        .route("/login/two-factor", post(login::routes::two_factor_submit))
        .route("/login/back", post(login::routes::back_to_login))
        .route("/login/status", get(login::routes::login_status))
        .route("/logout", post(login::routes::logout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    if config.account.two_factor_code.is_none() {
        tracing::warn!("BLOGLOGIN_TWO_FACTOR_CODE is not set; two-factor step is disabled");
    }

    let state = Arc::new(AppState {
        backend: Arc::new(StaticAuthBackend::new(&config.account)),
        flows: tokio::sync::Mutex::new(LoginFlowStore::new()),
        sessions: tokio::sync::Mutex::new(SessionStore::new()),
        default_locale: config.default_locale,
    });

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("BlogLogin server listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
