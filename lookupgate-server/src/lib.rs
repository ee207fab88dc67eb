// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Lookupgate Server
//!
//! HTTP front end: login/register pages, cookie sessions, chat-backed
//! lookups through the correlator and direct third-party lookups.

pub mod api;
pub mod auth;
pub mod config;
pub mod external;
pub mod pages;
pub mod store;

use anyhow::Result;
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use lookupgate_core::{ChatConnector, Correlator, LoopbackConnector, TelegramConnector};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::{
    docs, external_lookup, health_check, login_form, login_submit, lookup_v1, lookup_v2,
    register_form, register_submit, AppState,
};
use auth::{require_session, AuthGateway};
use config::{ConnectorKind, GatewayConfig};
use external::ExternalLookup;
use store::{QueryLog, UserStore};

/// Delay of the in-memory echo responder's final reply
const LOOPBACK_REPLY_DELAY: Duration = Duration::from_millis(500);

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "lookupgate_server=info,lookupgate_core=info,tower_http=info".into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Open the chat connector selected in the configuration
pub async fn connect(config: &GatewayConfig) -> Result<Arc<dyn ChatConnector>> {
    let connector: Arc<dyn ChatConnector> = match config.telegram.connector {
        ConnectorKind::Telegram => {
            tracing::info!("Connecting to Telegram Bot API at {}", config.telegram.bot.api_base);
            Arc::new(TelegramConnector::connect(config.telegram.bot.clone()).await?)
        }
        ConnectorKind::Loopback => {
            tracing::warn!("Using in-memory loopback connector; lookups are answered locally");
            Arc::new(LoopbackConnector::echo(LOOPBACK_REPLY_DELAY))
        }
    };
    Ok(connector)
}

/// Open the stores and wire the request-handling state around `connector`
pub fn build_state(config: &GatewayConfig, connector: Arc<dyn ChatConnector>) -> Result<AppState> {
    let users = UserStore::open(config.users_path())?;
    let query_log = QueryLog::open(config.query_log_path())?;

    let auth = AuthGateway::new(
        users,
        config.auth.session_mode,
        config.auth.session_secret.as_deref(),
    )?;
    tracing::info!("Session mode: {:?}", auth.mode());

    let correlator = Correlator::new(connector, config.correlator.clone());
    tracing::info!(
        channel_id = config.correlator.channel_id,
        timeout_ms = config.correlator.reply_timeout_ms,
        policy = ?config.correlator.match_policy,
        "Correlator ready"
    );

    Ok(AppState {
        correlator,
        external: Arc::new(ExternalLookup::new(config.external.clone())?),
        auth: Arc::new(auth),
        query_log,
        branding: Arc::new(config.branding.clone()),
    })
}

pub fn build_router(state: AppState, config: &GatewayConfig) -> Router {
    // /free/v1 and /free/v2 take priority over the /free/:tipo pattern
    let authed_routes = Router::new()
        .route("/free/v1/:tipo/:dado", get(lookup_v1))
        .route("/free/v2/:tipo/:dado", get(lookup_v2))
        .route("/free/:tipo/:valor", get(external_lookup))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    Router::new()
        .route("/", get(login_form))
        .route("/login", post(login_submit))
        .route("/cadastro", get(register_form).post(register_submit))
        .route("/docs-api", get(docs))
        .route("/health", get(health_check))
        .merge(authed_routes)
        .nest_service("/static", ServeDir::new(&config.server.static_dir))
        .with_state(state)
        .layer(if config.server.enable_cors {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            CorsLayer::new()
        })
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            futures::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                futures::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = futures::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

pub async fn run_server(config: GatewayConfig) -> Result<()> {
    init_tracing(config.server.log_json);

    tracing::info!("Starting Lookupgate Server");
    config.validate()?;
    let addr = config.socket_addr()?;

    let connector = connect(&config).await?;
    let state = build_state(&config, connector.clone())?;
    let app = build_router(state, &config);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    connector.shutdown().await;
    tracing::info!("HTTP server shutdown complete");
    Ok(())
}
