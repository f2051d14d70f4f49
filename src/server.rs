//! # Server Configuration
//!
//! This module contains the application state, router construction, and the
//! run loop (HTTP serving plus the background polling task) for the Finbox
//! API.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::{Router, middleware};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth;
use crate::categorize::CategorizationGateway;
use crate::config::AppConfig;
use crate::connectors::broker::ConnectorError;
use crate::connectors::{GmailConnector, SlackConnector};
use crate::crypto::CryptoKey;
use crate::error::ApiError;
use crate::handlers;
use crate::ingest::MessageIngestor;
use crate::polling::EmailPollingService;
use crate::repositories::{ConnectionRepository, EmailRepository, TokenRepository};
use crate::telemetry::{self, TraceContext};
use crate::threads::ThreadAssembler;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub crypto_key: CryptoKey,
}

impl AppState {
    /// Build the per-request Gmail connector.
    ///
    /// Services are stateless and constructed per call site; only config,
    /// pool, and key are shared.
    pub fn gmail_connector(&self) -> Result<GmailConnector, ApiError> {
        GmailConnector::from_config(&self.config, self.db.clone(), self.crypto_key.clone())
            .map_err(configuration_error)
    }

    /// Build the per-request Slack connector.
    pub fn slack_connector(&self) -> Result<SlackConnector, ApiError> {
        SlackConnector::from_config(&self.config, self.db.clone(), self.crypto_key.clone())
            .map_err(configuration_error)
    }

    /// Build the per-request message ingestor.
    pub fn ingestor(&self) -> Result<MessageIngestor, ApiError> {
        Ok(MessageIngestor::new(
            self.gmail_connector()?,
            self.email_repo(),
            self.connection_repo(),
            CategorizationGateway::new(self.config.categorization.clone()),
        ))
    }

    pub fn email_repo(&self) -> EmailRepository {
        EmailRepository::new(self.db.clone())
    }

    pub fn token_repo(&self) -> TokenRepository {
        TokenRepository::new(self.db.clone(), self.crypto_key.clone())
    }

    pub fn connection_repo(&self) -> ConnectionRepository {
        ConnectionRepository::new(self.db.clone())
    }

    pub fn thread_assembler(&self) -> ThreadAssembler {
        ThreadAssembler::new(self.email_repo())
    }
}

fn configuration_error(err: ConnectorError) -> ApiError {
    tracing::error!(error = %err, "Connector configuration error");
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_SERVER_ERROR",
        "OAuth provider is not configured",
    )
}

/// Assigns every request a correlation trace id, visible to error responses
/// through the task-local trace context.
async fn trace_context_middleware(mut request: Request, next: Next) -> Response {
    let context = TraceContext {
        trace_id: format!("req-{}", &uuid::Uuid::new_v4().to_string()[..8]),
    };

    request.extensions_mut().insert(context.clone());
    telemetry::with_trace_context(context, next.run(request)).await
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    // OAuth callbacks arrive from the provider without our bearer token, so
    // they live outside the auth layer.
    let public = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/google-auth/callback", get(handlers::gmail_auth::callback))
        .route("/slack-auth/callback", get(handlers::slack_auth::callback));

    let protected = Router::new()
        .route("/google-auth/", get(handlers::gmail_auth::login))
        .route("/google-auth/status", get(handlers::gmail_auth::status))
        .route("/google-auth/logout", post(handlers::gmail_auth::logout))
        .route("/slack-auth/", get(handlers::slack_auth::login))
        .route("/slack-auth/status", get(handlers::slack_auth::status))
        .route(
            "/slack-auth/disconnect",
            delete(handlers::slack_auth::disconnect),
        )
        .route("/connections", get(handlers::connections::list_connections))
        .route("/inbox/", get(handlers::inbox::get_inbox))
        .route("/inbox/emails", get(handlers::inbox::get_emails))
        .route("/inbox/emails/sync", post(handlers::inbox::sync_emails))
        .route("/inbox/email/{id}", get(handlers::inbox::get_single_email))
        .route(
            "/inbox/email/{id}/read",
            put(handlers::inbox::mark_email_read),
        )
        .route(
            "/inbox/email/{id}/reply",
            post(handlers::inbox::reply_to_email),
        )
        .route("/inbox/thread/{thread_id}", get(handlers::inbox::get_thread))
        .route(
            "/inbox/thread/{thread_id}/read",
            put(handlers::inbox::mark_thread_read),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth::auth_middleware,
        ));

    public
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(trace_context_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Starts the server and background polling with the given configuration
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    let crypto_key = match &config.crypto_key {
        Some(bytes) => CryptoKey::new(bytes.clone())?,
        None => return Err("FINBOX_CRYPTO_KEY must be set (base64, 32 bytes)".into()),
    };

    let config = Arc::new(config);
    let state = AppState {
        config: Arc::clone(&config),
        db: db.clone(),
        crypto_key: crypto_key.clone(),
    };

    let app = create_app(state);

    let shutdown = CancellationToken::new();

    let polling = EmailPollingService::new(Arc::clone(&config), db, crypto_key);
    let polling_shutdown = shutdown.clone();
    let polling_handle = tokio::spawn(async move {
        polling.run(polling_shutdown).await;
    });

    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, profile = %config.profile, "Server listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                }
                _ = serve_shutdown.cancelled() => {}
            }
        })
        .await?;

    shutdown.cancel();
    let _ = polling_handle.await;

    Ok(())
}

/// Registers the bearer JWT security scheme
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::gmail_auth::login,
        crate::handlers::gmail_auth::callback,
        crate::handlers::gmail_auth::status,
        crate::handlers::gmail_auth::logout,
        crate::handlers::slack_auth::login,
        crate::handlers::slack_auth::callback,
        crate::handlers::slack_auth::status,
        crate::handlers::slack_auth::disconnect,
        crate::handlers::connections::list_connections,
        crate::handlers::inbox::get_inbox,
        crate::handlers::inbox::get_emails,
        crate::handlers::inbox::sync_emails,
        crate::handlers::inbox::get_single_email,
        crate::handlers::inbox::get_thread,
        crate::handlers::inbox::mark_email_read,
        crate::handlers::inbox::mark_thread_read,
        crate::handlers::inbox::reply_to_email,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::Provider,
            crate::error::ApiError,
            crate::error::ProviderError,
            crate::handlers::types::AuthorizeUrlResponse,
            crate::handlers::types::MessageResponse,
            crate::handlers::types::AuthStatusResponse,
            crate::handlers::types::EmailReplyRequest,
            crate::handlers::types::EmailListItem,
            crate::handlers::types::EmailDetail,
            crate::handlers::connections::ConnectionInfo,
            crate::handlers::connections::ConnectionsResponse,
            crate::handlers::inbox::InboxResponse,
            crate::handlers::inbox::EmailsResponse,
            crate::handlers::inbox::SyncResponse,
            crate::handlers::inbox::ReplyResponse,
            crate::handlers::inbox::MarkReadResponse,
            crate::threads::Thread,
            crate::threads::ThreadEmail,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Finbox API",
        description = "Finance inbox backend: OAuth connections, email ingestion, and threads",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
