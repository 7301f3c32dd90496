//! Router assembly.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{self, AccessLogLayer, AuthConfig};
use crate::handlers;
use crate::openapi::ApiDoc;
use crate::state::AppState;

pub(crate) fn build_router(state: AppState, auth: Option<Arc<AuthConfig>>) -> Router {
    let mut app = Router::new()
        .route("/api/v1/health", get(handlers::handle_health))
        .route("/api/v1/monitoring/start", post(handlers::handle_start))
        .route("/api/v1/monitoring/stop", post(handlers::handle_stop))
        .route("/api/v1/monitoring/status", get(handlers::handle_status))
        .route("/api/v1/metrics", get(handlers::handle_metrics))
        .route(
            "/api/v1/metrics/assessment",
            get(handlers::handle_assessment),
        )
        .route("/api/v1/metrics/stream", get(handlers::handle_stream))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state);

    // The access log sits inside auth so it can read the AuthUser extension.
    app = app.layer(AccessLogLayer);

    if let Some(auth) = auth {
        app = app.layer(axum::middleware::from_fn_with_state(
            auth,
            auth::basic_auth_middleware,
        ));
    }

    app.layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
}
