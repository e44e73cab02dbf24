//! Axum router construction.
//!
//! Builds the application router with its route groups, middleware layers,
//! and the generated OpenAPI document.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::{DefaultOnFailure, TraceLayer};
use tracing::Level;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::context::AppContext;
use crate::middleware::auth::auth_middleware;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health_check,
        routes::formats::list_formats,
        routes::convert::convert_document,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::formats::FormatsResponse,
        routes::convert::ConvertUpload,
        crate::error::ErrorBody,
    )),
    modifiers(&BearerScheme)
)]
pub struct ApiDoc;

struct BearerScheme;

impl Modify for BearerScheme {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let body_limit = usize::try_from(ctx.config.server.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(routes::convert::MULTIPART_HEADROOM);

    // Protected routes. The auth middleware passes everything through when
    // auth is disabled.
    let protected_routes = Router::new()
        .route("/formats", get(routes::formats::list_formats))
        .route(
            "/convert",
            post(routes::convert::convert_document).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route_layer(middleware::from_fn_with_state(ctx.clone(), auth_middleware));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/openapi.json", get(openapi_json))
        .merge(protected_routes)
        .layer(middleware::from_fn(request_id_middleware))
        // Conversion failures are logged once, by the handler's request record.
        .layer(TraceLayer::new_for_http().on_failure(DefaultOnFailure::new().level(Level::DEBUG)))
        .with_state(ctx)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
