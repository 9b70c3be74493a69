use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer;
use crate::AppState;

mod extract;
pub mod handlers;

/// Build the full HTTP surface: public routes, bearer-protected VM routes,
/// and the ambient layers (tracing, CORS, request ids, security headers).
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/vms", get(handlers::list_vms))
        .route("/vms/:vmid/status", get(handlers::vm_status))
        .route("/vms/:vmid/details", get(handlers::vm_details))
        .route("/vms/:vmid/start", post(handlers::start_vm))
        .route("/vms/:vmid/stop", post(handlers::stop_vm))
        .route("/vms/:vmid/shutdown", post(handlers::shutdown_vm))
        .route("/vms/:vmid/reset", post(handlers::reset_vm))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/test", get(handlers::liveness))
        .route("/token", post(handlers::login))
        .merge(protected)
        .fallback(fallback_404)
        .with_state(state)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<String> = origins.to_vec();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            allowed.iter().any(|o| o == origin_str)
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        // AllowHeaders::any() is not allowed together with credentials
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-request-id"),
        ])
        .allow_credentials(true)
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: security headers on every response. Tokens travel in bodies
/// and headers, so nothing here may be cached.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}
