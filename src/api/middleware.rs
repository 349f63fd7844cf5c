//! Cross-cutting HTTP layers for the coordinator API
//!
//! Outermost first: access log, panic recovery, CORS.

use super::response::ApiError;
use axum::extract::{ConnectInfo, Request};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::any::Any;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};

/// Preflight results may be cached by browsers for a day
const CORS_MAX_AGE: Duration = Duration::from_secs(86_400);

/// Wrap `router` with the access log, panic recovery and CORS layers
pub fn with_middleware(router: Router) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(middleware::from_fn(access_log))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(cors_layer()),
    )
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION, HeaderName::from_static("x-requested-with")])
        .max_age(CORS_MAX_AGE)
}

/// One line per request: method, path, status, duration, peer
async fn access_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());

    let start = Instant::now();
    let response = next.run(request).await;

    log::info!(
        "{} {} {} {:?} {}",
        method,
        path,
        response.status().as_u16(),
        start.elapsed(),
        remote
    );
    response
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    };
    log::error!("💥 Handler panicked: {}", detail);

    ApiError::internal("an unexpected error occurred while processing the request").into_response()
}
