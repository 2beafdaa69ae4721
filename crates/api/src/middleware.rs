use crate::ApiConfig;
use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, info, warn};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const RESPONSE_TIME_HEADER: &str = "x-response-time";

/// `*` allows any origin; unparsable origins are skipped.
pub fn cors_layer(config: &ApiConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .expose_headers([
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderName::from_static(RESPONSE_TIME_HEADER),
        ])
        .max_age(Duration::from_secs(3600));

    if config.cors_origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

pub fn timeout_layer(config: &ApiConfig) -> TimeoutLayer {
    TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs))
}

pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    info!("Incoming request: {} {}", method, uri);

    let mut response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();
    if let Ok(value) = HeaderValue::from_str(&format!("{}ms", duration.as_millis())) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(RESPONSE_TIME_HEADER), value);
    }

    if status.is_server_error() {
        warn!("Request failed: {} {} - {} - {:?}", method, uri, status, duration);
    } else if status.is_client_error() {
        debug!("Request rejected: {} {} - {} - {:?}", method, uri, status, duration);
    } else {
        info!("Request completed: {} {} - {} - {:?}", method, uri, status, duration);
    }

    response
}

/// Keeps a caller supplied `x-request-id`, otherwise generates one.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let header = HeaderName::from_static(REQUEST_ID_HEADER);
    let request_id = match request.headers().get(&header) {
        Some(value) => value.clone(),
        None => match HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) {
            Ok(value) => value,
            Err(_) => return next.run(request).await,
        },
    };

    request.headers_mut().insert(header.clone(), request_id.clone());
    let mut response = next.run(request).await;
    response.headers_mut().insert(header, request_id);
    response
}

pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}
