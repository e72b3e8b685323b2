/// Forwarding routes for the API and the image CDN
/// Adds CORS headers so a browser page can call both directly

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use generation::media::{IMAGE_CDN_HOST, IMAGE_PROXY_PREFIX};
use generation::DEFAULT_API_BASE;

const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Request headers that never travel to the upstream.
const DROPPED_REQUEST_HEADERS: [HeaderName; 4] = [
    header::HOST,
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
];

const DROPPED_RESPONSE_HEADERS: [HeaderName; 3] = [
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
];

/// Proxy error type
pub enum ProxyError {
    Api(String),
    Image(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (label, message) = match self {
            ProxyError::Api(message) => ("proxy error", message),
            ProxyError::Image(message) => ("image proxy error", message),
        };
        error!("{label}: {message}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": label, "message": message })),
        )
            .into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Api,
    Image,
}

impl Route {
    fn allow_methods(self) -> &'static str {
        match self {
            Route::Api => "GET, POST, PUT, DELETE, OPTIONS",
            Route::Image => "GET, OPTIONS",
        }
    }

    fn error(self, message: String) -> ProxyError {
        match self {
            Route::Api => ProxyError::Api(message),
            Route::Image => ProxyError::Image(message),
        }
    }
}

/// Where each route forwards to.
#[derive(Debug, Clone)]
pub struct Targets {
    pub api: String,
    pub images: String,
}

impl Default for Targets {
    fn default() -> Self {
        Self {
            api: DEFAULT_API_BASE.to_string(),
            images: format!("https://{IMAGE_CDN_HOST}"),
        }
    }
}

#[derive(Clone)]
pub struct ProxyState {
    client: reqwest::Client,
    targets: Arc<Targets>,
}

impl ProxyState {
    pub fn new(targets: Targets) -> Self {
        Self {
            client: reqwest::Client::new(),
            targets: Arc::new(Targets {
                api: targets.api.trim_end_matches('/').to_string(),
                images: targets.images.trim_end_matches('/').to_string(),
            }),
        }
    }

    fn base(&self, route: Route) -> &str {
        match route {
            Route::Api => &self.targets.api,
            Route::Image => &self.targets.images,
        }
    }

    /// Upstream URL for an incoming path: API paths are kept, image paths
    /// lose the proxy prefix.
    fn target_url(&self, route: Route, path_and_query: &str) -> String {
        let path = match route {
            Route::Api => path_and_query,
            Route::Image => path_and_query
                .strip_prefix(IMAGE_PROXY_PREFIX)
                .unwrap_or(path_and_query),
        };
        format!("{}{}", self.base(route), path)
    }
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/*rest", any(forward_api))
        .route("/image-proxy/*rest", any(forward_image))
        // Answers preflight requests before they reach the upstream
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .with_state(state)
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "OK", "message": "proxy server is running" }))
}

async fn forward_api(State(state): State<ProxyState>, request: Request) -> Result<Response, ProxyError> {
    forward(&state, Route::Api, request).await
}

async fn forward_image(State(state): State<ProxyState>, request: Request) -> Result<Response, ProxyError> {
    forward(&state, Route::Image, request).await
}

async fn forward(state: &ProxyState, route: Route, request: Request) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = state.target_url(route, path_and_query);
    info!("proxy request: {} {} -> {}", parts.method, parts.uri, target);

    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| route.error(e.to_string()))?;

    let mut headers = parts.headers.clone();
    for name in &DROPPED_REQUEST_HEADERS {
        headers.remove(name);
    }
    let origin = HeaderValue::from_str(state.base(route)).map_err(|e| route.error(e.to_string()))?;
    headers.insert(header::ORIGIN, origin.clone());
    headers.insert(header::REFERER, origin);
    if route == Route::Api && parts.method == Method::POST {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    let upstream = state
        .client
        .request(parts.method.clone(), &target)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| route.error(e.to_string()))?;

    let status = upstream.status();
    info!("proxy response: {} {}", status, parts.uri);
    let mut response_headers = upstream.headers().clone();
    let bytes = upstream.bytes().await.map_err(|e| route.error(e.to_string()))?;

    for name in &DROPPED_RESPONSE_HEADERS {
        response_headers.remove(name);
    }
    add_cors_headers(&mut response_headers, route);

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

fn add_cors_headers(headers: &mut HeaderMap, route: Route) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(route.allow_methods()),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
}
