// SPDX-License-Identifier: MIT OR Apache-2.0
//! Middleware stack shared by the client and spectator HTTP/WS surfaces.

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::info;
use uuid::Uuid;

/// A unique request identifier, available as an Axum extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

/// Generates a [`RequestId`] for each request and sets the `x-request-id`
/// response header, including on the websocket upgrade response.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    req.extensions_mut().insert(id);
    let mut resp = next.run(req).await;
    resp.headers_mut()
        .insert("x-request-id", HeaderValue::from_str(&id.0.to_string()).unwrap());
    resp
}

/// Logs method, path, status code, and duration for each request using
/// [`tracing`] structured fields.
pub struct RequestLogger;

impl RequestLogger {
    /// Axum-compatible handler function, wired in with [`axum::middleware::from_fn`].
    pub async fn layer(req: Request, next: Next) -> Response {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let start = Instant::now();

        let resp = next.run(req).await;

        info!(
            http.method = %method,
            http.path = %path,
            http.status = resp.status().as_u16(),
            http.duration_ms = start.elapsed().as_millis() as u64,
            "request completed"
        );

        resp
    }
}

/// Configuration for CORS headers on the client and spectator routers.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Origins allowed to connect; `["*"]` disables origin restriction.
    pub allowed_origins: Vec<String>,
    /// HTTP methods allowed, as strings (e.g. `"GET"`).
    pub allowed_methods: Vec<String>,
    /// Request headers the browser is allowed to send.
    pub allowed_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
            allowed_headers: vec!["content-type".to_string()],
        }
    }
}

impl CorsConfig {
    /// Convert this configuration into a [`tower_http::cors::CorsLayer`].
    ///
    /// A wildcard origin is expressed via [`AllowOrigin::any`] rather than a
    /// literal `"*"` header value, since browsers reject a literal wildcard
    /// alongside credentialed requests.
    #[must_use]
    pub fn to_cors_layer(&self) -> CorsLayer {
        let methods: Vec<axum::http::Method> = self
            .allowed_methods
            .iter()
            .filter_map(|m| m.parse().ok())
            .collect();
        let headers: Vec<axum::http::HeaderName> = self
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();

        let origin = if self.allowed_origins.iter().any(|o| o == "*") {
            AllowOrigin::any()
        } else {
            AllowOrigin::list(
                self.allowed_origins
                    .iter()
                    .filter_map(|o| HeaderValue::from_str(o).ok())
                    .collect::<Vec<_>>(),
            )
        };

        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(AllowMethods::list(methods))
            .allow_headers(AllowHeaders::list(headers))
    }
}
