//! # apilens-axum
//!
//! axum adapter for the apilens HTTP traffic capture layer.
//!
//! Unlike the generic tower adapter, axum can supply the matched route
//! template ([`MatchedPath`]) and the extracted path parameters
//! ([`RawPathParams`]), so payloads carry `urlPath = "/:slug/test"` and a
//! populated `pathParams` map.
//!
//! ```ignore
//! use apilens_axum::{capture, CaptureState};
//! use apilens_core::{CaptureConfig, MemoryPublisher};
//! use axum::{middleware, routing::post, Router};
//!
//! let state = CaptureState::new(CaptureConfig::new(), MemoryPublisher::new());
//! let app: Router = Router::new()
//!     .route("/:slug/test", post(handler))
//!     .layer(middleware::from_fn_with_state(state, capture));
//! ```

#![warn(missing_docs)]

use apilens_core::{
    headers_to_map, parse_query, spawn_publish, CaptureConfig, CaptureContext, PayloadBuilder,
    Publisher, SdkType,
};
use axum::body::{to_bytes, Body};
use axum::extract::{MatchedPath, RawPathParams, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use bytes::Bytes;
use http::header;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Configuration and publisher shared by every exchange the middleware
/// sees. Pass it to `axum::middleware::from_fn_with_state`.
#[derive(Clone)]
pub struct CaptureState {
    config: Arc<CaptureConfig>,
    publisher: Arc<dyn Publisher>,
}

impl CaptureState {
    /// Create the middleware state from a configuration and a publisher.
    pub fn new(config: CaptureConfig, publisher: impl Publisher) -> Self {
        Self {
            config: Arc::new(config),
            publisher: Arc::new(publisher),
        }
    }
}

/// The capture middleware function.
///
/// Use with [`axum::middleware::from_fn_with_state`]. Capture failures
/// degrade to empty bytes; the handler's response reaches the caller
/// unchanged and publish happens off the response path.
pub async fn capture(
    State(state): State<CaptureState>,
    matched_path: Option<MatchedPath>,
    raw_path_params: Option<RawPathParams>,
    request: Request,
    next: Next,
) -> Response {
    let path_params: HashMap<String, String> = raw_path_params
        .map(|params| {
            params
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let (mut parts, body) = request.into_parts();
    let request_body = to_bytes(body, usize::MAX).await.unwrap_or_default();

    let context = CaptureContext::new();
    parts.extensions.insert(context.clone());

    let method = parts.method.to_string();
    let raw_url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());
    let url_path = matched_path
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());
    let query_params = parse_query(parts.uri.query());
    let request_headers = headers_to_map(&parts.headers);
    let referrer = parts
        .headers
        .get(header::REFERER)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

    let request = Request::from_parts(parts, Body::from(request_body.clone()));
    let start = Instant::now();

    let response = next.run(request).await;
    let duration = start.elapsed();

    let (parts, body) = response.into_parts();
    let response_body: Bytes = to_bytes(body, usize::MAX).await.unwrap_or_default();

    let mut builder = PayloadBuilder::new(SdkType::Axum, method, raw_url)
        .url_path(url_path)
        .path_params(path_params)
        .query_params(query_params)
        .request_headers(request_headers)
        .response_headers(headers_to_map(&parts.headers))
        .request_body(request_body)
        .response_body(response_body.clone())
        .status_code(parts.status.as_u16())
        .duration(duration)
        .errors(context.take_errors())
        .message_id(context.message_id());
    if let Some(referrer) = referrer {
        builder = builder.referrer(referrer);
    }
    let payload = builder.build(&state.config);

    spawn_publish(state.publisher.clone(), payload, state.config.is_debug());

    Response::from_parts(parts, Body::from(response_body))
}
