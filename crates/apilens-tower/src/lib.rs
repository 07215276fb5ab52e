//! # apilens-tower
//!
//! Generic server adapter: a [`tower::Layer`] + [`tower::Service`] pair
//! that captures one payload per exchange for any hyper/tower HTTP stack.
//!
//! The service buffers the request body, re-injects it as
//! [`Full<Bytes>`] so the wrapped service sees an intact body, times the
//! inner call, buffers the response body, and hands the built payload to
//! the publisher without blocking the response path. No route template is
//! known at this layer, so `urlPath` falls back to the observed path.
//!
//! ```ignore
//! use apilens_core::{CaptureConfig, MemoryPublisher};
//! use apilens_tower::CaptureLayer;
//! use tower::ServiceBuilder;
//!
//! let layer = CaptureLayer::new(CaptureConfig::new(), MemoryPublisher::new());
//! let service = ServiceBuilder::new().layer(layer).service(inner);
//! ```

#![warn(missing_docs)]

use apilens_core::{
    headers_to_map, parse_query, spawn_publish, CaptureConfig, CaptureContext, PayloadBuilder,
    Publisher, SdkType,
};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{header, Request, Response};
use http_body_util::{BodyExt, Full};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};

/// Layer that wraps a service in a [`CaptureService`].
#[derive(Clone)]
pub struct CaptureLayer {
    config: Arc<CaptureConfig>,
    publisher: Arc<dyn Publisher>,
}

impl CaptureLayer {
    /// Create a capture layer from a configuration and a publisher.
    pub fn new(config: CaptureConfig, publisher: impl Publisher) -> Self {
        Self {
            config: Arc::new(config),
            publisher: Arc::new(publisher),
        }
    }
}

impl<S> Layer<S> for CaptureLayer {
    type Service = CaptureService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CaptureService {
            inner,
            config: self.config.clone(),
            publisher: self.publisher.clone(),
        }
    }
}

/// Service wrapper that captures one payload per exchange.
#[derive(Clone)]
pub struct CaptureService<S> {
    inner: S,
    config: Arc<CaptureConfig>,
    publisher: Arc<dyn Publisher>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CaptureService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send,
    ReqBody: http_body::Body + Send + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: Send,
    ResBody: http_body::Body + Send + 'static,
    ResBody::Data: Send,
    ResBody::Error: Send,
{
    type Response = Response<Full<Bytes>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), S::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // The clone sees the readiness we just polled; keep it, hand the
        // original back.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let config = self.config.clone();
        let publisher = self.publisher.clone();

        Box::pin(async move {
            let (mut parts, body) = request.into_parts();

            // Buffer the request body; a read failure degrades to empty
            // and the exchange proceeds.
            let request_body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(_) => Bytes::new(),
            };

            let context = CaptureContext::new();
            parts.extensions.insert(context.clone());

            let method = parts.method.to_string();
            let raw_url = parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| parts.uri.path().to_string());
            let query_params = parse_query(parts.uri.query());
            let request_headers = headers_to_map(&parts.headers);
            let referrer = parts
                .headers
                .get(header::REFERER)
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

            let request = Request::from_parts(parts, Full::new(request_body.clone()));
            let start = Instant::now();

            // Downstream errors propagate unchanged.
            let response = inner.call(request).await?;
            let duration = start.elapsed();

            let (parts, body) = response.into_parts();
            let response_body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(_) => Bytes::new(),
            };

            let mut builder = PayloadBuilder::new(SdkType::GenericServer, method, raw_url)
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
            let payload = builder.build(&config);

            spawn_publish(publisher, payload, config.is_debug());

            Ok(Response::from_parts(parts, Full::new(response_body)))
        })
    }
}
