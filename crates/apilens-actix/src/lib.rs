//! # apilens-actix
//!
//! actix-web adapter for the apilens HTTP traffic capture layer.
//!
//! The middleware drains the request payload and re-injects it so
//! handlers see an intact body, then wraps the response body in a
//! pass-through [`MessageBody`] that accumulates the bytes as they stream
//! to the client. The payload is built and published once the response
//! body completes (or is dropped), so capture never delays the response.
//!
//! ```ignore
//! use apilens_actix::Capture;
//! use apilens_core::{CaptureConfig, MemoryPublisher};
//! use actix_web::{web, App};
//!
//! let app = App::new()
//!     .wrap(Capture::new(CaptureConfig::new(), MemoryPublisher::new()))
//!     .route("/{slug}/test", web::post().to(handler));
//! ```

#![warn(missing_docs)]

use actix_http::h1;
use actix_web::body::{BodySize, MessageBody};
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header;
use actix_web::{Error, HttpMessage, HttpRequest};
use apilens_core::{
    parse_query, spawn_publish, CaptureConfig, CaptureContext, PayloadBuilder, Publisher, SdkType,
};
use bytes::{Bytes, BytesMut};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use futures_util::StreamExt;
use pin_project_lite::pin_project;
use std::collections::HashMap;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Middleware factory; register with `App::wrap`.
#[derive(Clone)]
pub struct Capture {
    config: Arc<CaptureConfig>,
    publisher: Arc<dyn Publisher>,
}

impl Capture {
    /// Create the middleware from a configuration and a publisher.
    pub fn new(config: CaptureConfig, publisher: impl Publisher) -> Self {
        Self {
            config: Arc::new(config),
            publisher: Arc::new(publisher),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Capture
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<CaptureBody<B>>;
    type Error = Error;
    type Transform = CaptureMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(CaptureMiddleware {
            service: Rc::new(service),
            config: self.config.clone(),
            publisher: self.publisher.clone(),
        }))
    }
}

/// The wrapping service produced by [`Capture`].
pub struct CaptureMiddleware<S> {
    service: Rc<S>,
    config: Arc<CaptureConfig>,
    publisher: Arc<dyn Publisher>,
}

impl<S, B> Service<ServiceRequest> for CaptureMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<CaptureBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let config = Arc::clone(&self.config);
        let publisher = Arc::clone(&self.publisher);

        Box::pin(async move {
            // Drain the payload, then hand the handler an equivalent
            // unread-from-start stream. A read failure degrades to empty.
            let mut buffered = BytesMut::new();
            let mut payload = req.take_payload();
            while let Some(chunk) = payload.next().await {
                match chunk {
                    Ok(bytes) => buffered.extend_from_slice(&bytes),
                    Err(_) => {
                        buffered.clear();
                        break;
                    }
                }
            }
            let request_body = buffered.freeze();

            let (_, mut replay) = h1::Payload::create(true);
            replay.unread_data(request_body.clone());
            req.set_payload(actix_http::Payload::from(replay));

            let context = CaptureContext::new();
            req.extensions_mut().insert(context.clone());

            let method = req.method().to_string();
            let raw_url = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| req.path().to_string());
            let query_params = parse_query(Some(req.query_string()));
            let request_headers = headers_to_map(req.headers());
            let referrer = req
                .headers()
                .get(header::REFERER)
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
            let start = Instant::now();

            // Downstream errors propagate unchanged.
            let res = service.call(req).await?;
            // Stop the clock at the response head, like the server
            // adapters that buffer eagerly; streaming the body to the
            // client is not handler time.
            let duration = start.elapsed();

            let url_path = res
                .request()
                .match_pattern()
                .unwrap_or_else(|| res.request().path().to_string());
            let path_params: HashMap<String, String> = res
                .request()
                .match_info()
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect();
            let status_code = res.status().as_u16();
            let response_headers = headers_to_map(res.response().headers());

            let pending = PendingPayload {
                config,
                publisher,
                context,
                method,
                raw_url,
                url_path,
                path_params,
                query_params,
                request_headers,
                response_headers,
                request_body,
                referrer,
                status_code,
                duration,
            };

            Ok(res.map_body(move |_head, body| CaptureBody {
                inner: body,
                captured: BytesMut::new(),
                pending: Some(pending),
            }))
        })
    }
}

/// Everything captured before the response body finished streaming.
struct PendingPayload {
    config: Arc<CaptureConfig>,
    publisher: Arc<dyn Publisher>,
    context: CaptureContext,
    method: String,
    raw_url: String,
    url_path: String,
    path_params: HashMap<String, String>,
    query_params: HashMap<String, Vec<String>>,
    request_headers: HashMap<String, Vec<String>>,
    response_headers: HashMap<String, Vec<String>>,
    request_body: Bytes,
    referrer: Option<String>,
    status_code: u16,
    duration: Duration,
}

impl PendingPayload {
    fn finish(self, response_body: Bytes) {
        let mut builder =
            PayloadBuilder::new(SdkType::ActixWeb, self.method, self.raw_url)
                .url_path(self.url_path)
                .path_params(self.path_params)
                .query_params(self.query_params)
                .request_headers(self.request_headers)
                .response_headers(self.response_headers)
                .request_body(self.request_body)
                .response_body(response_body)
                .status_code(self.status_code)
                .duration(self.duration)
                .errors(self.context.take_errors())
                .message_id(self.context.message_id());
        if let Some(referrer) = self.referrer {
            builder = builder.referrer(referrer);
        }
        let debug = self.config.is_debug();
        let payload = builder.build(&self.config);
        spawn_publish(self.publisher, payload, debug);
    }
}

pin_project! {
    /// Pass-through response body that accumulates streamed bytes and
    /// publishes the payload once the body completes or is dropped.
    pub struct CaptureBody<B> {
        #[pin]
        inner: B,
        captured: BytesMut,
        pending: Option<PendingPayload>,
    }

    impl<B> PinnedDrop for CaptureBody<B> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            // Client disconnected mid-stream: publish what we have.
            if let Some(pending) = this.pending.take() {
                pending.finish(this.captured.split().freeze());
            }
        }
    }
}

impl<B> MessageBody for CaptureBody<B>
where
    B: MessageBody,
{
    type Error = B::Error;

    fn size(&self) -> BodySize {
        self.inner.size()
    }

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Bytes, Self::Error>>> {
        let this = self.project();
        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.captured.extend_from_slice(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                if let Some(pending) = this.pending.take() {
                    pending.finish(this.captured.split().freeze());
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

fn headers_to_map(headers: &header::HeaderMap) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers.iter() {
        map.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    map
}

/// Report `error` against the exchange that produced `req`. A no-op when
/// the capture middleware did not wrap this request.
#[track_caller]
pub fn report_error<E: std::error::Error + ?Sized>(req: &HttpRequest, error: &E) {
    if let Some(context) = req.extensions().get::<CaptureContext>() {
        context.report(error);
    }
}
