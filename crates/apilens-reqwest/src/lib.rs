//! # apilens-reqwest
//!
//! Outgoing-transport adapter for the apilens HTTP traffic capture layer.
//!
//! [`CaptureClient`] wraps a [`reqwest::Client`]; every exchange sent
//! through [`CaptureClient::execute`] or [`CaptureClient::send`] is
//! captured, redacted, and handed to the publisher, while the caller
//! receives the response with its full body intact. Transport errors
//! propagate unchanged.
//!
//! ```ignore
//! use apilens_core::{CaptureConfig, MemoryPublisher};
//! use apilens_reqwest::CaptureClient;
//!
//! let client = CaptureClient::builder(CaptureConfig::new(), MemoryPublisher::new())
//!     .redact_headers(["Authorization"])
//!     .build();
//! let response = client.send(client.request(reqwest::Method::GET, url)).await?;
//! ```

#![warn(missing_docs)]

use apilens_core::{
    headers_to_map, parse_query, spawn_publish, CaptureConfig, PayloadBuilder, Publisher, SdkType,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;

/// A capturing wrapper around [`reqwest::Client`].
#[derive(Clone)]
pub struct CaptureClient {
    inner: reqwest::Client,
    config: Arc<CaptureConfig>,
    publisher: Arc<dyn Publisher>,
}

/// Builder for [`CaptureClient`], with per-client redaction overrides.
pub struct CaptureClientBuilder {
    inner: reqwest::Client,
    config: CaptureConfig,
    publisher: Arc<dyn Publisher>,
}

impl CaptureClientBuilder {
    /// Use a preconfigured [`reqwest::Client`] instead of the default.
    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.inner = client;
        self
    }

    /// Override the redacted header set for this client.
    pub fn redact_headers(
        mut self,
        headers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.config = self.config.redact_headers(headers);
        self
    }

    /// Override the request-body field paths redacted for this client.
    pub fn redact_request_body(
        mut self,
        paths: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.config = self.config.redact_request_body(paths);
        self
    }

    /// Override the response-body field paths redacted for this client.
    pub fn redact_response_body(
        mut self,
        paths: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.config = self.config.redact_response_body(paths);
        self
    }

    /// Finish the builder.
    pub fn build(self) -> CaptureClient {
        CaptureClient {
            inner: self.inner,
            config: Arc::new(self.config),
            publisher: self.publisher,
        }
    }
}

impl CaptureClient {
    /// Wrap the default [`reqwest::Client`].
    pub fn new(config: CaptureConfig, publisher: impl Publisher) -> Self {
        Self::builder(config, publisher).build()
    }

    /// Start a builder, e.g. to wrap a preconfigured client or override
    /// redaction lists per client.
    pub fn builder(config: CaptureConfig, publisher: impl Publisher) -> CaptureClientBuilder {
        CaptureClientBuilder {
            inner: reqwest::Client::new(),
            config,
            publisher: Arc::new(publisher),
        }
    }

    /// Start building a request against the wrapped client. Finish it
    /// with [`CaptureClient::send`]; calling `send` on the returned
    /// builder directly would bypass capture.
    pub fn request(&self, method: reqwest::Method, url: impl reqwest::IntoUrl) -> reqwest::RequestBuilder {
        self.inner.request(method, url)
    }

    /// Build and execute a request, capturing the exchange.
    pub async fn send(&self, builder: reqwest::RequestBuilder) -> reqwest::Result<reqwest::Response> {
        let request = builder.build()?;
        self.execute(request).await
    }

    /// Execute a request, capturing the exchange.
    ///
    /// The request body is captured when it is buffered bytes; streaming
    /// bodies capture as empty. The response body is buffered in full and
    /// handed back to the caller byte-for-byte.
    pub async fn execute(&self, request: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        let request_body = request
            .body()
            .and_then(|body| body.as_bytes())
            .map(Bytes::copy_from_slice)
            .unwrap_or_default();
        let method = request.method().to_string();
        let url = request.url().clone();
        let request_headers = headers_to_map(request.headers());
        let start = Instant::now();

        // Transport errors propagate unchanged; nothing is published for
        // an exchange that never produced a response.
        let response = self.inner.execute(request).await?;
        let duration = start.elapsed();

        let status = response.status();
        let version = response.version();
        let response_header_map = response.headers().clone();
        let response_headers = headers_to_map(response.headers());
        let response_body = response.bytes().await.unwrap_or_default();

        let raw_url = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        let payload = PayloadBuilder::new(SdkType::Outgoing, method, raw_url)
            .url_path(url.path())
            .query_params(parse_query(url.query()))
            .request_headers(request_headers)
            .response_headers(response_headers)
            .request_body(request_body)
            .response_body(response_body.clone())
            .status_code(status.as_u16())
            .duration(duration)
            .build(&self.config);

        spawn_publish(self.publisher.clone(), payload, self.config.is_debug());

        // Hand the caller back an equivalent response over the buffered
        // body.
        let mut rebuilt = http::Response::new(response_body);
        *rebuilt.status_mut() = status;
        *rebuilt.version_mut() = version;
        *rebuilt.headers_mut() = response_header_map;
        Ok(reqwest::Response::from(rebuilt))
    }
}
