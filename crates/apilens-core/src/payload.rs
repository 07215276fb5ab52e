//! The canonical telemetry record and its builder.
//!
//! Adapters translate their framework's request/response objects into the
//! primitive inputs here; [`PayloadBuilder::build`] redacts and assembles
//! exactly one immutable [`Payload`] per captured exchange.

use crate::config::CaptureConfig;
use crate::context::CapturedError;
use crate::redact::{redact_headers, redact_json};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Identifies which adapter produced a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SdkType {
    /// Generic tower/hyper server middleware.
    #[serde(rename = "rust-generic")]
    GenericServer,
    /// axum middleware.
    #[serde(rename = "rust-axum")]
    Axum,
    /// actix-web middleware.
    #[serde(rename = "rust-actix-web")]
    ActixWeb,
    /// Outgoing reqwest client wrapper.
    #[serde(rename = "rust-outgoing")]
    Outgoing,
}

/// The canonical record describing one request/response exchange.
///
/// Field names in the serialized form are the stable external schema that
/// publishers and downstream consumers depend on. Bodies serialize as
/// base64; `duration` serializes as integer nanoseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    /// Which adapter produced this record.
    pub sdk_type: SdkType,

    /// Unique id correlating this payload with errors reported during the
    /// same exchange.
    pub message_id: Uuid,

    /// HTTP method.
    pub method: String,

    /// Route template when the framework knows it (e.g. `/:slug/test`),
    /// otherwise the observed path.
    pub url_path: String,

    /// Actual path plus query as observed on the wire.
    pub raw_url: String,

    /// Named path parameters extracted from the route template.
    pub path_params: HashMap<String, String>,

    /// Query parameters; a repeated key keeps all values in order.
    pub query_params: HashMap<String, Vec<String>>,

    /// Request headers after redaction, name -> ordered value list.
    pub request_headers: HashMap<String, Vec<String>>,

    /// Response headers after redaction.
    pub response_headers: HashMap<String, Vec<String>>,

    /// Captured request body after redaction (base64 on the wire).
    #[serde(with = "body_bytes")]
    pub request_body: Bytes,

    /// Captured response body after redaction (base64 on the wire).
    #[serde(with = "body_bytes")]
    pub response_body: Bytes,

    /// Response status code.
    pub status_code: u16,

    /// Wall-clock time between capture start and capture end.
    #[serde(with = "duration_nanos")]
    pub duration: Duration,

    /// Errors reported during this exchange, in report order.
    pub errors: Vec<CapturedError>,

    /// Originating page URL, when the request carried a Referer header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

/// Assembles a [`Payload`] from primitive inputs.
///
/// The builder never mutates what it is given: header maps are copied
/// before redaction and bodies are redacted into fresh buffers, since the
/// adapter still needs the originals to forward the real response.
/// Missing optional inputs degrade to empty containers; `build` cannot
/// fail.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    sdk_type: SdkType,
    method: String,
    raw_url: String,
    url_path: Option<String>,
    path_params: HashMap<String, String>,
    query_params: HashMap<String, Vec<String>>,
    request_headers: HashMap<String, Vec<String>>,
    response_headers: HashMap<String, Vec<String>>,
    request_body: Bytes,
    response_body: Bytes,
    status_code: u16,
    duration: Duration,
    errors: Vec<CapturedError>,
    message_id: Option<Uuid>,
    referrer: Option<String>,
}

impl PayloadBuilder {
    /// Start a builder for one exchange.
    ///
    /// `raw_url` is the actual path plus query observed on the wire.
    pub fn new(
        sdk_type: SdkType,
        method: impl Into<String>,
        raw_url: impl Into<String>,
    ) -> Self {
        Self {
            sdk_type,
            method: method.into(),
            raw_url: raw_url.into(),
            url_path: None,
            path_params: HashMap::new(),
            query_params: HashMap::new(),
            request_headers: HashMap::new(),
            response_headers: HashMap::new(),
            request_body: Bytes::new(),
            response_body: Bytes::new(),
            status_code: 0,
            duration: Duration::ZERO,
            errors: Vec::new(),
            message_id: None,
            referrer: None,
        }
    }

    /// Set the route template (falls back to `raw_url` without its query
    /// when never set).
    pub fn url_path(mut self, url_path: impl Into<String>) -> Self {
        self.url_path = Some(url_path.into());
        self
    }

    /// Set the extracted path parameters.
    pub fn path_params(mut self, params: HashMap<String, String>) -> Self {
        self.path_params = params;
        self
    }

    /// Set the parsed query parameters.
    pub fn query_params(mut self, params: HashMap<String, Vec<String>>) -> Self {
        self.query_params = params;
        self
    }

    /// Set the captured request headers (pre-redaction).
    pub fn request_headers(mut self, headers: HashMap<String, Vec<String>>) -> Self {
        self.request_headers = headers;
        self
    }

    /// Set the captured response headers (pre-redaction).
    pub fn response_headers(mut self, headers: HashMap<String, Vec<String>>) -> Self {
        self.response_headers = headers;
        self
    }

    /// Set the captured request body bytes (pre-redaction).
    pub fn request_body(mut self, body: Bytes) -> Self {
        self.request_body = body;
        self
    }

    /// Set the captured response body bytes (pre-redaction).
    pub fn response_body(mut self, body: Bytes) -> Self {
        self.response_body = body;
        self
    }

    /// Set the response status code.
    pub fn status_code(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    /// Set the elapsed capture duration.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the errors collected during this exchange.
    pub fn errors(mut self, errors: Vec<CapturedError>) -> Self {
        self.errors = errors;
        self
    }

    /// Use a pre-generated message id (the adapter generates it early so
    /// the error reporter can see the same id). A fresh id is generated
    /// at build time when never set.
    pub fn message_id(mut self, message_id: Uuid) -> Self {
        self.message_id = Some(message_id);
        self
    }

    /// Set the originating-page URL.
    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        let referrer = referrer.into();
        if !referrer.is_empty() {
            self.referrer = Some(referrer);
        }
        self
    }

    /// Redact and assemble the final record.
    pub fn build(self, config: &CaptureConfig) -> Payload {
        let url_path = self.url_path.unwrap_or_else(|| {
            match self.raw_url.split_once('?') {
                Some((path, _)) => path.to_string(),
                None => self.raw_url.clone(),
            }
        });

        Payload {
            sdk_type: self.sdk_type,
            message_id: self.message_id.unwrap_or_else(Uuid::new_v4),
            method: self.method,
            url_path,
            raw_url: self.raw_url,
            path_params: self.path_params,
            query_params: self.query_params,
            request_headers: redact_headers(&self.request_headers, &config.redact_headers),
            response_headers: redact_headers(&self.response_headers, &config.redact_headers),
            request_body: redact_json(&self.request_body, &config.redact_request_body),
            response_body: redact_json(&self.response_body, &config.redact_response_body),
            status_code: self.status_code,
            duration: self.duration,
            errors: self.errors,
            referrer: self.referrer,
        }
    }
}

mod body_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::REDACTED;
    use serde_json::Value;

    fn scenario_builder() -> PayloadBuilder {
        let mut path_params = HashMap::new();
        path_params.insert("slug".to_string(), "slug-value".to_string());

        let mut query_params = HashMap::new();
        query_params.insert("param1".to_string(), vec!["abc".to_string()]);
        query_params.insert("param2".to_string(), vec!["123".to_string()]);

        let mut request_headers = HashMap::new();
        request_headers.insert("X-Api-Key".to_string(), vec!["past-3".to_string()]);
        request_headers.insert(
            "Content-Type".to_string(),
            vec!["application/json".to_string()],
        );

        PayloadBuilder::new(
            SdkType::GenericServer,
            "POST",
            "/slug-value/test?param1=abc&param2=123",
        )
        .url_path("/:slug/test")
        .path_params(path_params)
        .query_params(query_params)
        .request_headers(request_headers)
        .request_body(Bytes::from_static(br#"{"field":"x"}"#))
        .status_code(202)
        .duration(Duration::from_millis(7))
    }

    #[test]
    fn builds_the_reference_scenario() {
        let config = CaptureConfig::new().redact_headers(["X-Api-Key"]);
        let payload = scenario_builder().build(&config);

        assert_eq!(payload.method, "POST");
        assert_eq!(payload.url_path, "/:slug/test");
        assert_eq!(payload.raw_url, "/slug-value/test?param1=abc&param2=123");
        assert_eq!(payload.path_params["slug"], "slug-value");
        assert_eq!(payload.query_params["param1"], vec!["abc".to_string()]);
        assert_eq!(payload.query_params["param2"], vec!["123".to_string()]);
        assert_eq!(
            payload.request_headers["X-Api-Key"],
            vec![REDACTED.to_string()]
        );
        assert_eq!(
            payload.request_headers["Content-Type"],
            vec!["application/json".to_string()]
        );
        // No `secret` field present, so the body is unchanged.
        assert_eq!(&payload.request_body[..], br#"{"field":"x"}"#);
        assert_eq!(payload.status_code, 202);
    }

    #[test]
    fn building_twice_from_identical_inputs_is_identical() {
        let config = CaptureConfig::new().redact_headers(["X-Api-Key"]);
        let id = Uuid::new_v4();
        let a = scenario_builder().message_id(id).build(&config);
        let b = scenario_builder().message_id(id).build(&config);

        assert_eq!(
            serde_json::to_value(&a).unwrap(),
            serde_json::to_value(&b).unwrap()
        );
    }

    #[test]
    fn build_does_not_mutate_supplied_maps_or_bodies() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), vec!["Bearer tok".to_string()]);
        let body = Bytes::from_static(br#"{"password":"hunter2"}"#);

        let config = CaptureConfig::new().redact_request_body(["password"]);
        let payload = PayloadBuilder::new(SdkType::Axum, "POST", "/login")
            .request_headers(headers.clone())
            .request_body(body.clone())
            .build(&config);

        // Telemetry copy is scrubbed...
        assert_eq!(
            payload.request_headers["Authorization"],
            vec![REDACTED.to_string()]
        );
        let value: Value = serde_json::from_slice(&payload.request_body).unwrap();
        assert_eq!(value["password"], REDACTED);
        // ...while the originals the adapter still holds are untouched.
        assert_eq!(headers["Authorization"], vec!["Bearer tok".to_string()]);
        assert_eq!(&body[..], br#"{"password":"hunter2"}"#);
    }

    #[test]
    fn absent_inputs_degrade_to_empty_containers() {
        let config = CaptureConfig::new();
        let payload = PayloadBuilder::new(SdkType::Outgoing, "GET", "/ping").build(&config);

        assert_eq!(payload.url_path, "/ping");
        assert!(payload.path_params.is_empty());
        assert!(payload.query_params.is_empty());
        assert!(payload.request_body.is_empty());
        assert!(payload.errors.is_empty());
        assert!(payload.referrer.is_none());
    }

    #[test]
    fn url_path_falls_back_to_raw_url_without_query() {
        let config = CaptureConfig::new();
        let payload =
            PayloadBuilder::new(SdkType::GenericServer, "GET", "/a/b?x=1").build(&config);
        assert_eq!(payload.url_path, "/a/b");
    }

    #[test]
    fn serialized_form_uses_the_stable_schema() {
        let config = CaptureConfig::new();
        let payload = scenario_builder()
            .referrer("https://example.com/form")
            .build(&config);
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["sdkType"], "rust-generic");
        assert_eq!(value["urlPath"], "/:slug/test");
        assert_eq!(value["rawUrl"], "/slug-value/test?param1=abc&param2=123");
        assert_eq!(value["statusCode"], 202);
        assert_eq!(value["referrer"], "https://example.com/form");
        assert!(value["messageId"].is_string());
        assert!(value["duration"].is_u64());
        // Bodies travel as base64 strings.
        assert!(value["requestBody"].is_string());

        // And the record round-trips.
        let back: Payload = serde_json::from_value(value).unwrap();
        assert_eq!(&back.request_body[..], br#"{"field":"x"}"#);
    }
}
