//! Capture configuration.
//!
//! One [`CaptureConfig`] is held per adapter for its lifetime and passed
//! into the payload builder on every call. It is read-only after
//! construction; there is no process-global mutable configuration.

use std::collections::HashSet;

/// Redaction lists and logging behavior for one adapter instance.
///
/// ```
/// use apilens_core::CaptureConfig;
///
/// let config = CaptureConfig::new()
///     .redact_headers(["X-Api-Key", "Cookie"])
///     .redact_request_body(["password", "card.number"])
///     .redact_response_body(["token"])
///     .debug(true);
/// ```
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Header names (lowercased) whose values are redacted.
    pub(crate) redact_headers: HashSet<String>,

    /// JSON field paths redacted from request bodies.
    pub(crate) redact_request_body: Vec<String>,

    /// JSON field paths redacted from response bodies.
    pub(crate) redact_response_body: Vec<String>,

    /// When set, publish failures are logged instead of silently dropped.
    pub(crate) debug: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureConfig {
    /// Create a configuration with the default redacted header set.
    ///
    /// Defaults: `authorization`, `cookie`, and `x-api-key` headers are
    /// redacted; no body fields are redacted; debug logging is off.
    pub fn new() -> Self {
        let mut redact_headers = HashSet::new();
        redact_headers.insert("authorization".to_string());
        redact_headers.insert("cookie".to_string());
        redact_headers.insert("x-api-key".to_string());

        Self {
            redact_headers,
            redact_request_body: Vec::new(),
            redact_response_body: Vec::new(),
            debug: false,
        }
    }

    /// Replace the redacted header set.
    ///
    /// Names match case-insensitively. Passing an explicit list replaces
    /// the defaults rather than extending them.
    pub fn redact_headers(
        mut self,
        headers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.redact_headers = headers
            .into_iter()
            .map(|h| h.into().to_lowercase())
            .collect();
        self
    }

    /// Add a single header name to the redacted set, keeping existing entries.
    pub fn redact_header(mut self, header: impl Into<String>) -> Self {
        self.redact_headers.insert(header.into().to_lowercase());
        self
    }

    /// Set the JSON field paths redacted from request bodies.
    ///
    /// Paths use dotted/bracketed syntax, e.g. `card.number` or
    /// `items[*].secret`. See [`crate::redact::redact_json`].
    pub fn redact_request_body(
        mut self,
        paths: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.redact_request_body = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Set the JSON field paths redacted from response bodies.
    pub fn redact_response_body(
        mut self,
        paths: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.redact_response_body = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable debug logging of telemetry-path failures.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Whether debug logging is enabled.
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// The redacted header set (lowercased names).
    pub fn redacted_headers(&self) -> &HashSet<String> {
        &self.redact_headers
    }

    /// Field paths redacted from request bodies.
    pub fn redacted_request_body_paths(&self) -> &[String] {
        &self.redact_request_body
    }

    /// Field paths redacted from response bodies.
    pub fn redacted_response_body_paths(&self) -> &[String] {
        &self.redact_response_body
    }
}
