//! Per-exchange capture context and error reporting.
//!
//! An adapter creates one [`CaptureContext`] at the start of an exchange
//! and stores a clone in the request's extensions. Anything reached while
//! handling that exchange can look the context up and report errors
//! against it; the payload builder reads the collected list once at build
//! time. Contexts are never shared between exchanges.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A structured error descriptor collected during one exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CapturedError {
    /// Unix timestamp in milliseconds at which the error was reported.
    pub when: u64,

    /// Rust type name of the reported error.
    pub error_type: String,

    /// Outermost error message.
    pub message: String,

    /// Messages of the wrapped `source()` chain, outermost cause first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,

    /// `file:line` of the report call site, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl CapturedError {
    fn from_error<E: Error + ?Sized>(error: &E, location: Option<String>) -> Self {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        Self {
            when: unix_millis(),
            error_type: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            chain,
            location,
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Message id and error list for one request/response exchange.
///
/// Cloning is cheap and clones share the same error list, so the copy an
/// adapter keeps and the copy stored in request extensions observe the
/// same reports. The list append is the one guarded shared-mutable point
/// in the core: a handler may spawn sub-tasks that report concurrently.
#[derive(Debug, Clone)]
pub struct CaptureContext {
    message_id: Uuid,
    errors: Arc<Mutex<Vec<CapturedError>>>,
}

impl Default for CaptureContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureContext {
    /// Create a fresh context with a new unique message id and an empty
    /// error list.
    pub fn new() -> Self {
        Self {
            message_id: Uuid::new_v4(),
            errors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The unique id correlating this exchange's payload with its errors.
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    /// Append a structured descriptor for `error` to this exchange's list.
    #[track_caller]
    pub fn report<E: Error + ?Sized>(&self, error: &E) {
        let caller = std::panic::Location::caller();
        let location = format!("{}:{}", caller.file(), caller.line());
        let captured = CapturedError::from_error(error, Some(location));
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(captured);
    }

    /// Snapshot the errors reported so far, in report order.
    ///
    /// The payload builder calls this once per exchange; the snapshot is
    /// an owned copy, safe to move into the asynchronous publish task.
    pub fn take_errors(&self) -> Vec<CapturedError> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Look up the exchange's context in request extensions.
    pub fn from_extensions(extensions: &http::Extensions) -> Option<&CaptureContext> {
        extensions.get::<CaptureContext>()
    }
}

/// Report `error` against the exchange whose context lives in
/// `extensions`. A no-op when no capture middleware wrapped this call.
#[track_caller]
pub fn report_error<E: Error + ?Sized>(extensions: &http::Extensions, error: &E) {
    if let Some(context) = CaptureContext::from_extensions(extensions) {
        context.report(error);
    }
}
