//! # apilens-core
//!
//! Framework-agnostic core of the apilens HTTP traffic capture layer.
//!
//! An adapter (server middleware or outgoing-client wrapper) captures the
//! raw bytes of one request/response exchange and feeds them to this crate,
//! which builds a single canonical, privacy-scrubbed [`Payload`] and hands
//! it to a [`Publisher`]. The core performs no I/O of its own: redaction
//! and payload assembly are synchronous, bounded, in-memory operations.
//!
//! ## Pieces
//!
//! - [`Payload`] / [`PayloadBuilder`] - the canonical telemetry record and
//!   the builder adapters use to assemble it
//! - [`redact`] - header and JSON-body field redaction
//! - [`CaptureContext`] - per-exchange message id and error list
//! - [`CaptureConfig`] - redaction lists and the debug flag
//! - [`Publisher`] - the injected delivery sink
//!
//! ## Example
//!
//! ```
//! use apilens_core::{CaptureConfig, PayloadBuilder, SdkType};
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let config = CaptureConfig::new().redact_headers(["x-api-key"]);
//!
//! let payload = PayloadBuilder::new(SdkType::GenericServer, "POST", "/login?next=%2F")
//!     .url_path("/login")
//!     .request_body(Bytes::from_static(b"{\"user\":\"jo\"}"))
//!     .status_code(200)
//!     .duration(Duration::from_millis(12))
//!     .build(&config);
//!
//! assert_eq!(payload.status_code, 200);
//! ```

#![warn(missing_docs)]

mod config;
mod context;
mod http_util;
mod payload;
mod publish;
pub mod redact;

pub use config::CaptureConfig;
pub use context::{report_error, CaptureContext, CapturedError};
pub use http_util::{headers_to_map, parse_query};
pub use payload::{Payload, PayloadBuilder, SdkType};
pub use publish::{spawn_publish, FnPublisher, MemoryPublisher, PublishError, Publisher};

/// Placeholder written over every redacted header or body field value.
pub const REDACTED: &str = "[REDACTED]";
