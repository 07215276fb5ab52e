//! Publisher seam and the fire-and-forget hand-off.
//!
//! Delivery is injected: adapters only know the [`Publisher`] trait. The
//! capture path never waits on it and never surfaces its failures to the
//! real caller.

use crate::payload::Payload;
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Error returned by a publisher when delivery fails.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PublishError {
    message: String,
}

impl PublishError {
    /// Create a publish error from any displayable cause.
    pub fn new(message: impl std::fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// External sink accepting finished payloads for delivery.
///
/// Cancellation: the publish future is dropped when the surrounding task
/// is cancelled, which aborts delivery. Implementations must not assume
/// they run to completion.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// Deliver one payload. Failures are logged by the adapter (when the
    /// debug flag is set) and otherwise discarded.
    async fn publish(&self, payload: Payload) -> Result<(), PublishError>;
}

/// Adapts a closure into a [`Publisher`].
///
/// ```
/// use apilens_core::{FnPublisher, Payload, PublishError};
///
/// let publisher = FnPublisher::new(|payload: Payload| async move {
///     println!("captured {} {}", payload.method, payload.raw_url);
///     Ok::<(), PublishError>(())
/// });
/// ```
pub struct FnPublisher<F>(F);

impl<F> FnPublisher<F> {
    /// Wrap a closure returning a publish future.
    pub fn new(publish: F) -> Self {
        Self(publish)
    }
}

#[async_trait]
impl<F, Fut> Publisher for FnPublisher<F>
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), PublishError>> + Send + 'static,
{
    async fn publish(&self, payload: Payload) -> Result<(), PublishError> {
        (self.0)(payload).await
    }
}

/// Publisher that retains payloads in memory, mainly for tests and local
/// inspection.
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    payloads: Arc<Mutex<Vec<Payload>>>,
}

impl MemoryPublisher {
    /// Create an empty in-memory publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every payload published so far.
    pub fn payloads(&self) -> Vec<Payload> {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, payload: Payload) -> Result<(), PublishError> {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload);
        Ok(())
    }
}

/// Hand a finished payload off to the publisher without blocking the
/// response path.
///
/// The payload is fully materialized before the spawn, so the delivery
/// task shares no state with the exchange that produced it. A failure is
/// logged only when `debug` is set.
pub fn spawn_publish(publisher: Arc<dyn Publisher>, payload: Payload, debug: bool) {
    tokio::spawn(async move {
        let message_id = payload.message_id;
        if let Err(error) = publisher.publish(payload).await {
            if debug {
                tracing::warn!(%message_id, %error, "unable to publish capture payload");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CaptureConfig, PayloadBuilder, SdkType};

    fn payload() -> Payload {
        PayloadBuilder::new(SdkType::GenericServer, "GET", "/ping")
            .status_code(200)
            .build(&CaptureConfig::new())
    }

    #[tokio::test]
    async fn memory_publisher_retains_payloads() {
        let publisher = MemoryPublisher::new();
        publisher.publish(payload()).await.unwrap();
        publisher.publish(payload()).await.unwrap();
        assert_eq!(publisher.payloads().len(), 2);
    }

    #[tokio::test]
    async fn fn_publisher_invokes_the_closure() {
        let publisher = FnPublisher::new(|payload: Payload| async move {
            assert_eq!(payload.method, "GET");
            Ok(())
        });
        publisher.publish(payload()).await.unwrap();
    }

    #[tokio::test]
    async fn spawn_publish_swallows_failures() {
        let publisher: Arc<dyn Publisher> = Arc::new(FnPublisher::new(|_payload: Payload| async {
            Err::<(), _>(PublishError::new("bus unavailable"))
        }));

        // Must neither panic nor propagate anything to the caller.
        spawn_publish(publisher, payload(), true);
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn spawn_publish_delivers_in_the_background() {
        let publisher = MemoryPublisher::new();
        spawn_publish(Arc::new(publisher.clone()), payload(), false);

        for _ in 0..100 {
            if !publisher.payloads().is_empty() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("payload was never delivered");
    }
}
