//! End-to-end tests for the generic tower adapter.

use apilens_core::{
    report_error, CaptureConfig, FnPublisher, Payload, PublishError, SdkType, REDACTED,
};
use apilens_tower::CaptureLayer;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::{service_fn, Layer, ServiceExt};

fn channel_publisher() -> (FnPublisher<impl Fn(Payload) -> ReceiverFuture>, mpsc::UnboundedReceiver<Payload>)
{
    let (tx, rx) = mpsc::unbounded_channel();
    let publisher = FnPublisher::new(move |payload: Payload| {
        let tx = tx.clone();
        Box::pin(async move {
            tx.send(payload).map_err(PublishError::new)?;
            Ok(())
        }) as ReceiverFuture
    });
    (publisher, rx)
}

type ReceiverFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), PublishError>> + Send>>;

async fn recv_payload(rx: &mut mpsc::UnboundedReceiver<Payload>) -> Payload {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("publish timed out")
        .expect("publisher channel closed")
}

#[tokio::test]
async fn downstream_sees_original_body_and_caller_sees_original_response() {
    let (publisher, mut rx) = channel_publisher();
    let config = CaptureConfig::new().redact_headers(["x-api-key"]);

    let handler = service_fn(|req: Request<Full<Bytes>>| async move {
        let body = req.into_body().collect().await.unwrap().to_bytes();
        // Byte-for-byte what the caller sent, despite telemetry capture.
        assert_eq!(&body[..], br#"{"field":"x"}"#);
        Ok::<_, Infallible>(
            Response::builder()
                .status(StatusCode::ACCEPTED)
                .header("content-type", "application/json")
                .body(Full::new(Bytes::from_static(br#"{"ok":true}"#)))
                .unwrap(),
        )
    });

    let service = CaptureLayer::new(config, publisher).layer(handler);
    let request = Request::builder()
        .method("POST")
        .uri("/slug-value/test?param1=abc&param2=123")
        .header("x-api-key", "past-3")
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from_static(br#"{"field":"x"}"#)))
        .unwrap();

    let response = service.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], br#"{"ok":true}"#);

    let payload = recv_payload(&mut rx).await;
    assert_eq!(payload.sdk_type, SdkType::GenericServer);
    assert_eq!(payload.method, "POST");
    assert_eq!(payload.raw_url, "/slug-value/test?param1=abc&param2=123");
    assert_eq!(payload.url_path, "/slug-value/test");
    assert_eq!(payload.query_params["param1"], vec!["abc".to_string()]);
    assert_eq!(payload.query_params["param2"], vec!["123".to_string()]);
    assert_eq!(payload.request_headers["x-api-key"], vec![REDACTED.to_string()]);
    assert_eq!(&payload.request_body[..], br#"{"field":"x"}"#);
    assert_eq!(&payload.response_body[..], br#"{"ok":true}"#);
    assert_eq!(payload.status_code, 202);
    assert!(payload.duration > Duration::ZERO);
}

#[tokio::test]
async fn publish_failure_leaves_the_response_untouched() {
    let publisher = FnPublisher::new(|_payload: Payload| async {
        Err::<(), _>(PublishError::new("bus unavailable"))
    });
    let config = CaptureConfig::new().debug(true);

    let handler = service_fn(|_req: Request<Full<Bytes>>| async {
        Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"fine"))))
    });

    let service = CaptureLayer::new(config, publisher).layer(handler);
    let response = service
        .oneshot(Request::get("/ok").body(Full::new(Bytes::new())).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"fine");
}

#[tokio::test]
async fn reported_errors_reach_the_payload_in_order() {
    let (publisher, mut rx) = channel_publisher();

    let handler = service_fn(|req: Request<Full<Bytes>>| async move {
        let first = std::io::Error::new(std::io::ErrorKind::Other, "first failure");
        report_error(req.extensions(), &first);
        let second = std::io::Error::new(std::io::ErrorKind::Other, "second failure");
        report_error(req.extensions(), &second);
        Ok::<_, Infallible>(Response::new(Full::new(Bytes::new())))
    });

    let service = CaptureLayer::new(CaptureConfig::new(), publisher).layer(handler);
    service
        .oneshot(Request::get("/fails").body(Full::new(Bytes::new())).unwrap())
        .await
        .unwrap();

    let payload = recv_payload(&mut rx).await;
    assert_eq!(payload.errors.len(), 2);
    assert_eq!(payload.errors[0].message, "first failure");
    assert_eq!(payload.errors[1].message, "second failure");
}

#[tokio::test]
async fn concurrent_exchanges_get_distinct_message_ids() {
    let (publisher, mut rx) = channel_publisher();

    let handler = service_fn(|req: Request<Full<Bytes>>| async move {
        let oops = std::io::Error::new(std::io::ErrorKind::Other, "oops");
        report_error(req.extensions(), &oops);
        Ok::<_, Infallible>(Response::new(Full::new(Bytes::new())))
    });
    let service = CaptureLayer::new(CaptureConfig::new(), publisher).layer(handler);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .oneshot(Request::get("/c").body(Full::new(Bytes::new())).unwrap())
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut ids = std::collections::HashSet::new();
    for _ in 0..8 {
        let payload = recv_payload(&mut rx).await;
        // Each exchange carries exactly its own single reported error.
        assert_eq!(payload.errors.len(), 1);
        assert!(ids.insert(payload.message_id));
    }
}

#[tokio::test]
async fn referrer_header_populates_the_payload() {
    let (publisher, mut rx) = channel_publisher();

    let handler = service_fn(|_req: Request<Full<Bytes>>| async {
        Ok::<_, Infallible>(Response::new(Full::new(Bytes::new())))
    });
    let service = CaptureLayer::new(CaptureConfig::new(), publisher).layer(handler);
    service
        .oneshot(
            Request::get("/page")
                .header("referer", "https://example.com/origin")
                .body(Full::new(Bytes::new()))
                .unwrap(),
        )
        .await
        .unwrap();

    let payload = recv_payload(&mut rx).await;
    assert_eq!(
        payload.referrer.as_deref(),
        Some("https://example.com/origin")
    );
}
