//! Integration tests for HTTP delivery against a local axum backend

mod common;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use url::Url;

use ::common::blobs::BlobStore;
use ::common::connectivity::ConnectivityMonitor;
use ::common::delivery::{Delivery, DeliveryError, DeliveryRequest, HttpDelivery};
use ::common::engine::{DrainOutcome, EngineConfig, SubmitOutcome, SyncEngine};
use ::common::kv::KvStore;
use ::common::queue::KvQueue;

#[derive(Clone, Default)]
struct Backend {
    received: Arc<Mutex<Vec<(String, Value)>>>,
}

async fn accept(
    State(backend): State<Backend>,
    Path(resource): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, String) {
    if resource == "broken" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "database is down".to_string());
    }
    backend.received.lock().unwrap().push((resource, body));
    (StatusCode::CREATED, String::new())
}

async fn spawn_backend() -> (Url, Backend) {
    let backend = Backend::default();
    let app = Router::new()
        .route("/api/:resource", post(accept))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let base = Url::parse(&format!("http://{}/api/", addr)).unwrap();
    (base, backend)
}

#[tokio::test]
async fn test_posts_payload_with_images() {
    let (base, backend) = spawn_backend().await;
    let delivery = HttpDelivery::new(&base, Some(Duration::from_secs(5))).unwrap();

    delivery
        .deliver(&DeliveryRequest {
            endpoint: "items".to_string(),
            payload: json!({ "name": "widget" }),
            images: vec!["aGVsbG8=".to_string()],
        })
        .await
        .unwrap();

    let received = backend.received.lock().unwrap().clone();
    assert_eq!(
        received,
        vec![(
            "items".to_string(),
            json!({ "name": "widget", "images": ["aGVsbG8="] })
        )]
    );
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let (base, _backend) = spawn_backend().await;
    let delivery = HttpDelivery::new(&base, None).unwrap();

    let err = delivery
        .deliver(&DeliveryRequest {
            endpoint: "broken".to_string(),
            payload: json!({}),
            images: vec![],
        })
        .await
        .unwrap_err();

    match err {
        DeliveryError::Server { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "database is down");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_backend_is_a_network_error() {
    // Bind and drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let base = Url::parse(&format!("http://{}/api/", addr)).unwrap();
    let delivery = HttpDelivery::new(&base, Some(Duration::from_secs(2))).unwrap();
    let err = delivery
        .deliver(&DeliveryRequest {
            endpoint: "items".to_string(),
            payload: json!({}),
            images: vec![],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::Network(_)));
}

#[tokio::test]
async fn test_engine_replays_queue_over_http() {
    common::init_tracing();
    let (base, backend) = spawn_backend().await;

    let engine = SyncEngine::new(
        Arc::new(KvQueue::new(KvStore::in_memory().await.unwrap())),
        BlobStore::new_ephemeral(),
        Arc::new(HttpDelivery::new(&base, None).unwrap()),
        ConnectivityMonitor::new(false),
        EngineConfig::default(),
    );

    engine
        .submit("orders", json!({ "sku": "A-1" }), vec![])
        .await
        .unwrap();
    engine
        .submit(
            "photos",
            json!({ "caption": "shelf" }),
            vec![common::JPEG_BASE64.to_string()],
        )
        .await
        .unwrap();
    engine
        .submit("broken", json!({ "never": "accepted" }), vec![])
        .await
        .unwrap();
    engine
        .submit("orders", json!({ "sku": "B-2" }), vec![])
        .await
        .unwrap();

    engine.connectivity().set_online(true);
    let report = match engine.drain().await.unwrap() {
        DrainOutcome::Completed(report) => report,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(report.delivered, 2);
    assert_eq!(report.remaining, 2);

    let received = backend.received.lock().unwrap().clone();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].0, "orders");
    assert_eq!(received[0].1, json!({ "sku": "A-1" }));
    assert_eq!(received[1].0, "photos");
    assert_eq!(received[1].1["images"], json!([common::JPEG_BASE64]));

    // Online submits go straight through
    let outcome = engine
        .submit("orders", json!({ "sku": "C-3" }), vec![])
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Delivered);
}
