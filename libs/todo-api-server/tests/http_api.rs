use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use todo_api::{BrokerProducer, Command, CommandKind, codec};
use todo_api_server::{AppState, HttpConfig, router};
use todo_broker::MemoryBroker;
use todo_pipeline::{Producer, ProducerConfig, TodoCommands, TopicAssignment};

fn app_over(broker: MemoryBroker, config: HttpConfig) -> Router {
    let client: Arc<dyn BrokerProducer> = Arc::new(broker);
    let producer = Producer::new(
        client,
        ProducerConfig {
            retry_backoff_ms: 1,
            retry_backoff_max_ms: 2,
            ..ProducerConfig::default()
        },
    );
    let commands = TodoCommands::new(Arc::new(producer), TopicAssignment::default());
    router(AppState::new(Arc::new(commands), config))
}

fn app_with(config: HttpConfig) -> (MemoryBroker, Router) {
    let broker = MemoryBroker::new();
    for topic in TopicAssignment::default().topics() {
        broker.create_topic(&topic, 1).unwrap();
    }
    let app = app_over(broker.clone(), config);
    (broker, app)
}

fn app() -> (MemoryBroker, Router) {
    app_with(HttpConfig::default())
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

fn stored(broker: &MemoryBroker, topic: &str, kind: CommandKind, offset: i64) -> Command {
    let record = broker.read(topic, 0, offset).expect("record stored");
    codec::decode(kind, &record.value).unwrap()
}

#[tokio::test]
async fn create_returns_201_with_assigned_id() {
    let (broker, app) = app();
    let (status, body) = send(app, json_request("POST", "/todos", json!({"title": "Buy milk"}))).await;

    assert_eq!(status, StatusCode::CREATED);
    let body: Value = serde_json::from_slice(&body).unwrap();
    let id = body["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());
    assert_eq!(
        stored(&broker, "todoCreate", CommandKind::Create, 0),
        Command::Create { id, title: "Buy milk".into() }
    );
}

#[tokio::test]
async fn create_keeps_caller_id() {
    let (broker, app) = app();
    let (status, body) = send(
        app,
        json_request("POST", "/todos", json!({"id": "a1", "title": "Buy milk"})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body, json!({"id": "a1"}));
    assert_eq!(broker.partition_len("todoCreate", 0), Some(1));
}

#[tokio::test]
async fn blank_title_is_400_and_not_published() {
    let (broker, app) = app();
    let (status, body) = send(app, json_request("POST", "/todos", json!({"title": "  "}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["error"].as_str().unwrap().contains("title"));
    assert!(body.get("detail").is_none());
    assert_eq!(broker.produce_attempts(), 0);
}

#[tokio::test]
async fn malformed_json_is_400() {
    let (_, app) = app();
    let request = Request::builder()
        .method("POST")
        .uri("/todos")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn update_returns_published_todo() {
    let (broker, app) = app();
    let (status, body) = send(app, json_request("PUT", "/todos/a1", json!({"title": "Buy oat milk"}))).await;

    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body, json!({"id": "a1", "title": "Buy oat milk"}));
    assert_eq!(
        stored(&broker, "todoUpdate", CommandKind::Update, 0),
        Command::Update { id: "a1".into(), title: "Buy oat milk".into() }
    );
}

#[tokio::test]
async fn update_without_title_is_400() {
    let (broker, app) = app();
    let (status, _) = send(app, json_request("PUT", "/todos/a1", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(broker.produce_attempts(), 0);
}

#[tokio::test]
async fn delete_returns_200_with_empty_body() {
    let (broker, app) = app();
    let request = Request::builder()
        .method("DELETE")
        .uri("/todos/a1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    assert_eq!(
        stored(&broker, "todoDelete", CommandKind::Delete, 0),
        Command::Delete { id: "a1".into() }
    );
}

#[tokio::test]
async fn oversized_path_id_is_400() {
    let (broker, app) = app();
    let uri = format!("/todos/{}", "x".repeat(300));
    let request = Request::builder().method("DELETE").uri(uri).body(Body::empty()).unwrap();
    let (status, _) = send(app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(broker.produce_attempts(), 0);
}

#[tokio::test]
async fn unreachable_broker_is_503_never_2xx() {
    let (broker, app) = app();
    broker.set_unreachable(true);
    let (status, body) = send(app, json_request("POST", "/todos", json!({"title": "Buy milk"}))).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "could not publish command");
    assert_eq!(broker.produce_attempts(), 3);
}

#[tokio::test]
async fn rejected_publish_is_500_with_debug_detail() {
    // No topics exist, so the broker rejects the record outright.
    let app = app_over(
        MemoryBroker::new(),
        HttpConfig {
            debug_errors_response: true,
            ..HttpConfig::default()
        },
    );

    let (status, body) = send(app, json_request("POST", "/todos", json!({"title": "Buy milk"}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "could not publish command");
    assert!(body["detail"].as_str().unwrap().contains("todoCreate"));
}

#[tokio::test]
async fn health_is_a_reserved_id() {
    let (broker, app) = app();
    let (status, _) = send(app.clone(), json_request("PUT", "/todos/health", json!({"title": "x"}))).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let request = Request::builder().method("DELETE").uri("/todos/health").body(Body::empty()).unwrap();
    let (status, _) = send(app, request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(broker.produce_attempts(), 0);
}

#[tokio::test]
async fn health_is_ok_under_custom_path() {
    let (_, app) = app_with(HttpConfig {
        todos_path: "api/v1/todos/".into(),
        ..HttpConfig::default()
    });
    let request = Request::builder()
        .uri("/api/v1/todos/health")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
}
