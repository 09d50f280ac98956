use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};

use docgen_infra::config::{AppConfig, QueueTriggerConfig};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod (in-memory wiring), bound to an ephemeral port.
        let config = AppConfig {
            trigger: QueueTriggerConfig::default().with_poll_interval(Duration::from_millis(10)),
            ..AppConfig::default()
        };
        let app = docgen_api::app::build_app(&config)
            .await
            .expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let router = app.router;
        let trigger = app.trigger;
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
            trigger.shutdown().await;
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn letter_batch(id: &str) -> Value {
    json!({
        "id": id,
        "template": { "id": "1", "templateType": "JSTL", "content": "${content}" },
        "payload": [ { "content": "content" } ],
    })
}

async fn create(client: &reqwest::Client, srv: &TestServer, body: &Value) -> Value {
    let res = client
        .post(srv.url("/batches"))
        .json(body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

async fn get_batch_eventually(
    client: &reqwest::Client,
    srv: &TestServer,
    id: &str,
    status: &str,
) -> Value {
    // Queued processing is asynchronous; poll briefly until the trigger catches up.
    for _ in 0..100 {
        let res = client
            .get(srv.url(&format!("/batches/{id}")))
            .send()
            .await
            .unwrap();
        let body: Value = res.json().await.unwrap();
        if body["status"] == status {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("batch {id} did not reach status {status} within timeout");
}

#[tokio::test]
async fn health_is_unprefixed() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_batch_is_404_with_message() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    for req in [
        client.get(srv.url("/batches/1")),
        client.delete(srv.url("/batches/1")),
        client.post(srv.url("/batches/1/process")),
        client.post(srv.url("/batches/1/process/test")),
    ] {
        let res = req.send().await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["error"], "not_found");
        assert_eq!(body["message"], "Batch not found with ID: 1");
    }
}

#[tokio::test]
async fn list_is_empty_initially() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/batches")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn create_get_list_delete_lifecycle() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let created = create(&client, &srv, &letter_batch("test")).await;
    assert_eq!(created["id"], "test");
    assert_eq!(created["status"], "pending");
    assert_eq!(created["output"], json!([]));

    let res = client.get(srv.url("/batches/test")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let fetched: Value = res.json().await.unwrap();
    assert_eq!(fetched, created);

    let listed: Value = client
        .get(srv.url("/batches"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed, json!([created.clone()]));

    let res = client.delete(srv.url("/batches/test")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let deleted: Value = res.json().await.unwrap();
    assert_eq!(deleted, created);

    let res = client.get(srv.url("/batches/test")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_create_is_conflict() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    create(&client, &srv, &letter_batch("dup")).await;
    let res = client
        .post(srv.url("/batches"))
        .json(&letter_batch("dup"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn synchronous_process_renders_in_order() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    create(
        &client,
        &srv,
        &json!({
            "id": "ordered",
            "template": { "id": "1", "templateType": "JSTL", "content": "#${n}" },
            "payload": [ { "n": 1 }, { "n": 2 }, { "n": 3 } ],
        }),
    )
    .await;

    let res = client
        .post(srv.url("/batches/ordered/process/test"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "done");
    assert_eq!(body["output"], json!(["#1", "#2", "#3"]));
}

#[tokio::test]
async fn queued_process_returns_202_then_completes() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    create(&client, &srv, &letter_batch("queued")).await;

    let res = client
        .post(srv.url("/batches/queued/process"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "id": "queued", "queued": true }));

    let done = get_batch_eventually(&client, &srv, "queued", "done").await;
    assert_eq!(done["output"], json!(["content"]));
}

#[tokio::test]
async fn render_failure_is_opaque_500_and_batch_failed() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    create(
        &client,
        &srv,
        &json!({
            "id": "broken",
            "template": { "id": "2", "templateType": "JSTL", "content": "${secret_field}" },
            "payload": [ { "content": "x" } ],
        }),
    )
    .await;

    let res = client
        .post(srv.url("/batches/broken/process/test"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = res.json().await.unwrap();
    assert_eq!(
        body,
        json!({ "error": "internal_error", "message": "Internal server error" })
    );

    let res = client.get(srv.url("/batches/broken")).send().await.unwrap();
    let batch: Value = res.json().await.unwrap();
    assert_eq!(batch["status"], "failed");
    assert_eq!(batch["output"], json!([]));
}

#[tokio::test]
async fn responses_carry_request_id() {
    let srv = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .get(srv.url("/batches"))
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();
    assert_eq!(
        res.headers().get("x-request-id").unwrap().to_str().unwrap(),
        "req-42"
    );
}
