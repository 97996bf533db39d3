mod helpers;

use dialcode_qr::{routes, state::AppState};
use helpers::{Harness, StalledDownloader};
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;

struct TestServer {
    base: String,
    client: reqwest::Client,
    harness: Harness,
}

impl TestServer {
    async fn start(event_timeout: Duration, stalled: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let harness = Harness::with_base_url(&base).await;

        let pipeline = if stalled {
            harness.pipeline_from(
                Arc::new(StalledDownloader),
                Arc::new(harness.storage.clone()),
                Arc::new(harness.batches.clone()),
            )
        } else {
            harness.pipeline_with(Arc::new(harness.batches.clone()))
        };
        let state = AppState {
            storage: harness.storage.clone(),
            batches: harness.batches.clone(),
            pipeline: Arc::new(pipeline),
            event_timeout,
        };
        let app = routes::routes::routes().with_state(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base,
            client: reqwest::Client::new(),
            harness,
        }
    }

    async fn post_event(&self, event: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}/events", self.base))
            .header("content-type", "application/json")
            .body(event.to_string())
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        let body = serde_json::from_slice(&resp.bytes().await.unwrap()).unwrap();
        (status, body)
    }

    async fn get_json(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        let body = serde_json::from_slice(&resp.bytes().await.unwrap()).unwrap();
        (status, body)
    }

    async fn put(&self, path: &str) -> u16 {
        self.client
            .put(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap()
            .status()
            .as_u16()
    }
}

fn qr_event(process_id: &str) -> Value {
    json!({
        "eid": "BE_QR_IMAGE_GENERATOR",
        "processId": process_id,
        "objectId": "do_3131",
        "storageContainer": "dial",
        "storagePath": "do_3131",
        "partition": 0,
        "offset": 5,
        "imageFormat": "png",
        "config": { "errorCorrectionLevel": "M", "pixelsPerBlock": 3 },
        "dialcodes": [
            { "id": "K4R7T1" },
            { "id": "M2D9Q8", "data": "https://dial.example/M2D9Q8", "text": "M2D9Q8" }
        ]
    })
}

#[tokio::test]
async fn event_round_trip_over_http() {
    let server = TestServer::start(Duration::from_secs(30), false).await;

    assert_eq!(server.put("/batches/P-500").await, 200);
    let (status, batch) = server.get_json("/batches/P-500").await;
    assert_eq!(status, 200);
    assert_eq!(batch["status"], 0);

    let (status, body) = server.post_event(qr_event("P-500")).await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["outcome"], "succeeded");
    assert_eq!(body["images"], 2);
    let url = body["url"].as_str().unwrap().to_string();
    assert_eq!(url, format!("{}/objects/dial/do_3131/P-500.zip", server.base));

    let archive = server.client.get(&url).send().await.unwrap();
    assert_eq!(archive.status().as_u16(), 200);
    assert_eq!(archive.headers()["content-type"], "application/zip");
    let bytes = archive.bytes().await.unwrap();
    let listing = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
    let mut names: Vec<&str> = listing.file_names().collect();
    names.sort();
    assert_eq!(names, vec!["K4R7T1.png", "M2D9Q8.png"]);

    let (_, batch) = server.get_json("/batches/P-500").await;
    assert_eq!(batch["status"], 2);
    assert_eq!(batch["url"], url.as_str());

    let (_, stats) = server.get_json("/stats").await;
    assert_eq!(stats["succeeded"], 1);
    assert_eq!(server.harness.scratch_entries(), 0);
}

#[tokio::test]
async fn skipped_event_reports_reason() {
    let server = TestServer::start(Duration::from_secs(30), false).await;

    let mut event = qr_event("P-501");
    event["eid"] = json!("BE_SOMETHING_ELSE");
    let (status, body) = server.post_event(event).await;
    assert_eq!(status, 200);
    assert_eq!(body["outcome"], "skipped");
    assert_eq!(body["detail"]["reason"], "unexpected_eid");
}

#[tokio::test]
async fn failed_event_carries_routing_metadata() {
    let server = TestServer::start(Duration::from_secs(30), false).await;
    server.put("/batches/P-502").await;

    let mut event = qr_event("P-502");
    event["dialcodes"] = json!([{ "id": "BAD", "location": "ftp://legacy/BAD.png" }]);
    let (status, body) = server.post_event(event).await;
    assert_eq!(status, 500);
    assert_eq!(body["stage"], "acquisition");
    assert_eq!(body["processId"], "P-502");
    assert_eq!(body["offset"], 5);

    let (_, batch) = server.get_json("/batches/P-502").await;
    assert_eq!(batch["status"], 3);
}

#[tokio::test]
async fn timed_out_event_is_marked_failed() {
    let server = TestServer::start(Duration::from_millis(200), true).await;
    server.put("/batches/P-503").await;

    let mut event = qr_event("P-503");
    event["dialcodes"] = json!([{ "id": "SLOW", "location": "http://slow.test/SLOW.png" }]);
    let (status, body) = server.post_event(event).await;
    assert_eq!(status, 504, "{}", body);

    let (_, batch) = server.get_json("/batches/P-503").await;
    assert_eq!(batch["status"], 3);
    assert_eq!(server.harness.scratch_entries(), 0);

    let (_, stats) = server.get_json("/stats").await;
    assert_eq!(stats["failed"], 1);
}

#[tokio::test]
async fn archive_with_reserved_characters_is_downloadable() {
    let server = TestServer::start(Duration::from_secs(30), false).await;

    let mut event = qr_event("batch #1");
    event["storageFileName"] = json!("release 100%?");
    let (status, body) = server.post_event(event).await;
    assert_eq!(status, 200, "{}", body);
    let url = body["url"].as_str().unwrap().to_string();
    assert_eq!(
        url,
        format!("{}/objects/dial/do_3131/release%20100%25%3F.zip", server.base)
    );

    let archive = server.client.get(&url).send().await.unwrap();
    assert_eq!(archive.status().as_u16(), 200);
    let bytes = archive.bytes().await.unwrap();
    let listing = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
    assert_eq!(listing.len(), 2);
}

#[tokio::test]
async fn missing_batch_and_object_are_not_found() {
    let server = TestServer::start(Duration::from_secs(30), false).await;

    let (status, _) = server.get_json("/batches/unknown").await;
    assert_eq!(status, 404);
    let (status, _) = server.get_json("/objects/dial/nothing/here.zip").await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn probes_report_ok() {
    let server = TestServer::start(Duration::from_secs(30), false).await;

    let (status, body) = server.get_json("/healthz").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");

    let (status, body) = server.get_json("/readyz").await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["checks"]["scratch"]["ok"], true);
}
