/// Track server integration tests
/// Drive the router in-process with a precomputed or gated tracker
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use annotations::{AnnotationTable, BBox, Detection, FrameAnnotation};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use jobs::{PrecomputedTracker, Progress, TrackParams, Tracker};
use serde_json::{json, Value};
use tower::ServiceExt;
use track_server::{router, AppState};

struct Fixture {
    app: Router,
    _dir: tempfile::TempDir,
}

fn sample_table() -> AnnotationTable {
    let det = Detection {
        bbox: BBox::new(10.0, 20.0, 110.0, 220.0),
        track_id: Some(3),
        class_id: Some(0),
        class_name: "person".into(),
        score: 0.87,
    };
    AnnotationTable::builder(25.0)
        .frame_size(640, 360)
        .frame_count(48)
        .with_frame(0, FrameAnnotation::new(vec![det]))
        .unwrap()
        .build()
}

fn fixture_with(tracker: impl FnOnce(&Path) -> Arc<dyn Tracker>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("clip.mp4"), b"not really a video").unwrap();
    let tracker = tracker(dir.path());
    let app = router(AppState::new(tracker, dir.path().to_path_buf()));
    Fixture { app, _dir: dir }
}

fn precomputed_fixture() -> Fixture {
    fixture_with(|dir| {
        let table_path = dir.join("table.json");
        sample_table().save(&table_path).unwrap();
        let tracker: Arc<dyn Tracker> = Arc::new(PrecomputedTracker::new(table_path));
        tracker
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post_track(app: &Router, body: Value) -> (StatusCode, Value) {
    send(
        app,
        Request::post("/track")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

async fn wait_terminal(app: &Router, job_id: &str) -> Value {
    for _ in 0..500 {
        let (status, body) = get(app, &format!("/track/{job_id}/progress")).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == "done" || body["status"] == "error" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not finish");
}

#[tokio::test]
async fn test_health() {
    let fixture = precomputed_fixture();
    let (status, body) = get(&fixture.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_track_job_lifecycle() {
    let fixture = precomputed_fixture();
    let (status, body) = post_track(&fixture.app, json!({ "video_id": "clip" })).await;
    assert_eq!(status, StatusCode::OK);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let progress = wait_terminal(&fixture.app, &job_id).await;
    assert_eq!(progress["status"], "done");
    assert_eq!(progress["message"], "Done");
    assert_eq!(progress["current_frame"], 48);
    assert_eq!(progress["total_frames"], 48);

    let (status, table) = get(&fixture.app, &format!("/track/{job_id}/result")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(table["fps"], 25.0);
    assert_eq!(table["frame_count"], 48);
    assert_eq!(table["video_width"], 640);
    assert_eq!(table["frames"]["0"]["track_ids"], json!([3]));
    assert_eq!(table["frames"]["0"]["names"], json!(["person"]));
    // Audio levels were requested (default), so they are zero-filled.
    assert_eq!(table["audio_levels"].as_array().map(Vec::len), Some(48));
}

#[tokio::test]
async fn test_unknown_video_is_404() {
    let fixture = precomputed_fixture();
    let (status, body) = post_track(&fixture.app, json!({ "video_id": "nope" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Video not found");

    let (status, _) = post_track(&fixture.app, json!({ "video_id": "../clip" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // An absolute id must not reach past the upload dir.
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(outside.path().join("other.mp4"), b"elsewhere").unwrap();
    let absolute = outside.path().join("other").to_string_lossy().into_owned();
    let (status, _) = post_track(&fixture.app, json!({ "video_id": absolute })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_params_are_400() {
    let fixture = precomputed_fixture();
    let (status, body) = post_track(
        &fixture.app,
        json!({ "video_id": "clip", "params": { "conf": 1.5 } }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("conf"));

    let (status, _) = post_track(
        &fixture.app,
        json!({ "video_id": "clip", "params": { "tracker": "deepsort" } }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_job_is_404() {
    let fixture = precomputed_fixture();
    let (status, _) = get(&fixture.app, "/track/not-a-job/progress").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = get(
        &fixture.app,
        "/track/6f1c1a4e-9a43-4c1e-b1a2-0d5b8f0e7c11/result",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Job not found");
}

struct BlockingTracker {
    gate: gate::Gate,
}

mod gate {
    use std::sync::{Condvar, Mutex};

    /// Holds tracker threads until the test opens it.
    #[derive(Default)]
    pub struct Gate {
        open: Mutex<bool>,
        cond: Condvar,
    }

    impl Gate {
        pub fn open(&self) {
            *self.open.lock().unwrap() = true;
            self.cond.notify_all();
        }

        pub fn wait(&self) {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.cond.wait(open).unwrap();
            }
        }
    }
}

impl Tracker for BlockingTracker {
    fn run(
        &self,
        _video: &Path,
        _params: &TrackParams,
        progress: &mut dyn FnMut(Progress),
    ) -> anyhow::Result<AnnotationTable> {
        progress(Progress::new(5, 10));
        self.gate.wait();
        anyhow::bail!("detector crashed")
    }
}

#[tokio::test]
async fn test_running_job_conflicts_then_fails() {
    let tracker = Arc::new(BlockingTracker {
        gate: Default::default(),
    });
    let handle = Arc::clone(&tracker);
    let fixture = fixture_with(move |_| tracker as Arc<dyn Tracker>);

    let (status, body) = post_track(&fixture.app, json!({ "video_id": "clip" })).await;
    assert_eq!(status, StatusCode::OK);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let (status, _) = post_track(&fixture.app, json!({ "video_id": "clip" })).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = get(&fixture.app, &format!("/track/{job_id}/result")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["error"], "Job not finished");

    handle.gate.open();
    let progress = wait_terminal(&fixture.app, &job_id).await;
    assert_eq!(progress["status"], "error");
    assert_eq!(progress["message"], "detector crashed");

    let (status, body) = get(&fixture.app, &format!("/track/{job_id}/result")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "detector crashed");

    // The failed job no longer blocks the video.
    let (status, _) = post_track(&fixture.app, json!({ "video_id": "clip" })).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_serves_uploaded_video() {
    let fixture = precomputed_fixture();
    let response = fixture
        .app
        .clone()
        .oneshot(Request::get("/video/clip").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"not really a video");

    let (status, _) = get(&fixture.app, "/video/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
