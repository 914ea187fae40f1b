use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use actix_web::{App, test, web};
use image::DynamicImage;
use serde_json::Value;
use shared::{ClassScore, Mask, ModelStatus, Predictions, Task};

use backend::analytics::AnalyticsService;
use backend::config::AppConfig;
use backend::inference::{InferenceError, Predictor};
use backend::routes::configure_api;

const BOUNDARY: &str = "----test-boundary";

/// Scripted inference double: one fixed person detection, deterministic
/// payloads for the other tasks, and a call counter so tests can assert the
/// adapter was never reached.
struct StubPredictor {
    available: bool,
    calls: Arc<AtomicUsize>,
}

impl StubPredictor {
    fn new(available: bool) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                available,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl Predictor for StubPredictor {
    fn is_available(&self, _task: Task) -> bool {
        self.available
    }

    fn status(&self) -> Vec<ModelStatus> {
        Task::ALL
            .iter()
            .map(|task| ModelStatus {
                task: *task,
                path: format!("models/{task}.onnx"),
                loaded: self.available,
            })
            .collect()
    }

    fn predict(&self, _image: &DynamicImage, task: Task) -> Result<Predictions, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(InferenceError::ModelUnavailable(task));
        }
        Ok(match task {
            Task::Detect => Predictions::Detect {
                boxes: vec![[10.0, 10.0, 100.0, 100.0]],
                classes: vec![0],
                confidences: vec![0.9],
                class_names: vec!["person".into()],
            },
            Task::Segment => Predictions::Segment {
                boxes: vec![[10.0, 10.0, 100.0, 100.0]],
                classes: vec![0],
                confidences: vec![0.9],
                class_names: vec!["person".into()],
                masks: vec![Mask::encode(&[true, true, false, false], 2, 2)],
            },
            Task::Classify => Predictions::Classify {
                top: vec![
                    ClassScore {
                        class_id: 1,
                        class_name: "tabby".into(),
                        confidence: 0.8,
                    },
                    ClassScore {
                        class_id: 2,
                        class_name: "tiger cat".into(),
                        confidence: 0.1,
                    },
                ],
            },
            Task::Pose => Predictions::Pose {
                boxes: vec![[10.0, 10.0, 100.0, 100.0]],
                confidences: vec![0.9],
                keypoints: vec![vec![[50.0, 50.0], [60.0, 70.0]]],
            },
        })
    }
}

fn test_config(max_upload_bytes: usize) -> AppConfig {
    AppConfig {
        model_paths: Task::ALL
            .iter()
            .map(|task| (*task, format!("models/{task}.onnx")))
            .collect(),
        label_paths: Vec::new(),
        max_upload_bytes,
        enable_analytics: false,
        analytics_table: "inference-runs".into(),
        port: 0,
        frontend_dir: ".".into(),
    }
}

macro_rules! spawn_app {
    ($stub:expr, $max:expr) => {{
        let predictor: Arc<dyn Predictor> = Arc::new($stub);
        test::init_service(
            App::new()
                .app_data(web::Data::from(predictor))
                .app_data(web::Data::new(None::<AnalyticsService>))
                .app_data(web::Data::new(test_config($max)))
                .configure(configure_api),
        )
        .await
    }};
}

fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([100, 120, 140]));
    let mut buf = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Jpeg)
        .unwrap();
    buf.into_inner()
}

fn multipart_body(model_type: Option<&str>, image: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(task) = model_type {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"model_type\"\r\n\r\n{task}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((mime, bytes)) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"upload\"\r\nContent-Type: {mime}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

macro_rules! post_process {
    ($body:expr) => {
        test::TestRequest::post()
            .uri("/api/process")
            .insert_header((
                actix_web::http::header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            ))
            .set_payload($body)
            .to_request()
    };
}

#[actix_web::test]
async fn healthz_reports_ok() {
    let (stub, _) = StubPredictor::new(true);
    let app = spawn_app!(stub, 16 * 1024 * 1024);
    let resp: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/api/healthz").to_request(),
    )
    .await;
    assert_eq!(resp["ok"], true);
}

#[actix_web::test]
async fn detect_scenario_returns_stubbed_box_and_consistent_timing() {
    let (stub, calls) = StubPredictor::new(true);
    let app = spawn_app!(stub, 16 * 1024 * 1024);

    let body = multipart_body(Some("detect"), Some(("image/jpeg", &jpeg_bytes(640, 480))));
    let resp = test::call_service(&app, post_process!(body)).await;
    assert_eq!(resp.status(), 200);

    let value: Value = test::read_body_json(resp).await;
    assert_eq!(value["success"], true);
    assert_eq!(value["task"], "detect");
    assert_eq!(
        value["predictions"]["boxes"],
        serde_json::json!([[10.0, 10.0, 100.0, 100.0]])
    );
    assert_eq!(value["predictions"]["classes"], serde_json::json!([0]));
    assert_eq!(value["predictions"]["confidences"], serde_json::json!([0.9]));
    assert_eq!(
        value["predictions"]["class_names"],
        serde_json::json!(["person"])
    );

    let inference_ms = value["timing"]["inference_ms"].as_f64().unwrap();
    let total_ms = value["timing"]["total_ms"].as_f64().unwrap();
    let fps = value["timing"]["fps"].as_f64().unwrap();
    assert!(total_ms >= inference_ms);
    if inference_ms > 0.0 {
        let expected = (1000.0 / inference_ms * 10.0).round() / 10.0;
        assert_eq!(fps, expected);
    } else {
        assert_eq!(fps, 0.0);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn same_input_twice_yields_identical_predictions() {
    let (stub, _) = StubPredictor::new(true);
    let app = spawn_app!(stub, 16 * 1024 * 1024);
    let jpeg = jpeg_bytes(64, 64);

    let first: Value = test::call_and_read_body_json(
        &app,
        post_process!(multipart_body(Some("detect"), Some(("image/jpeg", &jpeg)))),
    )
    .await;
    let second: Value = test::call_and_read_body_json(
        &app,
        post_process!(multipart_body(Some("detect"), Some(("image/jpeg", &jpeg)))),
    )
    .await;
    assert_eq!(first["predictions"], second["predictions"]);
}

#[actix_web::test]
async fn oversized_upload_is_rejected_before_inference() {
    let (stub, calls) = StubPredictor::new(true);
    let app = spawn_app!(stub, 1024);

    let payload = vec![0u8; 4096];
    let body = multipart_body(Some("detect"), Some(("image/jpeg", &payload)));
    let resp = test::call_service(&app, post_process!(body)).await;
    assert_eq!(resp.status(), 413);

    let value: Value = test::read_body_json(resp).await;
    assert_eq!(value["success"], false);
    assert!(value["error"].as_str().unwrap().contains("too large"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn unsupported_format_is_rejected_server_side() {
    let (stub, calls) = StubPredictor::new(true);
    let app = spawn_app!(stub, 16 * 1024 * 1024);

    let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00";
    let body = multipart_body(Some("detect"), Some(("image/gif", gif.as_slice())));
    let resp = test::call_service(&app, post_process!(body)).await;
    assert_eq!(resp.status(), 400);

    let value: Value = test::read_body_json(resp).await;
    assert_eq!(value["success"], false);
    assert!(value["error"].as_str().unwrap().contains("Unsupported"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn unknown_task_is_invalid_input() {
    let (stub, _) = StubPredictor::new(true);
    let app = spawn_app!(stub, 16 * 1024 * 1024);

    let body = multipart_body(Some("translate"), Some(("image/jpeg", &jpeg_bytes(32, 32))));
    let resp = test::call_service(&app, post_process!(body)).await;
    assert_eq!(resp.status(), 400);
    let value: Value = test::read_body_json(resp).await;
    assert_eq!(value["error"], "Invalid model type");
}

#[actix_web::test]
async fn missing_image_is_invalid_input() {
    let (stub, _) = StubPredictor::new(true);
    let app = spawn_app!(stub, 16 * 1024 * 1024);

    let resp = test::call_service(&app, post_process!(multipart_body(Some("detect"), None))).await;
    assert_eq!(resp.status(), 400);
    let value: Value = test::read_body_json(resp).await;
    assert_eq!(value["error"], "No image file provided");
}

#[actix_web::test]
async fn missing_model_type_is_not_defaulted() {
    let (stub, calls) = StubPredictor::new(true);
    let app = spawn_app!(stub, 16 * 1024 * 1024);

    let body = multipart_body(None, Some(("image/jpeg", &jpeg_bytes(32, 32))));
    let resp = test::call_service(&app, post_process!(body)).await;
    assert_eq!(resp.status(), 400);
    let value: Value = test::read_body_json(resp).await;
    assert_eq!(value["error"], "No model type provided");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn unavailable_model_is_service_unavailable_for_that_task() {
    let (stub, _) = StubPredictor::new(false);
    let app = spawn_app!(stub, 16 * 1024 * 1024);

    let body = multipart_body(Some("pose"), Some(("image/jpeg", &jpeg_bytes(32, 32))));
    let resp = test::call_service(&app, post_process!(body)).await;
    assert_eq!(resp.status(), 503);
    let value: Value = test::read_body_json(resp).await;
    assert_eq!(value["success"], false);
    assert!(value["error"].as_str().unwrap().contains("pose"));
}

#[actix_web::test]
async fn segment_response_keeps_masks_parallel_to_boxes() {
    let (stub, _) = StubPredictor::new(true);
    let app = spawn_app!(stub, 16 * 1024 * 1024);

    let body = multipart_body(Some("segment"), Some(("image/jpeg", &jpeg_bytes(32, 32))));
    let value: Value = test::call_and_read_body_json(&app, post_process!(body)).await;
    assert_eq!(value["success"], true);
    let boxes = value["predictions"]["boxes"].as_array().unwrap();
    let masks = value["predictions"]["masks"].as_array().unwrap();
    assert_eq!(boxes.len(), masks.len());
    assert_eq!(value["predictions"]["masks"][0]["width"], 2);
}

#[actix_web::test]
async fn classify_response_is_ranked_without_boxes() {
    let (stub, _) = StubPredictor::new(true);
    let app = spawn_app!(stub, 16 * 1024 * 1024);

    let body = multipart_body(Some("classify"), Some(("image/jpeg", &jpeg_bytes(32, 32))));
    let value: Value = test::call_and_read_body_json(&app, post_process!(body)).await;
    assert_eq!(value["success"], true);
    assert!(value["predictions"].get("boxes").is_none());
    let top = value["predictions"]["top"].as_array().unwrap();
    assert_eq!(top[0]["class_name"], "tabby");
    assert!(top[0]["confidence"].as_f64() >= top[1]["confidence"].as_f64());
}

#[actix_web::test]
async fn models_endpoint_reports_per_task_status() {
    let (stub, _) = StubPredictor::new(true);
    let app = spawn_app!(stub, 16 * 1024 * 1024);

    let value: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/api/models").to_request(),
    )
    .await;
    assert_eq!(value["success"], true);
    let models = value["models"].as_array().unwrap();
    assert_eq!(models.len(), 4);
    assert!(models.iter().all(|m| m["loaded"] == true));
}

#[actix_web::test]
async fn analytics_report_is_rejected_when_disabled() {
    let (stub, _) = StubPredictor::new(true);
    let app = spawn_app!(stub, 16 * 1024 * 1024);

    let report = serde_json::json!({
        "task": "detect",
        "timing": {
            "decode_ms": 1.0, "inference_ms": 20.0, "process_ms": 0.5,
            "total_ms": 22.0, "fps": 50.0,
        },
        "success": true,
    });
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/analytics")
            .set_json(&report)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 400);
    let value: Value = test::read_body_json(resp).await;
    assert_eq!(value["error"], "Analytics disabled");
}
