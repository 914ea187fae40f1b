use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use image::ImageFormat;
use log::{debug, error, info};
use serde_json::json;
use shared::{AnalyticsReport, ProcessResponse, Task, TimingBlock};

use crate::analytics::{AnalyticsService, InferenceRun};
use crate::config::AppConfig;
use crate::inference::{InferenceError, Predictor};

pub fn configure_routes(cfg: &mut web::ServiceConfig, frontend_dir: String) {
    configure_api(cfg);
    cfg.service(Files::new("/", frontend_dir).index_file("index.html"));
}

pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/process").route(web::post().to(handle_process)))
        .service(web::resource("/api/analytics").route(web::post().to(handle_analytics)))
        .service(web::resource("/api/analytics/stats").route(web::get().to(analytics_stats)))
        .service(web::resource("/api/models").route(web::get().to(get_models)))
        .service(web::resource("/api/healthz").route(web::get().to(health_check)));
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "ok": true }))
}

async fn get_models(predictor: web::Data<dyn Predictor>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "models": predictor.status(),
    }))
}

struct Upload {
    image: Vec<u8>,
    model_type: Option<String>,
}

enum UploadError {
    TooLarge,
    Read(Error),
}

/// Drains the multipart payload into the image bytes and the task field,
/// aborting as soon as the image part exceeds the configured cap.
async fn read_upload(mut payload: Multipart, max_bytes: usize) -> Result<Upload, UploadError> {
    let mut image = Vec::new();
    let mut model_type = None;

    while let Ok(Some(mut field)) = payload.try_next().await {
        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .unwrap_or("")
            .to_string();
        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| UploadError::Read(e.into()))?;
            if name == "image" && data.len() + chunk.len() > max_bytes {
                return Err(UploadError::TooLarge);
            }
            data.extend_from_slice(&chunk);
        }
        match name.as_str() {
            "image" => image = data,
            "model_type" => model_type = String::from_utf8(data).ok(),
            _ => {}
        }
    }

    Ok(Upload { image, model_type })
}

fn allowed_format(bytes: &[u8]) -> bool {
    matches!(
        image::guess_format(bytes),
        Ok(ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP)
    )
}

/// Spawns an analytics write and forgets it. Delivery failures never affect
/// the request that triggered them.
fn record_run(analytics: &web::Data<Option<AnalyticsService>>, run: InferenceRun) {
    if let Some(service) = analytics.get_ref().clone() {
        actix_web::rt::spawn(async move {
            if let Err(e) = service.log_run(&run).await {
                debug!("Analytics delivery failed: {e}");
            }
        });
    }
}

async fn handle_process(
    predictor: web::Data<dyn Predictor>,
    analytics: web::Data<Option<AnalyticsService>>,
    config: web::Data<AppConfig>,
    payload: Multipart,
) -> Result<HttpResponse, Error> {
    let started = Instant::now();

    let upload = match read_upload(payload, config.max_upload_bytes).await {
        Ok(upload) => upload,
        Err(UploadError::TooLarge) => {
            let message = format!(
                "File too large. Maximum size: {}MB",
                config.max_upload_bytes / (1024 * 1024)
            );
            return Ok(
                HttpResponse::PayloadTooLarge().json(ProcessResponse::failure(None, message))
            );
        }
        Err(UploadError::Read(e)) => return Err(e),
    };

    if upload.image.is_empty() {
        return Ok(
            HttpResponse::BadRequest().json(ProcessResponse::failure(None, "No image file provided"))
        );
    }

    let task = match upload.model_type.as_deref() {
        None => {
            return Ok(HttpResponse::BadRequest()
                .json(ProcessResponse::failure(None, "No model type provided")));
        }
        Some(raw) => match Task::from_str(raw.trim()) {
            Ok(task) => task,
            Err(_) => {
                return Ok(HttpResponse::BadRequest()
                    .json(ProcessResponse::failure(None, "Invalid model type")));
            }
        },
    };

    if !allowed_format(&upload.image) {
        record_run(
            &analytics,
            InferenceRun::server(
                task,
                config.model_path(task).to_string(),
                TimingBlock::default(),
                false,
                Some("Unsupported image format".into()),
                upload.image.len() as i64,
            ),
        );
        return Ok(HttpResponse::BadRequest().json(ProcessResponse::failure(
            Some(task),
            "Unsupported image format. Allowed: JPEG, PNG, WEBP",
        )));
    }

    if !predictor.is_available(task) {
        return Ok(HttpResponse::ServiceUnavailable().json(ProcessResponse::failure(
            Some(task),
            format!("No model available for task: {task}"),
        )));
    }

    info!(
        "Processing {} inference for {} bytes",
        task,
        upload.image.len()
    );

    let decode_start = Instant::now();
    let image = match crate::inference::engine::decode_image(&upload.image) {
        Ok(image) => image,
        Err(e) => {
            debug!("Image decode failed: {e}");
            return Ok(HttpResponse::BadRequest()
                .json(ProcessResponse::failure(Some(task), "Failed to decode image")));
        }
    };
    let decode_ms = decode_start.elapsed().as_secs_f64() * 1000.0;

    let predictor_for_block: Arc<dyn Predictor> = predictor.clone().into_inner();
    let image_size = upload.image.len() as i64;
    let (result, inference_ms) = web::block(move || {
        let inference_start = Instant::now();
        let result = predictor_for_block.predict(&image, task);
        (result, inference_start.elapsed().as_secs_f64() * 1000.0)
    })
    .await?;

    match result {
        Ok(predictions) => {
            let process_start = Instant::now();
            debug_assert!(predictions.arrays_consistent());
            let process_ms = process_start.elapsed().as_secs_f64() * 1000.0;
            let total_ms = started.elapsed().as_secs_f64() * 1000.0;
            let timing = TimingBlock::new(decode_ms, inference_ms, process_ms, total_ms);

            record_run(
                &analytics,
                InferenceRun::server(
                    task,
                    config.model_path(task).to_string(),
                    timing,
                    true,
                    None,
                    image_size,
                ),
            );
            Ok(HttpResponse::Ok().json(ProcessResponse::ok(task, predictions, timing)))
        }
        Err(InferenceError::ModelUnavailable(task)) => {
            Ok(HttpResponse::ServiceUnavailable().json(ProcessResponse::failure(
                Some(task),
                format!("No model available for task: {task}"),
            )))
        }
        Err(e) => {
            let total_ms = started.elapsed().as_secs_f64() * 1000.0;
            let timing = TimingBlock::new(decode_ms, inference_ms, 0.0, total_ms);
            error!(
                "Inference failed for {task} after {:.2}ms: {e:?}",
                timing.inference_ms
            );
            record_run(
                &analytics,
                InferenceRun::server(
                    task,
                    config.model_path(task).to_string(),
                    timing,
                    false,
                    Some("Processing failed".into()),
                    image_size,
                ),
            );
            Ok(HttpResponse::Ok().json(ProcessResponse::failure(Some(task), "Processing failed")))
        }
    }
}

async fn handle_analytics(
    analytics: web::Data<Option<AnalyticsService>>,
    config: web::Data<AppConfig>,
    report: web::Json<AnalyticsReport>,
) -> HttpResponse {
    if analytics.get_ref().is_none() {
        return HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": "Analytics disabled",
        }));
    }

    let report = report.into_inner();
    let run = InferenceRun::from_report(&report, config.model_path(report.task).to_string());
    record_run(&analytics, run);
    HttpResponse::Ok().json(json!({ "success": true }))
}

async fn analytics_stats(analytics: web::Data<Option<AnalyticsService>>) -> HttpResponse {
    let Some(service) = analytics.get_ref() else {
        return HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": "Analytics disabled",
        }));
    };

    match service.stats().await {
        Ok(stats) => HttpResponse::Ok().json(json!({ "success": true, "data": stats })),
        Err(e) => {
            error!("Failed to aggregate analytics: {e:?}");
            HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": "Failed to read analytics",
            }))
        }
    }
}
