use shared::Task;
use std::env;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Process-lifetime configuration, read from the environment once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub model_paths: Vec<(Task, String)>,
    pub label_paths: Vec<(Task, String)>,
    pub max_upload_bytes: usize,
    pub enable_analytics: bool,
    pub analytics_table: String,
    pub port: u16,
    pub frontend_dir: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let model_paths = vec![
            (
                Task::Detect,
                env_or("MODEL_DETECT", "models/weights/yolo11n.onnx"),
            ),
            (
                Task::Segment,
                env_or("MODEL_SEGMENT", "models/weights/yolo11n-seg.onnx"),
            ),
            (
                Task::Classify,
                env_or("MODEL_CLASSIFY", "models/weights/yolo11n-cls.onnx"),
            ),
            (
                Task::Pose,
                env_or("MODEL_POSE", "models/weights/yolo11n-pose.onnx"),
            ),
        ];
        let label_paths = vec![
            (
                Task::Detect,
                env_or("MODEL_LABELS_DETECT", "models/labels/coco.txt"),
            ),
            (
                Task::Segment,
                env_or("MODEL_LABELS_SEGMENT", "models/labels/coco.txt"),
            ),
            (
                Task::Classify,
                env_or("MODEL_LABELS_CLASSIFY", "models/labels/imagenet.txt"),
            ),
            (
                Task::Pose,
                env_or("MODEL_LABELS_POSE", "models/labels/person.txt"),
            ),
        ];

        let frontend_dir = if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
            format!("{}/../frontend/dist", manifest_dir)
        } else {
            "/usr/src/app/frontend/dist".to_string()
        };

        Self {
            model_paths,
            label_paths,
            max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            enable_analytics: env::var("ENABLE_ANALYTICS")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
            analytics_table: env_or("ANALYTICS_TABLE", "inference-runs"),
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8081),
            frontend_dir: env::var("FRONTEND_DIR").unwrap_or(frontend_dir),
        }
    }

    pub fn model_path(&self, task: Task) -> &str {
        self.model_paths
            .iter()
            .find(|(t, _)| *t == task)
            .map(|(_, p)| p.as_str())
            .unwrap_or_default()
    }

    pub fn label_path(&self, task: Task) -> &str {
        self.label_paths
            .iter()
            .find(|(t, _)| *t == task)
            .map(|(_, p)| p.as_str())
            .unwrap_or_default()
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
