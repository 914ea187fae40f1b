use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

pub mod mask;

pub use mask::Mask;

/// Selects both the model artifact and the shape of the prediction payload.
#[derive(
    Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Task {
    Detect,
    Segment,
    Classify,
    Pose,
}

impl Task {
    pub const ALL: [Task; 4] = [Task::Detect, Task::Segment, Task::Classify, Task::Pose];
}

/// Per-request wall-clock measurements, in milliseconds.
///
/// Millisecond fields are rounded to two decimals, `fps` to one.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug, Default)]
pub struct TimingBlock {
    pub decode_ms: f64,
    pub inference_ms: f64,
    pub process_ms: f64,
    pub total_ms: f64,
    pub fps: f64,
}

impl TimingBlock {
    pub fn new(decode_ms: f64, inference_ms: f64, process_ms: f64, total_ms: f64) -> Self {
        // fps derives from the rounded field so it stays consistent with
        // what the envelope actually reports.
        let inference_ms = round_to(inference_ms, 2);
        let fps = if inference_ms > 0.0 {
            round_to(1000.0 / inference_ms, 1)
        } else {
            0.0
        };
        Self {
            decode_ms: round_to(decode_ms, 2),
            inference_ms,
            process_ms: round_to(process_ms, 2),
            total_ms: round_to(total_ms, 2),
            fps,
        }
    }
}

fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

/// One ranked classification entry.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct ClassScore {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
}

/// Task-shaped prediction payload.
///
/// Serialized untagged: the enclosing envelope carries the task, and each
/// variant is distinguished by field presence (`masks`, `keypoints`, `top`).
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(untagged)]
pub enum Predictions {
    Segment {
        boxes: Vec<[f32; 4]>,
        classes: Vec<u32>,
        confidences: Vec<f32>,
        class_names: Vec<String>,
        masks: Vec<Mask>,
    },
    Pose {
        boxes: Vec<[f32; 4]>,
        confidences: Vec<f32>,
        keypoints: Vec<Vec<[f32; 2]>>,
    },
    Classify {
        top: Vec<ClassScore>,
    },
    Detect {
        boxes: Vec<[f32; 4]>,
        classes: Vec<u32>,
        confidences: Vec<f32>,
        class_names: Vec<String>,
    },
}

impl Predictions {
    /// Number of detections (or ranked classes) carried.
    pub fn len(&self) -> usize {
        match self {
            Predictions::Detect { boxes, .. } | Predictions::Segment { boxes, .. } => boxes.len(),
            Predictions::Pose { keypoints, .. } => keypoints.len(),
            Predictions::Classify { top } => top.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks the parallel-array invariant: every per-detection sequence
    /// describes the same detections, indexed together.
    pub fn arrays_consistent(&self) -> bool {
        match self {
            Predictions::Detect {
                boxes,
                classes,
                confidences,
                class_names,
            } => {
                boxes.len() == classes.len()
                    && boxes.len() == confidences.len()
                    && boxes.len() == class_names.len()
            }
            Predictions::Segment {
                boxes,
                classes,
                confidences,
                class_names,
                masks,
            } => {
                boxes.len() == classes.len()
                    && boxes.len() == confidences.len()
                    && boxes.len() == class_names.len()
                    && boxes.len() == masks.len()
            }
            Predictions::Pose {
                boxes,
                confidences,
                keypoints,
            } => boxes.len() == confidences.len() && boxes.len() == keypoints.len(),
            Predictions::Classify { .. } => true,
        }
    }
}

/// Envelope returned by `POST /api/process`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProcessResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictions: Option<Predictions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessResponse {
    pub fn ok(task: Task, predictions: Predictions, timing: TimingBlock) -> Self {
        Self {
            success: true,
            predictions: Some(predictions),
            timing: Some(timing),
            task: Some(task),
            error: None,
        }
    }

    pub fn failure(task: Option<Task>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            predictions: None,
            timing: None,
            task,
            error: Some(error.into()),
        }
    }
}

/// Client-side analytics payload for `POST /api/analytics`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AnalyticsReport {
    pub task: Task,
    pub timing: TimingBlock,
    pub success: bool,
}

/// Per-task load status for `GET /api/models`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ModelStatus {
    pub task: Task,
    pub path: String,
    pub loaded: bool,
}
