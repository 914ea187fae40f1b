pub mod engine;
pub mod registry;

use image::DynamicImage;
use shared::{ModelStatus, Predictions, Task};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("No model available for task: {0}")]
    ModelUnavailable(Task),
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Model run failed: {0}")]
    Session(#[from] ort::Error),
    #[error("Unexpected model output: {0}")]
    Output(String),
}

/// Read-only inference surface shared by all requests.
///
/// The model registry implements this over ONNX sessions loaded at startup;
/// the HTTP tests substitute a scripted double.
pub trait Predictor: Send + Sync {
    fn is_available(&self, task: Task) -> bool;
    fn status(&self) -> Vec<ModelStatus>;
    fn predict(&self, image: &DynamicImage, task: Task) -> Result<Predictions, InferenceError>;
}
