use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;

use image::{DynamicImage, GenericImageView};
use log::{info, warn};
use ndarray::{ArrayD, Axis, Ix2, Ix3, Ix4};
use ort::session::Session;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::value::TensorRef;
use shared::{ModelStatus, Predictions, Task};

use super::{InferenceError, Predictor, engine};
use crate::config::AppConfig;

const SEGMENT_COEFFICIENTS: usize = 32;

struct LoadedModel {
    // `ort` 2.0.0-rc.13 requires `&mut Session` to run inference; the mutex
    // provides that exclusive access while the registry stays shared.
    session: Mutex<Session>,
    labels: Vec<String>,
}

/// Holds one ONNX session per task, loaded once at startup and shared
/// read-only by every request. A task whose artifact failed to load stays
/// registered as unavailable; requests for it get a service-unavailable
/// envelope while the other tasks keep working.
pub struct ModelRegistry {
    models: HashMap<Task, LoadedModel>,
    configured_paths: Vec<(Task, String)>,
}

impl ModelRegistry {
    pub fn load(config: &AppConfig) -> Self {
        let mut models = HashMap::new();
        for (task, path) in &config.model_paths {
            match Self::load_session(path) {
                Ok(session) => {
                    let labels = Self::load_labels(config.label_path(*task));
                    info!("Loaded {task} model from {path} ({} labels)", labels.len());
                    models.insert(
                        *task,
                        LoadedModel {
                            session: Mutex::new(session),
                            labels,
                        },
                    );
                }
                Err(e) => {
                    warn!("Failed to load {task} model from {path}: {e}; task unavailable");
                }
            }
        }
        Self {
            models,
            configured_paths: config.model_paths.clone(),
        }
    }

    fn load_session(path: &str) -> Result<Session, ort::Error> {
        SessionBuilder::new()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(path)
    }

    fn load_labels(path: &str) -> Vec<String> {
        match fs::read_to_string(path) {
            Ok(contents) => contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) => {
                warn!("Failed to read label file {path}: {e}; falling back to class ids");
                Vec::new()
            }
        }
    }

    pub fn loaded_tasks(&self) -> usize {
        self.models.len()
    }

    fn run_session(
        &self,
        model: &LoadedModel,
        image: &DynamicImage,
    ) -> Result<(Vec<ArrayD<f32>>, engine::Letterbox), InferenceError> {
        let (input, lb) = engine::preprocess(image, engine::INPUT_SIZE);
        let mut session = model
            .session
            .lock()
            .expect("inference session mutex poisoned");
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let tensors = outputs
            .iter()
            .map(|(_name, value)| {
                value
                    .try_extract_array::<f32>()
                    .map(|t| t.into_owned())
                    .map_err(InferenceError::from)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if tensors.is_empty() {
            return Err(InferenceError::Output("model produced no outputs".into()));
        }
        Ok((tensors, lb))
    }
}

fn as_head(tensor: &ArrayD<f32>) -> Result<ndarray::ArrayView2<'_, f32>, InferenceError> {
    tensor
        .view()
        .into_dimensionality::<Ix3>()
        .map(|t| t.index_axis_move(Axis(0), 0))
        .map_err(|_| InferenceError::Output(format!("unexpected head shape {:?}", tensor.shape())))
}

impl Predictor for ModelRegistry {
    fn is_available(&self, task: Task) -> bool {
        self.models.contains_key(&task)
    }

    fn status(&self) -> Vec<ModelStatus> {
        self.configured_paths
            .iter()
            .map(|(task, path)| ModelStatus {
                task: *task,
                path: path.clone(),
                loaded: self.models.contains_key(task),
            })
            .collect()
    }

    fn predict(&self, image: &DynamicImage, task: Task) -> Result<Predictions, InferenceError> {
        let model = self
            .models
            .get(&task)
            .ok_or(InferenceError::ModelUnavailable(task))?;
        let (orig_w, orig_h) = image.dimensions();
        let (tensors, lb) = self.run_session(model, image)?;

        match task {
            Task::Detect => {
                let head = as_head(&tensors[0])?;
                let num_classes = head.shape()[0].saturating_sub(4);
                let candidates = engine::decode_candidates(
                    head,
                    num_classes,
                    0,
                    engine::CONFIDENCE_THRESHOLD,
                )?;
                let kept = engine::non_maximum_suppression(candidates, engine::IOU_THRESHOLD);
                Ok(engine::build_detections(
                    &kept,
                    &lb,
                    orig_w,
                    orig_h,
                    &model.labels,
                ))
            }
            Task::Segment => {
                let head = as_head(&tensors[0])?;
                let prototypes = tensors
                    .get(1)
                    .ok_or_else(|| {
                        InferenceError::Output("segmentation model produced no prototypes".into())
                    })?
                    .view()
                    .into_dimensionality::<Ix4>()
                    .map_err(|_| InferenceError::Output("unexpected prototype shape".into()))?
                    .index_axis_move(Axis(0), 0);

                let num_classes = head.shape()[0].saturating_sub(4 + SEGMENT_COEFFICIENTS);
                let candidates = engine::decode_candidates(
                    head,
                    num_classes,
                    SEGMENT_COEFFICIENTS,
                    engine::CONFIDENCE_THRESHOLD,
                )?;
                let kept = engine::non_maximum_suppression(candidates, engine::IOU_THRESHOLD);

                let detections =
                    engine::build_detections(&kept, &lb, orig_w, orig_h, &model.labels);
                let Predictions::Detect {
                    boxes,
                    classes,
                    confidences,
                    class_names,
                } = detections
                else {
                    return Err(InferenceError::Output(
                        "detection builder returned a non-detect payload".into(),
                    ));
                };
                let masks = kept
                    .iter()
                    .zip(&boxes)
                    .map(|(candidate, box_orig)| {
                        engine::mask_from_coefficients(
                            &candidate.extra,
                            prototypes,
                            box_orig,
                            &lb,
                            orig_w,
                            orig_h,
                            engine::INPUT_SIZE,
                        )
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Predictions::Segment {
                    boxes,
                    classes,
                    confidences,
                    class_names,
                    masks,
                })
            }
            Task::Pose => {
                let head = as_head(&tensors[0])?;
                let keypoint_values = head.shape()[0].saturating_sub(5);
                let candidates = engine::decode_candidates(
                    head,
                    1,
                    keypoint_values,
                    engine::CONFIDENCE_THRESHOLD,
                )?;
                let kept = engine::non_maximum_suppression(candidates, engine::IOU_THRESHOLD);
                Ok(engine::build_poses(&kept, &lb, orig_w, orig_h))
            }
            Task::Classify => {
                let row = tensors[0]
                    .view()
                    .into_dimensionality::<Ix2>()
                    .map(|t| t.index_axis_move(Axis(0), 0))
                    .map_err(|_| {
                        InferenceError::Output(format!(
                            "unexpected classification shape {:?}",
                            tensors[0].shape()
                        ))
                    })?;
                Ok(engine::build_classification(
                    row,
                    &model.labels,
                    engine::CLASSIFY_TOP_K,
                ))
            }
        }
    }
}
