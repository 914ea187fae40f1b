use image::{DynamicImage, GenericImageView, imageops::FilterType};
use ndarray::{Array4, ArrayView1, ArrayView2, ArrayView3, Axis};
use shared::{ClassScore, Mask, Predictions};

use super::InferenceError;

pub const INPUT_SIZE: u32 = 640;
pub const CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const IOU_THRESHOLD: f32 = 0.45;
pub const MASK_GRID: u32 = 160;
pub const CLASSIFY_TOP_K: usize = 5;

/// Geometry of a letterbox resize: uniform scale plus centering offsets.
/// Everything the model emits is in letterbox space and must be mapped back
/// through this before it leaves the inference layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn compute(orig_w: u32, orig_h: u32, target: u32) -> Self {
        let scale = (target as f32 / orig_w as f32).min(target as f32 / orig_h as f32);
        let new_w = (orig_w as f32 * scale).round();
        let new_h = (orig_h as f32 * scale).round();
        Self {
            scale,
            pad_x: (target as f32 - new_w) / 2.0,
            pad_y: (target as f32 - new_h) / 2.0,
        }
    }

    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }

    pub fn to_letterbox(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale + self.pad_x, y * self.scale + self.pad_y)
    }
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, InferenceError> {
    image::load_from_memory(bytes).map_err(|e| InferenceError::Decode(e.to_string()))
}

/// Letterbox-resizes to a square model input and normalizes to NCHW floats.
pub fn preprocess(image: &DynamicImage, target: u32) -> (Array4<f32>, Letterbox) {
    let (orig_w, orig_h) = image.dimensions();
    let lb = Letterbox::compute(orig_w, orig_h, target);
    let new_w = ((orig_w as f32 * lb.scale).round() as u32).max(1);
    let new_h = ((orig_h as f32 * lb.scale).round() as u32).max(1);

    let resized = image.resize_exact(new_w, new_h, FilterType::Triangle).to_rgb8();
    let mut padded = image::RgbImage::from_pixel(target, target, image::Rgb([114, 114, 114]));
    image::imageops::overlay(&mut padded, &resized, lb.pad_x as i64, lb.pad_y as i64);

    let mut input = Array4::<f32>::zeros((1, 3, target as usize, target as usize));
    for (x, y, pixel) in padded.enumerate_pixels() {
        input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
        input[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
        input[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
    }
    (input, lb)
}

/// One thresholded box candidate in letterbox space. `extra` carries the
/// per-candidate tail rows (mask coefficients or keypoint triples).
#[derive(Clone, Debug)]
pub struct Candidate {
    pub xyxy: [f32; 4],
    pub class_id: u32,
    pub confidence: f32,
    pub extra: Vec<f32>,
}

/// Decodes a raw `[4 + num_classes + extra_len, N]` head output: picks the
/// best class per column, drops everything under the confidence threshold,
/// converts center-size boxes to corners and clamps confidences to [0, 1].
pub fn decode_candidates(
    output: ArrayView2<f32>,
    num_classes: usize,
    extra_len: usize,
    threshold: f32,
) -> Result<Vec<Candidate>, InferenceError> {
    let rows = output.shape()[0];
    if rows != 4 + num_classes + extra_len {
        return Err(InferenceError::Output(format!(
            "expected {} output rows, got {}",
            4 + num_classes + extra_len,
            rows
        )));
    }

    let mut candidates = Vec::new();
    for column in output.axis_iter(Axis(1)) {
        let mut class_id = 0usize;
        let mut best = f32::NEG_INFINITY;
        for c in 0..num_classes {
            let score = column[4 + c];
            if score > best {
                best = score;
                class_id = c;
            }
        }
        if best < threshold {
            continue;
        }

        let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
        candidates.push(Candidate {
            xyxy: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
            class_id: class_id as u32,
            confidence: best.clamp(0.0, 1.0),
            extra: (0..extra_len)
                .map(|i| column[4 + num_classes + i])
                .collect(),
        });
    }
    Ok(candidates)
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_x1 = a[0].max(b[0]);
    let inter_y1 = a[1].max(b[1]);
    let inter_x2 = a[2].min(b[2]);
    let inter_y2 = a[3].min(b[3]);

    let inter = (inter_x2 - inter_x1).max(0.0) * (inter_y2 - inter_y1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Per-class non-maximum suppression. Survivors come back ordered by
/// descending confidence, which keeps the output deterministic for a fixed
/// input.
pub fn non_maximum_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.xyxy, &candidate.xyxy) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

/// Maps a letterbox-space box back to original-image pixels, clamped to the
/// image bounds.
pub fn rescale_box(xyxy: &[f32; 4], lb: &Letterbox, orig_w: u32, orig_h: u32) -> [f32; 4] {
    let (x1, y1) = lb.to_original(xyxy[0], xyxy[1]);
    let (x2, y2) = lb.to_original(xyxy[2], xyxy[3]);
    [
        x1.clamp(0.0, orig_w as f32),
        y1.clamp(0.0, orig_h as f32),
        x2.clamp(0.0, orig_w as f32),
        y2.clamp(0.0, orig_h as f32),
    ]
}

pub fn softmax(logits: ArrayView1<f32>) -> Vec<f32> {
    let max_val = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max_val).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

fn class_name(labels: &[String], class_id: u32) -> String {
    labels
        .get(class_id as usize)
        .cloned()
        .unwrap_or_else(|| format!("class_{class_id}"))
}

/// Assembles the detect payload from NMS survivors.
pub fn build_detections(
    candidates: &[Candidate],
    lb: &Letterbox,
    orig_w: u32,
    orig_h: u32,
    labels: &[String],
) -> Predictions {
    let mut boxes = Vec::with_capacity(candidates.len());
    let mut classes = Vec::with_capacity(candidates.len());
    let mut confidences = Vec::with_capacity(candidates.len());
    let mut class_names = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        boxes.push(rescale_box(&candidate.xyxy, lb, orig_w, orig_h));
        classes.push(candidate.class_id);
        confidences.push(candidate.confidence);
        class_names.push(class_name(labels, candidate.class_id));
    }
    Predictions::Detect {
        boxes,
        classes,
        confidences,
        class_names,
    }
}

/// Assembles the pose payload: boxes plus rescaled keypoints. Keypoint
/// triples are (x, y, visibility); visibility is dropped from the wire shape.
pub fn build_poses(
    candidates: &[Candidate],
    lb: &Letterbox,
    orig_w: u32,
    orig_h: u32,
) -> Predictions {
    let mut boxes = Vec::with_capacity(candidates.len());
    let mut confidences = Vec::with_capacity(candidates.len());
    let mut keypoints = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        boxes.push(rescale_box(&candidate.xyxy, lb, orig_w, orig_h));
        confidences.push(candidate.confidence);
        let mut points = Vec::with_capacity(candidate.extra.len() / 3);
        for triple in candidate.extra.chunks_exact(3) {
            let (x, y) = lb.to_original(triple[0], triple[1]);
            points.push([x.clamp(0.0, orig_w as f32), y.clamp(0.0, orig_h as f32)]);
        }
        keypoints.push(points);
    }
    Predictions::Pose {
        boxes,
        confidences,
        keypoints,
    }
}

/// Ranked top-k classification from a raw logit row.
pub fn build_classification(logits: ArrayView1<f32>, labels: &[String], top_k: usize) -> Predictions {
    let probs = softmax(logits);
    let mut ranked: Vec<(usize, f32)> = probs.into_iter().enumerate().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_k);

    Predictions::Classify {
        top: ranked
            .into_iter()
            .map(|(class_id, confidence)| ClassScore {
                class_id: class_id as u32,
                class_name: class_name(labels, class_id as u32),
                confidence: confidence.clamp(0.0, 1.0),
            })
            .collect(),
    }
}

/// Builds one RLE mask from a detection's prototype coefficients.
///
/// The grid covers the original image extent at `MASK_GRID` resolution. Each
/// cell is mapped through the letterbox into prototype space, scored as
/// sigmoid of the coefficient/prototype dot product, thresholded at 0.5 and
/// zeroed outside the detection box.
pub fn mask_from_coefficients(
    coefficients: &[f32],
    prototypes: ArrayView3<f32>,
    box_orig: &[f32; 4],
    lb: &Letterbox,
    orig_w: u32,
    orig_h: u32,
    input_size: u32,
) -> Result<Mask, InferenceError> {
    if coefficients.len() > prototypes.shape()[0] {
        return Err(InferenceError::Output(format!(
            "{} mask coefficients but only {} prototype channels",
            coefficients.len(),
            prototypes.shape()[0]
        )));
    }
    let proto_h = prototypes.shape()[1];
    let proto_w = prototypes.shape()[2];
    let proto_scale_x = proto_w as f32 / input_size as f32;
    let proto_scale_y = proto_h as f32 / input_size as f32;

    let cell_w = orig_w as f32 / MASK_GRID as f32;
    let cell_h = orig_h as f32 / MASK_GRID as f32;

    let mut bits = vec![false; (MASK_GRID * MASK_GRID) as usize];
    for gy in 0..MASK_GRID {
        for gx in 0..MASK_GRID {
            let x = (gx as f32 + 0.5) * cell_w;
            let y = (gy as f32 + 0.5) * cell_h;
            if x < box_orig[0] || x > box_orig[2] || y < box_orig[1] || y > box_orig[3] {
                continue;
            }

            let (lx, ly) = lb.to_letterbox(x, y);
            let px = ((lx * proto_scale_x) as usize).min(proto_w - 1);
            let py = ((ly * proto_scale_y) as usize).min(proto_h - 1);

            let mut logit = 0.0;
            for (c, &coeff) in coefficients.iter().enumerate() {
                logit += coeff * prototypes[[c, py, px]];
            }
            if sigmoid(logit) > 0.5 {
                bits[(gy * MASK_GRID + gx) as usize] = true;
            }
        }
    }
    Ok(Mask::encode(&bits, MASK_GRID, MASK_GRID))
}
