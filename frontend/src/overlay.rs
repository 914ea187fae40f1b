use shared::{Mask, Predictions};
use wasm_bindgen::JsCast;
use web_sys::{CanvasRenderingContext2d, HtmlCanvasElement, HtmlImageElement};

/// Detections below this confidence are kept in the JSON but not drawn.
pub const DRAW_CONFIDENCE_THRESHOLD: f32 = 0.25;

const PALETTE: [&str; 6] = [
    "#ef4444", "#3b82f6", "#22c55e", "#eab308", "#a855f7", "#f97316",
];

const MASK_ALPHA: f64 = 0.35;
const KEYPOINT_RADIUS: f64 = 3.0;

/// Paints the source image onto the canvas and overlays the predictions on
/// top in image-pixel coordinates.
pub fn draw(canvas: &HtmlCanvasElement, image: &HtmlImageElement, predictions: &Predictions) {
    let width = image.natural_width();
    let height = image.natural_height();
    if width == 0 || height == 0 {
        return;
    }
    canvas.set_width(width);
    canvas.set_height(height);

    let Some(ctx) = context_2d(canvas) else {
        return;
    };
    let _ = ctx.draw_image_with_html_image_element(image, 0.0, 0.0);

    match predictions {
        Predictions::Detect {
            boxes,
            classes,
            confidences,
            class_names,
        } => {
            for (((rect, class_id), conf), name) in
                boxes.iter().zip(classes).zip(confidences).zip(class_names)
            {
                if *conf < DRAW_CONFIDENCE_THRESHOLD {
                    continue;
                }
                draw_box(&ctx, rect, color_for(*class_id), name, *conf);
            }
        }
        Predictions::Segment {
            boxes,
            classes,
            confidences,
            class_names,
            masks,
        } => {
            for ((((rect, class_id), conf), name), mask) in boxes
                .iter()
                .zip(classes)
                .zip(confidences)
                .zip(class_names)
                .zip(masks)
            {
                if *conf < DRAW_CONFIDENCE_THRESHOLD {
                    continue;
                }
                let color = color_for(*class_id);
                fill_mask(&ctx, mask, color, width, height);
                draw_box(&ctx, rect, color, name, *conf);
            }
        }
        Predictions::Pose {
            boxes,
            confidences,
            keypoints,
        } => {
            for ((rect, conf), points) in boxes.iter().zip(confidences).zip(keypoints) {
                if *conf < DRAW_CONFIDENCE_THRESHOLD {
                    continue;
                }
                draw_box(&ctx, rect, PALETTE[0], "person", *conf);
                ctx.set_fill_style_str(PALETTE[1]);
                for [x, y] in points {
                    ctx.begin_path();
                    let _ = ctx.arc(
                        *x as f64,
                        *y as f64,
                        KEYPOINT_RADIUS,
                        0.0,
                        std::f64::consts::TAU,
                    );
                    ctx.fill();
                }
            }
        }
        // classification has no spatial output, the ranked list renders
        // beside the canvas instead
        Predictions::Classify { .. } => {}
    }
}

fn context_2d(canvas: &HtmlCanvasElement) -> Option<CanvasRenderingContext2d> {
    canvas
        .get_context("2d")
        .ok()
        .flatten()?
        .dyn_into::<CanvasRenderingContext2d>()
        .ok()
}

fn color_for(class_id: u32) -> &'static str {
    PALETTE[class_id as usize % PALETTE.len()]
}

fn draw_box(
    ctx: &CanvasRenderingContext2d,
    [x1, y1, x2, y2]: &[f32; 4],
    color: &str,
    name: &str,
    confidence: f32,
) {
    let (x1, y1, x2, y2) = (*x1 as f64, *y1 as f64, *x2 as f64, *y2 as f64);
    ctx.set_stroke_style_str(color);
    ctx.set_line_width(2.0);
    ctx.stroke_rect(x1, y1, x2 - x1, y2 - y1);
    ctx.set_fill_style_str(color);
    ctx.set_font("14px sans-serif");
    let label = format!("{name} {:.0}%", confidence * 100.0);
    let _ = ctx.fill_text(&label, x1 + 4.0, (y1 - 6.0).max(12.0));
}

/// The mask grid covers the whole image, so each true cell maps to one
/// proportional rectangle.
fn fill_mask(
    ctx: &CanvasRenderingContext2d,
    mask: &Mask,
    color: &str,
    image_width: u32,
    image_height: u32,
) {
    if mask.width == 0 || mask.height == 0 {
        return;
    }
    let cell_w = image_width as f64 / mask.width as f64;
    let cell_h = image_height as f64 / mask.height as f64;
    let bits = mask.decode();

    ctx.set_global_alpha(MASK_ALPHA);
    ctx.set_fill_style_str(color);
    for (i, &set) in bits.iter().enumerate() {
        if !set {
            continue;
        }
        let col = (i % mask.width as usize) as f64;
        let row = (i / mask.width as usize) as f64;
        ctx.fill_rect(col * cell_w, row * cell_h, cell_w, cell_h);
    }
    ctx.set_global_alpha(1.0);
}
