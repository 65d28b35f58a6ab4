#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};

/// COCO class names in YOLOv5 output order.
const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

const LETTERBOX_FILL: u8 = 114;

/// Tract-based YOLOv5 backend.
///
/// Loads a local ONNX export with a `[1, 3, S, S]` input and a `[1, N, 5 + classes]`
/// output. No network I/O is performed.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    input_size: u32,
    confidence_threshold: f32,
    nms_iou: f32,
}

/// Letterbox placement of the source frame inside the square model input.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: 0.4,
            nms_iou: 0.5,
        })
    }

    /// Override the default score and NMS thresholds.
    pub fn with_thresholds(mut self, confidence: f32, nms_iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.nms_iou = nms_iou;
        self
    }

    fn build_input(&self, image: &RgbImage) -> Result<(Tensor, Letterbox)> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot run detection on an empty frame"));
        }
        let side = self.input_size;
        let scale = (side as f32 / width as f32).min(side as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, side);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, side);
        let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

        let pad_x = (side - new_w) / 2;
        let pad_y = (side - new_h) / 2;
        let mut canvas = RgbImage::from_pixel(side, side, Rgb([LETTERBOX_FILL; 3]));
        image::imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });

        Ok((
            input.into_tensor(),
            Letterbox {
                scale,
                pad_x: pad_x as f32,
                pad_y: pad_y as f32,
            },
        ))
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        letterbox: &Letterbox,
        frame: (u32, u32),
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output was not [1, N, 5 + classes]")?;

        let rows = view.shape()[1];
        let cols = view.shape()[2];
        if cols <= 5 {
            return Err(anyhow!("model output has {} columns, expected > 5", cols));
        }

        let mut candidates = Vec::new();
        for i in 0..rows {
            let objectness = view[[0, i, 4]];
            if objectness < self.confidence_threshold {
                continue;
            }
            let mut best_class = 0usize;
            let mut best_score = f32::MIN;
            for c in 5..cols {
                let score = view[[0, i, c]];
                if score > best_score {
                    best_score = score;
                    best_class = c - 5;
                }
            }
            let confidence = objectness * best_score;
            if confidence < self.confidence_threshold {
                continue;
            }

            let (cx, cy, w, h) = (
                view[[0, i, 0]],
                view[[0, i, 1]],
                view[[0, i, 2]],
                view[[0, i, 3]],
            );
            let to_frame_x = |v: f32| {
                ((v - letterbox.pad_x) / letterbox.scale).clamp(0.0, frame.0 as f32)
            };
            let to_frame_y = |v: f32| {
                ((v - letterbox.pad_y) / letterbox.scale).clamp(0.0, frame.1 as f32)
            };
            let bbox = BoundingBox::new(
                to_frame_x(cx - w / 2.0).round(),
                to_frame_y(cy - h / 2.0).round(),
                to_frame_x(cx + w / 2.0).round(),
                to_frame_y(cy + h / 2.0).round(),
            );
            let label = COCO_LABELS.get(best_class).copied().unwrap_or("unknown");
            candidates.push(Detection::new(bbox, confidence, label));
        }

        Ok(non_max_suppression(candidates, self.nms_iou))
    }
}

/// Class-agnostic greedy NMS, highest confidence first.
fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept
            .iter()
            .all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let (input, letterbox) = self.build_input(image)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, &letterbox, image.dimensions())
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.detect(&blank).map(|_| ())
    }
}
