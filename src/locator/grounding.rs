/// Vision grounding: ask the VLM, several times in parallel, where the element is.
use std::sync::Arc;

use image::DynamicImage;
use tokio::task::JoinSet;

use crate::config::GroundingConfig;
use crate::errors::LocatorResult;
use crate::llm::provider::LlmProvider;
use crate::llm::schema::{generate_structured, GroundingResponse, NormalizedBox};
use crate::llm::types::CallConfig;
use crate::locator::clustering::cluster_boxes;
use crate::locator::element::{DetectionSignal, UiElement};
use crate::locator::fanout::{harvest, StopSignal};
use crate::locator::geometry;
use crate::locator::prompts;
use crate::perception::imaging::{downscale_for_model, encode_png_base64};
use crate::perception::types::BoundingBox;

/// Grounding proposals, in the pixel space of the input image.
#[derive(Debug, Clone)]
pub struct GroundingOutcome {
    pub signal: DetectionSignal,
    pub interrupted: bool,
}

pub struct VisionGroundingDetector {
    provider: Arc<dyn LlmProvider>,
    call: CallConfig,
    config: GroundingConfig,
}

impl VisionGroundingDetector {
    pub fn new(provider: Arc<dyn LlmProvider>, call: CallConfig, config: GroundingConfig) -> Self {
        Self {
            provider,
            call,
            config,
        }
    }

    pub async fn detect(
        &self,
        element: &UiElement,
        image: &DynamicImage,
        test_data: &str,
        vote_count: usize,
        stop: &StopSignal,
    ) -> LocatorResult<GroundingOutcome> {
        let vote_count = vote_count.max(1);
        let (img_w, img_h) = (image.width(), image.height());

        // Encode once; every vote shares the same payload.
        let model_img =
            downscale_for_model(image, self.config.max_image_side, self.config.max_image_pixels);
        let (sent_w, sent_h) = (model_img.image.width(), model_img.image.height());
        let ratio = model_img.ratio;
        let b64: Arc<str> = encode_png_base64(&model_img.image)?.into();
        let prompt = prompts::grounding_prompt(element, test_data, self.config.coordinate_scale);

        let mut set = JoinSet::new();
        for vote in 0..vote_count {
            let provider = Arc::clone(&self.provider);
            let prompt = prompt.clone();
            let b64 = Arc::clone(&b64);
            let call = self.call.clone();
            set.spawn(async move {
                let answer: GroundingResponse =
                    generate_structured(provider.as_ref(), prompt, Some(b64), call).await?;
                tracing::debug!(vote, boxes = answer.boxes.len(), "grounding vote answered");
                Ok(answer.boxes)
            });
        }
        let harvested = harvest(set, stop, "grounding").await?;

        let scale = self.config.coordinate_scale;
        let raw: Vec<BoundingBox> = harvested
            .values
            .iter()
            .flatten()
            .filter_map(|nb| to_pixels(nb, scale, sent_w, sent_h, ratio))
            .filter_map(|b| b.clamp_to(img_w, img_h))
            .collect();

        let boxes = if vote_count > 1 {
            cluster_boxes(
                &raw,
                self.config.cluster_iou_threshold,
                self.config.cluster_min_points,
            )
        } else {
            geometry::dedup(raw.clone())
        };

        tracing::debug!(
            votes = vote_count,
            answered = harvested.values.len(),
            raw = raw.len(),
            clustered = boxes.len(),
            "grounding finished"
        );
        Ok(GroundingOutcome {
            signal: DetectionSignal::VisionGrounding { boxes },
            interrupted: harvested.interrupted,
        })
    }
}

/// Model frame (0..`scale`) → pixels of the sent image → pixels of the original.
///
/// Corner order is normalised; degenerate boxes yield `None`.
pub fn to_pixels(nb: &NormalizedBox, scale: f64, sent_w: u32, sent_h: u32, ratio: f64) -> Option<BoundingBox> {
    if scale <= 0.0 || ratio <= 0.0 {
        return None;
    }
    let fx = sent_w as f64 / scale / ratio;
    let fy = sent_h as f64 / scale / ratio;
    let (x1, x2) = (nb.x_min.min(nb.x_max), nb.x_min.max(nb.x_max));
    let (y1, y2) = (nb.y_min.min(nb.y_max), nb.y_min.max(nb.y_max));
    let b = BoundingBox::from_corners(
        (x1 * fx).round() as i64,
        (y1 * fy).round() as i64,
        (x2 * fx).round() as i64,
        (y2 * fy).round() as i64,
    );
    (!b.is_empty()).then_some(b)
}
