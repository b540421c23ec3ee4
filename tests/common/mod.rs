#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};

use seeclaw_locator::config::LocatorConfig;
use seeclaw_locator::llm::provider::LlmProvider;
use seeclaw_locator::llm::types::{CallConfig, GenerateRequest};
use seeclaw_locator::locator::element::DetectionSignal;
use seeclaw_locator::locator::fanout::StopSignal;
use seeclaw_locator::locator::matching::{AlgorithmicOutcome, RegionMatcher};
use seeclaw_locator::perception::screenshot::StaticCapture;
use seeclaw_locator::perception::types::{BoundingBox, Screenshot};
use seeclaw_locator::{ElementLocator, LocatorError, LocatorResult};

type Answer = Box<dyn Fn(usize, &str) -> String + Send + Sync>;

/// Provider that answers grounding and selection calls from closures.
///
/// Each closure gets the zero-based call index for its schema and the prompt.
pub struct ScriptedProvider {
    grounding: Answer,
    selection: Answer,
    grounding_calls: AtomicUsize,
    selection_calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(
        grounding: impl Fn(usize, &str) -> String + Send + Sync + 'static,
        selection: impl Fn(usize, &str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            grounding: Box::new(grounding),
            selection: Box::new(selection),
            grounding_calls: AtomicUsize::new(0),
            selection_calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Grounding returns these boxes (model frame corners) on every call; selection is unexpected.
    pub fn boxes(boxes: &'static [(i32, i32, i32, i32)]) -> Self {
        Self::new(move |_, _| grounding_json(boxes), |_, _| "{}".into())
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn grounding_calls(&self) -> usize {
        self.grounding_calls.load(Ordering::SeqCst)
    }

    pub fn selection_calls(&self) -> usize {
        self.selection_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerateRequest) -> LocatorResult<String> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        match request.schema.name {
            "element_grounding" => {
                let n = self.grounding_calls.fetch_add(1, Ordering::SeqCst);
                Ok((self.grounding)(n, &request.prompt))
            }
            "candidate_vote" => {
                let n = self.selection_calls.fetch_add(1, Ordering::SeqCst);
                Ok((self.selection)(n, &request.prompt))
            }
            other => Err(LocatorError::LlmProvider(format!("unexpected schema {other}"))),
        }
    }
}

pub fn grounding_json(boxes: &[(i32, i32, i32, i32)]) -> String {
    let items: Vec<String> = boxes
        .iter()
        .map(|(x1, y1, x2, y2)| format!(r#"{{"x_min":{x1},"y_min":{y1},"x_max":{x2},"y_max":{y2}}}"#))
        .collect();
    format!(r#"{{"boxes":[{}]}}"#, items.join(","))
}

/// Label listed in a selection prompt for the candidate whose left edge is `x`.
pub fn label_at_x(prompt: &str, x: i32) -> Option<String> {
    let needle = format!(": x={x} ");
    prompt
        .lines()
        .filter_map(|l| l.strip_prefix("- "))
        .find(|l| l.contains(&needle))
        .and_then(|l| l.split(':').next())
        .map(str::to_string)
}

pub fn vote(label: Option<String>) -> String {
    format!(r#"{{"label":"{}"}}"#, label.unwrap_or_default())
}

/// Matcher with canned feature and template boxes; counts how often it runs.
#[derive(Default)]
pub struct FixedMatcher {
    pub feature: Vec<BoundingBox>,
    pub template: Vec<BoundingBox>,
    pub calls: AtomicUsize,
}

impl FixedMatcher {
    pub fn new(feature: Vec<BoundingBox>, template: Vec<BoundingBox>) -> Self {
        Self {
            feature,
            template,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RegionMatcher for FixedMatcher {
    async fn detect(
        &self,
        _whole: Arc<DynamicImage>,
        _reference: Arc<DynamicImage>,
        _stop: &StopSignal,
    ) -> LocatorResult<AlgorithmicOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AlgorithmicOutcome {
            feature: DetectionSignal::FeatureMatch {
                boxes: self.feature.clone(),
                inliers: vec![0; self.feature.len()],
            },
            template: DetectionSignal::TemplateMatch {
                boxes: self.template.clone(),
                scores: vec![1.0; self.template.len()],
            },
            interrupted: false,
        })
    }
}

pub fn blank_screen(w: u32, h: u32) -> Screenshot {
    Screenshot::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([240, 240, 240]))), 1.0)
}

pub fn reference_image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(32, 32, |x, _| {
        if x < 16 {
            Rgb([20, 20, 20])
        } else {
            Rgb([220, 40, 40])
        }
    }))
}

pub fn call() -> CallConfig {
    CallConfig {
        model: "scripted-model".into(),
        temperature: 0.0,
    }
}

pub fn locator(provider: Arc<ScriptedProvider>, config: LocatorConfig, shot: &Screenshot) -> ElementLocator {
    let p: Arc<dyn LlmProvider> = provider;
    ElementLocator::new(
        (Arc::clone(&p), call()),
        (p, call()),
        config,
        Arc::new(StaticCapture::new(shot.clone())),
    )
}
