/// Detection orchestrator: direct and zoom paths over grounding, matching,
/// fusion and quorum.
use std::sync::Arc;

use image::imageops::FilterType;
use image::DynamicImage;

use crate::config::LocatorConfig;
use crate::errors::{LocatorError, LocatorResult};
use crate::llm::provider::LlmProvider;
use crate::llm::registry::{ProviderRegistry, Role};
use crate::llm::types::CallConfig;
use crate::locator::element::{DetectionSignal, LocationResult, UiElement};
use crate::locator::fanout::StopSignal;
use crate::locator::fusion::{fuse, Candidate, Fusion};
use crate::locator::geometry;
use crate::locator::grounding::VisionGroundingDetector;
use crate::locator::matching::{AlgorithmicMatcher, AlgorithmicOutcome, RegionMatcher};
use crate::locator::quorum::{CandidateSet, QuorumSelector};
use crate::locator::zoom::ZoomController;
use crate::perception::coords::CoordinateMapper;
use crate::perception::focus_crop::rescale_to_full;
use crate::perception::screenshot::ScreenCapture;
use crate::perception::types::{BoundingBox, Screenshot};
use crate::rag::index::ElementRepository;

/// What one pass of the detection body produced.
#[derive(Debug, Clone, Default)]
struct BodyOutcome {
    found: Option<Candidate>,
    vision_raw: bool,
    algorithmic_raw: bool,
}

/// Locates stored UI elements on the live screen.
pub struct ElementLocator {
    grounding: VisionGroundingDetector,
    quorum: QuorumSelector,
    matcher: Arc<dyn RegionMatcher>,
    zoom: ZoomController,
    capture: Arc<dyn ScreenCapture>,
    config: LocatorConfig,
    stop: StopSignal,
}

impl ElementLocator {
    pub fn new(
        grounding: (Arc<dyn LlmProvider>, CallConfig),
        selection: (Arc<dyn LlmProvider>, CallConfig),
        config: LocatorConfig,
        capture: Arc<dyn ScreenCapture>,
    ) -> Self {
        let g = &config.grounding;
        Self {
            grounding: VisionGroundingDetector::new(grounding.0, grounding.1, g.clone()),
            quorum: QuorumSelector::new(
                selection.0,
                selection.1,
                config.quorum.clone(),
                g.max_image_side,
                g.max_image_pixels,
            ),
            matcher: Arc::new(AlgorithmicMatcher::new(
                config.feature.clone(),
                config.template.clone(),
            )),
            zoom: ZoomController::new(config.zoom.clone()),
            capture,
            config,
            stop: StopSignal::new(),
        }
    }

    /// Resolve the grounding and selection roles from the registry.
    pub fn from_registry(
        registry: &ProviderRegistry,
        config: LocatorConfig,
        capture: Arc<dyn ScreenCapture>,
    ) -> LocatorResult<Self> {
        let grounding = registry.call_config_for_role(Role::Grounding)?;
        let selection = registry.call_config_for_role(Role::Selection)?;
        Ok(Self::new(grounding, selection, config, capture))
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn RegionMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Handle the caller can trigger to interrupt a running `locate`.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Capture the screen and locate `element` on it.
    pub async fn locate(&self, element: &UiElement, test_data: &str) -> LocatorResult<LocationResult> {
        element.validate()?;
        let shot = self.capture.capture().await?;
        self.locate_in(element, test_data, &shot).await
    }

    /// Resolve the best stored record for `description`, then locate it.
    pub async fn locate_by_description(
        &self,
        repository: &dyn ElementRepository,
        description: &str,
        test_data: &str,
        min_score: f32,
    ) -> LocatorResult<LocationResult> {
        let ranked = repository.retrieve_candidates(description, 1, min_score).await?;
        let Some((element, score)) = ranked.into_iter().next() else {
            return Err(LocatorError::InvalidInput(format!(
                "no stored element matches '{description}'"
            )));
        };
        tracing::debug!(element = %element.name, score, "resolved element record");
        self.locate(&element, test_data).await
    }

    /// Locate `element` on an already captured screenshot.
    ///
    /// A stop request is consumed by the call it interrupts: once
    /// `Interrupted` has been returned the signal is clear again.
    pub async fn locate_in(
        &self,
        element: &UiElement,
        test_data: &str,
        shot: &Screenshot,
    ) -> LocatorResult<LocationResult> {
        element.validate()?;
        let result = self.run(element, test_data, shot).await;
        if matches!(result, Err(LocatorError::Interrupted)) {
            self.stop.reset();
        }
        result
    }

    async fn run(
        &self,
        element: &UiElement,
        test_data: &str,
        shot: &Screenshot,
    ) -> LocatorResult<LocationResult> {
        if self.stop.is_triggered() {
            return Err(LocatorError::Interrupted);
        }
        let element = Arc::new(element.clone());
        let reference = element.screenshot.as_ref().map(|r| r.shared());
        // Data-dependent elements change pixels between runs.
        let algorithmic = reference.is_some() && !element.is_data_dependent();

        tracing::info!(
            element = %element.name,
            zoom = element.zoom_in_required,
            algorithmic,
            "locating element"
        );

        let outcome = if element.zoom_in_required {
            self.zoom_path(&element, test_data, &shot.image, reference, algorithmic)
                .await?
        } else {
            let reference = if algorithmic { reference } else { None };
            self.detect_body(&element, test_data, Arc::clone(&shot.image), reference)
                .await?
        };

        let result = match outcome.found {
            Some(c) => {
                let bbox = c
                    .bbox
                    .clamp_to(shot.image.width(), shot.image.height())
                    .unwrap_or(c.bbox);
                let mapper = CoordinateMapper::from_meta(&shot.meta);
                LocationResult::Found {
                    bbox,
                    logical_bbox: mapper.box_to_logical(&bbox),
                    sources: c.sources,
                    element,
                }
            }
            None => LocationResult::not_found(outcome.algorithmic_raw, outcome.vision_raw, element),
        };
        match &result {
            LocationResult::Found { bbox, sources, .. } => {
                tracing::info!(%bbox, ?sources, "element found")
            }
            LocationResult::NotFound { .. } => {
                tracing::info!(reason = result.diagnostic().unwrap_or_default(), "element not found")
            }
        }
        Ok(result)
    }

    /// Grounding and, when enabled, algorithmic matching, joined concurrently.
    async fn gather(
        &self,
        element: &UiElement,
        test_data: &str,
        image: &Arc<DynamicImage>,
        reference: Option<&Arc<DynamicImage>>,
    ) -> LocatorResult<(DetectionSignal, AlgorithmicOutcome, bool)> {
        let vision = self.grounding.detect(
            element,
            image,
            test_data,
            self.config.grounding.votes,
            &self.stop,
        );
        let algorithmic = async {
            match reference {
                Some(r) => {
                    self.matcher
                        .detect(Arc::clone(image), Arc::clone(r), &self.stop)
                        .await
                }
                None => Ok(AlgorithmicOutcome::empty()),
            }
        };
        let (vision, algo) = tokio::try_join!(vision, algorithmic)?;
        let interrupted = vision.interrupted || algo.interrupted;
        Ok((vision.signal, algo, interrupted))
    }

    fn fuse_signals(vision: &DetectionSignal, algo: &AlgorithmicOutcome) -> Fusion {
        let fusion = fuse(vision.boxes(), algo.feature.boxes(), algo.template.boxes());
        tracing::debug!(
            vision = vision.boxes().len(),
            feature = algo.feature.boxes().len(),
            template = algo.template.boxes().len(),
            tier = ?fusion.tier,
            candidates = fusion.candidates.len(),
            "signals fused"
        );
        fusion
    }

    /// The direct detection body over one image.
    async fn detect_body(
        &self,
        element: &UiElement,
        test_data: &str,
        image: Arc<DynamicImage>,
        reference: Option<Arc<DynamicImage>>,
    ) -> LocatorResult<BodyOutcome> {
        let (vision, algo, interrupted) =
            self.gather(element, test_data, &image, reference.as_ref()).await?;
        let fusion = Self::fuse_signals(&vision, &algo);
        if interrupted {
            tracing::warn!(
                partial = fusion.candidates.len(),
                "interrupted while detecting, re-raising after fusion"
            );
            return Err(LocatorError::Interrupted);
        }

        let mut outcome = BodyOutcome {
            found: None,
            vision_raw: !vision.is_empty(),
            algorithmic_raw: algo.any(),
        };
        let mut candidates = fusion.candidates;
        match candidates.len() {
            0 => {}
            1 => outcome.found = candidates.pop(),
            n => {
                let q = &self.config.quorum;
                let set = CandidateSet::new(candidates, q.label_length, q.label_retry_limit);
                tracing::debug!(candidates = n, labelled = set.len(), "arbitrating by quorum");
                let voted = self
                    .quorum
                    .select(element, test_data, &set, &image, q.votes, &self.stop)
                    .await?;
                if voted.interrupted {
                    return Err(LocatorError::Interrupted);
                }
                outcome.found = voted.winner.map(|w| w.candidate);
            }
        }
        Ok(outcome)
    }

    /// Coarse grounding on the full screen, then the detection body on an
    /// upscaled crop around what it found.
    async fn zoom_path(
        &self,
        element: &UiElement,
        test_data: &str,
        image: &Arc<DynamicImage>,
        reference: Option<Arc<DynamicImage>>,
        algorithmic: bool,
    ) -> LocatorResult<BodyOutcome> {
        let zoom_cfg = self.zoom.config();
        let coarse_reference = reference
            .as_ref()
            .filter(|_| algorithmic && zoom_cfg.algorithmic_before_zoom);
        let (vision, algo, interrupted) =
            self.gather(element, test_data, image, coarse_reference).await?;
        if interrupted {
            return Err(LocatorError::Interrupted);
        }
        let coarse: Vec<BoundingBox> = if coarse_reference.is_some() {
            Self::fuse_signals(&vision, &algo)
                .candidates
                .into_iter()
                .map(|c| c.bbox)
                .collect()
        } else {
            vision.boxes().to_vec()
        };

        let Some(common) = geometry::enclosing(&coarse) else {
            tracing::debug!("coarse pass found nothing");
            return Ok(BodyOutcome::default());
        };
        let whole = (image.width(), image.height());
        let region = self.zoom.extend_region(
            &common,
            reference.as_ref().map(|r| (r.width(), r.height())),
            whole,
        );
        let crop = self.zoom.zoom(image, &region)?;
        let (fx, fy, ox, oy) = (crop.factor_x, crop.factor_y, crop.origin_x, crop.origin_y);
        tracing::debug!(coarse = coarse.len(), %common, %region, fx, fy, "zooming in");

        let sub_reference = reference
            .filter(|_| algorithmic && zoom_cfg.algorithmic_in_zoom)
            .map(|r| {
                let w = ((r.width() as f64 * fx).round() as u32).max(1);
                let h = ((r.height() as f64 * fy).round() as u32).max(1);
                Arc::new(r.resize_exact(w, h, FilterType::Lanczos3))
            });
        let mut sub = self
            .detect_body(element, test_data, Arc::new(crop.image), sub_reference)
            .await?;
        if let Some(c) = sub.found.as_mut() {
            c.bbox = rescale_to_full(&c.bbox, fx, fy, ox, oy);
        }
        Ok(sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::GenerateRequest;
    use crate::perception::screenshot::StaticCapture;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Grounding answers with one fixed box in the model frame; selection is never asked.
    struct FixedGrounding(&'static str);

    #[async_trait]
    impl LlmProvider for FixedGrounding {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, request: GenerateRequest) -> LocatorResult<String> {
            match request.schema.name {
                "element_grounding" => Ok(self.0.to_string()),
                other => Err(LocatorError::LlmProvider(format!("unexpected {other}"))),
            }
        }
    }

    fn locator(answer: &'static str, shot: &Screenshot) -> ElementLocator {
        let p: Arc<dyn LlmProvider> = Arc::new(FixedGrounding(answer));
        let call = CallConfig {
            model: "m".into(),
            temperature: 0.0,
        };
        ElementLocator::new(
            (Arc::clone(&p), call.clone()),
            (p, call),
            LocatorConfig::default(),
            Arc::new(StaticCapture::new(shot.clone())),
        )
    }

    #[tokio::test]
    async fn test_empty_description_is_rejected() {
        let shot = Screenshot::new(DynamicImage::new_rgb8(100, 100), 1.0);
        let loc = locator(r#"{"boxes":[]}"#, &shot);
        let err = loc.locate(&UiElement::new("x", ""), "").await.unwrap_err();
        assert!(matches!(err, LocatorError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_logical_box_uses_display_scale() {
        let shot = Screenshot::new(DynamicImage::new_rgb8(1000, 1000), 2.0);
        let loc = locator(
            r#"{"boxes":[{"x_min":100,"y_min":100,"x_max":200,"y_max":140}]}"#,
            &shot,
        );
        let el = UiElement::new("x", "Save button");
        let result = loc.locate(&el, "").await.unwrap();
        match result {
            LocationResult::Found { bbox, logical_bbox, .. } => {
                assert_eq!(bbox, BoundingBox::new(100, 100, 100, 40));
                assert_eq!(logical_bbox, BoundingBox::new(50, 50, 50, 20));
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_zoom_path_rescales_to_full_screen() {
        // The model answers the same normalized box for the full screen and for
        // the crop, so the final box is that box mapped through the crop.
        let shot = Screenshot::new(DynamicImage::new_rgb8(1000, 1000), 1.0);
        let loc = locator(
            r#"{"boxes":[{"x_min":400,"y_min":400,"x_max":500,"y_max":450}]}"#,
            &shot,
        );
        let el = UiElement::new("x", "tiny icon").with_zoom_in_required(true);
        let result = loc.locate(&el, "").await.unwrap();
        let bbox = result.bbox().expect("found");
        // coarse (400,400,100,50) grows 4× to (250,325,400,200), upscaled 2.5×
        // into a 1000×500 sub-image where the answer is (400,200)-(500,225).
        assert_eq!(bbox, BoundingBox::new(410, 405, 40, 10));
    }

    #[tokio::test]
    async fn test_zoom_with_empty_coarse_pass_is_not_found() {
        let shot = Screenshot::new(DynamicImage::new_rgb8(200, 200), 1.0);
        let loc = locator(r#"{"boxes":[]}"#, &shot);
        let el = UiElement::new("x", "tiny icon").with_zoom_in_required(true);
        let result = loc.locate(&el, "").await.unwrap();
        assert!(matches!(
            result,
            LocationResult::NotFound {
                algorithmic_attempted: false,
                visual_attempted: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_triggered_stop_interrupts_once() {
        let shot = Screenshot::new(DynamicImage::new_rgb8(100, 100), 1.0);
        let loc = locator(r#"{"boxes":[{"x_min":100,"y_min":100,"x_max":300,"y_max":200}]}"#, &shot);
        loc.stop_signal().trigger();
        let err = loc.locate(&UiElement::new("x", "y"), "").await.unwrap_err();
        assert!(matches!(err, LocatorError::Interrupted));

        assert!(!loc.stop_signal().is_triggered());
        let again = loc.locate(&UiElement::new("x", "y"), "").await.unwrap();
        assert_eq!(again.bbox(), Some(BoundingBox::new(10, 10, 20, 10)));
    }

    /// Grounding answers `answers[n]` on the n-th call (the last one repeats).
    struct Staged {
        answers: Vec<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for Staged {
        fn name(&self) -> &str {
            "staged"
        }

        async fn generate(&self, request: GenerateRequest) -> LocatorResult<String> {
            assert_eq!(request.schema.name, "element_grounding");
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answers[n.min(self.answers.len() - 1)].to_string())
        }
    }

    /// Fixed feature/template boxes; remembers the reference sizes it was given.
    #[derive(Default)]
    struct Canned {
        boxes: Vec<BoundingBox>,
        seen: Mutex<Vec<(u32, u32)>>,
    }

    #[async_trait]
    impl RegionMatcher for Canned {
        async fn detect(
            &self,
            _whole: Arc<DynamicImage>,
            reference: Arc<DynamicImage>,
            _stop: &StopSignal,
        ) -> LocatorResult<AlgorithmicOutcome> {
            self.seen.lock().unwrap().push((reference.width(), reference.height()));
            Ok(AlgorithmicOutcome {
                feature: DetectionSignal::FeatureMatch {
                    boxes: self.boxes.clone(),
                    inliers: vec![8; self.boxes.len()],
                },
                template: DetectionSignal::TemplateMatch {
                    boxes: self.boxes.clone(),
                    scores: vec![0.9; self.boxes.len()],
                },
                interrupted: false,
            })
        }
    }

    fn zoom_locator(answers: Vec<&'static str>, matcher: Arc<Canned>, config: LocatorConfig) -> ElementLocator {
        let p: Arc<dyn LlmProvider> = Arc::new(Staged {
            answers,
            calls: AtomicUsize::new(0),
        });
        let call = CallConfig {
            model: "m".into(),
            temperature: 0.0,
        };
        let shot = Screenshot::new(DynamicImage::new_rgb8(1000, 1000), 1.0);
        ElementLocator::new(
            (Arc::clone(&p), call.clone()),
            (p, call),
            config,
            Arc::new(StaticCapture::new(shot)),
        )
        .with_matcher(matcher)
    }

    #[tokio::test]
    async fn test_matching_before_zoom_narrows_coarse_region() {
        let mut config = LocatorConfig::default();
        config.grounding.votes = 1;
        config.zoom.algorithmic_before_zoom = true;
        let matcher = Arc::new(Canned {
            boxes: vec![BoundingBox::new(410, 400, 30, 20)],
            ..Default::default()
        });
        let loc = zoom_locator(
            vec![
                r#"{"boxes":[{"x_min":400,"y_min":400,"x_max":440,"y_max":420}]}"#,
                r#"{"boxes":[{"x_min":500,"y_min":500,"x_max":750,"y_max":750}]}"#,
            ],
            Arc::clone(&matcher),
            config,
        );
        let el = UiElement::new("x", "tiny icon")
            .with_screenshot(DynamicImage::new_rgb8(30, 20))
            .with_zoom_in_required(true);
        let result = loc.locate(&el, "").await.unwrap();

        // Coarse fusion keeps (410,400,30,20); it grows to (365,370,120,80) and is
        // upscaled 4x, where the answer (240,160,120,80) maps back to full screen.
        assert_eq!(result.bbox(), Some(BoundingBox::new(425, 410, 30, 20)));
        assert_eq!(*matcher.seen.lock().unwrap(), vec![(30, 20)]);
    }

    #[tokio::test]
    async fn test_matching_in_zoom_uses_rescaled_reference() {
        let mut config = LocatorConfig::default();
        config.grounding.votes = 1;
        config.zoom.algorithmic_in_zoom = true;
        let matcher = Arc::new(Canned {
            boxes: vec![BoundingBox::new(240, 160, 160, 80)],
            ..Default::default()
        });
        let loc = zoom_locator(
            vec![
                r#"{"boxes":[{"x_min":400,"y_min":400,"x_max":440,"y_max":420}]}"#,
                r#"{"boxes":[]}"#,
            ],
            Arc::clone(&matcher),
            config,
        );
        let el = UiElement::new("x", "tiny icon")
            .with_screenshot(DynamicImage::new_rgb8(40, 20))
            .with_zoom_in_required(true);
        let result = loc.locate(&el, "").await.unwrap();

        // Region (340,370,160,80) upscaled 4x; the crop-space match maps back.
        assert_eq!(result.bbox(), Some(BoundingBox::new(400, 410, 40, 20)));
        assert_eq!(*matcher.seen.lock().unwrap(), vec![(160, 80)]);
        match result {
            LocationResult::Found { sources, .. } => assert!(sources.feature && sources.template && !sources.vision),
            other => panic!("expected Found, got {other:?}"),
        }
    }
}
