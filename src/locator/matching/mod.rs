pub mod feature;
pub mod homography;
pub mod template;

use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use tokio::task::JoinSet;

use crate::config::{FeatureMatchConfig, TemplateMatchConfig};
use crate::errors::{LocatorError, LocatorResult};
use crate::locator::element::{DetectionSignal, SignalFamily};
use crate::locator::fanout::{harvest, StopSignal};

/// Feature and template proposals for one image pair.
#[derive(Debug, Clone)]
pub struct AlgorithmicOutcome {
    pub feature: DetectionSignal,
    pub template: DetectionSignal,
    pub interrupted: bool,
}

impl AlgorithmicOutcome {
    pub fn empty() -> Self {
        Self {
            feature: DetectionSignal::empty(SignalFamily::FeatureMatch),
            template: DetectionSignal::empty(SignalFamily::TemplateMatch),
            interrupted: false,
        }
    }

    pub fn any(&self) -> bool {
        !self.feature.is_empty() || !self.template.is_empty()
    }
}

/// Pixel-based region proposals for a reference image.
#[async_trait]
pub trait RegionMatcher: Send + Sync {
    async fn detect(
        &self,
        whole: Arc<DynamicImage>,
        reference: Arc<DynamicImage>,
        stop: &StopSignal,
    ) -> LocatorResult<AlgorithmicOutcome>;
}

/// Runs feature matching and template matching side by side on blocking threads.
#[derive(Debug, Clone, Default)]
pub struct AlgorithmicMatcher {
    feature: FeatureMatchConfig,
    template: TemplateMatchConfig,
}

impl AlgorithmicMatcher {
    pub fn new(feature: FeatureMatchConfig, template: TemplateMatchConfig) -> Self {
        Self { feature, template }
    }
}

#[async_trait]
impl RegionMatcher for AlgorithmicMatcher {
    async fn detect(
        &self,
        whole: Arc<DynamicImage>,
        reference: Arc<DynamicImage>,
        stop: &StopSignal,
    ) -> LocatorResult<AlgorithmicOutcome> {
        let mut set = JoinSet::new();
        {
            let (whole, reference, cfg) = (Arc::clone(&whole), Arc::clone(&reference), self.feature.clone());
            set.spawn_blocking(move || {
                check_inputs(&whole, &reference)?;
                Ok(feature::find_regions(&whole, &reference, &cfg))
            });
        }
        {
            let (whole, reference, cfg) = (whole, reference, self.template.clone());
            set.spawn_blocking(move || {
                check_inputs(&whole, &reference)?;
                Ok(template::find_matches(&whole, &reference, &cfg))
            });
        }

        let harvested = harvest(set, stop, "algorithmic").await?;
        let mut out = AlgorithmicOutcome::empty();
        out.interrupted = harvested.interrupted;
        for signal in harvested.values {
            match signal.family() {
                SignalFamily::FeatureMatch => out.feature = signal,
                SignalFamily::TemplateMatch => out.template = signal,
                SignalFamily::VisionGrounding => {}
            }
        }
        tracing::debug!(
            feature = out.feature.boxes().len(),
            template = out.template.boxes().len(),
            "algorithmic matching finished"
        );
        Ok(out)
    }
}

fn check_inputs(whole: &DynamicImage, reference: &DynamicImage) -> LocatorResult<()> {
    if whole.width() == 0 || whole.height() == 0 || reference.width() == 0 || reference.height() == 0 {
        return Err(LocatorError::Matching(format!(
            "empty image: screen {}x{}, reference {}x{}",
            whole.width(),
            whole.height(),
            reference.width(),
            reference.height()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[tokio::test]
    async fn test_runs_both_matchers() {
        let tmpl = GrayImage::from_fn(24, 24, |x, y| Luma([if (x / 6 + y / 6) % 2 == 0 { 30 } else { 220 }]));
        let mut scene = GrayImage::from_pixel(120, 90, Luma([128]));
        image::imageops::replace(&mut scene, &tmpl, 40, 30);
        let matcher = AlgorithmicMatcher::default();
        let out = matcher
            .detect(
                Arc::new(DynamicImage::ImageLuma8(scene)),
                Arc::new(DynamicImage::ImageLuma8(tmpl)),
                &StopSignal::new(),
            )
            .await
            .unwrap();
        assert!(!out.interrupted);
        assert!(out.any());
        assert_eq!(out.template.family(), SignalFamily::TemplateMatch);
        assert_eq!(out.feature.family(), SignalFamily::FeatureMatch);
        assert!(out.template.boxes().contains(&crate::perception::types::BoundingBox::new(40, 30, 24, 24)));
    }

    #[tokio::test]
    async fn test_empty_reference_is_absorbed() {
        let out = AlgorithmicMatcher::default()
            .detect(
                Arc::new(DynamicImage::new_rgb8(50, 50)),
                Arc::new(DynamicImage::new_rgb8(0, 0)),
                &StopSignal::new(),
            )
            .await
            .unwrap();
        assert!(!out.any());
    }
}
