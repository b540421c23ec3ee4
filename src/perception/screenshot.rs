/// Screen capture backends.
use async_trait::async_trait;
use image::DynamicImage;

use crate::errors::{LocatorError, LocatorResult};
use crate::perception::types::{Screenshot, ScreenshotMeta};

#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture(&self) -> LocatorResult<Screenshot>;
}

/// Captures the primary monitor through xcap.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrimaryMonitorCapture;

#[async_trait]
impl ScreenCapture for PrimaryMonitorCapture {
    async fn capture(&self) -> LocatorResult<Screenshot> {
        tokio::task::spawn_blocking(capture_primary_sync)
            .await
            .map_err(|e| LocatorError::Perception(format!("join: {e}")))?
    }
}

fn capture_primary_sync() -> LocatorResult<Screenshot> {
    let monitors = xcap::Monitor::all()
        .map_err(|e| LocatorError::Perception(format!("enumerate monitors: {e}")))?;
    let (index, monitor) = monitors
        .iter()
        .enumerate()
        .find(|(_, m)| m.is_primary())
        .or_else(|| monitors.iter().enumerate().next())
        .ok_or_else(|| LocatorError::Perception("no monitor found".into()))?;

    let scale = monitor.scale_factor() as f64;
    let rgba = monitor
        .capture_image()
        .map_err(|e| LocatorError::Perception(format!("capture: {e}")))?;

    let mut meta = ScreenshotMeta::for_image(rgba.width(), rgba.height(), scale);
    meta.monitor_index = index as u32;
    tracing::debug!(
        monitor = index,
        phys = %format!("{}×{}", meta.physical_width, meta.physical_height),
        scale,
        "screenshot captured"
    );
    Ok(Screenshot {
        image: std::sync::Arc::new(DynamicImage::ImageRgba8(rgba)),
        meta,
    })
}

/// Serves a fixed frame; used when the caller already holds a screenshot.
#[derive(Debug, Clone)]
pub struct StaticCapture {
    shot: Screenshot,
}

impl StaticCapture {
    pub fn new(shot: Screenshot) -> Self {
        Self { shot }
    }
}

#[async_trait]
impl ScreenCapture for StaticCapture {
    async fn capture(&self) -> LocatorResult<Screenshot> {
        Ok(self.shot.clone())
    }
}
