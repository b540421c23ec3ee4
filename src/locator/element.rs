use std::sync::Arc;

use base64::Engine as _;
use image::DynamicImage;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{LocatorError, LocatorResult};
use crate::perception::imaging::encode_png;
use crate::perception::types::BoundingBox;

/// Stored reference record for a UI element. Read-only for the location engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiElement {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Anchor hints ("right of the Search field", "in the toolbar").
    #[serde(default)]
    pub location_details: String,
    #[serde(default)]
    pub page_summary: String,
    #[serde(default)]
    pub screenshot: Option<ReferenceImage>,
    #[serde(default)]
    pub zoom_in_required: bool,
    /// Attribute names whose values change per test run.
    #[serde(default)]
    pub data_dependent_attributes: Vec<String>,
}

impl UiElement {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            location_details: String::new(),
            page_summary: String::new(),
            screenshot: None,
            zoom_in_required: false,
            data_dependent_attributes: Vec::new(),
        }
    }

    pub fn is_data_dependent(&self) -> bool {
        !self.data_dependent_attributes.is_empty()
    }

    pub fn validate(&self) -> LocatorResult<()> {
        if self.description.trim().is_empty() {
            return Err(LocatorError::InvalidInput(format!(
                "element '{}' has an empty description",
                self.name
            )));
        }
        Ok(())
    }

    // Refinement builders: each returns a new record with the same id.

    pub fn with_description(&self, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..self.clone()
        }
    }

    pub fn with_location_details(&self, details: impl Into<String>) -> Self {
        Self {
            location_details: details.into(),
            ..self.clone()
        }
    }

    pub fn with_page_summary(&self, summary: impl Into<String>) -> Self {
        Self {
            page_summary: summary.into(),
            ..self.clone()
        }
    }

    pub fn with_screenshot(&self, image: DynamicImage) -> Self {
        Self {
            screenshot: Some(ReferenceImage::new(image)),
            ..self.clone()
        }
    }

    pub fn with_zoom_in_required(&self, required: bool) -> Self {
        Self {
            zoom_in_required: required,
            ..self.clone()
        }
    }

    pub fn with_data_dependent_attributes(&self, attributes: Vec<String>) -> Self {
        Self {
            data_dependent_attributes: attributes,
            ..self.clone()
        }
    }
}

/// Reference screenshot of an element. Serialized as a base64 PNG string.
#[derive(Debug, Clone)]
pub struct ReferenceImage(Arc<DynamicImage>);

impl ReferenceImage {
    pub fn new(image: DynamicImage) -> Self {
        Self(Arc::new(image))
    }

    pub fn image(&self) -> &DynamicImage {
        &self.0
    }

    pub fn shared(&self) -> Arc<DynamicImage> {
        Arc::clone(&self.0)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.0.width(), self.0.height())
    }
}

impl Serialize for ReferenceImage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let png = encode_png(&self.0).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(png))
    }
}

impl<'de> Deserialize<'de> for ReferenceImage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let b64 = String::deserialize(deserializer)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64.trim())
            .map_err(serde::de::Error::custom)?;
        let image = image::load_from_memory(&bytes).map_err(serde::de::Error::custom)?;
        Ok(Self::new(image))
    }
}

// ── Signals ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalFamily {
    VisionGrounding,
    FeatureMatch,
    TemplateMatch,
}

/// Which signal families agreed on a candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalSet {
    pub vision: bool,
    pub feature: bool,
    pub template: bool,
}

impl SignalSet {
    pub const VISION: SignalSet = SignalSet { vision: true, feature: false, template: false };
    pub const FEATURE: SignalSet = SignalSet { vision: false, feature: true, template: false };
    pub const TEMPLATE: SignalSet = SignalSet { vision: false, feature: false, template: true };

    pub fn with(self, other: SignalSet) -> Self {
        Self {
            vision: self.vision || other.vision,
            feature: self.feature || other.feature,
            template: self.template || other.template,
        }
    }

    pub fn is_algorithmic(&self) -> bool {
        self.feature || self.template
    }
}

/// Raw output of one detector family.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionSignal {
    VisionGrounding { boxes: Vec<BoundingBox> },
    FeatureMatch { boxes: Vec<BoundingBox>, inliers: Vec<usize> },
    TemplateMatch { boxes: Vec<BoundingBox>, scores: Vec<f32> },
}

impl DetectionSignal {
    pub fn family(&self) -> SignalFamily {
        match self {
            DetectionSignal::VisionGrounding { .. } => SignalFamily::VisionGrounding,
            DetectionSignal::FeatureMatch { .. } => SignalFamily::FeatureMatch,
            DetectionSignal::TemplateMatch { .. } => SignalFamily::TemplateMatch,
        }
    }

    pub fn boxes(&self) -> &[BoundingBox] {
        match self {
            DetectionSignal::VisionGrounding { boxes }
            | DetectionSignal::FeatureMatch { boxes, .. }
            | DetectionSignal::TemplateMatch { boxes, .. } => boxes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.boxes().is_empty()
    }

    pub fn empty(family: SignalFamily) -> Self {
        match family {
            SignalFamily::VisionGrounding => DetectionSignal::VisionGrounding { boxes: Vec::new() },
            SignalFamily::FeatureMatch => DetectionSignal::FeatureMatch {
                boxes: Vec::new(),
                inliers: Vec::new(),
            },
            SignalFamily::TemplateMatch => DetectionSignal::TemplateMatch {
                boxes: Vec::new(),
                scores: Vec::new(),
            },
        }
    }
}

// ── Result ──────────────────────────────────────────────────────────────────

/// Outcome of one `locate` call. "Not found" is a value, never an error.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LocationResult {
    Found {
        /// Physical pixel space of the captured screen.
        bbox: BoundingBox,
        /// Same box in logical (DPI-independent) coordinates.
        logical_bbox: BoundingBox,
        sources: SignalSet,
        element: Arc<UiElement>,
    },
    NotFound {
        algorithmic_attempted: bool,
        visual_attempted: bool,
        element: Arc<UiElement>,
    },
}

impl LocationResult {
    pub fn not_found(algorithmic: bool, visual: bool, element: Arc<UiElement>) -> Self {
        LocationResult::NotFound {
            algorithmic_attempted: algorithmic,
            visual_attempted: visual,
            element,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, LocationResult::Found { .. })
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        match self {
            LocationResult::Found { bbox, .. } => Some(*bbox),
            LocationResult::NotFound { .. } => None,
        }
    }

    pub fn element(&self) -> &Arc<UiElement> {
        match self {
            LocationResult::Found { element, .. } | LocationResult::NotFound { element, .. } => {
                element
            }
        }
    }

    /// Human-readable reason for a miss, for the calling orchestrator's messaging.
    pub fn diagnostic(&self) -> Option<&'static str> {
        match self {
            LocationResult::Found { .. } => None,
            LocationResult::NotFound {
                algorithmic_attempted: false,
                visual_attempted: false,
                ..
            } => Some("neither visual grounding nor algorithmic matching produced candidates"),
            LocationResult::NotFound { .. } => {
                Some("candidates were found but no single one won the selection vote")
            }
        }
    }
}
