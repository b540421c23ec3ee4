use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{LocatorError, LocatorResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub locator: LocatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (falls back to env var SEECLAW_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Maps locator roles to specific provider+model combinations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Bounding-box proposals for a described element. Needs a vision model with grounding.
    pub grounding: Option<RoleEntry>,
    /// Picks one labelled candidate out of an annotated screenshot.
    pub selection: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API.
    pub model: String,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
}

fn default_temperature() -> f64 {
    0.1
}

// ── Locator tuning ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LocatorConfig {
    #[serde(default)]
    pub grounding: GroundingConfig,
    #[serde(default)]
    pub feature: FeatureMatchConfig,
    #[serde(default)]
    pub template: TemplateMatchConfig,
    #[serde(default)]
    pub quorum: QuorumConfig,
    #[serde(default)]
    pub zoom: ZoomConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundingConfig {
    /// Independent model calls per detection.
    pub votes: usize,
    /// Two boxes with IoU at or above this land in the same cluster.
    pub cluster_iou_threshold: f64,
    pub cluster_min_points: usize,
    /// Models answer in a 0..scale frame on both axes.
    pub coordinate_scale: f64,
    pub max_image_side: u32,
    pub max_image_pixels: u64,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            votes: 3,
            cluster_iou_threshold: 0.6,
            cluster_min_points: 1,
            coordinate_scale: 1000.0,
            max_image_side: 1568,
            max_image_pixels: 1_150_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureMatchConfig {
    pub max_keypoints: usize,
    pub fast_threshold: u8,
    /// Lowe ratio: best distance must be below `ratio * second_best`.
    pub ratio: f32,
    /// Spatial cluster radius, as a fraction of the reference image diagonal.
    pub cluster_radius_factor: f64,
    pub min_cluster_matches: usize,
    pub ransac_iterations: usize,
    pub reprojection_threshold: f64,
    /// Allowed relative deviation of a projected region's size from the reference size.
    pub size_tolerance: f64,
    pub seed: u64,
}

impl Default for FeatureMatchConfig {
    fn default() -> Self {
        Self {
            max_keypoints: 1500,
            fast_threshold: 20,
            ratio: 0.75,
            cluster_radius_factor: 0.75,
            min_cluster_matches: 6,
            ransac_iterations: 500,
            reprojection_threshold: 3.0,
            size_tolerance: 0.3,
            seed: 0x5EEC_1A77,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateMatchConfig {
    /// Zero-mean normalized correlation a location must reach to count as a match.
    pub threshold: f32,
    pub max_matches: usize,
    /// Downscale factor for the coarse search pass.
    pub coarse_scale: f64,
    /// The template's shorter side must stay at least this long after coarse scaling.
    pub min_coarse_side: u32,
}

impl Default for TemplateMatchConfig {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            max_matches: 5,
            coarse_scale: 0.25,
            min_coarse_side: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumConfig {
    pub votes: usize,
    pub label_length: usize,
    pub label_retry_limit: usize,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            votes: 3,
            label_length: 2,
            label_retry_limit: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomConfig {
    /// Desired crop width in multiples of the reference element width.
    pub element_margin: f64,
    pub max_upscale: f64,
    /// Run feature/template matching on the cropped sub-image.
    pub algorithmic_in_zoom: bool,
    /// Run feature/template matching on the full screenshot during the coarse pass.
    pub algorithmic_before_zoom: bool,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            element_margin: 4.0,
            max_upscale: 4.0,
            algorithmic_in_zoom: false,
            algorithmic_before_zoom: false,
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────────────────

fn resolve_config_path() -> LocatorResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("seeclaw").join("config.toml");
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in user config dir");
            return Ok(candidate);
        }
    }

    Err(LocatorError::Config(
        "config.toml not found next to executable, in working directory or user config dir".into(),
    ))
}

pub fn load_config() -> LocatorResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> LocatorResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

pub fn save_config(config: &AppConfig) -> LocatorResult<()> {
    let path = resolve_config_path()?;
    save_config_to(config, &path)
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> LocatorResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_locator_table_uses_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [llm]
            active_provider = "local"
            [llm.providers.local]
            display_name = "Local"
            api_base = "http://localhost:8000/v1/chat/completions"
            model = "qwen2.5-vl"

            [locator]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.locator.grounding.votes, 3);
        assert_eq!(cfg.locator.quorum.label_length, 2);
        assert!(!cfg.locator.zoom.algorithmic_in_zoom);
        assert_eq!(cfg.llm.providers["local"].temperature, 0.1);
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [llm]
            active_provider = "x"
            providers = {}

            [locator.template]
            threshold = 0.9
            "#,
        )
        .unwrap();
        assert_eq!(cfg.locator.template.threshold, 0.9);
        assert_eq!(cfg.locator.template.max_matches, 5);
        assert_eq!(cfg.locator.feature.min_cluster_matches, 6);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut cfg = AppConfig::default();
        cfg.llm.active_provider = "openai".into();
        cfg.locator.zoom.element_margin = 6.0;
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.llm.active_provider, "openai");
        assert_eq!(loaded.locator.zoom.element_margin, 6.0);
    }
}
