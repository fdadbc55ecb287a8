//! Data model of the generated `epconfig.json`.
//!
//! Only the fields this pipeline populates are modeled. The two overlay
//! shapes are a tagged enum rather than loose maps so a config can never
//! carry, say, an image reference inside an identity block.

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::fs;

/// Timestamps and durations in the config are microseconds.
pub const MICROSECONDS_PER_SECOND: u64 = 1_000_000;

/// Fallback when the intro duration cannot be probed (5 seconds).
pub const DEFAULT_INTRO_DURATION_US: u64 = 5_000_000;

/// Duration of the generated enter/loop transitions (0.5 seconds).
pub const DEFAULT_TRANSITION_DURATION_US: u64 = 500_000;

/// Delay before the overlay appears (0.1 seconds).
pub const DEFAULT_APPEAR_TIME_US: u64 = 100_000;

/// The only screen geometry legacy bundles target.
pub const SCREEN_360X640: &str = "360x640";

fn is_false(value: &bool) -> bool {
    !value
}

/// Loop clip reference. `is_image` is only serialized when set; legacy
/// bundles always convert to video loops.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoopConfig {
    pub file: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_image: bool,
}

/// Optional intro clip played before the loop starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntroConfig {
    pub enabled: bool,
    pub file: String,
    /// Microseconds; probed from the re-encoded file when possible.
    pub duration: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Fade,
    Move,
    Swipe,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransitionOptions {
    pub duration: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    pub background_color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transition {
    #[serde(rename = "type")]
    pub kind: TransitionKind,
    pub options: TransitionOptions,
}

impl Transition {
    /// Transition keyed off the legacy accent color.
    pub fn with_background(kind: TransitionKind, background_color: &str) -> Self {
        Self {
            kind,
            options: TransitionOptions {
                duration: DEFAULT_TRANSITION_DURATION_US,
                image: String::new(),
                background_color: background_color.to_string(),
            },
        }
    }
}

/// Identity-block overlay options ("arknights" on the wire).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArknightsOverlayOptions {
    pub appear_time: u64,
    pub operator_name: String,
    pub operator_code: String,
    pub barcode_text: String,
    pub aux_text: String,
    pub staff_text: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub logo: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operator_class_icon: String,
}

impl Default for ArknightsOverlayOptions {
    fn default() -> Self {
        Self {
            appear_time: DEFAULT_APPEAR_TIME_US,
            operator_name: "OPERATOR".to_string(),
            operator_code: "ARKNIGHTS - UNK0".to_string(),
            barcode_text: "OPERATOR - ARKNIGHTS".to_string(),
            aux_text: "Operator of Rhodes Island\nUndefined/Rhodes Island\n Hypergryph"
                .to_string(),
            staff_text: "STAFF".to_string(),
            color: "#000000".to_string(),
            logo: String::new(),
            operator_class_icon: String::new(),
        }
    }
}

/// Plain-image overlay options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageOverlayOptions {
    pub appear_time: u64,
    pub duration: u64,
    pub image: String,
}

/// The overlay block. On the wire this is
/// `{"type": "arknights"|"image", "options": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "options", rename_all = "lowercase")]
pub enum Overlay {
    Arknights(ArknightsOverlayOptions),
    Image(ImageOverlayOptions),
}

/// Complete generated config for one converted bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EpConfig {
    pub version: u32,
    pub uuid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,
    pub screen: String,
    #[serde(rename = "loop")]
    pub loop_video: LoopConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intro: Option<IntroConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_in: Option<Transition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_loop: Option<Transition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<Overlay>,
}

impl EpConfig {
    pub fn new(name: &str) -> Self {
        Self {
            version: 1,
            uuid: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: String::new(),
            icon: String::new(),
            screen: SCREEN_360X640.to_string(),
            loop_video: LoopConfig::default(),
            intro: None,
            transition_in: None,
            transition_loop: None,
            overlay: None,
        }
    }

    /// Serialize to pretty-printed JSON and write to `path`, creating the
    /// parent directory if needed.
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {parent}"))?;
            }
        }
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize config to JSON")?;
        fs::write(path, json).with_context(|| format!("Failed to write config: {path}"))?;
        tracing::info!("Wrote config {}", path);
        Ok(())
    }

    pub fn load(path: &Utf8Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config: {path}"))?;
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse config: {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_config_has_uuid_and_screen() {
        let config = EpConfig::new("sample");
        assert_eq!(config.version, 1);
        assert_eq!(config.screen, "360x640");
        assert_eq!(config.name, "sample");
        assert!(!config.uuid.is_empty());
    }

    #[test]
    fn test_empty_blocks_are_omitted() {
        let config = EpConfig::new("sample");
        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("intro").is_none());
        assert!(json.get("overlay").is_none());
        assert!(json.get("transition_in").is_none());
        assert!(json.get("icon").is_none());
        assert!(json.get("loop").is_some());
    }

    #[test]
    fn test_arknights_overlay_wire_shape() {
        let overlay = Overlay::Arknights(ArknightsOverlayOptions {
            color: "#0098dc".to_string(),
            logo: "ak_logo.png".to_string(),
            ..Default::default()
        });
        let json = serde_json::to_value(&overlay).unwrap();
        assert_eq!(json["type"], "arknights");
        assert_eq!(json["options"]["operator_name"], "OPERATOR");
        assert_eq!(json["options"]["color"], "#0098dc");
        assert_eq!(json["options"]["logo"], "ak_logo.png");
        // Empty file references never reach the wire.
        assert!(json["options"].get("operator_class_icon").is_none());
    }

    #[test]
    fn test_image_overlay_wire_shape() {
        let overlay = Overlay::Image(ImageOverlayOptions {
            appear_time: DEFAULT_APPEAR_TIME_US,
            duration: DEFAULT_APPEAR_TIME_US,
            image: "overlay.png".to_string(),
        });
        let json = serde_json::to_value(&overlay).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["options"]["image"], "overlay.png");
        assert_eq!(json["options"]["appear_time"], 100_000);
    }

    #[test]
    fn test_transition_with_background() {
        let transition = Transition::with_background(TransitionKind::Swipe, "#00ff00");
        let json = serde_json::to_value(&transition).unwrap();
        assert_eq!(json["type"], "swipe");
        assert_eq!(json["options"]["duration"], 500_000);
        assert_eq!(json["options"]["background_color"], "#00ff00");
        assert!(json["options"].get("image").is_none());
    }

    #[test]
    fn test_round_trip() {
        let mut config = EpConfig::new("round-trip");
        config.intro = Some(IntroConfig {
            enabled: true,
            file: "intro.mp4".to_string(),
            duration: 7_250_000,
        });
        config.overlay = Some(Overlay::Image(ImageOverlayOptions {
            appear_time: 100_000,
            duration: 100_000,
            image: "overlay.png".to_string(),
        }));
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EpConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
