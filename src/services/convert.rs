//! Single-bundle conversion orchestration.
//!
//! Sequences the per-bundle steps in a fixed order: loop video (mandatory),
//! intro video, overlay handling, icon derivation, static asset copies and
//! finally the generated config. Every step but the loop video is allowed
//! to fail and fall back; failures never escape as errors, they become the
//! per-bundle [`ConversionResult`].

use crate::models::bundle::{
    BRAND_LOGO_PNG, CLASS_ICON_PNG, ICON_PNG, INTRO_VIDEO, LOOP_VIDEO, LOGO_RAW, LegacyBundle,
    NEW_CONFIG, OVERLAY_PNG, OVERLAY_RAW,
};
use crate::models::epconfig::{
    ArknightsOverlayOptions, DEFAULT_APPEAR_TIME_US, DEFAULT_INTRO_DURATION_US, EpConfig,
    ImageOverlayOptions, IntroConfig, MICROSECONDS_PER_SECOND, Overlay, Transition, TransitionKind,
};
use crate::models::{ConversionResult, OperatorRecord};
use crate::resources::ResourceDirs;
use crate::services::batch::DetailCallback;
use crate::services::raw_image::{self, ICON_SIZE, RawImageSpec, RawTransform};
use crate::services::resolver::{Disambiguator, IdentityResolver, Recognition};
use crate::services::transcoder::FfmpegTools;
use camino::Utf8Path;
use std::str::FromStr;
use std::sync::Arc;

/// How the overlay resource is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayMode {
    /// Identify the subject; unmatched non-template overlays become images.
    Auto,
    /// Identity-block config; recognition only when auto-OCR is enabled.
    Arknights,
    /// Always keep the overlay as a plain image asset.
    Image,
}

impl FromStr for OverlayMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "arknights" => Ok(Self::Arknights),
            "image" => Ok(Self::Image),
            other => Err(format!("Unknown overlay mode {other:?}")),
        }
    }
}

/// Everything the config builder needs to know about what the steps
/// actually produced.
pub(crate) struct ConfigInputs<'a> {
    pub bundle_name: &'a str,
    pub accent_color: &'a str,
    pub has_intro: bool,
    pub intro_duration_us: u64,
    pub effective_mode: OverlayMode,
    pub has_overlay_image: bool,
    pub has_icon: bool,
    pub has_class_icon: bool,
    pub has_brand_logo: bool,
    pub identity_overlay: Option<ArknightsOverlayOptions>,
}

pub struct ConversionOrchestrator {
    /// `None` when no encoder could be resolved; every bundle then fails
    /// fast with a descriptive message.
    tools: Option<Arc<FfmpegTools>>,
    resolver: IdentityResolver,
    resources: ResourceDirs,
}

impl ConversionOrchestrator {
    pub fn new(resources: ResourceDirs) -> Self {
        Self::with_tools(resources, FfmpegTools::discover_cached())
    }

    /// Explicit tool injection for tests and embedders.
    pub fn with_tools(resources: ResourceDirs, tools: Option<Arc<FfmpegTools>>) -> Self {
        let resolver = IdentityResolver::new(resources.template_path(), resources.data_dir());
        Self {
            tools,
            resolver,
            resources,
        }
    }

    /// Convert one bundle into `dst_dir`. Never returns an error; the
    /// outcome is always captured in the result.
    pub async fn convert_bundle(
        &self,
        bundle: &LegacyBundle,
        dst_dir: &Utf8Path,
        overlay_mode: OverlayMode,
        auto_ocr: bool,
        disambiguator: &Disambiguator,
        detail: Option<&DetailCallback>,
    ) -> ConversionResult {
        let name = bundle.name.as_str();
        tracing::info!("Converting bundle {}", name);

        let mut result = ConversionResult::new(bundle.dir.clone(), dst_dir.to_path_buf());
        let narrate = |message: &str| {
            if let Some(callback) = detail {
                callback(message);
            }
        };

        let Some(tools) = &self.tools else {
            result.message = "Encoder tool not found, videos cannot be converted".to_string();
            tracing::error!("{}: {}", name, result.message);
            return result;
        };

        if let Err(e) = std::fs::create_dir_all(dst_dir) {
            result.message = format!("Cannot create destination directory: {e}");
            tracing::error!("{}: {}", name, result.message);
            return result;
        }

        // 1. Loop video. Mandatory: failure aborts the bundle before any
        //    config is emitted.
        narrate("Re-encoding loop video...");
        let loop_src = bundle.dir.join(LOOP_VIDEO);
        if let Err(e) = tools
            .correct_and_reencode(&loop_src, &dst_dir.join(LOOP_VIDEO))
            .await
        {
            result.message = format!("Loop video conversion failed: {e}");
            tracing::error!("{}: {}", name, result.message);
            return result;
        }
        result.files_produced.push(LOOP_VIDEO.to_string());

        // 2. Intro video, optional; its probed duration feeds the config.
        let mut has_intro = false;
        let mut intro_duration_us = DEFAULT_INTRO_DURATION_US;
        if bundle.has_intro {
            narrate("Re-encoding intro video...");
            let intro_dst = dst_dir.join(INTRO_VIDEO);
            match tools
                .correct_and_reencode(&bundle.dir.join(INTRO_VIDEO), &intro_dst)
                .await
            {
                Ok(()) => {
                    result.files_produced.push(INTRO_VIDEO.to_string());
                    has_intro = true;
                    match tools.probe_duration(&intro_dst).await {
                        Some(seconds) => {
                            intro_duration_us =
                                (seconds * MICROSECONDS_PER_SECOND as f64) as u64;
                            tracing::info!("{}: intro runs {:.2}s", name, seconds);
                        }
                        None => tracing::warn!(
                            "{}: cannot probe intro duration, using default",
                            name
                        ),
                    }
                }
                Err(e) => tracing::warn!("{}: intro conversion failed, skipping: {}", name, e),
            }
        }

        // 3. Overlay handling per mode.
        let mut effective_mode = overlay_mode;
        let mut has_overlay_image = false;
        let mut identity_overlay = None;
        if bundle.has_overlay {
            let overlay_src = bundle.dir.join(OVERLAY_RAW);
            let run_recognition = overlay_mode == OverlayMode::Auto
                || (overlay_mode == OverlayMode::Arknights && auto_ocr);

            if run_recognition {
                narrate("Identifying overlay subject...");
                match raw_image::decode_raw(&overlay_src, RawImageSpec::OVERLAY) {
                    Ok(raw) => {
                        // Overlays are stored upside-down.
                        let overlay_img = image::imageops::rotate180(&raw);
                        let recognition =
                            self.resolver.recognize(&overlay_img, disambiguator).await;
                        match recognition {
                            Recognition {
                                operator: Some(op), ..
                            } => {
                                narrate(&format!("Identified subject: {}", op.name));
                                let (options, copied) =
                                    self.identity_overlay_options(&op, dst_dir);
                                result.files_produced.extend(copied);
                                identity_overlay = Some(options);
                                effective_mode = OverlayMode::Arknights;
                            }
                            Recognition {
                                operator: None,
                                is_standard_template: false,
                            } if overlay_mode == OverlayMode::Auto => {
                                narrate("Non-standard overlay, keeping it as an image...");
                                if self.convert_overlay_image(&overlay_src, dst_dir) {
                                    result.files_produced.push(OVERLAY_PNG.to_string());
                                    has_overlay_image = true;
                                }
                                effective_mode = OverlayMode::Image;
                            }
                            _ => {
                                tracing::warn!(
                                    "{}: subject not identified, using default overlay",
                                    name
                                );
                                effective_mode = OverlayMode::Arknights;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("{}: overlay decode failed: {}", name, e);
                        if overlay_mode == OverlayMode::Auto {
                            effective_mode = OverlayMode::Arknights;
                        }
                    }
                }
            } else if overlay_mode == OverlayMode::Image {
                narrate("Converting overlay image...");
                if self.convert_overlay_image(&overlay_src, dst_dir) {
                    result.files_produced.push(OVERLAY_PNG.to_string());
                    has_overlay_image = true;
                }
            }
        }

        // 4. Icon: prefer the raw logo, fall back to the loop video's
        //    first frame.
        let icon_dst = dst_dir.join(ICON_PNG);
        let mut has_icon = false;
        if bundle.has_logo {
            narrate("Converting logo...");
            let logo_transform = RawTransform {
                target_size: Some(ICON_SIZE),
                ..Default::default()
            };
            match raw_image::decode_and_transform(
                &bundle.dir.join(LOGO_RAW),
                RawImageSpec::LOGO,
                logo_transform,
                &icon_dst,
            ) {
                Ok(()) => {
                    result.files_produced.push(ICON_PNG.to_string());
                    has_icon = true;
                }
                Err(e) => {
                    tracing::warn!(
                        "{}: logo decode failed ({}), deriving icon from video",
                        name,
                        e
                    );
                    if raw_image::first_frame_icon(tools, &loop_src, &icon_dst).await {
                        result.files_produced.push(ICON_PNG.to_string());
                        has_icon = true;
                    }
                }
            }
        } else {
            narrate("Deriving icon from video...");
            if raw_image::first_frame_icon(tools, &loop_src, &icon_dst).await {
                result.files_produced.push(ICON_PNG.to_string());
                has_icon = true;
            } else {
                tracing::warn!("{}: could not derive an icon", name);
            }
        }

        // 5. Static assets for a default identity block. Their absence is
        //    tolerated; the config just omits the references.
        let mut has_class_icon = false;
        let mut has_brand_logo = false;
        if effective_mode == OverlayMode::Arknights && identity_overlay.is_none() {
            if let Some(src) = self.resources.default_class_icon() {
                match std::fs::copy(&src, dst_dir.join(CLASS_ICON_PNG)) {
                    Ok(_) => {
                        result.files_produced.push(CLASS_ICON_PNG.to_string());
                        has_class_icon = true;
                    }
                    Err(e) => tracing::warn!("{}: cannot copy class icon: {}", name, e),
                }
            }
            if let Some(src) = self.resources.brand_logo() {
                match std::fs::copy(&src, dst_dir.join(BRAND_LOGO_PNG)) {
                    Ok(_) => {
                        result.files_produced.push(BRAND_LOGO_PNG.to_string());
                        has_brand_logo = true;
                    }
                    Err(e) => tracing::warn!("{}: cannot copy brand logo: {}", name, e),
                }
            }
        }

        // 6. Generated config.
        narrate("Writing config...");
        let config = build_config(ConfigInputs {
            bundle_name: name,
            accent_color: &bundle.config.accent_color,
            has_intro,
            intro_duration_us,
            effective_mode,
            has_overlay_image,
            has_icon,
            has_class_icon,
            has_brand_logo,
            identity_overlay,
        });
        match config.save(&dst_dir.join(NEW_CONFIG)) {
            Ok(()) => result.files_produced.push(NEW_CONFIG.to_string()),
            Err(e) => tracing::error!("{}: cannot write config: {}", name, e),
        }

        result.success = !result.files_produced.is_empty();
        result.message = format!("Produced {} files", result.files_produced.len());
        tracing::info!("{}: {}", name, result.message);
        result
    }

    fn convert_overlay_image(&self, src: &Utf8Path, dst_dir: &Utf8Path) -> bool {
        let transform = RawTransform {
            rotate_180: true,
            ..Default::default()
        };
        match raw_image::decode_and_transform(
            src,
            RawImageSpec::OVERLAY,
            transform,
            &dst_dir.join(OVERLAY_PNG),
        ) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Overlay conversion failed: {}", e);
                false
            }
        }
    }

    /// Identity-block options for a resolved subject, copying its class
    /// icon and the brand logo next to the config when available.
    pub(crate) fn identity_overlay_options(
        &self,
        op: &OperatorRecord,
        dst_dir: &Utf8Path,
    ) -> (ArknightsOverlayOptions, Vec<String>) {
        let mut copied = Vec::new();

        let icon_name = op.class_icon_filename();
        let mut class_icon_field = String::new();
        if let Some(src) = self.resources.class_icon(&icon_name) {
            match std::fs::copy(&src, dst_dir.join(&icon_name)) {
                Ok(_) => {
                    copied.push(icon_name.clone());
                    class_icon_field = icon_name;
                }
                Err(e) => tracing::warn!("Cannot copy class icon {}: {}", icon_name, e),
            }
        }

        let mut logo_field = String::new();
        if let Some(src) = self.resources.brand_logo() {
            match std::fs::copy(&src, dst_dir.join(BRAND_LOGO_PNG)) {
                Ok(_) => {
                    copied.push(BRAND_LOGO_PNG.to_string());
                    logo_field = BRAND_LOGO_PNG.to_string();
                }
                Err(e) => tracing::warn!("Cannot copy brand logo: {}", e),
            }
        }

        let nation = capitalize(op.nation.as_deref().unwrap_or("Rhodes Island"));
        let display = op.name.to_uppercase();
        let options = ArknightsOverlayOptions {
            appear_time: DEFAULT_APPEAR_TIME_US,
            operator_name: display.clone(),
            operator_code: format!("ARKNIGHTS - {}", op.code),
            barcode_text: format!("{display} - ARKNIGHTS"),
            aux_text: format!(
                "Operator of {nation}\n{}/{nation}\nArknight-EPass",
                op.class_tag
            ),
            staff_text: "STAFF".to_string(),
            color: op.accent_color.clone(),
            logo: logo_field,
            operator_class_icon: class_icon_field,
        };
        (options, copied)
    }
}

/// Assemble the generated config from what the conversion steps produced.
pub(crate) fn build_config(inputs: ConfigInputs<'_>) -> EpConfig {
    let mut config = EpConfig::new(inputs.bundle_name);
    config.description = format!("Converted from legacy bundle: {}", inputs.bundle_name);
    config.loop_video.file = LOOP_VIDEO.to_string();

    if inputs.has_intro {
        config.intro = Some(IntroConfig {
            enabled: true,
            file: INTRO_VIDEO.to_string(),
            duration: inputs.intro_duration_us,
        });
        config.transition_loop = Some(Transition::with_background(
            TransitionKind::Fade,
            inputs.accent_color,
        ));
    }
    config.transition_in = Some(Transition::with_background(
        TransitionKind::Swipe,
        inputs.accent_color,
    ));

    config.overlay = Some(match inputs.identity_overlay {
        Some(options) => Overlay::Arknights(options),
        None if inputs.effective_mode == OverlayMode::Image && inputs.has_overlay_image => {
            Overlay::Image(ImageOverlayOptions {
                appear_time: DEFAULT_APPEAR_TIME_US,
                duration: DEFAULT_APPEAR_TIME_US,
                image: OVERLAY_PNG.to_string(),
            })
        }
        None => Overlay::Arknights(ArknightsOverlayOptions {
            color: inputs.accent_color.to_string(),
            logo: if inputs.has_brand_logo {
                BRAND_LOGO_PNG.to_string()
            } else {
                String::new()
            },
            operator_class_icon: if inputs.has_class_icon {
                CLASS_ICON_PNG.to_string()
            } else {
                String::new()
            },
            ..Default::default()
        }),
    });

    if inputs.has_icon {
        config.icon = ICON_PNG.to_string();
    }
    config
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use std::fs;
    use tempfile::TempDir;

    fn inputs(effective_mode: OverlayMode) -> ConfigInputs<'static> {
        ConfigInputs {
            bundle_name: "sample",
            accent_color: "#00ff00",
            has_intro: false,
            intro_duration_us: DEFAULT_INTRO_DURATION_US,
            effective_mode,
            has_overlay_image: false,
            has_icon: false,
            has_class_icon: false,
            has_brand_logo: false,
            identity_overlay: None,
        }
    }

    #[test]
    fn test_overlay_mode_from_str() {
        assert_eq!("auto".parse::<OverlayMode>().unwrap(), OverlayMode::Auto);
        assert_eq!(
            "ARKNIGHTS".parse::<OverlayMode>().unwrap(),
            OverlayMode::Arknights
        );
        assert_eq!("image".parse::<OverlayMode>().unwrap(), OverlayMode::Image);
        assert!("mystery".parse::<OverlayMode>().is_err());
    }

    #[test]
    fn test_build_config_default_identity_block() {
        let config = build_config(inputs(OverlayMode::Arknights));
        assert_eq!(config.name, "sample");
        assert_eq!(config.loop_video.file, "loop.mp4");
        assert!(config.intro.is_none());
        assert!(config.transition_loop.is_none());

        let transition = config.transition_in.as_ref().unwrap();
        assert_eq!(transition.kind, TransitionKind::Swipe);
        assert_eq!(transition.options.background_color, "#00ff00");

        match config.overlay.as_ref().unwrap() {
            Overlay::Arknights(options) => {
                assert_eq!(options.operator_name, "OPERATOR");
                assert_eq!(options.color, "#00ff00");
                assert!(options.logo.is_empty());
            }
            other => panic!("Unexpected overlay: {other:?}"),
        }
    }

    #[test]
    fn test_build_config_intro_adds_fade_transition() {
        let mut cfg_inputs = inputs(OverlayMode::Arknights);
        cfg_inputs.has_intro = true;
        cfg_inputs.intro_duration_us = 7_250_000;

        let config = build_config(cfg_inputs);
        let intro = config.intro.as_ref().unwrap();
        assert!(intro.enabled);
        assert_eq!(intro.file, "intro.mp4");
        assert_eq!(intro.duration, 7_250_000);

        let transition = config.transition_loop.as_ref().unwrap();
        assert_eq!(transition.kind, TransitionKind::Fade);
        assert_eq!(transition.options.background_color, "#00ff00");
    }

    #[test]
    fn test_build_config_image_overlay() {
        let mut cfg_inputs = inputs(OverlayMode::Image);
        cfg_inputs.has_overlay_image = true;

        let config = build_config(cfg_inputs);
        match config.overlay.as_ref().unwrap() {
            Overlay::Image(options) => {
                assert_eq!(options.image, "overlay.png");
                assert_eq!(options.appear_time, 100_000);
                assert_eq!(options.duration, 100_000);
            }
            other => panic!("Unexpected overlay: {other:?}"),
        }
    }

    #[test]
    fn test_build_config_image_mode_without_image_falls_back() {
        // Image mode but nothing converted: the default identity block wins.
        let config = build_config(inputs(OverlayMode::Image));
        assert!(matches!(
            config.overlay.as_ref().unwrap(),
            Overlay::Arknights(_)
        ));
    }

    #[test]
    fn test_build_config_identity_overlay_wins() {
        let mut cfg_inputs = inputs(OverlayMode::Auto);
        cfg_inputs.identity_overlay = Some(ArknightsOverlayOptions {
            operator_name: "AMIYA".to_string(),
            color: "#0098dc".to_string(),
            ..Default::default()
        });

        let config = build_config(cfg_inputs);
        match config.overlay.as_ref().unwrap() {
            Overlay::Arknights(options) => {
                assert_eq!(options.operator_name, "AMIYA");
                assert_eq!(options.color, "#0098dc");
            }
            other => panic!("Unexpected overlay: {other:?}"),
        }
    }

    #[test]
    fn test_identity_overlay_options_formatting() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("class_icons")).unwrap();
        fs::write(root.join("class_icons").join("caster.png"), b"png").unwrap();
        fs::write(root.join("class_icons").join("ak_logo.png"), b"png").unwrap();
        let dst = root.join("out");
        fs::create_dir_all(&dst).unwrap();

        let orchestrator =
            ConversionOrchestrator::with_tools(ResourceDirs::new(root.clone()), None);
        let record = OperatorRecord {
            id: "char_002_amiya".to_string(),
            name: "Amiya".to_string(),
            name_local: "阿米娅".to_string(),
            code: "R001".to_string(),
            nation: Some("rhodes".to_string()),
            class_tag: "CASTER".to_string(),
            accent_color: "#0098dc".to_string(),
        };

        let (options, copied) = orchestrator.identity_overlay_options(&record, &dst);
        assert_eq!(options.operator_name, "AMIYA");
        assert_eq!(options.operator_code, "ARKNIGHTS - R001");
        assert_eq!(options.barcode_text, "AMIYA - ARKNIGHTS");
        assert_eq!(
            options.aux_text,
            "Operator of Rhodes\nCASTER/Rhodes\nArknight-EPass"
        );
        assert_eq!(options.color, "#0098dc");
        assert_eq!(options.logo, "ak_logo.png");
        assert_eq!(options.operator_class_icon, "caster.png");
        assert_eq!(copied, vec!["caster.png".to_string(), "ak_logo.png".to_string()]);
        assert!(dst.join("caster.png").is_file());
        assert!(dst.join("ak_logo.png").is_file());
    }

    #[test]
    fn test_identity_overlay_options_tolerates_missing_assets() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let orchestrator =
            ConversionOrchestrator::with_tools(ResourceDirs::new(root.clone()), None);

        let record = OperatorRecord {
            id: "char_x".to_string(),
            name: "Nameless".to_string(),
            name_local: String::new(),
            code: "X0".to_string(),
            nation: None,
            class_tag: "GUARD".to_string(),
            accent_color: "#ff0000".to_string(),
        };

        let (options, copied) = orchestrator.identity_overlay_options(&record, &root);
        assert!(copied.is_empty());
        assert!(options.logo.is_empty());
        assert!(options.operator_class_icon.is_empty());
        assert_eq!(
            options.aux_text,
            "Operator of Rhodes Island\nGUARD/Rhodes Island\nArknight-EPass"
        );
    }

    #[tokio::test]
    async fn test_convert_without_encoder_fails_fast() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let src = root.join("bundle");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join(LOOP_VIDEO), b"video").unwrap();

        let orchestrator =
            ConversionOrchestrator::with_tools(ResourceDirs::new(root.join("res")), None);
        let scanner = crate::services::scanner::BundleScanner::new();
        let bundle = scanner.scan_bundle(&src).unwrap();

        let result = orchestrator
            .convert_bundle(
                &bundle,
                &root.join("out"),
                OverlayMode::Auto,
                true,
                &Disambiguator::AcceptBest,
                None,
            )
            .await;
        assert!(!result.success);
        assert!(result.message.contains("Encoder tool not found"));
        assert!(result.files_produced.is_empty());
    }
}
