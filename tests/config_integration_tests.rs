//! Integration tests for the generated config model.
//!
//! These tests verify the exact JSON wire shape consumers of
//! `epconfig.json` depend on.

use camino::Utf8PathBuf;
use epmigrate::models::{
    ArknightsOverlayOptions, EpConfig, ImageOverlayOptions, IntroConfig, Overlay, Transition,
    TransitionKind,
};
use tempfile::TempDir;

fn full_config() -> EpConfig {
    let mut config = EpConfig::new("fox-girl-01");
    config.description = "Converted from legacy bundle: fox-girl-01".to_string();
    config.icon = "icon.png".to_string();
    config.loop_video.file = "loop.mp4".to_string();
    config.intro = Some(IntroConfig {
        enabled: true,
        file: "intro.mp4".to_string(),
        duration: 6_400_000,
    });
    config.transition_in = Some(Transition::with_background(TransitionKind::Swipe, "#00ff00"));
    config.transition_loop = Some(Transition::with_background(TransitionKind::Fade, "#00ff00"));
    config.overlay = Some(Overlay::Arknights(ArknightsOverlayOptions {
        operator_name: "AMIYA".to_string(),
        operator_code: "ARKNIGHTS - R001".to_string(),
        barcode_text: "AMIYA - ARKNIGHTS".to_string(),
        color: "#0098dc".to_string(),
        logo: "ak_logo.png".to_string(),
        operator_class_icon: "caster.png".to_string(),
        ..Default::default()
    }));
    config
}

#[test]
fn test_full_config_wire_shape() {
    let json = serde_json::to_value(full_config()).unwrap();

    assert_eq!(json["version"], 1);
    assert_eq!(json["screen"], "360x640");
    assert_eq!(json["name"], "fox-girl-01");
    assert_eq!(json["icon"], "icon.png");
    assert_eq!(json["loop"]["file"], "loop.mp4");
    // is_image is omitted for video loops.
    assert!(json["loop"].get("is_image").is_none());

    assert_eq!(json["intro"]["enabled"], true);
    assert_eq!(json["intro"]["file"], "intro.mp4");
    assert_eq!(json["intro"]["duration"], 6_400_000);

    assert_eq!(json["transition_in"]["type"], "swipe");
    assert_eq!(json["transition_in"]["options"]["duration"], 500_000);
    assert_eq!(json["transition_in"]["options"]["background_color"], "#00ff00");
    assert_eq!(json["transition_loop"]["type"], "fade");

    assert_eq!(json["overlay"]["type"], "arknights");
    assert_eq!(json["overlay"]["options"]["operator_name"], "AMIYA");
    assert_eq!(json["overlay"]["options"]["operator_code"], "ARKNIGHTS - R001");
    assert_eq!(json["overlay"]["options"]["logo"], "ak_logo.png");
    assert_eq!(json["overlay"]["options"]["operator_class_icon"], "caster.png");
}

#[test]
fn test_image_overlay_wire_shape() {
    let mut config = EpConfig::new("plain");
    config.overlay = Some(Overlay::Image(ImageOverlayOptions {
        appear_time: 100_000,
        duration: 100_000,
        image: "overlay.png".to_string(),
    }));

    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(json["overlay"]["type"], "image");
    assert_eq!(json["overlay"]["options"]["image"], "overlay.png");
    assert!(json["overlay"]["options"].get("operator_name").is_none());
}

#[test]
fn test_save_and_load_round_trip() {
    let temp = TempDir::new().unwrap();
    let path = Utf8PathBuf::try_from(temp.path().to_path_buf())
        .unwrap()
        .join("out")
        .join("epconfig.json");

    let config = full_config();
    config.save(&path).unwrap();
    assert!(path.is_file());

    let loaded = EpConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_distinct_configs_get_distinct_uuids() {
    let a = EpConfig::new("a");
    let b = EpConfig::new("b");
    assert_ne!(a.uuid, b.uuid);
}
