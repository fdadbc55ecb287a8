// epmigrate - Legacy display-asset bundle migration pipeline
//
// This is the library crate containing the conversion pipeline and data
// structures. The binary crate (main.rs) provides the CLI entry point.

pub mod logging;
pub mod models;
pub mod resources;
pub mod services;

// Re-export commonly used types for convenience
pub use models::{BatchOutcome, ConversionResult, EpConfig, LegacyBundle, LegacyConfig};
pub use resources::ResourceDirs;
pub use services::{
    BatchCoordinator, BundleScanner, ConfirmationBridge, ConversionOrchestrator, Disambiguator,
    FfmpegTools, IdentityIndex, MediaFrameProcessor, OverlayMode,
};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
