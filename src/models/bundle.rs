use camino::Utf8PathBuf;

/// Filenames that make up a legacy bundle.
pub const LOOP_VIDEO: &str = "loop.mp4";
pub const INTRO_VIDEO: &str = "intro.mp4";
pub const OVERLAY_RAW: &str = "overlay.argb";
pub const LOGO_RAW: &str = "logo.argb";
pub const LEGACY_CONFIG: &str = "epconfig.txt";

/// Filenames written into a converted bundle.
pub const NEW_CONFIG: &str = "epconfig.json";
pub const OVERLAY_PNG: &str = "overlay.png";
pub const ICON_PNG: &str = "icon.png";
pub const CLASS_ICON_PNG: &str = "class_icon.png";
pub const BRAND_LOGO_PNG: &str = "ak_logo.png";

/// Parsed contents of the terse legacy config file.
///
/// The legacy format is a single whitespace-separated line:
/// `<integer version> [<6-or-8-hex-digit color>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyConfig {
    pub version: i64,
    /// Always `#`-prefixed; the 8-digit ARGB form has its alpha discarded.
    pub accent_color: String,
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            version: 0,
            accent_color: "#000000".to_string(),
        }
    }
}

/// A detected legacy bundle: source folder plus which optional raw
/// resources are present. Read-only after discovery.
#[derive(Debug, Clone)]
pub struct LegacyBundle {
    pub dir: Utf8PathBuf,
    pub name: String,
    pub has_intro: bool,
    pub has_overlay: bool,
    pub has_logo: bool,
    pub config: LegacyConfig,
}

/// Result of converting a single bundle.
///
/// Fields are filled in before the result is recorded; a result is never
/// mutated after it joins a [`BatchOutcome`].
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub success: bool,
    pub src_path: Utf8PathBuf,
    pub dst_path: Utf8PathBuf,
    pub message: String,
    /// Every file actually written, in production order.
    pub files_produced: Vec<String>,
}

impl ConversionResult {
    pub fn new(src_path: Utf8PathBuf, dst_path: Utf8PathBuf) -> Self {
        Self {
            success: false,
            src_path,
            dst_path,
            message: String::new(),
            files_produced: Vec::new(),
        }
    }
}

/// Accumulated results of a batch run, in discovery order.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub results: Vec<ConversionResult>,
}

impl BatchOutcome {
    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn total_files(&self) -> usize {
        self.results.iter().map(|r| r.files_produced.len()).sum()
    }

    /// Short human-readable summary of the whole batch.
    pub fn summary(&self) -> String {
        if self.results.is_empty() {
            return "No bundles converted".to_string();
        }
        format!(
            "Converted {}/{} bundles, {} files total",
            self.succeeded(),
            self.attempted(),
            self.total_files()
        )
    }
}
