//! Legacy bundle detection and terse-config parsing.
//!
//! A folder is a legacy bundle iff it directly contains a loop video. The
//! terse config file is optional; when present it is a single line of the
//! form `<integer version> [<6-or-8-hex-digit color>]`.

use crate::models::bundle::{
    INTRO_VIDEO, LEGACY_CONFIG, LOGO_RAW, LOOP_VIDEO, LegacyBundle, LegacyConfig, OVERLAY_RAW,
};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::fs;
use thiserror::Error;

/// Errors raised while scanning a candidate folder.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The version token must be an integer; a malformed one is reported
    /// rather than silently defaulted.
    #[error("Invalid version token {0:?} in legacy config")]
    InvalidVersion(String),

    #[error("Failed to read legacy config: {0}")]
    Io(#[from] std::io::Error),
}

/// Detects legacy bundles and parses their config files.
pub struct BundleScanner {
    /// Matches a 6-digit RGB or 8-digit ARGB hex color token
    hex_color_pattern: Regex,
}

impl BundleScanner {
    pub fn new() -> Self {
        Self {
            hex_color_pattern: Regex::new(r"^(?:[0-9a-fA-F]{6}|[0-9a-fA-F]{8})$")
                .expect("Invalid hex color regex"),
        }
    }

    /// A folder is a legacy bundle iff `loop.mp4` exists directly inside it.
    /// The config file does not affect the verdict.
    pub fn is_legacy_bundle(&self, folder: &Utf8Path) -> bool {
        folder.is_dir() && folder.join(LOOP_VIDEO).is_file()
    }

    /// Parse the terse config file. A missing file yields the defaults
    /// `{version: 0, color: "#000000"}`.
    pub fn parse_config(&self, folder: &Utf8Path) -> Result<LegacyConfig, ScanError> {
        let path = folder.join(LEGACY_CONFIG);
        if !path.exists() {
            tracing::debug!("No legacy config at {}, using defaults", path);
            return Ok(LegacyConfig::default());
        }

        let contents = fs::read_to_string(&path)?;
        let mut config = LegacyConfig::default();
        let mut tokens = contents.split_whitespace();

        if let Some(version) = tokens.next() {
            config.version = version
                .parse()
                .map_err(|_| ScanError::InvalidVersion(version.to_string()))?;
        }
        if let Some(color) = tokens.next() {
            config.accent_color = self.normalize_color(color);
        }

        tracing::debug!("Parsed legacy config {}: {:?}", path, config);
        Ok(config)
    }

    /// Normalize a color token to `#rrggbb` form. The 8-digit form is ARGB
    /// with the alpha byte discarded; anything else is kept as-is (prefixed)
    /// to stay lenient with hand-edited files.
    fn normalize_color(&self, token: &str) -> String {
        if !self.hex_color_pattern.is_match(token) {
            tracing::warn!("Unusual color token {:?} in legacy config, keeping as-is", token);
            return format!("#{token}");
        }
        if token.len() == 8 {
            format!("#{}", &token[2..])
        } else {
            format!("#{token}")
        }
    }

    /// Scan one folder into a bundle. The folder must already satisfy
    /// [`Self::is_legacy_bundle`].
    pub fn scan_bundle(&self, dir: &Utf8Path) -> Result<LegacyBundle, ScanError> {
        let config = self.parse_config(dir)?;
        Ok(LegacyBundle {
            name: dir.file_name().unwrap_or_default().to_string(),
            has_intro: dir.join(INTRO_VIDEO).is_file(),
            has_overlay: dir.join(OVERLAY_RAW).is_file(),
            has_logo: dir.join(LOGO_RAW).is_file(),
            dir: dir.to_path_buf(),
            config,
        })
    }

    /// List the legacy bundles among the immediate subdirectories of `root`.
    ///
    /// Filesystem listing order varies between platforms, so folders are
    /// sorted lexicographically to keep batch order deterministic. Folders
    /// with a malformed config are skipped with a warning.
    pub fn discover(&self, root: &Utf8Path) -> Vec<LegacyBundle> {
        let mut bundles = Vec::new();
        let entries = match root.read_dir_utf8() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Cannot list {}: {}", root, e);
                return bundles;
            }
        };

        let mut dirs: Vec<Utf8PathBuf> = entries
            .flatten()
            .map(|entry| entry.into_path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();

        for dir in dirs {
            if !self.is_legacy_bundle(&dir) {
                continue;
            }
            match self.scan_bundle(&dir) {
                Ok(bundle) => bundles.push(bundle),
                Err(e) => tracing::warn!("Skipping {}: {}", dir, e),
            }
        }
        bundles
    }
}

impl Default for BundleScanner {
    fn default() -> Self {
        Self::new()
    }
}
