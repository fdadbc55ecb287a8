//! Bundled read-only resource discovery.
//!
//! The reference dataset tables, the overlay template and the static class
//! icons ship alongside the application under a `resources/` directory.
//! Everything here degrades gracefully: a missing resource makes dependent
//! steps fall back, it never aborts a conversion.

use camino::{Utf8Path, Utf8PathBuf};

/// Class icon used for the default identity block.
pub const DEFAULT_CLASS_ICON: &str = "specialist.png";

/// Brand logo copied next to identity-block configs.
pub const BRAND_LOGO: &str = "ak_logo.png";

/// Reference template the overlay classifier compares against.
pub const OVERLAY_TEMPLATE: &str = "overlay_template.png";

#[derive(Debug, Clone)]
pub struct ResourceDirs {
    root: Utf8PathBuf,
}

impl ResourceDirs {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    /// Locate `resources/` next to the application binary, falling back to
    /// the working directory (development runs).
    pub fn discover() -> Self {
        if let Ok(exe) = std::env::current_exe() {
            if let Ok(exe) = Utf8PathBuf::from_path_buf(exe) {
                if let Some(dir) = exe.parent() {
                    let candidate = dir.join("resources");
                    if candidate.is_dir() {
                        tracing::debug!("Using resources at {}", candidate);
                        return Self::new(candidate);
                    }
                }
            }
        }
        Self::new(Utf8PathBuf::from("resources"))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory holding the reference dataset tables and the template.
    pub fn data_dir(&self) -> Utf8PathBuf {
        self.root.join("data")
    }

    pub fn template_path(&self) -> Utf8PathBuf {
        self.data_dir().join(OVERLAY_TEMPLATE)
    }

    /// A class icon by filename, if it ships with the application.
    pub fn class_icon(&self, filename: &str) -> Option<Utf8PathBuf> {
        let path = self.root.join("class_icons").join(filename);
        path.is_file().then_some(path)
    }

    pub fn default_class_icon(&self) -> Option<Utf8PathBuf> {
        self.class_icon(DEFAULT_CLASS_ICON)
    }

    pub fn brand_logo(&self) -> Option<Utf8PathBuf> {
        self.class_icon(BRAND_LOGO)
    }
}
