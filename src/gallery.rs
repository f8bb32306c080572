//! Reference image resolver.
//!
//! Maps an identified (category, file_id) pair to an image file under the
//! dataset root. A missing file is a soft outcome: the identification itself
//! already succeeded, so callers attach a warning instead of failing.

use std::path::{Path, PathBuf};

pub struct Gallery {
    root: PathBuf,
}

/// Outcome of resolving a reference image.
pub enum GalleryLookup {
    Found(Vec<u8>),
    /// File is not on disk (or unreadable); carries the path for the warning.
    Missing(String),
}

impl Gallery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the reference image for an identified entry.
    ///
    /// Category and file id come from the snapshot, but they originate in
    /// filenames of a foreign export, so path separators and parent
    /// components are refused rather than joined.
    pub fn resolve(&self, category: &str, file_id: &str) -> GalleryLookup {
        let path = self.root.join(category).join(file_id);

        if !component_is_safe(category) || !component_is_safe(file_id) {
            log::warn!("refusing unsafe dataset path: {}", path.display());
            return GalleryLookup::Missing(path.display().to_string());
        }

        match std::fs::read(&path) {
            Ok(bytes) => GalleryLookup::Found(bytes),
            Err(err) => {
                log::warn!("reference image {} unreadable: {err}", path.display());
                GalleryLookup::Missing(path.display().to_string())
            }
        }
    }
}

fn component_is_safe(component: &str) -> bool {
    !component.contains('/') && !component.contains('\\') && component != ".." && !component.is_empty()
}
