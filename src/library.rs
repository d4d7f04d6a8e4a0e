//! On-disk layout of the lookup, local and staging trees.

use crate::comic_info::ComicInfo;
use crate::config::LibraryConfig;
use std::path::{Path, PathBuf};

/// Empty file whose presence marks a destination as fully published.
pub const COMPLETED_MARKER: &str = "completed";

/// Series-level metadata file read by the local source.
pub const DETAILS_FILE: &str = "details.json";

/// Series-level cover image.
pub const COVER_FILE: &str = "cover.jpg";

/// Resolves every path the tracker reads or writes.
#[derive(Debug, Clone)]
pub struct Library {
    lookup_dir: PathBuf,
    local_dir: PathBuf,
    staging_dir: PathBuf,
}

impl Library {
    pub fn new(
        lookup_dir: impl Into<PathBuf>,
        local_dir: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            lookup_dir: lookup_dir.into(),
            local_dir: local_dir.into(),
            staging_dir: staging_dir.into(),
        }
    }

    pub fn from_config(config: &LibraryConfig) -> Self {
        Self::new(
            config.lookup_dir.clone(),
            config.local_dir.clone(),
            config.staging_dir.clone(),
        )
    }

    pub fn lookup_dir(&self) -> &Path {
        &self.lookup_dir
    }

    /// `LOCAL_ROOT/<series>`
    pub fn series_dir(&self, info: &ComicInfo) -> PathBuf {
        self.local_dir.join(path_component(&info.series))
    }

    /// `LOCAL_ROOT/<series>/<title>`
    pub fn destination(&self, info: &ComicInfo) -> PathBuf {
        self.series_dir(info).join(path_component(&info.title))
    }

    /// Where pages are written while the chapter is being translated.
    pub fn staging(&self, info: &ComicInfo) -> PathBuf {
        self.staging_dir
            .join(path_component(&info.series))
            .join(path_component(&info.title))
    }

    pub fn completed_marker(&self, info: &ComicInfo) -> PathBuf {
        self.destination(info).join(COMPLETED_MARKER)
    }

    /// Whether the destination for `info` carries a completed marker.
    ///
    /// An unreadable marker location counts as not completed.
    pub async fn is_completed(&self, info: &ComicInfo) -> bool {
        tokio::fs::try_exists(self.completed_marker(info))
            .await
            .unwrap_or(false)
    }
}

/// Turns a metadata string into a single safe path component.
fn path_component(name: &str) -> String {
    let sanitized = sanitize_filename::sanitize(name.trim());
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}
