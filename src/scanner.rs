//! Library scanner.
//!
//! Walks `LOOKUP_ROOT/<extension>/<series>/<chapter>` and emits one
//! discovery per chapter directory that carries a `ComicInfo.xml`.

use crate::comic_info::{COMIC_INFO_FILE, ComicInfo, read_comic_info};
use crate::error::ScanError;
use crate::tracker::TrackerEvent;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// A downloaded, untranslated chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Chapter directory; also the dedup key.
    pub path: PathBuf,
    /// Parsed `ComicInfo.xml`.
    pub comic_info: ComicInfo,
}

/// Reads the chapter at `path`.
///
/// Returns `Ok(None)` when the directory has no metadata descriptor.
pub async fn build_source(path: &Path) -> Result<Option<Source>, ScanError> {
    let descriptor = path.join(COMIC_INFO_FILE);
    let present = tokio::fs::try_exists(&descriptor)
        .await
        .map_err(|source| ScanError::Io {
            path: descriptor.clone(),
            source,
        })?;
    if !present {
        return Ok(None);
    }

    let comic_info = read_comic_info(&descriptor)
        .await
        .map_err(|source| ScanError::Metadata {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(Some(Source {
        path: path.to_path_buf(),
        comic_info,
    }))
}

/// Scans the lookup tree once, sending events as chapters are found.
///
/// Only an unreadable lookup root fails the scan; problems below it are
/// reported as `TrackerEvent::ScanFailed` and the walk continues.
/// Returns the number of discoveries sent.
pub async fn scan_library(
    lookup_dir: &Path,
    events: &UnboundedSender<TrackerEvent>,
) -> Result<usize, ScanError> {
    let mut discovered = 0;

    for extension in list_dirs(lookup_dir).await? {
        let series_dirs = match list_dirs(&extension).await {
            Ok(dirs) => dirs,
            Err(e) => {
                let _ = events.send(TrackerEvent::ScanFailed(e));
                continue;
            }
        };

        for series in series_dirs {
            let chapters = match list_dirs(&series).await {
                Ok(dirs) => dirs,
                Err(e) => {
                    let _ = events.send(TrackerEvent::ScanFailed(e));
                    continue;
                }
            };

            for chapter in chapters {
                let event = match build_source(&chapter).await {
                    Ok(Some(source)) => {
                        discovered += 1;
                        TrackerEvent::Discovered(source)
                    }
                    Ok(None) => {
                        debug!(path = %chapter.display(), "no metadata, skipping");
                        continue;
                    }
                    Err(e) => TrackerEvent::ScanFailed(e),
                };
                if events.send(event).is_err() {
                    return Ok(discovered);
                }
            }
        }
    }

    Ok(discovered)
}

/// Subdirectories of `dir`, sorted by name.
async fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let io_err = |source: std::io::Error| ScanError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut dirs = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        if entry.file_type().await.map_err(io_err)?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn chapter(root: &Path, rel: &str, xml: Option<&str>) {
        let dir = root.join(rel);
        std::fs::create_dir_all(&dir).unwrap();
        if let Some(xml) = xml {
            std::fs::write(dir.join(COMIC_INFO_FILE), xml).unwrap();
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<TrackerEvent>) -> Vec<TrackerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_scan_emits_discoveries() {
        let root = TempDir::new().unwrap();
        chapter(
            root.path(),
            "MangaDex/Frieren/ch1",
            Some("<ComicInfo><Title>1</Title></ComicInfo>"),
        );
        chapter(
            root.path(),
            "MangaDex/Frieren/ch2",
            Some("<ComicInfo><Title>2</Title></ComicInfo>"),
        );
        chapter(
            root.path(),
            "Comick/Dandadan/ch1",
            Some("<ComicInfo><Title>x</Title></ComicInfo>"),
        );
        std::fs::write(root.path().join("MangaDex/stray.txt"), b"").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let count = scan_library(root.path(), &tx).await.unwrap();
        assert_eq!(count, 3);

        let paths: Vec<PathBuf> = drain(&mut rx)
            .into_iter()
            .map(|event| match event {
                TrackerEvent::Discovered(source) => source.path,
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(
            paths,
            vec![
                root.path().join("Comick/Dandadan/ch1"),
                root.path().join("MangaDex/Frieren/ch1"),
                root.path().join("MangaDex/Frieren/ch2"),
            ]
        );
    }

    #[tokio::test]
    async fn test_bad_metadata_does_not_stop_siblings() {
        let root = TempDir::new().unwrap();
        chapter(root.path(), "ext/S/ch1", Some("<ComicInfo><Title>broken</Series>"));
        chapter(root.path(), "ext/S/ch2", Some("<ComicInfo><Title>ok</Title></ComicInfo>"));
        chapter(root.path(), "ext/S/ch3", None);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let count = scan_library(root.path(), &tx).await.unwrap();
        assert_eq!(count, 1);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            TrackerEvent::ScanFailed(ScanError::Metadata { path, .. }) if path.ends_with("ch1")
        ));
        assert!(matches!(
            &events[1],
            TrackerEvent::Discovered(source) if source.comic_info.title == "ok"
        ));
    }

    #[tokio::test]
    async fn test_missing_root_is_error() {
        let root = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = scan_library(&root.path().join("missing"), &tx).await;
        assert!(matches!(result, Err(ScanError::Io { .. })));
    }

    #[tokio::test]
    async fn test_build_source_without_metadata() {
        let root = TempDir::new().unwrap();
        assert!(build_source(root.path()).await.unwrap().is_none());
    }
}
