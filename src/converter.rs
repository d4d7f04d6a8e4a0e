//! Converts one downloaded chapter into a translated local chapter.
//!
//! Pages are translated one after another into a staging directory. Only
//! once every page succeeded is the staging directory moved onto the
//! destination, followed by the series details, the cover and finally the
//! `completed` marker. A crash or error before the marker is written leaves
//! the chapter eligible for another attempt.

use crate::comic_info::ComicInfo;
use crate::error::{ConversionError, TranslationError};
use crate::library::{COVER_FILE, DETAILS_FILE, Library};
use crate::pages::{list_pages, translated_name};
use crate::scanner::Source;
use crate::translator::{ImageBlob, Translator, translate_cancellable};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A published, translated chapter.
#[derive(Debug, Clone)]
pub struct LocalOutput {
    /// Destination directory of the chapter.
    pub output: PathBuf,
    /// Metadata as written to `details.json` (title collapsed to the series).
    pub comic_info: ComicInfo,
    /// Number of translated pages.
    pub pages: usize,
}

/// Runs the translate-and-publish routine for single sources.
#[derive(Clone)]
pub struct Converter {
    translator: Arc<dyn Translator>,
    library: Library,
}

impl Converter {
    pub fn new(translator: Arc<dyn Translator>, library: Library) -> Self {
        Self {
            translator,
            library,
        }
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    /// Translates every page of `source` and publishes the result.
    pub async fn convert(
        &self,
        source: &Source,
        cancel: &CancellationToken,
    ) -> Result<LocalOutput, ConversionError> {
        let info = &source.comic_info;
        let manga = info.label();
        let staging = self.library.staging(info);
        let destination = self.library.destination(info);

        info!(%manga, "starting translation process");

        reset_dir(&staging).await?;

        let outcome = async {
            let (pages, cover) = self.translate_pages(source, &staging, cancel).await?;
            self.publish(info, &staging, &destination, cover).await?;
            Ok::<_, ConversionError>(pages)
        }
        .await;

        let pages = match outcome {
            Ok(pages) => pages,
            Err(e) => {
                discard(&staging).await;
                return Err(e);
            }
        };

        info!(%manga, pages, "successfully processed images");

        Ok(LocalOutput {
            output: destination,
            comic_info: local_info(info),
            pages,
        })
    }

    /// Translates pages in order, returning the count and the first result.
    async fn translate_pages(
        &self,
        source: &Source,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<(usize, Option<ImageBlob>), ConversionError> {
        let manga = source.comic_info.label();
        let pages = list_pages(&source.path)
            .await
            .map_err(ConversionError::io(&source.path))?;

        if pages.is_empty() {
            return Err(ConversionError::NoPages(source.path.clone()));
        }

        info!(%manga, count = pages.len(), "found images to process");

        let mut first: Option<ImageBlob> = None;

        for page in &pages {
            if cancel.is_cancelled() {
                return Err(ConversionError::Cancelled);
            }

            let page_path = source.path.join(page);
            let bytes = tokio::fs::read(&page_path)
                .await
                .map_err(ConversionError::io(&page_path))?;
            let image = ImageBlob::from_file_name(bytes, page);

            info!(%manga, %page, "translating");
            let translated = match translate_cancellable(self.translator.as_ref(), &image, cancel)
                .await
            {
                Ok(translated) => translated,
                Err(TranslationError::Cancelled) => return Err(ConversionError::Cancelled),
                Err(source) => {
                    error!(%manga, %page, error = %source, "error while translating");
                    return Err(ConversionError::Translation {
                        image: page.clone(),
                        source,
                    });
                }
            };

            let out_path = staging.join(translated_name(page, &translated.mime_type));
            tokio::fs::write(&out_path, &translated.bytes)
                .await
                .map_err(ConversionError::io(&out_path))?;
            info!(%manga, %page, "translated");

            if first.is_none() {
                first = Some(translated);
            }
        }

        Ok((pages.len(), first))
    }

    /// Moves the staged pages into place and writes series-level files.
    /// The completed marker is always the last write.
    async fn publish(
        &self,
        info: &ComicInfo,
        staging: &Path,
        destination: &Path,
        cover: Option<ImageBlob>,
    ) -> Result<(), ConversionError> {
        let manga = info.label();

        move_dir(staging, destination).await?;

        let series_dir = self.library.series_dir(info);
        let details_path = series_dir.join(DETAILS_FILE);
        info!(%manga, path = %details_path.display(), "writing details");
        let details = serde_json::to_vec(&local_info(info))
            .map_err(std::io::Error::from)
            .map_err(ConversionError::io(&details_path))?;
        tokio::fs::write(&details_path, details)
            .await
            .map_err(ConversionError::io(&details_path))?;

        let cover_path = series_dir.join(COVER_FILE);
        let has_cover = tokio::fs::try_exists(&cover_path)
            .await
            .map_err(ConversionError::io(&cover_path))?;
        if let (false, Some(cover)) = (has_cover, cover) {
            info!(%manga, path = %cover_path.display(), "generating cover image");
            tokio::fs::write(&cover_path, &cover.bytes)
                .await
                .map_err(ConversionError::io(&cover_path))?;
        }

        let marker = self.library.completed_marker(info);
        tokio::fs::write(&marker, b"")
            .await
            .map_err(ConversionError::io(&marker))?;

        Ok(())
    }
}

/// Series-level metadata: the chapter title is replaced by the series.
fn local_info(info: &ComicInfo) -> ComicInfo {
    ComicInfo {
        title: info.series.clone(),
        ..info.clone()
    }
}

/// Empties `dir`, creating it if needed.
async fn reset_dir(dir: &Path) -> Result<(), ConversionError> {
    if tokio::fs::try_exists(dir)
        .await
        .map_err(ConversionError::io(dir))?
    {
        tokio::fs::remove_dir_all(dir)
            .await
            .map_err(ConversionError::io(dir))?;
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(ConversionError::io(dir))
}

async fn discard(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        debug!(path = %dir.display(), error = %e, "could not remove staging directory");
    }
}

/// Replaces `to` with `from`.
///
/// Uses a rename when both sides live on the same filesystem. Otherwise the
/// tree is copied and the source removed; an interruption during that
/// fallback can leave `to` partially written.
pub(crate) async fn move_dir(from: &Path, to: &Path) -> Result<(), ConversionError> {
    if tokio::fs::try_exists(to)
        .await
        .map_err(ConversionError::io(to))?
    {
        tokio::fs::remove_dir_all(to)
            .await
            .map_err(ConversionError::io(to))?;
    }
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(ConversionError::io(parent))?;
    }

    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(
                from = %from.display(),
                to = %to.display(),
                error = %e,
                "rename failed, copying"
            );
            copy_and_remove(from, to).await
        }
    }
}

/// Fallback for [`move_dir`] when `from` and `to` cannot be renamed,
/// e.g. across devices. `to` must not exist yet.
async fn copy_and_remove(from: &Path, to: &Path) -> Result<(), ConversionError> {
    if let Err(e) = copy_dir_all(from, to).await {
        discard(to).await;
        return Err(e);
    }
    tokio::fs::remove_dir_all(from)
        .await
        .map_err(ConversionError::io(from))
}

fn copy_dir_all<'a>(from: &'a Path, to: &'a Path) -> BoxFuture<'a, Result<(), ConversionError>> {
    async move {
        tokio::fs::create_dir_all(to)
            .await
            .map_err(ConversionError::io(to))?;

        let mut entries = tokio::fs::read_dir(from)
            .await
            .map_err(ConversionError::io(from))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(ConversionError::io(from))?
        {
            let path = entry.path();
            let target = to.join(entry.file_name());
            let file_type = entry
                .file_type()
                .await
                .map_err(ConversionError::io(&path))?;
            if file_type.is_dir() {
                copy_dir_all(&path, &target).await?;
            } else {
                tokio::fs::copy(&path, &target)
                    .await
                    .map_err(ConversionError::io(&path))?;
            }
        }
        Ok(())
    }
    .boxed()
}
