//! Page discovery and ordering inside a chapter directory.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Raster image extensions recognised as pages.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// First run of digits in a file name.
static PAGE_NUMBER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("Invalid PAGE_NUMBER_REGEX"));

/// Lists page images directly under `dir`, in page order.
pub async fn list_pages(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut pages = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if is_image(&name) {
            pages.push(name);
        }
    }

    sort_pages(&mut pages);
    Ok(pages)
}

/// Whether the file name has one of the known image extensions.
pub fn is_image(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Value of the first integer in the name, or 0 when there is none.
pub fn page_number(file_name: &str) -> u64 {
    PAGE_NUMBER_REGEX
        .find(file_name)
        .map(|m| m.as_str().parse().unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Sorts by page number; equal numbers fall back to the name.
pub fn sort_pages(pages: &mut [String]) {
    pages.sort_by(|a, b| page_number(a).cmp(&page_number(b)).then_with(|| a.cmp(b)));
}

/// Output name for a translated page: the original name plus the
/// subtype of the translated MIME type (`001.jpg` + `image/png` -> `001.jpg.png`).
pub fn translated_name(original: &str, mime_type: &str) -> String {
    let ext = mime_type
        .split_once('/')
        .map(|(_, subtype)| subtype.trim())
        .filter(|subtype| !subtype.is_empty())
        .unwrap_or("bin");
    format!("{}.{}", original, ext)
}
