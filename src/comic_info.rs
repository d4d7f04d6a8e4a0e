//! `ComicInfo.xml` metadata reader.
//!
//! Downloaded chapters carry a ComicInfo descriptor. Only the direct
//! children of the `<ComicInfo>` root are read; anything missing falls
//! back to a placeholder so downstream paths are always defined.

use crate::error::MetadataError;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Name of the descriptor file inside a chapter directory.
pub const COMIC_INFO_FILE: &str = "ComicInfo.xml";

/// Placeholder for absent scalar fields.
pub const NOT_AVAILABLE: &str = "N/A";

const ROOT_ELEMENT: &str = "ComicInfo";
const CATEGORIES_ELEMENT: &str = "ty:Categories";

/// Normalized chapter metadata.
///
/// Serialized as-is into the series `details.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComicInfo {
    pub title: String,
    pub series: String,
    pub author: String,
    pub artist: String,
    pub description: String,
    pub genre: Vec<String>,
    pub category: Vec<String>,
}

impl ComicInfo {
    /// Returns true if `tag` is one of the categories.
    pub fn has_category(&self, tag: &str) -> bool {
        self.category.iter().any(|c| c == tag)
    }

    /// Label used in log lines.
    pub fn label(&self) -> String {
        format!("{}/{}", self.series, self.title)
    }
}

/// Parses a ComicInfo document.
pub fn parse_comic_info(xml: &str) -> Result<ComicInfo, MetadataError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut fields: HashMap<String, String> = HashMap::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                stack.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Empty(ref e)) => {
                if is_root(&stack) {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    fields.entry(name).or_default();
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some(field) = root_field(&stack) {
                    let text = e
                        .unescape()
                        .map_err(|err| MetadataError::Malformed(err.to_string()))?;
                    fields.entry(field.to_string()).or_default().push_str(&text);
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(field) = root_field(&stack) {
                    let text = String::from_utf8_lossy(e.as_ref());
                    fields.entry(field.to_string()).or_default().push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(MetadataError::Malformed(format!(
                    "at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(MetadataError::Malformed(format!(
            "unclosed element <{}>",
            open
        )));
    }

    let mut scalar = |name: &str| {
        fields
            .remove(name)
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    };

    let title = scalar("Title");
    let series = scalar("Series");
    let author = scalar("Writer");
    let artist = scalar("Penciller");
    let description = scalar("Summary");

    Ok(ComicInfo {
        title,
        series,
        author,
        artist,
        description,
        genre: split_list(fields.get("Genre").map(String::as_str).unwrap_or("")),
        category: split_list(
            fields
                .get(CATEGORIES_ELEMENT)
                .map(String::as_str)
                .unwrap_or(""),
        ),
    })
}

/// Reads and parses the descriptor at `path`.
pub async fn read_comic_info(path: &Path) -> Result<ComicInfo, MetadataError> {
    let bytes = tokio::fs::read(path).await?;
    parse_comic_info(&String::from_utf8_lossy(&bytes))
}

fn is_root(stack: &[String]) -> bool {
    matches!(stack, [root] if root == ROOT_ELEMENT)
}

fn root_field(stack: &[String]) -> Option<&str> {
    match stack {
        [root, field] if root == ROOT_ELEMENT => Some(field.as_str()),
        _ => None,
    }
}

/// Splits a comma-separated list, dropping blank entries.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
