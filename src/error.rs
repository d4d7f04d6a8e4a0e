//! Error types for the Biboo tracker.
//!
//! Uses `thiserror` for structured error definitions that provide
//! clear context about what went wrong.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid config value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Config directory not found
    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Error type for reading `ComicInfo.xml` descriptors.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// Failed to read the descriptor file
    #[error("Failed to read metadata: {0}")]
    Io(#[from] std::io::Error),

    /// The descriptor is not well-formed XML
    #[error("Malformed metadata: {0}")]
    Malformed(String),
}

/// Error type for translation backend calls.
#[derive(Error, Debug)]
pub enum TranslationError {
    /// HTTP request to the backend failed
    #[error("API request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Backend answered with a non-200 status
    #[error("Translation API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// The forwarded JSON config could not be read
    #[error("Failed to read translator config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The forwarded JSON config is not valid JSON
    #[error("Invalid translator config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The call was aborted by the caller
    #[error("Translation cancelled")]
    Cancelled,
}

/// Error type for converting one source into its local output.
#[derive(Error, Debug)]
pub enum ConversionError {
    /// Filesystem operation failed
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Translating a page failed
    #[error("Failed to translate {image}: {source}")]
    Translation {
        image: String,
        source: TranslationError,
    },

    /// The chapter directory holds no page images
    #[error("No images found in {0}")]
    NoPages(PathBuf),

    /// Shutdown was requested mid-conversion
    #[error("Conversion cancelled")]
    Cancelled,
}

impl ConversionError {
    /// Builds a closure that wraps an I/O error with the path it happened at.
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// Error type for walking the lookup tree.
#[derive(Error, Debug)]
pub enum ScanError {
    /// A directory could not be listed
    #[error("Failed to list {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A chapter's metadata could not be read
    #[error("Failed to read metadata in {path}: {source}")]
    Metadata {
        path: PathBuf,
        source: MetadataError,
    },
}
