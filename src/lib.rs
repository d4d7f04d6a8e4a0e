//! Biboo - automatic manga translation tracker.
//!
//! This library provides functionality for:
//! - Scanning a downloaded manga library for chapters tagged for translation
//! - Translating chapter pages through an image translation backend
//! - Publishing translated chapters into a local library exactly once

pub mod comic_info;
pub mod config;
pub mod converter;
pub mod error;
pub mod library;
pub mod pages;
pub mod queue;
pub mod scanner;
pub mod tracker;
pub mod translator;

// Re-export commonly used types
pub use comic_info::ComicInfo;
pub use config::Config;
pub use converter::{Converter, LocalOutput};
pub use error::{ConfigError, ConversionError, MetadataError, ScanError, TranslationError};
pub use library::Library;
pub use scanner::Source;
pub use tracker::{Tracker, TrackerEvent, TrackerStats};
pub use translator::{ApiTranslator, ImageBlob, Translator};
