//! Image translation client.
//!
//! Pages are sent one at a time to a manga-image-translator compatible
//! backend as a base64 data URL, together with a JSON config blob that is
//! forwarded verbatim. The backend answers with the translated image.

use crate::config::ApiConfig;
use crate::error::TranslationError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// MIME type used when neither the backend nor the bytes say otherwise.
const FALLBACK_MIME: &str = "application/octet-stream";

/// An image together with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageBlob {
    /// Create a blob from raw bytes and a MIME type.
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Create a blob, guessing the MIME type from a file name.
    pub fn from_file_name(bytes: Vec<u8>, file_name: &str) -> Self {
        let mime_type = mime_guess::from_path(file_name)
            .first_raw()
            .unwrap_or(FALLBACK_MIME);
        Self::new(bytes, mime_type)
    }

    /// Encodes the image as a `data:` URL.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            STANDARD.encode(&self.bytes)
        )
    }
}

/// Something that turns one image into one translated image.
///
/// Implementations do not retry; a failure is final for that image.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate a single image.
    async fn translate(&self, image: &ImageBlob) -> Result<ImageBlob, TranslationError>;
}

/// Runs `translator.translate` but gives up as soon as `cancel` fires.
///
/// Dropping the pending call aborts the underlying request.
pub async fn translate_cancellable(
    translator: &dyn Translator,
    image: &ImageBlob,
    cancel: &CancellationToken,
) -> Result<ImageBlob, TranslationError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TranslationError::Cancelled),
        result = translator.translate(image) => result,
    }
}

/// Request body for `POST /translate/image`.
#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    image: String,
    config: &'a serde_json::Value,
}

/// HTTP translator talking to the translation backend.
#[derive(Debug, Clone)]
pub struct ApiTranslator {
    /// HTTP client for API requests.
    client: Client,
    /// Backend base URL without trailing slash.
    endpoint: String,
    /// JSON config forwarded with every request.
    config_path: PathBuf,
}

impl ApiTranslator {
    /// Create a new translator from API settings.
    pub fn new(config: &ApiConfig) -> Result<Self, TranslationError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self::with_client(
            client,
            &config.endpoint,
            config.config_path.clone(),
        ))
    }

    /// Create a translator around an existing client.
    pub fn with_client(client: Client, endpoint: &str, config_path: PathBuf) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            config_path,
        }
    }

    /// Reads the config blob. Done per call so edits apply without restart.
    async fn load_config(&self) -> Result<serde_json::Value, TranslationError> {
        read_json(&self.config_path).await
    }
}

async fn read_json(path: &Path) -> Result<serde_json::Value, TranslationError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| TranslationError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_slice(&bytes).map_err(|source| TranslationError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl Translator for ApiTranslator {
    async fn translate(&self, image: &ImageBlob) -> Result<ImageBlob, TranslationError> {
        let config = self.load_config().await?;
        let request = TranslateRequest {
            image: image.to_data_url(),
            config: &config,
        };

        let url = format!("{}/translate/image", self.endpoint);
        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            let message = if text.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown").to_string()
            } else {
                text
            };
            return Err(TranslationError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        let bytes = response.bytes().await?.to_vec();
        let mime_type = declared.unwrap_or_else(|| sniff_mime(&bytes).to_string());

        Ok(ImageBlob { bytes, mime_type })
    }
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    infer::get(bytes)
        .map(|kind| kind.mime_type())
        .unwrap_or(FALLBACK_MIME)
}
