//! Proof Media Storage
//! Mission: Accept photo/video uploads, store them under a dated key, hand back a
//! public URL that proofs can reference.

use crate::app::AppState;
use crate::auth::Claims;
use crate::error::{ApiError, ApiResult};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    Extension, Json,
};
use chrono::{Datelike, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMedia {
    pub key: String,
    pub url: String,
    pub content_type: String,
    pub size: usize,
}

pub struct MediaStore {
    root: PathBuf,
    public_base_url: String,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create media dir {}", root.display()))?;
        Ok(Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write the bytes under `<yyyy>/<mm>/<uuid>.<ext>`.
    pub async fn store(&self, content_type: &str, bytes: &[u8]) -> Result<StoredMedia, ApiError> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let ext = extension_for(&mime).ok_or_else(|| {
            ApiError::bad_request(format!("Unsupported media type: {}", content_type))
        })?;
        if bytes.is_empty() {
            return Err(ApiError::bad_request("Empty upload"));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(ApiError::TooLarge("Upload exceeds 50 MB".to_string()));
        }

        let now = Utc::now();
        let key = format!(
            "{:04}/{:02}/{}.{}",
            now.year(),
            now.month(),
            Uuid::new_v4(),
            ext
        );
        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create media subdirectory")?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(StoredMedia {
            url: format!("{}/media/{}", self.public_base_url, key),
            key,
            content_type: mime,
            size: bytes.len(),
        })
    }
}

fn extension_for(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "video/mp4" => Some("mp4"),
        "video/quicktime" => Some("mov"),
        "video/webm" => Some("webm"),
        _ => None,
    }
}

/// POST /api/uploads - raw body, `Content-Type` names the media type
pub async fn upload(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<StoredMedia>)> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("Missing Content-Type"))?;

    let stored = state.media.store(content_type, &body).await?;
    info!(
        key = %stored.key,
        size = stored.size,
        uploader = %claims.email,
        "Media uploaded"
    );
    Ok((StatusCode::CREATED, Json(stored)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_writes_file_and_builds_url() {
        let dir = TempDir::new().unwrap();
        let store = MediaStore::new(dir.path(), "https://app.example.com/").unwrap();

        let stored = store
            .store("image/PNG; charset=binary", b"\x89PNG fake")
            .await
            .unwrap();
        assert!(stored.key.ends_with(".png"));
        assert_eq!(stored.content_type, "image/png");
        assert!(stored
            .url
            .starts_with("https://app.example.com/media/"));

        let on_disk = std::fs::read(dir.path().join(&stored.key)).unwrap();
        assert_eq!(on_disk, b"\x89PNG fake");
    }

    #[tokio::test]
    async fn test_rejects_unsupported_and_empty() {
        let dir = TempDir::new().unwrap();
        let store = MediaStore::new(dir.path(), "http://localhost").unwrap();

        let err = store.store("application/pdf", b"%PDF").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = store.store("video/mp4", b"").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
