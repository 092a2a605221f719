//! # Media Handle Module
//!
//! Questo modulo definisce il handle immutabile `MediaFile` consegnato dal layer UI.
//!
//! ## Responsabilità:
//! - Nome, dimensione, mime type e accesso ai byte del media
//! - Payload in memoria (`Bytes`) oppure lazy su disco, letto in modo asincrono
//! - Lettura del payload con timeout limitato
//! - Classificazione mime type (immagine vs video) e formati supportati
//! - Utilità per dimensioni human-readable e percentuali di riduzione
//!
//! ## Formati supportati:
//! - **Immagini**: JPEG, PNG, GIF, WebP, BMP
//! - **Video**: MP4, WebM, MOV (anche `video/quicktime`), AVI, MKV

use crate::error::CompressionError;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::debug;

const SUPPORTED_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
    "video/mp4",
    "video/webm",
    "video/mov",
    "video/quicktime",
    "video/avi",
    "video/mkv",
];

/// Broad category of a media file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let mime = mime_type.to_ascii_lowercase();
        if mime.starts_with("video/") {
            Some(Self::Video)
        } else if mime.starts_with("image/") {
            Some(Self::Image)
        } else {
            None
        }
    }
}

/// Where the bytes of a media file live
#[derive(Debug, Clone)]
enum Payload {
    Memory(Bytes),
    /// Read lazily, only once a job actually needs the bytes
    File(PathBuf),
}

/// Immutable handle to a selected image or video
#[derive(Debug, Clone)]
pub struct MediaFile {
    name: String,
    byte_size: u64,
    mime_type: String,
    payload: Payload,
}

impl MediaFile {
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            byte_size: bytes.len() as u64,
            mime_type: mime_type.into(),
            payload: Payload::Memory(bytes),
        }
    }

    /// Build a handle backed by a file on disk; only the metadata is read here
    pub async fn from_path(path: &Path, mime_type: impl Into<String>) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "media".to_string());

        Ok(Self {
            name,
            byte_size: metadata.len(),
            mime_type: mime_type.into(),
            payload: Payload::File(path.to_path_buf()),
        })
    }

    /// Handle that reports `byte_size` regardless of how many bytes it carries
    #[cfg(test)]
    pub(crate) fn with_reported_size(name: &str, mime_type: &str, byte_size: u64, bytes: Bytes) -> Self {
        Self {
            name: name.to_string(),
            byte_size,
            mime_type: mime_type.to_string(),
            payload: Payload::Memory(bytes),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size reported when the media was selected
    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_mime(&self.mime_type)
    }

    pub fn is_supported(&self) -> bool {
        let mime = self.mime_type.to_ascii_lowercase();
        SUPPORTED_TYPES.contains(&mime.as_str())
    }

    /// Obtain the raw bytes, failing with `Timeout` if the read does not finish within `limit`.
    ///
    /// A file read from disk may hold at most `max_bytes` and must still have the size it
    /// had when selected.
    pub async fn read_bytes(&self, limit: Duration, max_bytes: u64) -> Result<Bytes, CompressionError> {
        match &self.payload {
            Payload::Memory(bytes) => Ok(bytes.clone()),
            Payload::File(path) => {
                debug!("Reading payload for {} from {}", self.name, path.display());
                let data = tokio::time::timeout(limit, read_at_most(path, max_bytes))
                    .await
                    .map_err(|_| CompressionError::timeout("Reading media payload", limit))?
                    .map_err(|e| {
                        CompressionError::PayloadRead(format!("{}: {}", path.display(), e))
                    })?;

                let size = data.len() as u64;
                if size > max_bytes {
                    return Err(CompressionError::FileTooLarge { size, limit: max_bytes });
                }
                if size != self.byte_size {
                    return Err(CompressionError::PayloadRead(format!(
                        "{} changed since it was selected ({} bytes, now {})",
                        path.display(),
                        self.byte_size,
                        size
                    )));
                }
                Ok(Bytes::from(data))
            }
        }
    }
}

/// Read up to `max_bytes + 1` bytes, enough to tell that a file is over the limit
async fn read_at_most(path: &Path, max_bytes: u64) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut data = Vec::new();
    file.take(max_bytes.saturating_add(1)).read_to_end(&mut data).await?;
    Ok(data)
}

/// Guess a mime type from a file extension
pub fn mime_from_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/avi",
        "mkv" => "video/mkv",
        _ => return None,
    };
    Some(mime)
}

/// Get human-readable file size
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Calculate percentage reduction
pub fn calculate_reduction(original_size: u64, new_size: u64) -> f64 {
    if original_size == 0 {
        0.0
    } else {
        ((original_size as f64 - new_size as f64) / original_size as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_kind_from_mime() {
        assert_eq!(MediaKind::from_mime("video/mp4"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_mime("IMAGE/PNG"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime("application/pdf"), None);
    }

    #[test]
    fn test_supported_types() {
        let video = MediaFile::from_bytes("a.mp4", "video/mp4", Bytes::from_static(b"x"));
        assert!(video.is_supported());
        let quicktime = MediaFile::from_bytes("a.mov", "video/quicktime", Bytes::new());
        assert!(quicktime.is_supported());
        let pdf = MediaFile::from_bytes("a.pdf", "application/pdf", Bytes::new());
        assert!(!pdf.is_supported());
    }

    #[test]
    fn test_mime_from_path() {
        assert_eq!(mime_from_path(Path::new("clip.MP4")), Some("video/mp4"));
        assert_eq!(mime_from_path(Path::new("photo.jpeg")), Some("image/jpeg"));
        assert_eq!(mime_from_path(Path::new("notes.txt")), None);
        assert_eq!(mime_from_path(Path::new("noext")), None);
    }

    #[tokio::test]
    async fn test_lazy_payload_is_read_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");
        tokio::fs::write(&path, b"video-bytes").await.unwrap();

        let media = MediaFile::from_path(&path, "video/mp4").await.unwrap();
        assert_eq!(media.name(), "clip.mp4");
        assert_eq!(media.byte_size(), 11);

        let bytes = media.read_bytes(Duration::from_secs(5), 1024).await.unwrap();
        assert_eq!(&bytes[..], b"video-bytes");
    }

    #[tokio::test]
    async fn test_missing_file_is_a_read_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.mp4");
        tokio::fs::write(&path, b"x").await.unwrap();
        let media = MediaFile::from_path(&path, "video/mp4").await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();

        let err = media.read_bytes(Duration::from_secs(5), 1024).await.unwrap_err();
        assert!(matches!(err, CompressionError::PayloadRead(_)));
    }

    #[tokio::test]
    async fn test_file_grown_past_limit_is_too_large() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");
        tokio::fs::write(&path, vec![0u8; 10]).await.unwrap();
        let media = MediaFile::from_path(&path, "video/mp4").await.unwrap();
        tokio::fs::write(&path, vec![0u8; 64]).await.unwrap();

        let err = media.read_bytes(Duration::from_secs(5), 32).await.unwrap_err();
        assert_eq!(err, CompressionError::FileTooLarge { size: 33, limit: 32 });
    }

    #[tokio::test]
    async fn test_file_changed_since_selection() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");
        tokio::fs::write(&path, vec![0u8; 10]).await.unwrap();
        let media = MediaFile::from_path(&path, "video/mp4").await.unwrap();
        tokio::fs::write(&path, vec![0u8; 12]).await.unwrap();

        let err = media.read_bytes(Duration::from_secs(5), 1024).await.unwrap_err();
        match err {
            CompressionError::PayloadRead(message) => assert!(message.contains("changed since it was selected")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(60 * 1024 * 1024), "60.00 MB");
    }

    #[test]
    fn test_calculate_reduction() {
        assert_eq!(calculate_reduction(0, 10), 0.0);
        assert_eq!(calculate_reduction(100, 25), 75.0);
    }
}
