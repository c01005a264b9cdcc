//! Image upload validation.
//!
//! Every image entering a session passes through [`load_image`] or
//! [`validate_image`], so the media-type and size rules hold before any
//! request is built.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};
use crate::message::ImageRef;

/// Default upload ceiling (10 MB).
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Image formats recognized from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG image format.
    Png,
    /// JPEG image format.
    Jpg,
    /// GIF image format.
    Gif,
    /// WebP image format.
    Webp,
    /// BMP image format.
    Bmp,
}

impl ImageFormat {
    /// Detects the format from a file extension.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpg),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            "bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    /// Detects the format from a file path.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// The media type sent to the backend.
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::Jpg => write!(f, "jpg"),
            Self::Gif => write!(f, "gif"),
            Self::Webp => write!(f, "webp"),
            Self::Bmp => write!(f, "bmp"),
        }
    }
}

/// Reads an image file and validates it.
///
/// The size is checked against file metadata before the bytes are read.
pub fn load_image(path: impl AsRef<Path>, max_bytes: usize) -> Result<ImageRef> {
    let path = path.as_ref();

    let Some(format) = ImageFormat::from_path(path) else {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("unknown");
        return Err(TutorError::unsupported_media_type(format!(
            "application/{ext}"
        )));
    };

    let metadata = std::fs::metadata(path)
        .map_err(|e| TutorError::image_unreadable(path, e.to_string()))?;
    let size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
    if size > max_bytes {
        return Err(TutorError::image_too_large(size, max_bytes));
    }

    let bytes = std::fs::read(path).map_err(|e| TutorError::image_unreadable(path, e.to_string()))?;
    let image = ImageRef::new(bytes, format.mime_type(), path.display().to_string());
    validate_image(&image, max_bytes)?;
    Ok(image)
}

/// Checks an image obtained some other way (pasted bytes, camera capture).
pub fn validate_image(image: &ImageRef, max_bytes: usize) -> Result<()> {
    if !image.mime_type.starts_with("image/") {
        return Err(TutorError::unsupported_media_type(&image.mime_type));
    }
    if image.is_empty() {
        return Err(TutorError::image_unreadable(&image.preview, "file is empty"));
    }
    if image.len() > max_bytes {
        return Err(TutorError::image_too_large(image.len(), max_bytes));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ImageFormat::from_extension("PNG"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_extension("jpeg"), Some(ImageFormat::Jpg));
        assert_eq!(ImageFormat::from_extension("txt"), None);
        assert_eq!(ImageFormat::Jpg.mime_type(), "image/jpeg");
    }

    #[test]
    fn test_load_image_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"\x89PNG fake")
            .unwrap();

        let image = load_image(&path, DEFAULT_MAX_IMAGE_BYTES).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.bytes(), b"\x89PNG fake");
        assert!(image.preview.ends_with("page.png"));
    }

    #[test]
    fn test_load_image_rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.jpg");
        std::fs::write(&path, vec![0u8; 64]).unwrap();

        let err = load_image(&path, 32).unwrap_err();
        assert!(matches!(
            err,
            TutorError::ImageTooLarge {
                size_bytes: 64,
                limit_bytes: 32,
                ..
            }
        ));
    }

    #[test]
    fn test_load_image_rejects_non_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        let err = load_image(&path, DEFAULT_MAX_IMAGE_BYTES).unwrap_err();
        assert!(matches!(err, TutorError::UnsupportedMediaType { .. }));
    }

    #[test]
    fn test_load_image_missing_file() {
        let err = load_image("/nonexistent/page.png", DEFAULT_MAX_IMAGE_BYTES).unwrap_err();
        assert!(matches!(err, TutorError::ImageUnreadable { .. }));
        assert!(err.is_validation());
    }

    #[test]
    fn test_validate_image_media_type() {
        let pdf = ImageRef::new(vec![1], "application/pdf", "doc.pdf");
        assert!(validate_image(&pdf, DEFAULT_MAX_IMAGE_BYTES).is_err());

        let png = ImageRef::new(vec![1], "image/png", "a.png");
        assert!(validate_image(&png, DEFAULT_MAX_IMAGE_BYTES).is_ok());
    }
}
