use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::api::ApiError;

/// Where the garment image comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes {
        data: Bytes,
        file_name: Option<String>,
    },
}

impl ImageSource {
    pub fn bytes_named(data: impl Into<Bytes>, file_name: &str) -> Self {
        ImageSource::Bytes {
            data: data.into(),
            file_name: Some(file_name.to_string()),
        }
    }
}

impl From<&str> for ImageSource {
    fn from(path: &str) -> Self {
        ImageSource::Path(PathBuf::from(path))
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        ImageSource::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(data: Vec<u8>) -> Self {
        ImageSource::Bytes {
            data: Bytes::from(data),
            file_name: None,
        }
    }
}

impl From<&[u8]> for ImageSource {
    fn from(data: &[u8]) -> Self {
        ImageSource::Bytes {
            data: Bytes::copy_from_slice(data),
            file_name: None,
        }
    }
}

impl From<Bytes> for ImageSource {
    fn from(data: Bytes) -> Self {
        ImageSource::Bytes {
            data,
            file_name: None,
        }
    }
}

/// Image formats the measurement service accepts, detected by magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
    Gif,
    Bmp,
}

impl ImageFormat {
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageFormat::Png)
        } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            Some(ImageFormat::Webp)
        } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else if data.starts_with(b"BM") {
            Some(ImageFormat::Bmp)
        } else {
            None
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Bmp => "image/bmp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
            ImageFormat::Gif => "gif",
            ImageFormat::Bmp => "bmp",
        }
    }
}

/// A validated image ready for upload. Built per call, never persisted.
#[derive(Debug, Clone)]
pub struct MeasurementRequest {
    pub image_bytes: Bytes,
    pub content_type: String,
    pub file_name: String,
}

impl MeasurementRequest {
    /// Read and validate an image. No network I/O happens here, so every
    /// `InvalidInput` is raised before a request is sent.
    pub async fn from_source(source: ImageSource, max_bytes: usize) -> Result<Self, ApiError> {
        let (data, file_name) = match source {
            ImageSource::Path(path) => {
                let unreadable = |e: std::io::Error| {
                    ApiError::InvalidInput(format!("cannot read image {}: {e}", path.display()))
                };
                let size = tokio::fs::metadata(&path).await.map_err(unreadable)?.len();
                if size > max_bytes as u64 {
                    return Err(oversize(size, max_bytes));
                }
                let data = tokio::fs::read(&path).await.map_err(unreadable)?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned());
                (Bytes::from(data), name)
            }
            ImageSource::Bytes { data, file_name } => (data, file_name),
        };

        Self::validate(data, file_name, max_bytes)
    }

    fn validate(data: Bytes, file_name: Option<String>, max_bytes: usize) -> Result<Self, ApiError> {
        if data.is_empty() {
            return Err(ApiError::InvalidInput("image is empty".to_string()));
        }
        if data.len() > max_bytes {
            return Err(oversize(data.len() as u64, max_bytes));
        }
        let format = ImageFormat::detect(&data).ok_or_else(|| {
            ApiError::InvalidInput("unrecognized image format (expected JPEG, PNG, WebP, GIF or BMP)".to_string())
        })?;

        let file_name = file_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("garment.{}", format.extension()));

        Ok(Self {
            image_bytes: data,
            content_type: format.content_type().to_string(),
            file_name,
        })
    }
}

fn oversize(size: u64, max_bytes: usize) -> ApiError {
    ApiError::InvalidInput(format!("image is {size} bytes, maximum is {max_bytes}"))
}
