use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ImageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Gif => "gif",
            Self::Webp => "webp",
        }
    }

    /// Map a declared format (extension, mime type, or name) to its tag.
    pub fn normalize(raw: &str) -> Result<Self, String> {
        let lowered = raw.trim().to_ascii_lowercase();
        let name = lowered
            .strip_prefix("image/")
            .unwrap_or(&lowered)
            .trim_start_matches('.');
        match name {
            "" => Err("image format is empty".to_string()),
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" | "pjpeg" => Ok(Self::Jpeg),
            "gif" => Ok(Self::Gif),
            "webp" => Ok(Self::Webp),
            other => Err(format!("unsupported image format {other:?}")),
        }
    }

    /// Sniff the format from magic bytes.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else {
            None
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base64 image artifact as stored under `images/*-base64`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedImage {
    pub format: ImageFormat,
    pub data: String,
    pub byte_size: usize,
}

impl EncodedImage {
    /// Encode raw image bytes, resolving the format from `declared` or the
    /// bytes themselves. A declared format that contradicts the bytes wins
    /// only when the bytes are unrecognizable.
    pub fn from_bytes(bytes: &[u8], declared: Option<&str>) -> Result<Self, String> {
        if bytes.is_empty() {
            return Err("image is empty".to_string());
        }
        let detected = ImageFormat::detect(bytes);
        let format = match (declared, detected) {
            (Some(raw), Some(detected)) => {
                let declared = ImageFormat::normalize(raw)?;
                if declared != detected {
                    return Err(format!(
                        "declared image format {declared} does not match content ({detected})"
                    ));
                }
                declared
            }
            (Some(raw), None) => ImageFormat::normalize(raw)?,
            (None, Some(detected)) => detected,
            (None, None) => return Err("image format is empty and cannot be detected".to_string()),
        };
        Ok(Self {
            format,
            data: STANDARD.encode(bytes),
            byte_size: bytes.len(),
        })
    }

    pub fn decode(&self) -> Result<Vec<u8>, String> {
        STANDARD
            .decode(self.data.as_bytes())
            .map_err(|err| format!("image data is not valid base64: {err}"))
    }
}
