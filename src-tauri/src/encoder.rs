//! Image files to base64 payloads, and the data URLs built from them.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const FALLBACK_MIME: &str = "image/png";

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is empty", path.display())]
    Empty { path: PathBuf },
    #[error("malformed data URL")]
    MalformedDataUrl,
    #[error("base64 decode: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A file picked for one of the upload slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFile {
    pub path: PathBuf,
    pub mime_type: String,
}

/// Base64 payload (no `data:` prefix) plus its MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataUrl {
    pub mime_type: String,
    pub data: String,
}

impl DataUrl {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(mime_type, B64.encode(bytes))
    }

    pub fn parse(s: &str) -> Result<Self, EncodeError> {
        let rest = s.strip_prefix("data:").ok_or(EncodeError::MalformedDataUrl)?;
        let (meta, data) = rest.split_once(',').ok_or(EncodeError::MalformedDataUrl)?;
        let mime_type = meta
            .strip_suffix(";base64")
            .ok_or(EncodeError::MalformedDataUrl)?;
        if mime_type.is_empty() {
            return Err(EncodeError::MalformedDataUrl);
        }
        Ok(Self::new(mime_type, data))
    }

    pub fn decode(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(B64.decode(self.data.as_bytes())?)
    }

    /// Approximate decoded size, without decoding.
    pub fn byte_len(&self) -> usize {
        let padding = self.data.bytes().rev().take_while(|b| *b == b'=').count();
        (self.data.len() / 4 * 3).saturating_sub(padding)
    }

    /// The URL cut to at most `max_chars` characters, for logs.
    pub fn summary(&self, max_chars: usize) -> String {
        let full = self.to_string();
        match full.char_indices().nth(max_chars) {
            Some((end, _)) => format!("{}...", &full[..end]),
            None => full,
        }
    }
}

impl fmt::Display for DataUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime_type, self.data)
    }
}

impl From<EncodedImage> for DataUrl {
    fn from(e: EncodedImage) -> Self {
        Self::new(e.mime_type, e.data)
    }
}

pub fn mime_from_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "bmp" => "image/bmp",
        _ => return None,
    };
    Some(mime)
}

pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() >= 8 && bytes[0..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
        return Some("image/png");
    }
    if bytes.len() >= 3 && bytes[0..3] == [0xFF, 0xD8, 0xFF] {
        return Some("image/jpeg");
    }
    // RIFF....WEBP
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.len() >= 6 && (&bytes[0..6] == b"GIF87a" || &bytes[0..6] == b"GIF89a") {
        return Some("image/gif");
    }
    None
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" => "heic",
        "image/heif" => "heif",
        "image/bmp" => "bmp",
        _ => "png",
    }
}

pub async fn read_image(path: &Path) -> Result<Vec<u8>, EncodeError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| EncodeError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(EncodeError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(bytes)
}

pub async fn encode_image(file: &ImageFile) -> Result<EncodedImage, EncodeError> {
    let bytes = read_image(&file.path).await?;
    Ok(EncodedImage {
        data: B64.encode(&bytes),
        mime_type: file.mime_type.clone(),
    })
}
