use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::encoder::{mime_from_path, read_image, sniff_mime, DataUrl, EncodeError, ImageFile, FALLBACK_MIME};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Person,
    Item,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Person, Slot::Item];

    pub fn title(&self) -> &'static str {
        match self {
            Slot::Person => "Your photo",
            Slot::Item => "Clothing item",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Person => f.write_str("person"),
            Slot::Item => f.write_str("item"),
        }
    }
}

impl FromStr for Slot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "person" | "portrait" => Ok(Slot::Person),
            "item" | "clothing" | "garment" => Ok(Slot::Item),
            other => Err(format!("unknown slot '{other}' (expected person or item)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedImage {
    pub file: ImageFile,
    pub preview_url: DataUrl,
}

/// Reads the picked file and builds its preview. The caller stores the
/// result in the controller once this resolves.
#[tracing::instrument(skip_all, fields(slot = %slot, path = %path.display()))]
pub async fn select_image(slot: Slot, path: &Path) -> Result<UploadedImage, EncodeError> {
    let bytes = read_image(path).await?;
    let mime_type = match mime_from_path(path) {
        Some(m) => m,
        None => {
            warn!("file does not look like an image; sending it anyway");
            sniff_mime(&bytes).unwrap_or(FALLBACK_MIME)
        }
    };
    debug!(mime = mime_type, bytes = bytes.len(), "preview ready");
    Ok(UploadedImage {
        file: ImageFile {
            path: path.to_path_buf(),
            mime_type: mime_type.to_string(),
        },
        preview_url: DataUrl::from_bytes(mime_type, &bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_parsing_accepts_aliases() {
        assert_eq!("person".parse::<Slot>(), Ok(Slot::Person));
        assert_eq!(" Portrait ".parse::<Slot>(), Ok(Slot::Person));
        assert_eq!("garment".parse::<Slot>(), Ok(Slot::Item));
        assert!("shoe".parse::<Slot>().is_err());
    }

    #[tokio::test]
    async fn selection_builds_preview_from_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("me.jpeg");
        std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3])?;

        let up = select_image(Slot::Person, &path).await?;
        assert_eq!(up.file.path, path);
        assert_eq!(up.file.mime_type, "image/jpeg");
        assert!(up.preview_url.to_string().starts_with("data:image/jpeg;base64,"));
        assert_eq!(up.preview_url.decode()?, vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3]);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_extension_falls_back_to_sniffing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("download");
        std::fs::write(&path, b"GIF89a....")?;
        let up = select_image(Slot::Item, &path).await?;
        assert_eq!(up.file.mime_type, "image/gif");

        let other = dir.path().join("blob.bin");
        std::fs::write(&other, b"plain bytes")?;
        let up = select_image(Slot::Item, &other).await?;
        assert_eq!(up.file.mime_type, FALLBACK_MIME);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = select_image(Slot::Item, Path::new("/nope/shirt.png")).await.unwrap_err();
        assert!(matches!(err, EncodeError::Read { .. }));
    }
}
