use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_INSTRUCTION: &str = "Take the clothing item from the second image and realistically \
place it on the person in the first image. Keep the person's face, pose, body shape and the \
background unchanged. Match the lighting, perspective and fabric drape so the garment looks \
naturally worn. Return only the edited photo.";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub gemini_api_key: Option<String>,
    pub model: Option<String>,
    pub instruction: Option<String>,
    pub api_base_url: Option<String>,
    pub output_dir: Option<PathBuf>,
}

impl Settings {
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn instruction(&self) -> &str {
        self.instruction.as_deref().unwrap_or(DEFAULT_INSTRUCTION)
    }

    pub fn api_base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/')
    }

    /// Resolved on every call so a key exported mid-session is picked up.
    pub fn api_key(&self) -> Option<String> {
        let present = |k: &String| !k.trim().is_empty();
        self.gemini_api_key
            .clone()
            .filter(present)
            .or_else(|| std::env::var("GEMINI_API_KEY").ok().filter(present))
            .or_else(|| std::env::var("API_KEY").ok().filter(present))
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(model) = std::env::var("TRYON_MODEL") {
            if !model.trim().is_empty() {
                self.model = Some(model);
            }
        }
        if let Ok(url) = std::env::var("TRYON_API_BASE_URL") {
            if !url.trim().is_empty() {
                self.api_base_url = Some(url);
            }
        }
        self
    }
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

pub fn load_settings_from_dir(data_dir: &Path) -> Settings {
    let path = settings_path(data_dir);
    if let Ok(bytes) = fs::read(&path) {
        match serde_json::from_slice::<Settings>(&bytes) {
            Ok(s) => return s,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable settings"),
        }
    }
    Settings::default()
}

pub fn save_settings_to_dir(data_dir: &Path, s: &Settings) -> Result<()> {
    let path = settings_path(data_dir);
    let json = serde_json::to_vec_pretty(s)?;
    fs::write(path, json).context("write settings")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let s = load_settings_from_dir(dir.path());
        assert_eq!(s.model(), DEFAULT_MODEL);
        assert_eq!(s.instruction(), DEFAULT_INSTRUCTION);
        assert_eq!(s.api_base_url(), DEFAULT_API_BASE_URL);
    }

    #[test]
    fn garbled_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(settings_path(dir.path()), b"{ not json").expect("write");
        let s = load_settings_from_dir(dir.path());
        assert!(s.model.is_none());
    }

    #[test]
    fn save_then_load_keeps_fields() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let s = Settings {
            model: Some("custom-image-model".into()),
            api_base_url: Some("http://127.0.0.1:9999/v1beta/".into()),
            ..Settings::default()
        };
        save_settings_to_dir(dir.path(), &s)?;
        let loaded = load_settings_from_dir(dir.path());
        assert_eq!(loaded.model(), "custom-image-model");
        assert_eq!(loaded.api_base_url(), "http://127.0.0.1:9999/v1beta");
        Ok(())
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(settings_path(dir.path()), br#"{"instruction":"swap the shirt"}"#).expect("write");
        let s = load_settings_from_dir(dir.path());
        assert_eq!(s.instruction(), "swap the shirt");
        assert_eq!(s.model(), DEFAULT_MODEL);
    }

    #[test]
    fn explicit_key_wins_over_environment() {
        let s = Settings {
            gemini_api_key: Some("from-settings".into()),
            ..Settings::default()
        };
        assert_eq!(s.api_key().as_deref(), Some("from-settings"));
    }
}
