use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

pub fn app_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("app", "tryon", "tryon")
        .ok_or_else(|| anyhow!("cannot resolve project dirs"))
}

pub fn ensure_data_dir() -> Result<PathBuf> {
    let dirs = app_dirs()?;
    let data_dir = dirs.data_dir().to_path_buf();
    fs::create_dir_all(&data_dir).context("create data dir")?;
    Ok(data_dir)
}

pub fn logs_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

pub fn now_iso() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

/// File name for display, falling back to the full path.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
