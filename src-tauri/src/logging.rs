use anyhow::{anyhow, Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::utils::logs_dir;

pub const DEFAULT_FILTER: &str = "tryon_lib=info";

/// File log honours `RUST_LOG`; the terminal only gets warnings so the page
/// stays readable. Keep the guard alive for the whole process.
pub fn init_tracing(data_dir: &Path) -> Result<WorkerGuard> {
    let dir = logs_dir(data_dir);
    std::fs::create_dir_all(&dir).context("create logs dir")?;

    let (file_writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, "tryon.log"));
    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false).with_writer(file_writer).with_filter(file_filter))
        .with(fmt::layer().with_writer(std::io::stderr).with_filter(LevelFilter::WARN))
        .try_init()
        .map_err(|e| anyhow!("init tracing: {e}"))?;
    Ok(guard)
}
