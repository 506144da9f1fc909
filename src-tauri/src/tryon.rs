use futures_util::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::controller::{TryOnController, ViewState};
use crate::encoder::{extension_for_mime, DataUrl};
use crate::gemini::{GenerationError, ImageGenerator};
use crate::upload::{select_image, Slot, UploadedImage};
use crate::utils::display_name;

pub type SharedController = Arc<Mutex<TryOnController>>;

#[derive(Debug, Clone, Serialize)]
pub struct SlotView {
    pub slot: Slot,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: usize,
    pub preview_url: String,
}

impl SlotView {
    fn new(slot: Slot, up: &UploadedImage) -> Self {
        Self {
            slot,
            file_name: display_name(&up.file.path),
            mime_type: up.file.mime_type.clone(),
            size_bytes: up.preview_url.byte_len(),
            preview_url: up.preview_url.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultView {
    Idle,
    Loading { attempt: String },
    Success { image_url: String, mime_type: String, generated_at: String },
    Error { message: String },
}

/// Everything the page needs to draw itself.
#[derive(Debug, Clone, Serialize)]
pub struct ViewSnapshot {
    pub person: Option<SlotView>,
    pub item: Option<SlotView>,
    pub can_generate: bool,
    pub loading: bool,
    pub result: ResultView,
}

pub fn snapshot(c: &TryOnController) -> ViewSnapshot {
    let result = match c.state() {
        ViewState::Idle => ResultView::Idle,
        ViewState::Loading { attempt } => ResultView::Loading {
            attempt: attempt.to_string(),
        },
        ViewState::Success { image, generated_at } => ResultView::Success {
            image_url: image.to_string(),
            mime_type: image.mime_type.clone(),
            generated_at: generated_at.clone(),
        },
        ViewState::Error { message } => ResultView::Error {
            message: message.clone(),
        },
    };
    ViewSnapshot {
        person: c.image(Slot::Person).map(|up| SlotView::new(Slot::Person, up)),
        item: c.image(Slot::Item).map(|up| SlotView::new(Slot::Item, up)),
        can_generate: c.can_generate(),
        loading: c.is_loading(),
        result,
    }
}

/// Reads the file without holding the lock, then stores it in the slot.
pub async fn select_into_slot(controller: &SharedController, slot: Slot, path: &Path) -> Result<ViewSnapshot, String> {
    let image = select_image(slot, path).await.map_err(|e| {
        warn!(%slot, error = %e, "selection failed");
        e.to_string()
    })?;
    let mut c = controller.lock().await;
    c.set_image(slot, image);
    Ok(snapshot(&c))
}

/// Starts an attempt unless the trigger is a no-op. The spawned task always
/// reports back, panics included, so the page never stays in Loading.
pub async fn start_generation(
    controller: &SharedController,
    generator: Arc<dyn ImageGenerator>,
) -> Option<(Uuid, JoinHandle<()>)> {
    let job = controller.lock().await.begin_generation()?;
    let attempt = job.attempt;
    let shared = Arc::clone(controller);
    let handle = tokio::spawn(async move {
        let outcome = AssertUnwindSafe(job.run(generator.as_ref()))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(attempt = %job.attempt, "generation task panicked");
                Err(GenerationError::Aborted)
            });
        shared.lock().await.complete(job.attempt, outcome);
    });
    Some((attempt, handle))
}

pub fn suggested_file_name(image: &DataUrl) -> String {
    let stamp = time::OffsetDateTime::now_utc().unix_timestamp();
    format!("tryon-{stamp}.{}", extension_for_mime(&image.mime_type))
}

/// Writes a data URL handed back by the page. A path without an extension
/// gets one from the MIME type.
pub async fn save_image_to_disk(data_url: &str, path: PathBuf) -> Result<String, String> {
    let image = DataUrl::parse(data_url).map_err(|e| e.to_string())?;
    let bytes = image.decode().map_err(|e| e.to_string())?;
    let mut target = path;
    if target.extension().is_none() {
        target.set_extension(extension_for_mime(&image.mime_type));
    }
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
    }
    tokio::fs::write(&target, bytes).await.map_err(|e| e.to_string())?;
    info!(path = %target.display(), "saved result image");
    Ok(target.display().to_string())
}
