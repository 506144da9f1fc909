pub mod controller;
pub mod encoder;
pub mod gemini;
pub mod logging;
pub mod settings;
pub mod tryon;
pub mod upload;
pub mod utils;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::gemini::GeminiClient;
use crate::logging::init_tracing;
use crate::settings::{load_settings_from_dir, save_settings_to_dir, settings_path};
use crate::tryon::{SharedController, ViewSnapshot};
use crate::utils::ensure_data_dir;

pub use crate::controller::{GenerationJob, TryOnController, ViewState};
pub use crate::encoder::{encode_image, DataUrl, EncodeError, EncodedImage, ImageFile};
pub use crate::gemini::{GenerationError, ImageGenerator};
pub use crate::settings::Settings;
pub use crate::upload::{Slot, UploadedImage};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "heic", "heif", "bmp"];

#[derive(Clone)]
struct AppState {
    data_dir: PathBuf,
    controller: SharedController,
}

// ===== Tauri Commands =====

#[tauri::command]
async fn get_settings(state: tauri::State<'_, AppState>) -> Result<Settings, String> {
    Ok(load_settings_from_dir(&state.data_dir))
}

#[tauri::command]
async fn update_settings(
    state: tauri::State<'_, AppState>,
    settings: Settings,
) -> Result<Settings, String> {
    save_settings_to_dir(&state.data_dir, &settings).map_err(|e| e.to_string())?;
    Ok(settings)
}

#[tauri::command]
async fn get_view_state(state: tauri::State<'_, AppState>) -> Result<ViewSnapshot, String> {
    Ok(tryon::snapshot(&*state.controller.lock().await))
}

#[tauri::command]
async fn select_image(
    state: tauri::State<'_, AppState>,
    slot: Slot,
    path: String,
) -> Result<ViewSnapshot, String> {
    tryon::select_into_slot(&state.controller, slot, PathBuf::from(path).as_path()).await
}

/// Opens the native picker for one slot. Cancelling leaves the slot alone.
#[tauri::command]
async fn pick_image(state: tauri::State<'_, AppState>, slot: Slot) -> Result<ViewSnapshot, String> {
    let picked = rfd::AsyncFileDialog::new()
        .set_title(slot.title())
        .add_filter("Images", IMAGE_EXTENSIONS)
        .pick_file()
        .await;
    match picked {
        Some(file) => tryon::select_into_slot(&state.controller, slot, file.path()).await,
        None => Ok(tryon::snapshot(&*state.controller.lock().await)),
    }
}

/// Returns false when the trigger was a no-op (a slot is empty or an attempt
/// is already running).
#[tauri::command]
async fn generate(state: tauri::State<'_, AppState>) -> Result<bool, String> {
    let settings = load_settings_from_dir(&state.data_dir).with_env_overrides();
    let client: Arc<dyn ImageGenerator> = Arc::new(GeminiClient::new(settings));
    Ok(tryon::start_generation(&state.controller, client).await.is_some())
}

/// Saves the current result. Without a path the native save dialog asks for
/// one; `None` means the user cancelled.
#[tauri::command]
async fn save_result(
    state: tauri::State<'_, AppState>,
    path: Option<String>,
) -> Result<Option<String>, String> {
    let image = state
        .controller
        .lock()
        .await
        .result()
        .cloned()
        .ok_or_else(|| "there is no generated image to save".to_string())?;

    let target = match path {
        Some(p) => PathBuf::from(p),
        None => {
            let settings = load_settings_from_dir(&state.data_dir);
            let mut dialog = rfd::AsyncFileDialog::new()
                .set_title("Save try-on result")
                .set_file_name(tryon::suggested_file_name(&image));
            if let Some(dir) = settings.output_dir {
                dialog = dialog.set_directory(dir);
            }
            match dialog.save_file().await {
                Some(handle) => handle.path().to_path_buf(),
                None => return Ok(None),
            }
        }
    };
    tryon::save_image_to_disk(&image.to_string(), target).await.map(Some)
}

// ===== Startup and Main =====

fn startup() -> Result<AppState> {
    let data_dir = ensure_data_dir()?;
    if !settings_path(&data_dir).exists() {
        // Leave an editable template behind on first start.
        save_settings_to_dir(&data_dir, &Settings::default())?;
    }
    let settings = load_settings_from_dir(&data_dir).with_env_overrides();
    tracing::info!(
        data_dir = %data_dir.display(),
        model = settings.model(),
        has_api_key = settings.api_key().is_some(),
        "tryon starting"
    );
    if settings.api_key().is_none() {
        tracing::warn!("no Gemini API key yet; generation will fail until GEMINI_API_KEY is set");
    }
    Ok(AppState {
        data_dir,
        controller: SharedController::default(),
    })
}

pub fn run() -> Result<()> {
    let data_dir = ensure_data_dir()?;
    let _guard = init_tracing(&data_dir)?;
    let state = startup()?;

    tauri::Builder::default()
        .manage(state)
        .plugin(tauri_plugin_opener::init())
        .invoke_handler(tauri::generate_handler![
            get_settings,
            update_settings,
            get_view_state,
            select_image,
            pick_image,
            generate,
            save_result
        ])
        .run(tauri::generate_context!())
        .context("error while running tauri application")
}
