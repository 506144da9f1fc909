use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::encoder::{encode_image, DataUrl};
use crate::gemini::{GenerationError, ImageGenerator};
use crate::upload::{Slot, UploadedImage};
use crate::utils::now_iso;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ViewState {
    #[default]
    Idle,
    Loading {
        attempt: Uuid,
    },
    Success {
        image: DataUrl,
        generated_at: String,
    },
    Error {
        message: String,
    },
}

/// Snapshot of both uploads taken when an attempt starts.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub attempt: Uuid,
    pub person: UploadedImage,
    pub item: UploadedImage,
}

impl GenerationJob {
    /// Encodes both images, then makes the single remote call. An encode
    /// failure ends the attempt without touching the network.
    #[instrument(skip_all, fields(attempt = %self.attempt))]
    pub async fn run<G>(&self, generator: &G) -> Result<DataUrl, GenerationError>
    where
        G: ImageGenerator + ?Sized,
    {
        let (person, item) = futures_util::future::try_join(
            encode_image(&self.person.file),
            encode_image(&self.item.file),
        )
        .await?;
        debug!(person_b64 = person.data.len(), item_b64 = item.data.len(), "images encoded");
        generator.generate(&person, &item).await
    }
}

#[derive(Debug, Default)]
pub struct TryOnController {
    person: Option<UploadedImage>,
    item: Option<UploadedImage>,
    state: ViewState,
}

impl TryOnController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn image(&self, slot: Slot) -> Option<&UploadedImage> {
        match slot {
            Slot::Person => self.person.as_ref(),
            Slot::Item => self.item.as_ref(),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, ViewState::Loading { .. })
    }

    pub fn can_generate(&self) -> bool {
        self.person.is_some() && self.item.is_some() && !self.is_loading()
    }

    pub fn result(&self) -> Option<&DataUrl> {
        match &self.state {
            ViewState::Success { image, .. } => Some(image),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            ViewState::Error { message } => Some(message),
            _ => None,
        }
    }

    /// Replaces the slot and drops any shown result or error. An attempt
    /// already in flight keeps running.
    pub fn set_image(&mut self, slot: Slot, image: UploadedImage) {
        debug!(%slot, path = %image.file.path.display(), "slot updated");
        match slot {
            Slot::Person => self.person = Some(image),
            Slot::Item => self.item = Some(image),
        }
        if !self.is_loading() {
            self.state = ViewState::Idle;
        }
    }

    /// Enters Loading and hands out the work, or does nothing when a slot
    /// is empty or an attempt is already running.
    pub fn begin_generation(&mut self) -> Option<GenerationJob> {
        if !self.can_generate() {
            debug!(loading = self.is_loading(), "generate ignored");
            return None;
        }
        let (person, item) = (self.person.clone()?, self.item.clone()?);
        let attempt = Uuid::new_v4();
        info!(%attempt, "generation started");
        self.state = ViewState::Loading { attempt };
        Some(GenerationJob { attempt, person, item })
    }

    /// Applies the outcome of `attempt`. Returns false when that attempt is
    /// not the one in flight.
    pub fn complete(&mut self, attempt: Uuid, outcome: Result<DataUrl, GenerationError>) -> bool {
        match &self.state {
            ViewState::Loading { attempt: current } if *current == attempt => {}
            _ => {
                debug!(%attempt, "stale outcome dropped");
                return false;
            }
        }
        self.state = match outcome {
            Ok(image) => {
                info!(%attempt, result = %image.summary(48), "generation succeeded");
                ViewState::Success {
                    image,
                    generated_at: now_iso(),
                }
            }
            Err(e) => {
                error!(%attempt, error = %e, "generation failed");
                ViewState::Error {
                    message: e.user_message(),
                }
            }
        };
        true
    }

    /// Runs a whole attempt in place. Returns false when the trigger was a no-op.
    pub async fn generate<G>(&mut self, generator: &G) -> bool
    where
        G: ImageGenerator + ?Sized,
    {
        let Some(job) = self.begin_generation() else {
            return false;
        };
        let outcome = job.run(generator).await;
        self.complete(job.attempt, outcome)
    }
}
