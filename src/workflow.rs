//! Upload → enhance → generate orchestration.
//!
//! [`WorkflowController`] owns the [`WorkflowState`] aggregate and is the only
//! writer to it. Each paid action is gated on credits before anything is
//! sent upstream, and at most one mutating action runs at a time: a request
//! to start an action while another is in flight is ignored.

use crate::error::{PhotoshootError, Result};
use crate::image::{
    decode_batch, AspectRatio, Composition, GenerationClient, GenerationResult, SubjectImage,
    UploadFile,
};
use crate::session::{SessionRecord, SessionStore};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Credits granted by [`WorkflowController::add_credits`].
pub const REFILL_CREDITS: u32 = 5;

const NO_IMAGE_FALLBACK: &str =
    "Image generation failed. The model may not have returned an image.";

/// What the controller is currently doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    /// Ready to start an action.
    #[default]
    Idle,
    /// Decoding an upload batch.
    Uploading,
    /// Enhancing the subject set.
    Enhancing,
    /// Composing the final image.
    Generating,
}

/// Whether a requested action ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action ran to completion.
    Completed,
    /// The action was not started (another action in flight, or nothing to do).
    Ignored,
}

/// Controller settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Credit balance of a fresh controller.
    pub initial_credits: u32,
    /// Balance restored by [`WorkflowController::add_credits`].
    pub refill_credits: u32,
    /// Apply the stored session when the controller is built.
    pub restore_on_start: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            initial_credits: REFILL_CREDITS,
            refill_credits: REFILL_CREDITS,
            restore_on_start: true,
        }
    }
}

/// Snapshot of everything the workflow tracks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowState {
    /// Subject images, in upload order.
    pub subjects: Vec<SubjectImage>,
    /// Scene description.
    pub prompt: String,
    /// Aspect ratio hint.
    pub aspect_ratio: AspectRatio,
    /// True right after a successful enhancement of the current subjects.
    pub subjects_enhanced: bool,
    /// Remaining credits.
    pub credits: u32,
    /// Most recent successful generation.
    pub result: Option<GenerationResult>,
    /// Failure of the most recent action.
    pub last_error: Option<String>,
    /// Action in flight.
    pub phase: Phase,
}

/// Builder for [`WorkflowController`].
#[derive(Default)]
pub struct WorkflowControllerBuilder {
    client: Option<Arc<dyn GenerationClient>>,
    store: Option<Arc<dyn SessionStore>>,
    config: WorkflowConfig,
}

impl WorkflowControllerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the generation client. Defaults to a Gemini client configured
    /// from the environment.
    pub fn client(mut self, client: Arc<dyn GenerationClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Sets the session store. Defaults to [`crate::session::global`].
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the controller settings.
    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the controller, restoring the stored session if configured.
    pub fn build(self) -> Result<WorkflowController> {
        let client = match self.client {
            Some(client) => client,
            None => default_client()?,
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(crate::session::global().clone()));

        let controller = WorkflowController {
            client,
            store,
            state: Mutex::new(WorkflowState {
                credits: self.config.initial_credits,
                ..WorkflowState::default()
            }),
            config: self.config,
        };
        if controller.config.restore_on_start {
            controller.restore_session();
        }
        Ok(controller)
    }
}

#[cfg(feature = "gemini")]
fn default_client() -> Result<Arc<dyn GenerationClient>> {
    Ok(Arc::new(crate::image::providers::GeminiClient::builder().build()?))
}

#[cfg(not(feature = "gemini"))]
fn default_client() -> Result<Arc<dyn GenerationClient>> {
    Err(PhotoshootError::InvalidArgument(
        "no generation client configured".into(),
    ))
}

/// Marks the controller busy; returns it to idle when dropped.
struct InFlight<'a> {
    state: &'a Mutex<WorkflowState>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phase = Phase::Idle;
    }
}

/// Orchestrates upload, enhancement and generation over one subject set.
pub struct WorkflowController {
    client: Arc<dyn GenerationClient>,
    store: Arc<dyn SessionStore>,
    config: WorkflowConfig,
    state: Mutex<WorkflowState>,
}

impl WorkflowController {
    /// Creates a new `WorkflowControllerBuilder`.
    pub fn builder() -> WorkflowControllerBuilder {
        WorkflowControllerBuilder::new()
    }

    fn lock(&self) -> MutexGuard<'_, WorkflowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the controller for `phase`, or returns `None` if busy.
    fn begin(&self, phase: Phase) -> Option<InFlight<'_>> {
        let mut state = self.lock();
        if state.phase != Phase::Idle {
            tracing::debug!(requested = ?phase, current = ?state.phase, "action ignored, controller busy");
            return None;
        }
        state.phase = phase;
        Some(InFlight { state: &self.state })
    }

    /// Records `err` as the last error and returns it.
    fn fail<T>(&self, err: PhotoshootError) -> Result<T> {
        tracing::warn!("workflow action failed: {err}");
        self.lock().last_error = Some(err.to_string());
        Err(err)
    }

    /// Returns a snapshot of the current state.
    pub fn state(&self) -> WorkflowState {
        self.lock().clone()
    }

    /// Returns the remaining credits.
    pub fn credits(&self) -> u32 {
        self.lock().credits
    }

    /// Returns the generation client's display name.
    pub fn client_name(&self) -> String {
        self.client.name().to_string()
    }

    /// Checks that the generation service is reachable and accepts the
    /// configured credentials.
    pub async fn check_client(&self) -> Result<()> {
        self.client.health_check().await
    }

    /// Replaces the scene description.
    pub fn set_prompt(&self, prompt: impl Into<String>) {
        self.lock().prompt = prompt.into();
    }

    /// Replaces the aspect ratio hint.
    pub fn set_aspect_ratio(&self, ratio: AspectRatio) {
        self.lock().aspect_ratio = ratio;
    }

    /// Applies the stored session, if any. Returns true if one was found.
    pub fn restore_session(&self) -> bool {
        let Some(session) = self.store.load() else {
            return false;
        };
        let mut state = self.lock();
        if state.phase != Phase::Idle {
            return false;
        }
        if let Some(subjects) = session.subjects {
            state.subjects = subjects;
            state.subjects_enhanced = false;
        }
        if let Some(prompt) = session.prompt.filter(|p| !p.is_empty()) {
            state.prompt = prompt;
        }
        if let Some(ratio) = session.aspect_ratio {
            state.aspect_ratio = ratio;
        }
        tracing::info!(subjects = state.subjects.len(), "restored saved session");
        true
    }

    /// Writes subjects, prompt and aspect ratio to the session store.
    ///
    /// Returns `Ok(false)` without writing when there are no subjects or no
    /// prompt.
    pub fn save_session(&self) -> Result<bool> {
        let record = {
            let state = self.lock();
            if state.subjects.is_empty() || state.prompt.is_empty() {
                return Ok(false);
            }
            SessionRecord {
                subjects: state.subjects.clone(),
                prompt: state.prompt.clone(),
                aspect_ratio: state.aspect_ratio,
            }
        };
        self.store.save(&record)?;
        Ok(true)
    }

    /// Refills credits and clears the last error.
    pub fn add_credits(&self) {
        let mut state = self.lock();
        state.credits = self.config.refill_credits;
        state.last_error = None;
    }

    /// Decodes `files` and appends them to the subject set.
    ///
    /// The batch is all-or-nothing: if any file fails, the subject set is
    /// left as it was.
    pub async fn upload(&self, files: &[UploadFile]) -> Result<ActionOutcome> {
        if files.is_empty() {
            return Ok(ActionOutcome::Ignored);
        }
        let Some(_in_flight) = self.begin(Phase::Uploading) else {
            return Ok(ActionOutcome::Ignored);
        };
        {
            let mut state = self.lock();
            state.result = None;
            state.last_error = None;
            state.subjects_enhanced = false;
        }

        match decode_batch(files).await {
            Ok(decoded) => {
                let mut state = self.lock();
                state.subjects.extend(decoded);
                tracing::info!(
                    added = files.len(),
                    total = state.subjects.len(),
                    "subjects uploaded"
                );
                Ok(ActionOutcome::Completed)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Removes the subject with `id`.
    ///
    /// Ignored while an action is in flight or when no subject has that id.
    pub fn remove_subject(&self, id: &str) -> ActionOutcome {
        let mut state = self.lock();
        if state.phase != Phase::Idle {
            return ActionOutcome::Ignored;
        }
        let Some(pos) = state.subjects.iter().position(|s| s.id == id) else {
            return ActionOutcome::Ignored;
        };
        state.subjects.remove(pos);
        state.subjects_enhanced = false;
        ActionOutcome::Completed
    }

    /// Enhances every subject. Costs one credit for the whole set.
    ///
    /// All subjects are enhanced concurrently; if any call fails, no subject
    /// is changed and no credit is spent.
    pub async fn enhance(&self) -> Result<ActionOutcome> {
        let Some(_in_flight) = self.begin(Phase::Enhancing) else {
            return Ok(ActionOutcome::Ignored);
        };

        let prepared = {
            let mut state = self.lock();
            state.last_error = None;
            if state.subjects.is_empty() {
                Err(PhotoshootError::Precondition(
                    "Upload images before enhancing.".into(),
                ))
            } else if state.credits < 1 {
                Err(PhotoshootError::InsufficientCredits(
                    "You need at least 1 credit to enhance subjects.".into(),
                ))
            } else {
                Ok(state
                    .subjects
                    .iter()
                    .map(|s| (s.id.clone(), s.to_part()))
                    .collect::<Vec<_>>())
            }
        };
        let targets = match prepared {
            Ok(targets) => targets,
            Err(e) => return self.fail(e),
        };

        let calls = targets.iter().map(|(_, part)| self.client.enhance(part));
        let enhanced = match futures::future::try_join_all(calls).await {
            Ok(enhanced) => enhanced,
            Err(e) => return self.fail(e),
        };

        let mut state = self.lock();
        for ((id, _), part) in targets.into_iter().zip(enhanced) {
            if let Some(subject) = state.subjects.iter_mut().find(|s| s.id == id) {
                subject.replace_content(part);
            }
        }
        state.credits = state.credits.saturating_sub(1);
        state.subjects_enhanced = true;
        tracing::info!(
            subjects = state.subjects.len(),
            credits = state.credits,
            "subjects enhanced"
        );
        Ok(ActionOutcome::Completed)
    }

    /// Composes all subjects into the scene described by the prompt. Costs
    /// one credit, spent only when an image comes back.
    ///
    /// A response carrying only text is reported as an error whose message
    /// is that text.
    pub async fn generate(&self) -> Result<ActionOutcome> {
        let Some(_in_flight) = self.begin(Phase::Generating) else {
            return Ok(ActionOutcome::Ignored);
        };

        let prepared = {
            let mut state = self.lock();
            if state.subjects.is_empty() || state.prompt.is_empty() {
                Err(PhotoshootError::Precondition(
                    "Please upload at least one image and enter a prompt.".into(),
                ))
            } else if state.credits == 0 {
                Err(PhotoshootError::InsufficientCredits(
                    "You have no credits left. Please buy more.".into(),
                ))
            } else {
                state.result = None;
                state.last_error = None;
                let parts: Vec<_> = state.subjects.iter().map(SubjectImage::to_part).collect();
                Ok((parts, state.prompt.clone()))
            }
        };
        let (parts, prompt) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return self.fail(e),
        };

        match self.client.compose(&parts, &prompt).await {
            Ok(Composition {
                image_uri: Some(image_uri),
                note,
            }) => {
                let mut state = self.lock();
                state.result = Some(GenerationResult { image_uri, note });
                state.credits = state.credits.saturating_sub(1);
                tracing::info!(credits = state.credits, "image generated");
                Ok(ActionOutcome::Completed)
            }
            Ok(Composition {
                image_uri: None,
                note,
            }) => self.fail(PhotoshootError::NoImage(
                note.unwrap_or_else(|| NO_IMAGE_FALLBACK.to_string()),
            )),
            Err(e) => self.fail(e),
        }
    }

    /// Runs [`generate`](Self::generate), retrying transient upstream
    /// failures up to `max_retries` times.
    ///
    /// Every attempt passes the same credit gate; only the attempt that
    /// returns an image spends a credit.
    pub async fn generate_with_retries(&self, max_retries: u32) -> Result<ActionOutcome> {
        let mut attempt = 0;
        loop {
            match self.generate().await {
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    let delay = e.retry_after().unwrap_or(Duration::from_secs(1));
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries,
                        delay_ms = delay.as_millis(),
                        "retrying generation after transient error: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}
