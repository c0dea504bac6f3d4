//! Pixel-generation collaborator boundary.
//!
//! The seam repair and stylize stages hand image patches to an external
//! generative backend and get regenerated pixels back. Everything about
//! that backend stays behind the [`Regenerator`] trait; this crate ships
//! only trivial implementations ([`IdentityRegenerator`],
//! [`FillRegenerator`]) for offline runs and tests.
//!
//! [`RetryingRegenerator`] wraps any implementation with a per-call
//! timeout and bounded exponential-backoff retry. The call runs on a
//! worker thread and the caller waits on a channel, so a hung backend is
//! abandoned at the deadline instead of wedging the pipeline. Callers
//! must not hold tile locks across `regenerate` - the decorator can block
//! for the full timeout budget.

use image::{GrayImage, RgbImage};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from a single regeneration call.
#[derive(Debug, Clone, Error)]
pub enum RegenError {
    /// The backend did not answer within the deadline.
    #[error("regeneration timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with a failure.
    #[error("regeneration failed: {0}")]
    Backend(String),

    /// The worker thread died without answering.
    #[error("regeneration worker disconnected")]
    Disconnected,

    /// All retry attempts were spent.
    #[error("regeneration failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<RegenError>,
    },
}

/// Generation parameters forwarded to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenParams {
    /// Positive prompt
    pub prompt: String,
    /// Negative prompt
    pub negative: String,
    /// Denoise strength in (0, 1]
    pub strength: f64,
    /// Requested diffusion steps
    pub steps: u32,
    /// Classifier-free guidance scale
    pub guidance: f64,
    /// Seed; `None` lets the backend pick
    pub seed: Option<u64>,
    /// Optional style reference image path
    pub style_ref: Option<std::path::PathBuf>,
}

impl Default for GenParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative: String::new(),
            strength: 0.2,
            steps: 16,
            guidance: 4.5,
            seed: None,
            style_ref: None,
        }
    }
}

impl GenParams {
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_negative(mut self, negative: impl Into<String>) -> Self {
        self.negative = negative.into();
        self
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_guidance(mut self, guidance: f64) -> Self {
        self.guidance = guidance;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Steps the backend should actually run.
    ///
    /// Low strength scales the schedule down; if `floor(strength * steps)`
    /// would round to zero the call would be a no-op, so the count is
    /// raised to `ceil(1 / strength)`.
    pub fn effective_steps(&self) -> u32 {
        if self.strength <= 0.0 {
            return self.steps;
        }
        if (self.strength * self.steps as f64).floor() < 1.0 {
            (1.0 / self.strength).ceil() as u32
        } else {
            self.steps
        }
    }
}

/// One regeneration request: the pixels to rework, an optional mask
/// (255 = regenerate, 0 = keep), and the generation parameters.
#[derive(Debug, Clone)]
pub struct RegenRequest {
    pub patch: RgbImage,
    pub mask: Option<GrayImage>,
    pub params: GenParams,
}

impl RegenRequest {
    pub fn new(patch: RgbImage, params: GenParams) -> Self {
        Self {
            patch,
            mask: None,
            params,
        }
    }

    pub fn with_mask(mut self, mask: GrayImage) -> Self {
        self.mask = Some(mask);
        self
    }
}

/// An external pixel-generation backend.
///
/// Implementations must return an image with the same dimensions as the
/// request patch. Calls are synchronous and may be slow; orchestrators
/// call this with no locks held.
pub trait Regenerator: Send + Sync {
    /// Backend name for logs and reports.
    fn name(&self) -> &str;

    /// Regenerates the request patch.
    fn regenerate(&self, request: &RegenRequest) -> Result<RgbImage, RegenError>;
}

/// Returns the request patch unchanged. Lets the full pipeline run
/// offline with no backend attached.
#[derive(Debug, Default)]
pub struct IdentityRegenerator;

impl Regenerator for IdentityRegenerator {
    fn name(&self) -> &str {
        "identity"
    }

    fn regenerate(&self, request: &RegenRequest) -> Result<RgbImage, RegenError> {
        Ok(request.patch.clone())
    }
}

/// Fills the masked region with a constant color; unmasked pixels pass
/// through. Makes write-back geometry visible in tests and dry runs.
#[derive(Debug)]
pub struct FillRegenerator {
    pub color: [u8; 3],
}

impl FillRegenerator {
    pub fn new(color: [u8; 3]) -> Self {
        Self { color }
    }
}

impl Regenerator for FillRegenerator {
    fn name(&self) -> &str {
        "fill"
    }

    fn regenerate(&self, request: &RegenRequest) -> Result<RgbImage, RegenError> {
        let mut out = request.patch.clone();
        match &request.mask {
            Some(mask) => {
                for (x, y, px) in out.enumerate_pixels_mut() {
                    if mask.get_pixel(x, y).0[0] > 127 {
                        px.0 = self.color;
                    }
                }
            }
            None => {
                for px in out.pixels_mut() {
                    px.0 = self.color;
                }
            }
        }
        Ok(out)
    }
}

/// Retry behavior for [`RetryingRegenerator`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per call (first try included)
    pub max_attempts: u32,
    /// Deadline per attempt
    pub timeout: Duration,
    /// Wait before the second attempt
    pub initial_backoff: Duration,
    /// Backoff multiplier between attempts
    pub backoff_multiplier: f64,
    /// Upper bound on any single wait
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(120),
            initial_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    fn backoff_for(&self, completed_attempts: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(completed_attempts.saturating_sub(1) as i32);
        let wait = self.initial_backoff.mul_f64(factor.max(1.0));
        wait.min(self.max_backoff)
    }
}

/// Wraps a regenerator with per-call timeout and bounded retry.
///
/// Each attempt runs on a fresh worker thread; the caller waits with
/// `recv_timeout` and abandons the thread at the deadline (the thread
/// finishes in the background and its late result is dropped).
pub struct RetryingRegenerator<R: Regenerator + 'static> {
    inner: Arc<R>,
    policy: RetryPolicy,
}

impl<R: Regenerator + 'static> RetryingRegenerator<R> {
    pub fn new(inner: R, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(inner),
            policy,
        }
    }

    fn attempt(&self, request: &RegenRequest) -> Result<RgbImage, RegenError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let request = request.clone();

        std::thread::spawn(move || {
            let result = inner.regenerate(&request);
            // Receiver may have timed out and gone away.
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.policy.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(RegenError::Timeout(self.policy.timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(RegenError::Disconnected),
        }
    }
}

impl<R: Regenerator + 'static> Regenerator for RetryingRegenerator<R> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn regenerate(&self, request: &RegenRequest) -> Result<RgbImage, RegenError> {
        let mut last = None;

        for attempt in 1..=self.policy.max_attempts {
            match self.attempt(request) {
                Ok(image) => {
                    debug!(backend = self.inner.name(), attempt, "Regeneration succeeded");
                    return Ok(image);
                }
                Err(e) => {
                    warn!(
                        backend = self.inner.name(),
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Regeneration attempt failed"
                    );
                    last = Some(e);
                    if attempt < self.policy.max_attempts {
                        std::thread::sleep(self.policy.backoff_for(attempt));
                    }
                }
            }
        }

        Err(RegenError::RetriesExhausted {
            attempts: self.policy.max_attempts,
            last: Box::new(last.unwrap_or(RegenError::Disconnected)),
        })
    }
}
