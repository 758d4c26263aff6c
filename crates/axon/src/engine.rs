//! High-level multi-tenant generation engine.
//!
//! The engine owns the shared read-only model state (checkpoint weights and
//! tokenizer) plus the session store, and exposes the operations a serving
//! layer calls per request. Model and tokenizer sit behind their own locks
//! so uploads can replace them while sessions stay alive.

use axon_core::error::{AxonError, Result};
use axon_core::generate::generate;
use axon_core::model::{ModelConfig, ModelStore};
use axon_core::sampler::Sampler;
use axon_core::session::{ChatRecord, SessionStore};
use axon_core::tokenizer::Tokenizer;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// One generation request for a session.
///
/// Out-of-range sampling knobs are clamped rather than rejected: a negative
/// temperature becomes 0 (greedy), a top-p outside `[0, 1]` becomes 0.9, and
/// a zero seed is replaced by wall-clock nanoseconds captured once per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    /// Prompt text; when non-empty the call only force-feeds the prompt.
    pub text: String,
    /// Tokens to sample when the prompt is empty.
    pub steps: u64,
    /// Sampling temperature; 0 selects greedy decoding.
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// PRNG seed; 0 requests a time-derived seed.
    pub seed: u64,
}

impl Default for PromptRequest {
    fn default() -> Self {
        Self {
            text: String::new(),
            steps: 0,
            temperature: 1.0,
            top_p: 0.9,
            seed: 0,
        }
    }
}

/// Outcome of one generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResult {
    /// Text decoded during this call.
    pub text: String,
    /// Tokens processed during this call, prompt-forced tokens included.
    pub tokens_produced: u64,
}

/// Shared engine state: model, tokenizer and all sessions.
#[derive(Default)]
pub struct Engine {
    model: RwLock<Option<ModelStore>>,
    tokenizer: RwLock<Option<Tokenizer>>,
    sessions: SessionStore,
}

impl Engine {
    /// Create an engine with no model loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load (or replace) the model from raw checkpoint bytes.
    pub fn load_model(&self, bytes: &[u8]) -> Result<()> {
        let store = ModelStore::load(bytes)?;
        *self.model.write() = Some(store);
        Ok(())
    }

    /// Load (or replace) the tokenizer from its raw blob.
    ///
    /// Requires a loaded model, whose config supplies the vocabulary size
    /// the blob must match.
    pub fn load_tokenizer(&self, bytes: &[u8]) -> Result<()> {
        let model = self.model.read();
        let model = model
            .as_ref()
            .ok_or_else(|| AxonError::NotReady("load a model before the tokenizer".into()))?;
        let tokenizer = Tokenizer::load(bytes, model.config().vocab_size)?;
        *self.tokenizer.write() = Some(tokenizer);
        Ok(())
    }

    /// Whether both model and tokenizer are loaded.
    pub fn ready(&self) -> bool {
        self.model.read().is_some() && self.tokenizer.read().is_some()
    }

    /// Drop the loaded model and tokenizer.
    ///
    /// Sessions are kept; ones sized for the dropped model are rejected at
    /// their next generate call until started again.
    pub fn reset_model(&self) {
        *self.model.write() = None;
        *self.tokenizer.write() = None;
        tracing::info!("model and tokenizer cleared");
    }

    /// Config of the loaded model.
    pub fn config(&self) -> Result<ModelConfig> {
        self.model
            .read()
            .as_ref()
            .map(|m| m.config().clone())
            .ok_or_else(|| AxonError::NotReady("no model loaded".into()))
    }

    /// Start (or restart) the session for `key` with a fresh chat.
    pub fn start_session(&self, key: &str) -> Result<()> {
        let model = self.model.read();
        let model = model
            .as_ref()
            .ok_or_else(|| AxonError::NotReady("no model loaded".into()))?;
        self.sessions.start_session(key, model.config(), now_ns())
    }

    /// Run one generation call against the session for `key`.
    pub fn generate(&self, key: &str, request: &PromptRequest) -> Result<GenerateResult> {
        let model = self.model.read();
        let model = model
            .as_ref()
            .ok_or_else(|| AxonError::NotReady("no model loaded".into()))?;
        let tokenizer = self.tokenizer.read();
        let tokenizer = tokenizer
            .as_ref()
            .ok_or_else(|| AxonError::NotReady("no tokenizer loaded".into()))?;

        let slot = self.sessions.get(key)?;
        let mut session = slot.lock();
        if !session.matches_config(model.config()) {
            return Err(AxonError::StaleSession(format!(
                "{key} was started under a different model; start a new chat"
            )));
        }

        let temperature = if request.temperature < 0.0 {
            0.0
        } else {
            request.temperature
        };
        let top_p = if (0.0..=1.0).contains(&request.top_p) {
            request.top_p
        } else {
            0.9
        };
        let seed = if request.seed == 0 {
            now_ns()
        } else {
            request.seed
        };
        let mut sampler = Sampler::new(temperature, top_p, seed);

        let text = generate(
            model,
            tokenizer,
            &mut session,
            &request.text,
            request.steps,
            &mut sampler,
        )?;
        Ok(GenerateResult {
            text,
            tokens_produced: session.inference_steps(),
        })
    }

    /// Full output produced by the session so far.
    pub fn history(&self, key: &str) -> Result<String> {
        let slot = self.sessions.get(key)?;
        let session = slot.lock();
        Ok(session.output_history().to_string())
    }

    /// Metadata for every chat started on the session.
    pub fn chats(&self, key: &str) -> Result<Vec<ChatRecord>> {
        let slot = self.sessions.get(key)?;
        let session = slot.lock();
        Ok(session.chats().to_vec())
    }

    /// Remove the session for `key` entirely.
    pub fn remove_session(&self, key: &str) -> Result<()> {
        self.sessions.remove(key)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}
