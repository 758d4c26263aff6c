//! Per-key generation sessions.
//!
//! Each caller key owns one active session whose KV cache, cursor and
//! running output survive between calls. Sessions are created or reset only
//! by an explicit start operation and removed only by an explicit caller
//! request, never implicitly during generation.

use crate::error::{AxonError, Result};
use crate::model::{ForwardState, KvCache, ModelConfig};
use crate::tokenizer::BOS_TOKEN;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Usage metadata for one started chat within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    /// Wall-clock start time in nanoseconds.
    pub start_time_ns: u64,
    /// Tokens processed by the chat so far (prompt-forced tokens included).
    pub total_steps: u64,
}

/// The persistent generation context for one caller key.
pub struct Session {
    /// Model shapes the buffers were sized from.
    pub(crate) config: ModelConfig,
    /// Key/value cache, filled monotonically up to `pos`.
    pub(crate) kv_cache: KvCache,
    /// Per-step activation scratch, reused across calls.
    pub(crate) scratch: ForwardState,
    /// Absolute write cursor into the KV cache.
    pub(crate) pos: usize,
    /// Continuation point: last token produced, or the BOS sentinel.
    pub(crate) next: u32,
    /// Cumulative tokens processed over the session's lifetime.
    pub(crate) total_steps: u64,
    /// Tokens processed during the current call only.
    pub(crate) inference_steps: u64,
    /// Append-only concatenation of every decoded piece ever produced.
    pub(crate) output_history: String,
    /// One record per started chat; survives resets.
    pub(crate) chats: Vec<ChatRecord>,
}

impl Session {
    /// Allocate a fresh session sized from the model config.
    fn new(config: &ModelConfig, start_time_ns: u64) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            kv_cache: KvCache::new(config)?,
            scratch: ForwardState::new(config)?,
            pos: 0,
            next: BOS_TOKEN,
            total_steps: 0,
            inference_steps: 0,
            output_history: String::new(),
            chats: vec![ChatRecord {
                start_time_ns,
                total_steps: 0,
            }],
        })
    }

    /// Reset all mutable state for a new chat, replacing the owned buffers.
    ///
    /// Chat metadata survives; a new record is appended for the fresh chat.
    fn reset(&mut self, config: &ModelConfig, start_time_ns: u64) -> Result<()> {
        self.kv_cache = KvCache::new(config)?;
        self.scratch = ForwardState::new(config)?;
        self.config = config.clone();
        self.pos = 0;
        self.next = BOS_TOKEN;
        self.total_steps = 0;
        self.inference_steps = 0;
        self.output_history.clear();
        self.chats.push(ChatRecord {
            start_time_ns,
            total_steps: 0,
        });
        Ok(())
    }

    /// Absolute position of the next KV-cache write.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// The continuation token for the next call.
    pub fn next_token(&self) -> u32 {
        self.next
    }

    /// Cumulative tokens processed in this session.
    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    /// Tokens processed during the most recent call.
    pub fn inference_steps(&self) -> u64 {
        self.inference_steps
    }

    /// Full decoded output produced by this session so far.
    pub fn output_history(&self) -> &str {
        &self.output_history
    }

    /// Metadata for every chat started on this session.
    pub fn chats(&self) -> &[ChatRecord] {
        &self.chats
    }

    /// Whether the session's buffers match the given model shapes.
    pub fn matches_config(&self, config: &ModelConfig) -> bool {
        self.config == *config
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pos", &self.pos)
            .field("next", &self.next)
            .field("total_steps", &self.total_steps)
            .field("history_len", &self.output_history.len())
            .finish()
    }
}

/// Owner of all sessions, keyed by an opaque, already-validated session key.
///
/// The map lock is held only to resolve a key; each session sits behind its
/// own mutex, so calls for the same key serialize while calls for distinct
/// keys proceed in parallel.
#[derive(Default)]
pub struct SessionStore {
    inner: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the session for `key` if absent, then reset it for a new chat.
    pub fn start_session(
        &self,
        key: &str,
        config: &ModelConfig,
        start_time_ns: u64,
    ) -> Result<()> {
        let mut map = self.inner.write();
        match map.get(key) {
            Some(slot) => slot.lock().reset(config, start_time_ns)?,
            None => {
                let session = Session::new(config, start_time_ns)?;
                map.insert(key.to_string(), Arc::new(Mutex::new(session)));
                tracing::debug!(key, "created session");
            }
        }
        Ok(())
    }

    /// Look up an existing session without resetting it.
    pub fn get(&self, key: &str) -> Result<Arc<Mutex<Session>>> {
        self.inner
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| AxonError::SessionNotFound(key.to_string()))
    }

    /// Remove a session entirely. Caller-driven; never happens implicitly.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.inner
            .write()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| AxonError::SessionNotFound(key.to_string()))
    }

    /// Whether a session exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().contains_key(key)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the store holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
