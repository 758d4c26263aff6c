//! Model configuration decoded from the checkpoint header.

use crate::error::{AxonError, Result};
use serde::{Deserialize, Serialize};

/// Number of bytes occupied by the checkpoint header (seven little-endian i32).
pub const HEADER_BYTES: usize = 7 * 4;

/// Configuration for a llama2-class transformer model.
///
/// Decoded from the leading header of the checkpoint blob. A negative stored
/// `vocab_size` is the checkpoint format's flag for an unshared classifier;
/// the decoded config always holds the absolute value and the derived
/// [`shared_classifier`](Self::shared_classifier) flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Transformer dimension.
    pub dim: usize,
    /// Hidden dimension of the FFN layers.
    pub hidden_dim: usize,
    /// Number of layers.
    pub n_layers: usize,
    /// Number of query heads.
    pub n_heads: usize,
    /// Number of key/value heads (GQA when smaller than `n_heads`).
    pub n_kv_heads: usize,
    /// Vocabulary size (always positive).
    pub vocab_size: usize,
    /// Maximum sequence length.
    pub seq_len: usize,
    /// Whether classifier weights are shared with the token embedding table.
    pub shared_classifier: bool,
}

impl ModelConfig {
    /// Decode the config from the leading checkpoint header.
    pub fn from_header(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_BYTES {
            return Err(AxonError::CorruptModel(format!(
                "header needs {} bytes, got {}",
                HEADER_BYTES,
                bytes.len()
            )));
        }

        let mut fields = [0i32; 7];
        for (i, field) in fields.iter_mut().enumerate() {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
            *field = i32::from_le_bytes(raw);
        }
        let [dim, hidden_dim, n_layers, n_heads, n_kv_heads, vocab_size, seq_len] = fields;

        // Negative vocab_size signals an unshared classifier.
        let shared_classifier = vocab_size > 0;
        let vocab_size = vocab_size.unsigned_abs() as usize;

        let config = Self {
            dim: positive(dim, "dim")?,
            hidden_dim: positive(hidden_dim, "hidden_dim")?,
            n_layers: positive(n_layers, "n_layers")?,
            n_heads: positive(n_heads, "n_heads")?,
            n_kv_heads: positive(n_kv_heads, "n_kv_heads")?,
            vocab_size,
            seq_len: positive(seq_len, "seq_len")?,
            shared_classifier,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the structural invariants of the header fields.
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(AxonError::CorruptModel("vocab_size must be non-zero".into()));
        }
        if self.n_heads % self.n_kv_heads != 0 {
            return Err(AxonError::CorruptModel(format!(
                "n_heads ({}) must be a multiple of n_kv_heads ({})",
                self.n_heads, self.n_kv_heads
            )));
        }
        if self.dim % self.n_heads != 0 {
            return Err(AxonError::CorruptModel(format!(
                "dim ({}) must be a multiple of n_heads ({})",
                self.dim, self.n_heads
            )));
        }
        Ok(())
    }

    /// Dimension of one attention head.
    pub fn head_size(&self) -> usize {
        self.dim / self.n_heads
    }

    /// Combined key/value dimension per position.
    pub fn kv_dim(&self) -> usize {
        self.n_kv_heads * self.head_size()
    }

    /// Number of query heads that share one KV head.
    pub fn gqa_ratio(&self) -> usize {
        self.n_heads / self.n_kv_heads
    }
}

fn positive(value: i32, name: &str) -> Result<usize> {
    if value <= 0 {
        return Err(AxonError::CorruptModel(format!(
            "{} must be positive, got {}",
            name, value
        )));
    }
    Ok(value as usize)
}
