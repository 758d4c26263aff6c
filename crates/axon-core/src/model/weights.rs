//! Checkpoint weight storage.
//!
//! The checkpoint blob is one contiguous run of little-endian f32 values
//! following the config header. Instead of aliasing raw pointers into the
//! blob, the store copies it once into an owned arena and computes a set of
//! bounds-checked offset ranges from the config. The total arena length must
//! equal the sum of all computed ranges exactly; a mismatch is a fatal load
//! error, never a partial load.

use crate::error::{AxonError, Result};
use crate::model::config::{ModelConfig, HEADER_BYTES};
use std::ops::Range;

/// Offset ranges into the weight arena, computed once at load time.
///
/// Layout order matches the llama2 checkpoint format. The checkpoint carries
/// `seq_len * head_size` floats of legacy RoPE frequency tables between the
/// final norm and the optional classifier; they are unused at inference time
/// but occupy space, so the layout skips over them.
#[derive(Debug, Clone)]
struct WeightLayout {
    token_embedding: Range<usize>,
    rms_att: Range<usize>,
    wq: Range<usize>,
    wk: Range<usize>,
    wv: Range<usize>,
    wo: Range<usize>,
    rms_ffn: Range<usize>,
    w1: Range<usize>,
    w2: Range<usize>,
    w3: Range<usize>,
    rms_final: Range<usize>,
    classifier: Option<Range<usize>>,
    total: usize,
}

impl WeightLayout {
    fn compute(config: &ModelConfig) -> Result<Self> {
        let mut cursor = Cursor::default();
        let dim = config.dim;
        let hidden = config.hidden_dim;
        let layers = config.n_layers;
        let kv_dim = config.kv_dim();

        let token_embedding = cursor.take(&[config.vocab_size, dim])?;
        let rms_att = cursor.take(&[layers, dim])?;
        let wq = cursor.take(&[layers, dim, dim])?;
        let wk = cursor.take(&[layers, dim, kv_dim])?;
        let wv = cursor.take(&[layers, dim, kv_dim])?;
        let wo = cursor.take(&[layers, dim, dim])?;
        let rms_ffn = cursor.take(&[layers, dim])?;
        let w1 = cursor.take(&[layers, dim, hidden])?;
        let w2 = cursor.take(&[layers, hidden, dim])?;
        let w3 = cursor.take(&[layers, dim, hidden])?;
        let rms_final = cursor.take(&[dim])?;
        // Legacy freq_cis_real / freq_cis_imag tables.
        cursor.take(&[config.seq_len, config.head_size() / 2])?;
        cursor.take(&[config.seq_len, config.head_size() / 2])?;
        let classifier = if config.shared_classifier {
            None
        } else {
            Some(cursor.take(&[config.vocab_size, dim])?)
        };

        Ok(Self {
            token_embedding,
            rms_att,
            wq,
            wk,
            wv,
            wo,
            rms_ffn,
            w1,
            w2,
            w3,
            rms_final,
            classifier,
            total: cursor.offset,
        })
    }
}

#[derive(Default)]
struct Cursor {
    offset: usize,
}

impl Cursor {
    fn take(&mut self, dims: &[usize]) -> Result<Range<usize>> {
        let len = dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d));
        let len = len.ok_or_else(|| {
            AxonError::CorruptModel(format!("weight shape {:?} overflows", dims))
        })?;
        let end = self.offset.checked_add(len).ok_or_else(|| {
            AxonError::CorruptModel("weight layout offset overflows".into())
        })?;
        let range = self.offset..end;
        self.offset = end;
        Ok(range)
    }
}

/// Parsed model configuration and weight tensors.
///
/// Read-only once loaded; shared across all sessions.
pub struct ModelStore {
    config: ModelConfig,
    arena: Vec<f32>,
    layout: WeightLayout,
}

impl ModelStore {
    /// Load a model from the raw checkpoint bytes.
    ///
    /// Parses the config header, computes the weight layout, and validates
    /// that the remaining byte length equals the layout exactly. On mismatch
    /// returns [`AxonError::CorruptModel`]; no partial success.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let config = ModelConfig::from_header(bytes)?;
        let layout = WeightLayout::compute(&config)?;

        let body = &bytes[HEADER_BYTES..];
        if body.len() != layout.total * 4 {
            return Err(AxonError::CorruptModel(format!(
                "weight blob is {} bytes, config requires {}",
                body.len(),
                layout.total * 4
            )));
        }

        let arena: Vec<f32> = body
            .chunks_exact(4)
            .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            .collect();

        tracing::info!(
            dim = config.dim,
            hidden_dim = config.hidden_dim,
            n_layers = config.n_layers,
            n_heads = config.n_heads,
            n_kv_heads = config.n_kv_heads,
            vocab_size = config.vocab_size,
            seq_len = config.seq_len,
            shared_classifier = config.shared_classifier,
            "loaded model checkpoint"
        );

        Ok(Self {
            config,
            arena,
            layout,
        })
    }

    /// Model configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Token embedding table, `(vocab_size, dim)`.
    pub fn token_embedding(&self) -> &[f32] {
        &self.arena[self.layout.token_embedding.clone()]
    }

    /// Embedding row for one token.
    pub fn embedding_row(&self, token: u32) -> &[f32] {
        let dim = self.config.dim;
        let offset = self.layout.token_embedding.start + token as usize * dim;
        &self.arena[offset..offset + dim]
    }

    /// Attention RMSNorm weight for one layer, `(dim,)`.
    pub fn rms_att(&self, layer: usize) -> &[f32] {
        self.layer_slice(&self.layout.rms_att, layer, self.config.dim)
    }

    /// Query projection for one layer, `(dim, dim)`.
    pub fn wq(&self, layer: usize) -> &[f32] {
        self.layer_slice(&self.layout.wq, layer, self.config.dim * self.config.dim)
    }

    /// Key projection for one layer, `(kv_dim, dim)`.
    pub fn wk(&self, layer: usize) -> &[f32] {
        self.layer_slice(&self.layout.wk, layer, self.config.dim * self.config.kv_dim())
    }

    /// Value projection for one layer, `(kv_dim, dim)`.
    pub fn wv(&self, layer: usize) -> &[f32] {
        self.layer_slice(&self.layout.wv, layer, self.config.dim * self.config.kv_dim())
    }

    /// Attention output projection for one layer, `(dim, dim)`.
    pub fn wo(&self, layer: usize) -> &[f32] {
        self.layer_slice(&self.layout.wo, layer, self.config.dim * self.config.dim)
    }

    /// FFN RMSNorm weight for one layer, `(dim,)`.
    pub fn rms_ffn(&self, layer: usize) -> &[f32] {
        self.layer_slice(&self.layout.rms_ffn, layer, self.config.dim)
    }

    /// FFN gate projection for one layer, `(hidden_dim, dim)`.
    pub fn w1(&self, layer: usize) -> &[f32] {
        self.layer_slice(&self.layout.w1, layer, self.config.dim * self.config.hidden_dim)
    }

    /// FFN down projection for one layer, `(dim, hidden_dim)`.
    pub fn w2(&self, layer: usize) -> &[f32] {
        self.layer_slice(&self.layout.w2, layer, self.config.dim * self.config.hidden_dim)
    }

    /// FFN up projection for one layer, `(hidden_dim, dim)`.
    pub fn w3(&self, layer: usize) -> &[f32] {
        self.layer_slice(&self.layout.w3, layer, self.config.dim * self.config.hidden_dim)
    }

    /// Final RMSNorm weight, `(dim,)`.
    pub fn rms_final(&self) -> &[f32] {
        &self.arena[self.layout.rms_final.clone()]
    }

    /// Classifier weights, `(vocab_size, dim)`.
    ///
    /// Aliased to the token embedding table when the checkpoint declares a
    /// shared classifier.
    pub fn classifier(&self) -> &[f32] {
        match &self.layout.classifier {
            Some(range) => &self.arena[range.clone()],
            None => self.token_embedding(),
        }
    }

    fn layer_slice(&self, range: &Range<usize>, layer: usize, stride: usize) -> &[f32] {
        let offset = range.start + layer * stride;
        &self.arena[offset..offset + stride]
    }
}

impl std::fmt::Debug for ModelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelStore")
            .field("config", &self.config)
            .field("arena_len", &self.arena.len())
            .finish()
    }
}
