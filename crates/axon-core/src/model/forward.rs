//! Single-position decode step.
//!
//! Executes one `(token, pos) -> logits` forward pass over flat f32 slices.
//! The reduction order is fixed: RMSNorm as `1/sqrt(mean(x^2) + 1e-5)`,
//! rotary embedding as a pairwise rotation of adjacent dims, and causal
//! attention over cached positions `0..=pos`. Greedy decoding over these
//! kernels is deterministic, which is what the golden regression tests pin.

use crate::error::{AxonError, Result};
use crate::model::config::ModelConfig;
use crate::model::weights::ModelStore;

/// Root mean square normalization with learned scale.
pub(crate) fn rmsnorm(out: &mut [f32], x: &[f32], weight: &[f32]) {
    let mut ss = 0.0f32;
    for &v in x {
        ss += v * v;
    }
    ss /= x.len() as f32;
    ss += 1e-5;
    ss = 1.0 / ss.sqrt();
    for ((o, &w), &v) in out.iter_mut().zip(weight).zip(x) {
        *o = w * (ss * v);
    }
}

/// In-place softmax.
pub(crate) fn softmax(x: &mut [f32]) {
    let mut max = x[0];
    for &v in x.iter() {
        if v > max {
            max = v;
        }
    }
    let mut sum = 0.0f32;
    for v in x.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in x.iter_mut() {
        *v /= sum;
    }
}

/// `out = w @ x` where `w` is `(out.len(), x.len())` row-major.
pub(crate) fn matmul(out: &mut [f32], x: &[f32], w: &[f32]) {
    let n = x.len();
    for (i, o) in out.iter_mut().enumerate() {
        let row = &w[i * n..i * n + n];
        let mut sum = 0.0f32;
        for (&wv, &xv) in row.iter().zip(x) {
            sum += wv * xv;
        }
        *o = sum;
    }
}

/// Key/value projections cached for every processed position.
///
/// Two buffers of shape `[n_layers, seq_len, kv_dim]`, filled monotonically
/// up to the session cursor.
pub struct KvCache {
    key: Vec<f32>,
    value: Vec<f32>,
    seq_len: usize,
    kv_dim: usize,
}

impl KvCache {
    /// Allocate a zeroed cache sized from the model config.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let len = config
            .n_layers
            .checked_mul(config.seq_len)
            .and_then(|n| n.checked_mul(config.kv_dim()))
            .ok_or_else(|| {
                AxonError::AllocationFailure(format!(
                    "kv cache shape [{}, {}, {}] overflows",
                    config.n_layers,
                    config.seq_len,
                    config.kv_dim()
                ))
            })?;
        Ok(Self {
            key: vec![0.0; len],
            value: vec![0.0; len],
            seq_len: config.seq_len,
            kv_dim: config.kv_dim(),
        })
    }

    /// Zero the cache for a fresh sequence.
    pub fn reset(&mut self) {
        self.key.fill(0.0);
        self.value.fill(0.0);
    }

    fn offset(&self, layer: usize, pos: usize) -> usize {
        (layer * self.seq_len + pos) * self.kv_dim
    }

    /// Cached key projection at one position.
    pub fn key_row(&self, layer: usize, pos: usize) -> &[f32] {
        let offset = self.offset(layer, pos);
        &self.key[offset..offset + self.kv_dim]
    }

    /// Cached value projection at one position.
    pub fn value_row(&self, layer: usize, pos: usize) -> &[f32] {
        let offset = self.offset(layer, pos);
        &self.value[offset..offset + self.kv_dim]
    }

    /// Writable key/value rows for the position being decoded.
    fn rows_mut(&mut self, layer: usize, pos: usize) -> (&mut [f32], &mut [f32]) {
        let offset = self.offset(layer, pos);
        let kv_dim = self.kv_dim;
        (
            &mut self.key[offset..offset + kv_dim],
            &mut self.value[offset..offset + kv_dim],
        )
    }

    /// Number of f32 values in each of the two buffers.
    pub fn len(&self) -> usize {
        self.key.len()
    }

    /// Whether the cache holds no buffers.
    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

/// Reusable per-step activation buffers, sized from the model config.
///
/// Persisted across calls within one session together with the KV cache;
/// never shared between sessions.
pub struct ForwardState {
    /// Activation at the current position `(dim,)`.
    x: Vec<f32>,
    /// Residual-branch buffer `(dim,)`.
    xb: Vec<f32>,
    /// Second residual-branch buffer `(dim,)`.
    xb2: Vec<f32>,
    /// FFN hidden buffer `(hidden_dim,)`.
    hb: Vec<f32>,
    /// Second FFN hidden buffer `(hidden_dim,)`.
    hb2: Vec<f32>,
    /// Query `(dim,)`.
    q: Vec<f32>,
    /// Attention scores `(n_heads, seq_len)`.
    att: Vec<f32>,
    /// Output logits `(vocab_size,)`.
    logits: Vec<f32>,
}

impl ForwardState {
    /// Allocate zeroed scratch buffers.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let att_len = config.n_heads.checked_mul(config.seq_len).ok_or_else(|| {
            AxonError::AllocationFailure(format!(
                "attention scratch [{}, {}] overflows",
                config.n_heads, config.seq_len
            ))
        })?;
        Ok(Self {
            x: vec![0.0; config.dim],
            xb: vec![0.0; config.dim],
            xb2: vec![0.0; config.dim],
            hb: vec![0.0; config.hidden_dim],
            hb2: vec![0.0; config.hidden_dim],
            q: vec![0.0; config.dim],
            att: vec![0.0; att_len],
            logits: vec![0.0; config.vocab_size],
        })
    }

    /// Zero all buffers.
    pub fn reset(&mut self) {
        self.x.fill(0.0);
        self.xb.fill(0.0);
        self.xb2.fill(0.0);
        self.hb.fill(0.0);
        self.hb2.fill(0.0);
        self.q.fill(0.0);
        self.att.fill(0.0);
        self.logits.fill(0.0);
    }

    /// Raw logits produced by the last step.
    pub fn logits(&self) -> &[f32] {
        &self.logits
    }

    /// Mutable logits, handed to the sampler (which scales them in place).
    pub fn logits_mut(&mut self) -> &mut [f32] {
        &mut self.logits
    }
}

/// Run one decode step: embed `token` at `pos`, update the KV cache, and
/// leave raw (unnormalized) logits in `state.logits`.
pub fn step(
    model: &ModelStore,
    state: &mut ForwardState,
    cache: &mut KvCache,
    token: u32,
    pos: usize,
) {
    let config = model.config();
    let dim = config.dim;
    let kv_dim = config.kv_dim();
    let head_size = config.head_size();
    let hidden_dim = config.hidden_dim;
    let seq_len = config.seq_len;
    let gqa = config.gqa_ratio();
    debug_assert!((token as usize) < config.vocab_size);
    debug_assert!(pos < seq_len);

    state.x.copy_from_slice(model.embedding_row(token));

    for layer in 0..config.n_layers {
        // Attention block.
        rmsnorm(&mut state.xb, &state.x, model.rms_att(layer));
        matmul(&mut state.q, &state.xb, model.wq(layer));
        {
            let (k_row, v_row) = cache.rows_mut(layer, pos);
            matmul(k_row, &state.xb, model.wk(layer));
            matmul(v_row, &state.xb, model.wv(layer));

            // RoPE: rotate adjacent pairs of q (all dims) and k (kv dims).
            for i in (0..dim).step_by(2) {
                let head_dim = i % head_size;
                let freq = 1.0 / 10000.0f32.powf(head_dim as f32 / head_size as f32);
                let val = pos as f32 * freq;
                let fcr = val.cos();
                let fci = val.sin();
                let rotn = if i < kv_dim { 2 } else { 1 };
                for v in 0..rotn {
                    let vec = if v == 0 {
                        &mut state.q[..]
                    } else {
                        &mut k_row[..]
                    };
                    let v0 = vec[i];
                    let v1 = vec[i + 1];
                    vec[i] = v0 * fcr - v1 * fci;
                    vec[i + 1] = v0 * fci + v1 * fcr;
                }
            }
        }

        // Causal attention over cached positions 0..=pos; query heads share
        // KV heads in groups of `gqa`.
        let scale = (head_size as f32).sqrt();
        for h in 0..config.n_heads {
            let q_h = &state.q[h * head_size..(h + 1) * head_size];
            let kv_head = h / gqa;
            let att = &mut state.att[h * seq_len..h * seq_len + pos + 1];
            for (t, score) in att.iter_mut().enumerate() {
                let k_h = &cache.key_row(layer, t)[kv_head * head_size..][..head_size];
                let mut dot = 0.0f32;
                for (&qv, &kv) in q_h.iter().zip(k_h) {
                    dot += qv * kv;
                }
                *score = dot / scale;
            }
            softmax(att);

            let out_h = &mut state.xb[h * head_size..(h + 1) * head_size];
            out_h.fill(0.0);
            for (t, &a) in att.iter().enumerate() {
                let v_h = &cache.value_row(layer, t)[kv_head * head_size..][..head_size];
                for (o, &vv) in out_h.iter_mut().zip(v_h) {
                    *o += a * vv;
                }
            }
        }

        matmul(&mut state.xb2, &state.xb, model.wo(layer));
        for (x, &r) in state.x.iter_mut().zip(&state.xb2) {
            *x += r;
        }

        // SwiGLU feed-forward block.
        rmsnorm(&mut state.xb, &state.x, model.rms_ffn(layer));
        matmul(&mut state.hb, &state.xb, model.w1(layer));
        matmul(&mut state.hb2, &state.xb, model.w3(layer));
        for i in 0..hidden_dim {
            let v = state.hb[i];
            state.hb[i] = v * (1.0 / (1.0 + (-v).exp())) * state.hb2[i];
        }
        matmul(&mut state.xb, &state.hb, model.w2(layer));
        for (x, &r) in state.x.iter_mut().zip(&state.xb) {
            *x += r;
        }
    }

    state.xb.copy_from_slice(&state.x);
    rmsnorm(&mut state.x, &state.xb, model.rms_final());
    matmul(&mut state.logits, &state.x, model.classifier());
}
