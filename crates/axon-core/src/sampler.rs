//! Next-token sampling: greedy, temperature and nucleus (top-p).
//!
//! The PRNG is the reference xorshift64* generator so that a fixed seed
//! reproduces reference output streams. Parameter validation happens at the
//! engine boundary; the sampler itself never rejects.

use crate::model::forward::softmax;

/// Turns a logits vector into a next-token id.
///
/// One sampler is built per generation call; the whole call is deterministic
/// once seeded.
pub struct Sampler {
    temperature: f32,
    top_p: f32,
    rng_state: u64,
}

/// Candidate kept during top-p truncation.
#[derive(Clone, Copy)]
struct ProbIndex {
    prob: f32,
    index: u32,
}

impl Sampler {
    /// Build a sampler.
    ///
    /// `seed` must already be non-zero; the engine substitutes a time-derived
    /// value before the call's hot loop starts.
    pub fn new(temperature: f32, top_p: f32, seed: u64) -> Self {
        Self {
            temperature,
            top_p,
            rng_state: seed,
        }
    }

    /// Sample the next token. Scales the logits in place.
    pub fn sample(&mut self, logits: &mut [f32]) -> u32 {
        if self.temperature == 0.0 {
            return argmax(logits);
        }
        for l in logits.iter_mut() {
            *l /= self.temperature;
        }
        softmax(logits);
        let coin = self.random_f32();
        if self.top_p <= 0.0 || self.top_p >= 1.0 {
            sample_mult(logits, coin)
        } else {
            sample_topp(logits, self.top_p, coin)
        }
    }

    /// xorshift64* step, as in the reference implementation.
    fn random_u32(&mut self) -> u32 {
        self.rng_state ^= self.rng_state >> 12;
        self.rng_state ^= self.rng_state << 25;
        self.rng_state ^= self.rng_state >> 27;
        (self.rng_state.wrapping_mul(0x2545F4914F6CDD1D) >> 32) as u32
    }

    /// Uniform f32 in `[0, 1)`.
    fn random_f32(&mut self) -> f32 {
        (self.random_u32() >> 8) as f32 / 16777216.0
    }
}

/// Index of the largest value; ties break to the lowest index.
fn argmax(values: &[f32]) -> u32 {
    let mut best = 0usize;
    let mut best_value = values[0];
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best as u32
}

/// One categorical draw from a probability distribution.
fn sample_mult(probabilities: &[f32], coin: f32) -> u32 {
    let mut cdf = 0.0f32;
    for (i, &p) in probabilities.iter().enumerate() {
        cdf += p;
        if coin < cdf {
            return i as u32;
        }
    }
    probabilities.len() as u32 - 1
}

/// Nucleus sampling: draw from the smallest prefix of descending-probability
/// tokens whose cumulative mass first reaches `top_p`, renormalized.
fn sample_topp(probabilities: &[f32], top_p: f32, coin: f32) -> u32 {
    let n = probabilities.len();
    // Values below cutoff cannot be part of the nucleus; skipping them keeps
    // the sort small.
    let cutoff = (1.0 - top_p) / (n - 1) as f32;
    let mut candidates: Vec<ProbIndex> = probabilities
        .iter()
        .enumerate()
        .filter(|(_, &p)| p >= cutoff)
        .map(|(i, &p)| ProbIndex {
            prob: p,
            index: i as u32,
        })
        .collect();
    if candidates.is_empty() {
        // Every probability sits below the cutoff (possible when top_p is
        // smaller than 1/n); the nucleus is then the whole distribution.
        return sample_mult(probabilities, coin);
    }
    candidates.sort_by(|a, b| b.prob.partial_cmp(&a.prob).unwrap_or(std::cmp::Ordering::Equal));

    let mut cumulative = 0.0f32;
    let mut last = candidates.len() - 1;
    for (i, c) in candidates.iter().enumerate() {
        cumulative += c.prob;
        if cumulative > top_p {
            last = i;
            break;
        }
    }

    // Sample within the truncated, renormalized set.
    let r = coin * cumulative;
    let mut cdf = 0.0f32;
    for c in &candidates[..=last] {
        cdf += c.prob;
        if r < cdf {
            return c.index;
        }
    }
    candidates[last].index
}
