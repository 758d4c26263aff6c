//! Byte-pair tokenizer built from an uploaded vocabulary blob.
//!
//! The blob format is `max_token_length: i32` followed by `vocab_size`
//! repetitions of `(score: f32, len: i32, bytes: [u8; len])`, all
//! little-endian. Encoding seeds the sequence with per-codepoint vocabulary
//! hits (raw-byte fallback otherwise) and then greedily applies the
//! highest-scoring adjacent merge, leftmost on ties, until no adjacent pair
//! resolves to a vocabulary entry. The merge order is part of the contract:
//! greedy, not globally optimal, so output stays comparable to reference
//! golden strings.

use crate::error::{AxonError, Result};

/// Begin-of-sequence sentinel token id.
pub const BOS_TOKEN: u32 = 1;
/// End-of-sequence sentinel token id.
pub const EOS_TOKEN: u32 = 2;
/// Raw byte `b` falls back to token id `b + BYTE_FALLBACK_OFFSET`.
pub const BYTE_FALLBACK_OFFSET: u32 = 3;

/// Vocabulary strings, merge scores and a sorted merge-lookup index.
///
/// Built once from the raw blob; immutable thereafter and shared read-only
/// across all sessions.
pub struct Tokenizer {
    vocab: Vec<String>,
    scores: Vec<f32>,
    /// Token ids ordered by their vocabulary string, for O(log n) lookup.
    sorted: Vec<u32>,
    max_token_length: usize,
}

impl Tokenizer {
    /// Parse the vocabulary blob.
    ///
    /// `vocab_size` comes from the model config; the blob does not carry it.
    /// Every entry length must satisfy `0 < len <= max_token_length` or the
    /// load fails with [`AxonError::CorruptTokenizer`].
    pub fn load(bytes: &[u8], vocab_size: usize) -> Result<Self> {
        let mut reader = BlobReader { bytes, offset: 0 };

        let max_token_length = reader.read_i32()?;
        if max_token_length <= 0 {
            return Err(AxonError::CorruptTokenizer(format!(
                "max_token_length must be positive, got {}",
                max_token_length
            )));
        }
        let max_token_length = max_token_length as usize;

        let mut vocab = Vec::with_capacity(vocab_size);
        let mut scores = Vec::with_capacity(vocab_size);
        for i in 0..vocab_size {
            let score = reader.read_f32()?;
            let len = reader.read_i32()?;
            if len <= 0 || len as usize > max_token_length {
                return Err(AxonError::CorruptTokenizer(format!(
                    "token {} has length {}, expected 1..={}",
                    i, len, max_token_length
                )));
            }
            let raw = reader.read_bytes(len as usize)?;
            let piece = std::str::from_utf8(raw).map_err(|_| {
                AxonError::CorruptTokenizer(format!("token {} is not valid utf-8", i))
            })?;
            vocab.push(piece.to_string());
            scores.push(score);
        }

        let mut sorted: Vec<u32> = (0..vocab_size as u32).collect();
        sorted.sort_by(|&a, &b| vocab[a as usize].cmp(&vocab[b as usize]));

        tracing::info!(vocab_size, max_token_length, "loaded tokenizer vocabulary");

        Ok(Self {
            vocab,
            scores,
            sorted,
            max_token_length,
        })
    }

    /// Number of vocabulary entries.
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Longest vocabulary piece, in bytes.
    pub fn max_token_length(&self) -> usize {
        self.max_token_length
    }

    /// Vocabulary string for one token id.
    pub fn piece(&self, id: u32) -> Option<&str> {
        self.vocab.get(id as usize).map(String::as_str)
    }

    /// Look up a string in the vocabulary.
    pub fn lookup(&self, s: &str) -> Option<u32> {
        self.sorted
            .binary_search_by(|&id| self.vocab[id as usize].as_str().cmp(s))
            .ok()
            .map(|idx| self.sorted[idx])
    }

    /// Encode text into token ids.
    ///
    /// Fails only on a vocabulary invariant violation (a raw-byte fallback id
    /// outside the loaded vocabulary); running out of merges is the normal
    /// terminal condition, not an error.
    pub fn encode(&self, text: &str, add_bos: bool, add_eos: bool) -> Result<Vec<u32>> {
        let mut tokens: Vec<u32> = Vec::with_capacity(text.len() + 2);
        if add_bos {
            tokens.push(BOS_TOKEN);
        }

        // Seed with whole codepoints, falling back to one raw-byte token per
        // UTF-8 byte for codepoints absent from the vocabulary.
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            let s = ch.encode_utf8(&mut buf);
            if let Some(id) = self.lookup(s) {
                tokens.push(id);
            } else {
                for b in s.bytes() {
                    let id = b as u32 + BYTE_FALLBACK_OFFSET;
                    if id as usize >= self.vocab.len() {
                        return Err(AxonError::EncodingFailure(format!(
                            "byte fallback id {} exceeds vocab size {}",
                            id,
                            self.vocab.len()
                        )));
                    }
                    tokens.push(id);
                }
            }
        }

        // Greedy merge: highest score wins, leftmost on ties.
        loop {
            let mut best: Option<(f32, usize, u32)> = None;
            for i in 0..tokens.len().saturating_sub(1) {
                let left = self.merge_piece(tokens[i])?;
                let right = self.merge_piece(tokens[i + 1])?;
                let mut merged = String::with_capacity(left.len() + right.len());
                merged.push_str(left);
                merged.push_str(right);
                if let Some(id) = self.lookup(&merged) {
                    let score = self.scores[id as usize];
                    if best.map_or(true, |(best_score, _, _)| score > best_score) {
                        best = Some((score, i, id));
                    }
                }
            }
            match best {
                Some((_, i, id)) => {
                    tokens[i] = id;
                    tokens.remove(i + 1);
                }
                None => break,
            }
        }

        if add_eos {
            tokens.push(EOS_TOKEN);
        }
        Ok(tokens)
    }

    /// Decode one token into its visible text piece, given the previous token.
    ///
    /// Following the sentencepiece convention, a leading space is stripped
    /// right after BOS. Raw-byte pieces that are neither printable nor
    /// whitespace decode to an empty piece so control bytes never reach the
    /// visible output.
    pub fn decode(&self, prev: u32, token: u32) -> String {
        let Some(piece) = self.piece(token) else {
            return String::new();
        };
        let piece = if prev == BOS_TOKEN {
            piece.strip_prefix(' ').unwrap_or(piece)
        } else {
            piece
        };

        if let Some(byte) = parse_byte_piece(piece) {
            return if is_visible_byte(byte) {
                (byte as char).to_string()
            } else {
                String::new()
            };
        }
        if piece.len() == 1 && !is_visible_byte(piece.as_bytes()[0]) {
            return String::new();
        }
        piece.to_string()
    }

    fn merge_piece(&self, id: u32) -> Result<&str> {
        self.piece(id).ok_or_else(|| {
            AxonError::EncodingFailure(format!("token id {} exceeds vocabulary", id))
        })
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("vocab_size", &self.vocab.len())
            .field("max_token_length", &self.max_token_length)
            .finish()
    }
}

/// Parse a `<0xXX>` raw-byte vocabulary piece.
fn parse_byte_piece(piece: &str) -> Option<u8> {
    let hex = piece.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

/// Printable ASCII or whitespace, the bytes allowed in visible output.
fn is_visible_byte(b: u8) -> bool {
    (0x20..=0x7e).contains(&b) || matches!(b, b'\t' | b'\n' | 0x0b | 0x0c | b'\r')
}

struct BlobReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> BlobReader<'a> {
    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.offset.checked_add(len).filter(|&e| e <= self.bytes.len());
        let end = end.ok_or_else(|| {
            AxonError::CorruptTokenizer(format!(
                "blob truncated at offset {} (wanted {} bytes of {})",
                self.offset,
                len,
                self.bytes.len()
            ))
        })?;
        let raw = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(raw)
    }

    fn read_i32(&mut self) -> Result<i32> {
        let raw = self.read_bytes(4)?;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_f32(&mut self) -> Result<f32> {
        let raw = self.read_bytes(4)?;
        Ok(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::golden::vocab_blob;

    fn merge_tokenizer() -> Tokenizer {
        // Specials first so BOS/EOS land on ids 1 and 2.
        let entries: Vec<(f32, String)> = [
            "<unk>", "<s>", "</s>", "h", "e", "l", "o", "a", "he", "el", "ll", "hel", "lo", "aa",
            " hello",
        ]
        .iter()
        .map(|s| (0.0, s.to_string()))
        .collect();
        let mut entries = entries;
        entries[8].0 = 1.0; // he
        entries[9].0 = 2.0; // el
        entries[10].0 = 1.5; // ll
        entries[11].0 = 3.0; // hel
        entries[12].0 = 0.5; // lo
        entries[13].0 = 1.0; // aa
        let blob = vocab_blob(&entries);
        Tokenizer::load(&blob, entries.len()).unwrap()
    }

    #[test]
    fn load_and_lookup() {
        let tok = merge_tokenizer();
        assert_eq!(tok.vocab_size(), 15);
        // The blob header's max length is the longest piece, " hello".
        assert_eq!(tok.max_token_length(), 6);
        assert_eq!(tok.lookup("hel"), Some(11));
        assert_eq!(tok.piece(11), Some("hel"));
        assert_eq!(tok.lookup("zz"), None);
    }

    #[test]
    fn load_rejects_bad_length() {
        // One entry whose declared length is zero.
        let mut blob = Vec::new();
        blob.extend_from_slice(&8i32.to_le_bytes());
        blob.extend_from_slice(&0f32.to_le_bytes());
        blob.extend_from_slice(&0i32.to_le_bytes());
        assert!(matches!(
            Tokenizer::load(&blob, 1),
            Err(AxonError::CorruptTokenizer(_))
        ));
    }

    #[test]
    fn load_rejects_truncated_blob() {
        let entries = vec![(0.0, "<unk>".to_string()), (0.0, "<s>".to_string())];
        let blob = vocab_blob(&entries);
        assert!(matches!(
            Tokenizer::load(&blob[..blob.len() - 2], 2),
            Err(AxonError::CorruptTokenizer(_))
        ));
    }

    #[test]
    fn greedy_merge_order() {
        let tok = merge_tokenizer();
        // h e l l o -> (el wins with 2.0) h el l o -> (hel, 3.0) hel l o
        // -> (lo, 0.5) hel lo
        let tokens = tok.encode("hello", false, false).unwrap();
        assert_eq!(tokens, vec![11, 12]);
    }

    #[test]
    fn tie_breaks_leftmost() {
        let tok = merge_tokenizer();
        // Both (a,a) pairs merge with the same score; the leftmost wins.
        let tokens = tok.encode("aaa", false, false).unwrap();
        assert_eq!(tokens, vec![13, 7]);
    }

    #[test]
    fn bos_eos_placement() {
        let tok = merge_tokenizer();
        let tokens = tok.encode("o", true, true).unwrap();
        assert_eq!(tokens, vec![BOS_TOKEN, 6, EOS_TOKEN]);
        let bare = tok.encode("", true, false).unwrap();
        assert_eq!(bare, vec![BOS_TOKEN]);
        assert!(tok.encode("", false, false).unwrap().is_empty());
    }

    #[test]
    fn byte_fallback_out_of_range_vocab() {
        let tok = merge_tokenizer();
        // 'z' (0x7a) is absent and 0x7a + 3 exceeds this tiny vocabulary.
        assert!(matches!(
            tok.encode("z", false, false),
            Err(AxonError::EncodingFailure(_))
        ));
    }

    #[test]
    fn decode_strips_space_after_bos() {
        let tok = merge_tokenizer();
        assert_eq!(tok.decode(BOS_TOKEN, 14), "hello");
        assert_eq!(tok.decode(6, 14), " hello");
    }

    #[test]
    fn decode_byte_pieces() {
        let entries = vec![
            (0.0, "<unk>".to_string()),
            (0.0, "<0x41>".to_string()),
            (0.0, "<0x07>".to_string()),
            (0.0, "<0x0A>".to_string()),
        ];
        let blob = vocab_blob(&entries);
        let tok = Tokenizer::load(&blob, entries.len()).unwrap();
        assert_eq!(tok.decode(0, 1), "A");
        // Bell is neither printable nor whitespace.
        assert_eq!(tok.decode(0, 2), "");
        assert_eq!(tok.decode(0, 3), "\n");
    }

    #[test]
    fn decode_unknown_id_is_empty() {
        let tok = merge_tokenizer();
        assert_eq!(tok.decode(0, 9999), "");
    }
}
