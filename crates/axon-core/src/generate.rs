//! The resumable generation loop.
//!
//! A call either feeds a prompt (forcing its tokens through the model
//! without sampling) or extends generation by sampling new tokens, never
//! both. The session's cursor and continuation token let a conversation be
//! split across calls with results identical to a single call.

use crate::error::Result;
use crate::model::{self, ModelStore};
use crate::sampler::Sampler;
use crate::session::Session;
use crate::tokenizer::{Tokenizer, BOS_TOKEN};

/// Run one generation call against a session.
///
/// With a non-empty `prompt`, the prompt's tokens are forced and
/// `extra_steps` is ignored. With an empty prompt, up to `extra_steps`
/// tokens are sampled. Generation stops early when the sampler emits BOS or
/// the context window fills; hitting the window bound is not an error.
///
/// Returns the text decoded during this call. The same text is also
/// appended to the session's output history.
pub fn generate(
    model: &ModelStore,
    tokenizer: &Tokenizer,
    session: &mut Session,
    prompt: &str,
    extra_steps: u64,
    sampler: &mut Sampler,
) -> Result<String> {
    debug_assert!(session.matches_config(model.config()));

    let at_sequence_start = session.next == BOS_TOKEN;
    let prompt_tokens = tokenizer.encode(prompt, at_sequence_start, false)?;
    // When a sequence starts, BOS is fed from the continuation token rather
    // than the encoded list, so forcing begins at the second token.
    let forced: &[u32] = if at_sequence_start {
        &prompt_tokens[1..]
    } else {
        &prompt_tokens
    };
    let steps = if prompt.is_empty() { extra_steps } else { 0 };

    let seq_len = model.config().seq_len;
    // The continuation token occupies one slot ahead of the forced stream.
    let budget = (session.pos as u64)
        .saturating_add(forced.len() as u64 + 1)
        .saturating_add(steps)
        .min(seq_len as u64) as usize;

    session.inference_steps = 0;
    let mut token = session.next;
    let mut pos = session.pos;
    let mut forced_iter = forced.iter();
    let mut output = String::new();

    while pos + 1 < budget {
        model::step(model, &mut session.scratch, &mut session.kv_cache, token, pos);
        session.total_steps += 1;
        session.inference_steps += 1;

        let next = match forced_iter.next() {
            Some(&forced_token) => forced_token,
            None => {
                if steps == 0 {
                    break;
                }
                sampler.sample(session.scratch.logits_mut())
            }
        };
        pos += 1;
        // BOS ends the sequence; the cursor stays at the last real token.
        if next == BOS_TOKEN {
            break;
        }
        output.push_str(&tokenizer.decode(token, next));
        token = next;
        session.next = next;
        session.pos = pos;
    }

    session.output_history.push_str(&output);
    if let Some(record) = session.chats.last_mut() {
        record.total_steps = session.total_steps;
    }
    tracing::debug!(
        steps = session.inference_steps,
        pos = session.pos,
        chars = output.len(),
        "generation call finished"
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::golden::{tiny_checkpoint, tiny_config, tiny_vocab};
    use crate::session::SessionStore;

    fn fixture() -> (ModelStore, Tokenizer) {
        let config = tiny_config();
        let model = ModelStore::load(&tiny_checkpoint(&config)).unwrap();
        let tokenizer = Tokenizer::load(&tiny_vocab(), config.vocab_size).unwrap();
        (model, tokenizer)
    }

    #[test]
    fn prompt_call_echoes_decoded_prompt() {
        let (model, tokenizer) = fixture();
        let store = SessionStore::new();
        store.start_session("s", model.config(), 0).unwrap();
        let slot = store.get("s").unwrap();
        let mut session = slot.lock();

        let mut sampler = Sampler::new(0.0, 0.9, 1);
        let out = generate(&model, &tokenizer, &mut session, " hello", 0, &mut sampler).unwrap();
        assert_eq!(out, "hello");
        assert_eq!(session.output_history(), "hello");
        assert!(session.pos() > 0);
        assert_eq!(session.inference_steps(), session.total_steps());
    }

    #[test]
    fn greedy_generation_is_deterministic() {
        let (model, tokenizer) = fixture();
        let store = SessionStore::new();

        let run = |key: &str| {
            store.start_session(key, model.config(), 0).unwrap();
            let slot = store.get(key).unwrap();
            let mut session = slot.lock();
            let mut sampler = Sampler::new(0.0, 0.9, 1);
            generate(&model, &tokenizer, &mut session, "", 12, &mut sampler).unwrap()
        };
        assert_eq!(run("a"), run("b"));
    }

    #[test]
    fn split_prompt_matches_single_call() {
        let (model, tokenizer) = fixture();
        let store = SessionStore::new();

        store.start_session("whole", model.config(), 0).unwrap();
        let whole = {
            let slot = store.get("whole").unwrap();
            let mut session = slot.lock();
            let mut sampler = Sampler::new(0.0, 0.9, 1);
            generate(&model, &tokenizer, &mut session, " hello hello", 0, &mut sampler).unwrap();
            generate(&model, &tokenizer, &mut session, "", 8, &mut sampler).unwrap();
            session.output_history().to_string()
        };

        store.start_session("split", model.config(), 0).unwrap();
        let split = {
            let slot = store.get("split").unwrap();
            let mut session = slot.lock();
            let mut sampler = Sampler::new(0.0, 0.9, 1);
            generate(&model, &tokenizer, &mut session, " hello", 0, &mut sampler).unwrap();
            generate(&model, &tokenizer, &mut session, " hello", 0, &mut sampler).unwrap();
            generate(&model, &tokenizer, &mut session, "", 8, &mut sampler).unwrap();
            session.output_history().to_string()
        };

        assert_eq!(whole, split);
    }

    #[test]
    fn generation_stops_at_context_window() {
        let (model, tokenizer) = fixture();
        let seq_len = model.config().seq_len;
        let store = SessionStore::new();
        store.start_session("s", model.config(), 0).unwrap();
        let slot = store.get("s").unwrap();
        let mut session = slot.lock();

        let mut sampler = Sampler::new(1.0, 0.9, 42);
        generate(&model, &tokenizer, &mut session, "", u64::MAX, &mut sampler).unwrap();
        assert!(session.pos() <= seq_len - 1);

        // A further call at the bound is a no-op, not an error.
        let more = generate(&model, &tokenizer, &mut session, "", 4, &mut sampler).unwrap();
        if session.pos() == seq_len - 1 {
            assert_eq!(more, "");
        }
    }

    #[test]
    fn empty_prompt_with_zero_steps_is_a_no_op() {
        let (model, tokenizer) = fixture();
        let store = SessionStore::new();
        store.start_session("s", model.config(), 0).unwrap();
        let slot = store.get("s").unwrap();
        let mut session = slot.lock();

        let mut sampler = Sampler::new(0.0, 0.9, 1);
        generate(&model, &tokenizer, &mut session, " hello", 0, &mut sampler).unwrap();
        let pos_before = session.pos();
        let out = generate(&model, &tokenizer, &mut session, "", 0, &mut sampler).unwrap();
        assert_eq!(out, "");
        assert_eq!(session.pos(), pos_before);
    }

    #[test]
    fn chat_record_tracks_total_steps() {
        let (model, tokenizer) = fixture();
        let store = SessionStore::new();
        store.start_session("s", model.config(), 0).unwrap();
        let slot = store.get("s").unwrap();
        let mut session = slot.lock();

        let mut sampler = Sampler::new(0.0, 0.9, 1);
        generate(&model, &tokenizer, &mut session, " hello", 0, &mut sampler).unwrap();
        generate(&model, &tokenizer, &mut session, "", 4, &mut sampler).unwrap();
        assert_eq!(session.chats()[0].total_steps, session.total_steps());
    }
}
