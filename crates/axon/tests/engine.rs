//! End-to-end engine behavior over the synthetic fixture model.

use axon::golden::{
    cyclic_checkpoint, cyclic_config, tiny_checkpoint, tiny_config, tiny_vocab, GoldenCase,
    GoldenHarness,
};
use axon::model::ModelStore;
use axon::tokenizer::Tokenizer;
use axon::{AxonError, Engine, PromptRequest};

fn loaded_engine() -> Engine {
    let engine = Engine::new();
    engine
        .load_model(&tiny_checkpoint(&tiny_config()))
        .unwrap();
    engine.load_tokenizer(&tiny_vocab()).unwrap();
    engine
}

fn greedy(text: &str, steps: u64) -> PromptRequest {
    PromptRequest {
        text: text.to_string(),
        steps,
        temperature: 0.0,
        top_p: 0.9,
        seed: 1,
    }
}

#[test]
fn greedy_generation_is_reproducible() {
    let engine = loaded_engine();
    engine.start_session("a").unwrap();
    engine.start_session("b").unwrap();

    engine.generate("a", &greedy(" hello", 0)).unwrap();
    let first = engine.generate("a", &greedy("", 10)).unwrap();
    engine.generate("b", &greedy(" hello", 0)).unwrap();
    let second = engine.generate("b", &greedy("", 10)).unwrap();

    assert_eq!(first.text, second.text);
    assert_eq!(first.tokens_produced, second.tokens_produced);
}

#[test]
fn fixed_seed_sampling_is_reproducible() {
    let engine = loaded_engine();
    engine.start_session("a").unwrap();
    engine.start_session("b").unwrap();

    let request = PromptRequest {
        steps: 10,
        temperature: 0.8,
        top_p: 0.9,
        seed: 42,
        ..Default::default()
    };
    let first = engine.generate("a", &request).unwrap();
    let second = engine.generate("b", &request).unwrap();
    assert_eq!(first.text, second.text);
}

#[test]
fn split_prompt_continuation_matches_single_call() {
    let engine = loaded_engine();
    engine.start_session("whole").unwrap();
    engine.start_session("split").unwrap();

    engine.generate("whole", &greedy(" hello hello", 0)).unwrap();
    engine.generate("whole", &greedy("", 8)).unwrap();

    engine.generate("split", &greedy(" hello", 0)).unwrap();
    engine.generate("split", &greedy(" hello", 0)).unwrap();
    engine.generate("split", &greedy("", 8)).unwrap();

    assert_eq!(
        engine.history("whole").unwrap(),
        engine.history("split").unwrap()
    );
}

#[test]
fn prompt_call_echoes_prompt_and_counts_tokens() {
    let engine = loaded_engine();
    engine.start_session("s").unwrap();

    // Steps are ignored while a prompt is being fed.
    let result = engine.generate("s", &greedy(" hello", 1000)).unwrap();
    assert_eq!(result.text, "hello");
    assert!(result.tokens_produced >= 1);
}

#[test]
fn sessions_are_isolated() {
    let engine = loaded_engine();
    engine.start_session("alice").unwrap();
    engine.start_session("bob").unwrap();

    engine.generate("alice", &greedy(" hello", 0)).unwrap();
    engine.generate("alice", &greedy("", 6)).unwrap();
    engine.generate("bob", &greedy(" at", 0)).unwrap();

    assert!(engine.history("alice").unwrap().starts_with("hello"));
    assert_eq!(engine.history("bob").unwrap(), "at");
}

#[test]
fn generation_never_exceeds_context_window() {
    let engine = loaded_engine();
    let seq_len = tiny_config().seq_len;
    engine.start_session("s").unwrap();

    let calls = 4u64;
    let mut total = 0u64;
    for _ in 0..calls {
        let result = engine
            .generate(
                "s",
                &PromptRequest {
                    steps: seq_len as u64,
                    temperature: 0.9,
                    top_p: 0.9,
                    seed: 7,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(result.tokens_produced < seq_len as u64);
        total += result.tokens_produced;
    }
    // The cursor can occupy at most seq_len - 1 positions; beyond that, each
    // call spends at most one step on a terminating BOS sample.
    assert!(total <= (seq_len as u64 - 1) + calls);
}

#[test]
fn history_accumulates_and_restart_clears_it() {
    let engine = loaded_engine();
    engine.start_session("s").unwrap();

    engine.generate("s", &greedy(" hello", 0)).unwrap();
    engine.generate("s", &greedy("", 4)).unwrap();
    let history = engine.history("s").unwrap();
    assert!(history.starts_with("hello"));

    engine.start_session("s").unwrap();
    assert_eq!(engine.history("s").unwrap(), "");
    let chats = engine.chats("s").unwrap();
    assert_eq!(chats.len(), 2);
    assert!(chats[0].total_steps >= 1);
    assert_eq!(chats[1].total_steps, 0);
}

#[test]
fn removed_session_is_gone() {
    let engine = loaded_engine();
    engine.start_session("s").unwrap();
    engine.remove_session("s").unwrap();
    assert!(matches!(
        engine.generate("s", &greedy(" hello", 0)),
        Err(AxonError::SessionNotFound(_))
    ));
    assert_eq!(engine.session_count(), 0);
}

#[test]
fn engine_without_model_reports_not_ready() {
    let engine = Engine::new();
    assert!(matches!(
        engine.start_session("s"),
        Err(AxonError::NotReady(_))
    ));
    assert!(matches!(engine.config(), Err(AxonError::NotReady(_))));
}

#[test]
fn golden_outputs_match_committed_strings() {
    // The cyclic fixture's greedy continuation of token t is t + 1 by
    // construction, so these expectations are closed-form: a kernel change
    // that breaks the residual path or the argmax shows up as a mismatch.
    let config = cyclic_config();
    let model = ModelStore::load(&cyclic_checkpoint()).unwrap();
    let tokenizer = Tokenizer::load(&tiny_vocab(), config.vocab_size).unwrap();
    let harness = GoldenHarness::new(&model, &tokenizer);

    let cases = [
        GoldenCase::greedy("prompt_only", " hello", 0, "hello"),
        GoldenCase::greedy("steps_only", "", 8, "</s> abcdeh"),
        GoldenCase::greedy("prompt_then_steps", " hello", 6, "helloabaaatuvw"),
    ];
    for report in harness.run_all(&cases).unwrap() {
        assert!(report.passed, "{} produced {:?}", report.name, report.output);
    }
}

#[test]
fn golden_cases_replay_identically() {
    let config = tiny_config();
    let model = ModelStore::load(&tiny_checkpoint(&config)).unwrap();
    let tokenizer = Tokenizer::load(&tiny_vocab(), config.vocab_size).unwrap();
    let harness = GoldenHarness::new(&model, &tokenizer);

    let cases = [
        ("prompt_only", " hello", 0),
        ("prompt_then_steps", " hello", 12),
        ("steps_only", "", 16),
    ];
    for (name, prompt, steps) in cases {
        let recorded = harness
            .run(&GoldenCase {
                name: name.to_string(),
                prompt: prompt.to_string(),
                steps,
                temperature: 0.0,
                seed: 1,
                expected: None,
            })
            .unwrap();
        let replayed = harness
            .run(&GoldenCase::greedy(name, prompt, steps, &recorded.output))
            .unwrap();
        assert!(replayed.passed, "case {name} diverged");
    }
}
