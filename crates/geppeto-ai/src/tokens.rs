//! Token counting.
//!
//! Counting is deterministic for a given model and text. Models with a known
//! tokenizer are counted exactly with their BPE encoding; anything else falls
//! back to a characters/2 estimate.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tiktoken_rs::CoreBPE;

/// Counts tokens for one model family
pub trait TokenCounter: Send + Sync {
    /// Number of tokens `text` encodes to
    fn count(&self, text: &str) -> usize;

    /// Tokens used by a list of message contents, joined by a blank line
    fn count_all(&self, contents: &[&str]) -> usize {
        self.count(&contents.join("\n\n"))
    }
}

/// Exact counter backed by a BPE encoding
pub struct BpeCounter {
    bpe: Arc<CoreBPE>,
}

impl BpeCounter {
    /// Counter for `model`, or `None` when no encoding is known for it
    pub fn for_model(model: &str) -> Option<Self> {
        encoder_for_model(model).map(|bpe| Self { bpe })
    }
}

impl TokenCounter for BpeCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Degraded estimate: one token per `chars_per_token` characters, rounded up
#[derive(Debug, Clone, Copy)]
pub struct ApproximateCounter {
    pub chars_per_token: usize,
}

impl Default for ApproximateCounter {
    fn default() -> Self {
        Self { chars_per_token: 2 }
    }
}

impl TokenCounter for ApproximateCounter {
    fn count(&self, text: &str) -> usize {
        let chars = text.chars().count();
        chars.div_ceil(self.chars_per_token.max(1))
    }
}

/// Encoders are expensive to build; keep one per model for the process.
static ENCODERS: LazyLock<Mutex<HashMap<String, Option<Arc<CoreBPE>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn encoder_for_model(model: &str) -> Option<Arc<CoreBPE>> {
    let mut encoders = ENCODERS.lock();
    encoders
        .entry(model.to_string())
        .or_insert_with(|| match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => Some(Arc::new(bpe)),
            Err(e) => {
                tracing::debug!("No tokenizer for model '{}': {}", model, e);
                None
            }
        })
        .clone()
}

/// Pick the best available counter for a model
pub fn counter_for_model(model: &str) -> Arc<dyn TokenCounter> {
    match BpeCounter::for_model(model) {
        Some(counter) => Arc::new(counter),
        None => {
            tracing::debug!("Using approximate token counts for model '{}'", model);
            Arc::new(ApproximateCounter::default())
        }
    }
}

/// Count the tokens of `text` for `model`
pub fn count_tokens(model: &str, text: &str) -> usize {
    counter_for_model(model).count(text)
}
