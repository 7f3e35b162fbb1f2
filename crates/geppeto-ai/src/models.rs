//! Model registry with public lookup API.

use crate::Model;

/// Model assumed when no model is configured
pub const DEFAULT_MODEL_ID: &str = "gpt-3.5-turbo";

/// Prompt budget assumed for model ids missing from the registry
pub const FALLBACK_CONTEXT_WINDOW: u32 = 4080;

struct ModelEntry {
    id: &'static str,
    name: &'static str,
    context_window: u32,
    max_tokens: u32,
}

// Context windows leave a little headroom under the advertised limits.
const MODEL_ENTRIES: &[ModelEntry] = &[
    ModelEntry {
        id: "gpt-3.5-turbo",
        name: "GPT-3.5 Turbo",
        context_window: 4080,
        max_tokens: 4096,
    },
    ModelEntry {
        id: "gpt-3.5-turbo-16k",
        name: "GPT-3.5 Turbo 16k",
        context_window: 16368,
        max_tokens: 4096,
    },
    ModelEntry {
        id: "gpt-4",
        name: "GPT-4",
        context_window: 8180,
        max_tokens: 8192,
    },
    ModelEntry {
        id: "gpt-4-32k",
        name: "GPT-4 32k",
        context_window: 32760,
        max_tokens: 8192,
    },
    ModelEntry {
        id: "gpt-4o",
        name: "GPT-4o",
        context_window: 128000,
        max_tokens: 16384,
    },
    ModelEntry {
        id: "gpt-4o-mini",
        name: "GPT-4o mini",
        context_window: 128000,
        max_tokens: 16384,
    },
];

impl ModelEntry {
    fn to_model(&self) -> Model {
        Model {
            id: self.id.to_string(),
            name: self.name.to_string(),
            context_window: self.context_window,
            max_tokens: self.max_tokens,
        }
    }
}

/// Look up a registered model by ID.
pub fn get_model(id: &str) -> Option<Model> {
    MODEL_ENTRIES
        .iter()
        .find(|e| e.id == id)
        .map(|e| e.to_model())
}

/// Look up a model by ID, falling back to a custom model with a conservative
/// context window when the ID is unknown.
pub fn resolve_model(id: &str) -> Model {
    get_model(id).unwrap_or_else(|| {
        tracing::debug!("Model '{}' not in registry, using fallback window", id);
        Model {
            id: id.to_string(),
            name: id.to_string(),
            context_window: FALLBACK_CONTEXT_WINDOW,
            max_tokens: FALLBACK_CONTEXT_WINDOW,
        }
    })
}

/// Token budget for a model's prompt.
pub fn max_tokens_for_model(id: &str) -> u32 {
    resolve_model(id).context_window
}

/// Get all registered models.
pub fn get_all_models() -> Vec<Model> {
    MODEL_ENTRIES.iter().map(|e| e.to_model()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_model_windows() {
        assert_eq!(max_tokens_for_model("gpt-3.5-turbo"), 4080);
        assert_eq!(max_tokens_for_model("gpt-4"), 8180);
    }

    #[test]
    fn test_unknown_model_falls_back() {
        assert!(get_model("my-local-llama").is_none());
        let model = resolve_model("my-local-llama");
        assert_eq!(model.id, "my-local-llama");
        assert_eq!(model.context_window, FALLBACK_CONTEXT_WINDOW);
    }

    #[test]
    fn test_default_model_is_registered() {
        assert!(get_model(DEFAULT_MODEL_ID).is_some());
        assert_eq!(get_all_models().len(), MODEL_ENTRIES.len());
    }
}
