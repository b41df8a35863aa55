//! Model identifier classification.
//!
//! Pure string inspection that decides which upstream protocol a request
//! targets and whether thinking mode is requested. Detection is substring
//! based, which is a known fragility: a model name that merely contains a
//! provider token (e.g. `my-bedrock-tuned-llama`) will be classified as that
//! provider. Preserved as-is rather than silently changing match semantics.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Claude,
    Bedrock,
    Vertex,
    Factory,
}

impl Provider {
    /// Claude-family targets are served by the Anthropic-style messages
    /// endpoint; everything else goes through the responses endpoint.
    pub fn is_claude_family(self) -> bool {
        !matches!(self, Provider::Factory)
    }

    /// Value for the `x-factory-provider` header on messages-endpoint calls.
    pub fn variant_header(self) -> &'static str {
        match self {
            Provider::Claude => "anthropic",
            Provider::Bedrock => "bedrock",
            Provider::Vertex => "vertex",
            Provider::Factory => "openai",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTarget {
    pub provider: Provider,
    /// Identifier forwarded upstream, with provider marker and thinking
    /// suffix removed.
    pub model: String,
    pub thinking: bool,
}

/// Classify a requested model identifier.
pub fn classify(model: &str) -> ModelTarget {
    let lower = model.to_lowercase();

    let (provider, stripped) = if lower.contains("bedrock") {
        (Provider::Bedrock, strip_marker_prefix(model, "bedrock-"))
    } else if lower.contains("vertex") {
        (Provider::Vertex, strip_marker_prefix(model, "vertex-"))
    } else if lower.contains("claude") {
        (Provider::Claude, model.to_string())
    } else {
        (Provider::Factory, model.to_string())
    };

    let (model, thinking) = if has_thinking_suffix(&stripped) {
        let base = stripped.len() - THINKING_SUFFIX.len();
        (stripped[..base].to_string(), true)
    } else {
        (stripped, false)
    };

    ModelTarget {
        provider,
        model,
        thinking,
    }
}

const THINKING_SUFFIX: &str = "-thinking";

/// Case-insensitive suffix check on the original bytes. The suffix is pure
/// ASCII, so a byte-wise comparison never splits a multi-byte character.
fn has_thinking_suffix(model: &str) -> bool {
    let Some(start) = model.len().checked_sub(THINKING_SUFFIX.len()) else {
        return false;
    };
    model.is_char_boundary(start) && model[start..].eq_ignore_ascii_case(THINKING_SUFFIX)
}

fn strip_marker_prefix(model: &str, prefix: &str) -> String {
    if model.len() >= prefix.len() && model[..prefix.len()].eq_ignore_ascii_case(prefix) {
        model[prefix.len()..].to_string()
    } else {
        model.to_string()
    }
}
