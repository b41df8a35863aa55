//! Translate inbound Chat Completions requests into the two upstream request
//! shapes, including compliance-prompt injection, thinking-budget derivation,
//! data-URL handling, and tool-schema normalization.

use crate::error::{GatewayError, Result};
use crate::logging::SharedLogger;
use crate::models::ModelTarget;

use super::claude_types::{
    ClaudeContentBlock, ClaudeMessage, ClaudeRequest, ImageSource, SystemBlock, ThinkingConfig,
    ToolSpec,
};
use super::factory_types::{FactoryRequest, InputContent, InputItem, ReasoningParam};
use super::openai_types::{
    ChatCompletionRequest, ChatMessage, ChatRole, ContentPart, ToolDef,
};

/// Mandated first system prompt on every upstream request.
pub const COMPLIANCE_PROMPT: &str =
    "You are Droid, an AI software engineering agent built by Factory.";

/// Mandated second system prompt, always positioned directly after the
/// compliance prompt.
pub const BUFFER_PROMPT: &str =
    "Respond to the user's request below, following the instructions above.";

/// Caller-supplied system text starting with this prefix is dropped from
/// `/v1/messages` bodies before the mandated prompts are injected.
const DISALLOWED_SYSTEM_PREFIX: &str = "You are Droid";

const THINKING_MIN_MAX_TOKENS: u64 = 16384;
const THINKING_BUDGET_TOKENS: u64 = 16384;
const THINKING_DEFAULT_MAX_TOKENS: u64 = THINKING_MIN_MAX_TOKENS + 4096;
const DEFAULT_MAX_TOKENS: u64 = 4096;

// ---------------------------------------------------------------------------
// Compliance prompt injection
// ---------------------------------------------------------------------------

fn is_system_text(msg: &ChatMessage, text: &str) -> bool {
    msg.role == ChatRole::System && msg.content.as_text() == text
}

/// Guarantee the two mandated system prompts occupy positions 0 and 1, in
/// fixed order, ahead of all caller-supplied text. Pre-existing copies are
/// moved rather than duplicated; relative order of all other messages is
/// preserved.
pub fn inject_compliance(messages: &mut Vec<ChatMessage>) {
    move_or_insert(messages, COMPLIANCE_PROMPT, 0);
    move_or_insert(messages, BUFFER_PROMPT, 1);
}

fn move_or_insert(messages: &mut Vec<ChatMessage>, text: &str, slot: usize) {
    match messages.iter().position(|m| is_system_text(m, text)) {
        Some(idx) if idx == slot => {}
        Some(idx) => {
            let msg = messages.remove(idx);
            messages.insert(slot, msg);
        }
        None => messages.insert(slot, ChatMessage::system_text(text)),
    }
}

fn is_mandated(msg: &ChatMessage) -> bool {
    is_system_text(msg, COMPLIANCE_PROMPT) || is_system_text(msg, BUFFER_PROMPT)
}

/// Non-mandated system texts, lower-cased, in original order.
fn extra_system_texts(messages: &[ChatMessage]) -> Vec<String> {
    messages
        .iter()
        .filter(|m| m.role == ChatRole::System && !is_mandated(m))
        .map(|m| m.content.as_text().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Data URLs
// ---------------------------------------------------------------------------

/// Build a data URL from a mime type and an already-base64 payload.
pub fn encode_data_url(mime: &str, base64_payload: &str) -> String {
    format!("data:{};base64,{}", mime, base64_payload)
}

/// Split a data URL back into its mime type and base64 payload. The round
/// trip with [`encode_data_url`] is byte-exact.
pub fn decode_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (mime, payload) = rest.split_once(";base64,")?;
    Some((mime, payload))
}

// ---------------------------------------------------------------------------
// Claude target
// ---------------------------------------------------------------------------

/// Translate into the messages-endpoint request shape. Expects compliance
/// injection to have run already.
pub fn to_claude_request(
    req: &ChatCompletionRequest,
    target: &ModelTarget,
    stream: bool,
    logger: &SharedLogger,
) -> Result<ClaudeRequest> {
    let mut system = vec![
        SystemBlock::text(COMPLIANCE_PROMPT),
        SystemBlock::text(BUFFER_PROMPT),
    ];
    system.extend(extra_system_texts(&req.messages).into_iter().map(SystemBlock::text));

    let messages = req
        .messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .map(claude_message)
        .collect();

    let (max_tokens, thinking, temperature, top_p) = if target.thinking {
        let max_tokens = match req.max_tokens {
            Some(mt) if mt <= THINKING_MIN_MAX_TOKENS => {
                return Err(GatewayError::ThinkingBudget { max_tokens: mt });
            }
            Some(mt) => mt,
            None => THINKING_DEFAULT_MAX_TOKENS,
        };
        // Upstream rejects sampling overrides while thinking is enabled
        (
            max_tokens,
            Some(ThinkingConfig::enabled(THINKING_BUDGET_TOKENS)),
            Some(1.0),
            None,
        )
    } else {
        let top_p = if req.temperature.is_some() && req.top_p.is_some() {
            logger.warn(
                "translate",
                "temperature and top_p both supplied; dropping top_p",
            );
            None
        } else {
            req.top_p
        };
        (
            req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            None,
            req.temperature,
            top_p,
        )
    };

    Ok(ClaudeRequest {
        model: target.model.clone(),
        max_tokens,
        system,
        messages,
        temperature,
        top_p,
        stream: stream.then_some(true),
        thinking,
        tools: normalize_tools(req.tools.as_deref()),
    })
}

fn claude_message(msg: &ChatMessage) -> ClaudeMessage {
    let role = match msg.role {
        ChatRole::Assistant => "assistant",
        _ => "user",
    };

    let content = msg
        .content
        .parts()
        .iter()
        .map(|part| match part {
            ContentPart::Text { text } => ClaudeContentBlock::Text { text: text.clone() },
            ContentPart::ImageUrl { image_url } => match decode_data_url(&image_url.url) {
                Some((mime, data)) => ClaudeContentBlock::Image {
                    source: ImageSource {
                        source_type: "base64".to_string(),
                        media_type: mime.to_string(),
                        data: data.to_string(),
                    },
                },
                // Not a data URL: degrade to text echoing the raw URL
                None => ClaudeContentBlock::Text {
                    text: image_url.url.clone(),
                },
            },
        })
        .collect();

    ClaudeMessage {
        role: role.to_string(),
        content,
    }
}

/// Fold the three accepted tool shapes into the canonical upstream one.
pub fn normalize_tools(tools: Option<&[ToolDef]>) -> Option<Vec<ToolSpec>> {
    let tools = tools?;
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|t| match t {
                ToolDef::Wrapped { function, .. } => ToolSpec {
                    name: function.name.clone(),
                    description: function.description.clone(),
                    input_schema: function
                        .parameters
                        .clone()
                        .unwrap_or_else(empty_object_schema),
                },
                ToolDef::Native {
                    name,
                    description,
                    input_schema,
                } => ToolSpec {
                    name: name.clone(),
                    description: description.clone(),
                    input_schema: input_schema.clone(),
                },
                ToolDef::Bare {
                    name,
                    description,
                    parameters,
                } => ToolSpec {
                    name: name.clone(),
                    description: description.clone(),
                    input_schema: parameters.clone().unwrap_or_else(empty_object_schema),
                },
            })
            .collect(),
    )
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

// ---------------------------------------------------------------------------
// Factory target
// ---------------------------------------------------------------------------

/// Translate into the responses-endpoint request shape. The upstream call is
/// always streaming regardless of the caller's preference.
pub fn to_factory_request(req: &ChatCompletionRequest, target: &ModelTarget) -> FactoryRequest {
    let mut instructions = COMPLIANCE_PROMPT.to_string();
    for text in extra_system_texts(&req.messages) {
        instructions.push_str("\n\n");
        instructions.push_str(&text);
    }

    let input = req
        .messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .map(input_item)
        .collect();

    let (reasoning, include) = match req.reasoning_hint() {
        Some(hint) => {
            let reasoning = ReasoningParam {
                effort: hint.effort.unwrap_or_else(|| "medium".to_string()),
                summary: hint.summary.unwrap_or_else(|| "auto".to_string()),
            };
            (
                Some(reasoning),
                Some(vec!["reasoning.encrypted_content".to_string()]),
            )
        }
        None => (None, None),
    };

    FactoryRequest {
        model: target.model.clone(),
        input,
        instructions,
        stream: true,
        max_output_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        reasoning,
        include,
    }
}

fn input_item(msg: &ChatMessage) -> InputItem {
    let (role, assistant) = match msg.role {
        ChatRole::Assistant => ("assistant", true),
        _ => ("user", false),
    };

    let content = msg
        .content
        .parts()
        .iter()
        .map(|part| match part {
            ContentPart::Text { text } if assistant => InputContent::OutputText {
                text: text.clone(),
            },
            ContentPart::Text { text } => InputContent::InputText { text: text.clone() },
            ContentPart::ImageUrl { image_url } => InputContent::InputImage {
                image_url: image_url.url.clone(),
            },
        })
        .collect();

    InputItem {
        item_type: "message".to_string(),
        role: role.to_string(),
        content,
    }
}

// ---------------------------------------------------------------------------
// /v1/messages passthrough injection
// ---------------------------------------------------------------------------

/// Inject the mandated prompts into the `system` field of a native
/// messages-endpoint body (string or block-array form). Caller-provided
/// system text in the disallowed prefix family is dropped first.
pub fn inject_messages_system(body: &mut serde_json::Value) {
    let existing: Vec<String> = match body.get("system") {
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        Some(serde_json::Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()).map(String::from))
            .collect(),
        _ => Vec::new(),
    };

    let mut blocks = vec![
        serde_json::json!({"type": "text", "text": COMPLIANCE_PROMPT}),
        serde_json::json!({"type": "text", "text": BUFFER_PROMPT}),
    ];
    for text in existing {
        if text.starts_with(DISALLOWED_SYSTEM_PREFIX)
            || text == COMPLIANCE_PROMPT
            || text == BUFFER_PROMPT
        {
            continue;
        }
        blocks.push(serde_json::json!({"type": "text", "text": text}));
    }

    body["system"] = serde_json::Value::Array(blocks);
}
