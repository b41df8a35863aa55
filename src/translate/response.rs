//! Non-streaming response translation and upstream error normalization.

use chrono::Utc;

use crate::error::{GatewayError, Result};

use super::claude_types::{ClaudeResponse, ClaudeResponseBlock};
use super::factory_types::{FactoryStreamEvent, OutputContent, OutputItem};
use super::openai_types::{
    ChatCompletionResponse, ChatUsage, Choice, ChoiceMessage, ErrorDetail, ErrorEnvelope,
};
use super::streaming::map_stop_reason;

/// Map a unary messages-endpoint body onto one chat-completion response.
/// `original_model` is what the caller asked for, echoed back unchanged.
pub fn claude_to_chat_response(
    resp: &ClaudeResponse,
    original_model: &str,
) -> ChatCompletionResponse {
    let mut text = String::new();
    let mut reasoning = String::new();

    for block in &resp.content {
        match block {
            ClaudeResponseBlock::Text { text: t } => text.push_str(t),
            ClaudeResponseBlock::Thinking { thinking, .. } => reasoning.push_str(thinking),
            ClaudeResponseBlock::Unknown => {}
        }
    }

    let finish_reason = resp
        .stop_reason
        .as_deref()
        .map(|r| map_stop_reason(r).to_string())
        .or_else(|| Some("stop".to_string()));

    ChatCompletionResponse {
        id: format!("chatcmpl-{}", resp.id.trim_start_matches("msg_")),
        object: "chat.completion".to_string(),
        created: Utc::now().timestamp(),
        model: original_model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: Some(text),
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
            },
            finish_reason,
        }],
        usage: Some(ChatUsage::new(
            resp.usage.input_tokens,
            resp.usage.output_tokens,
        )),
    }
}

/// Fold a responses-endpoint event sequence into one chat-completion
/// response. Content comes from the completed event's assistant message
/// parts, in event order; reasoning deltas are concatenated separately. An
/// error event short-circuits into an upstream-error result.
pub fn aggregate_factory_events(
    events: impl IntoIterator<Item = FactoryStreamEvent>,
    original_model: &str,
) -> Result<ChatCompletionResponse> {
    let mut id = None;
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut usage = ChatUsage::default();
    let mut completed = false;

    for event in events {
        match event {
            FactoryStreamEvent::Created { response } => id = Some(response.id),
            FactoryStreamEvent::ReasoningSummaryDelta { delta } => reasoning.push_str(&delta),
            FactoryStreamEvent::Completed { response } => {
                completed = true;
                if let Some(rid) = response.id {
                    id = Some(rid);
                }
                for item in &response.output {
                    if let OutputItem::Message { content: parts, .. } = item {
                        for part in parts {
                            if let OutputContent::OutputText { text } = part {
                                content.push_str(text);
                            }
                        }
                    }
                }
                if let Some(u) = response.usage {
                    usage = ChatUsage::new(u.input_tokens, u.output_tokens);
                }
            }
            FactoryStreamEvent::Error { message, code } => {
                return Err(GatewayError::Upstream {
                    status: 502,
                    envelope: ErrorEnvelope {
                        error: ErrorDetail {
                            message: message.unwrap_or_else(|| "upstream stream error".to_string()),
                            error_type: "upstream_error".to_string(),
                            code,
                        },
                    },
                });
            }
            FactoryStreamEvent::OutputItemAdded
            | FactoryStreamEvent::OutputTextDelta { .. }
            | FactoryStreamEvent::Unknown => {}
        }
    }

    if !completed {
        return Err(GatewayError::stream(
            "upstream stream ended without a completed event",
        ));
    }

    let id = id
        .map(|i| format!("chatcmpl-{}", i.trim_start_matches("resp_")))
        .unwrap_or_else(|| format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()));

    Ok(ChatCompletionResponse {
        id,
        object: "chat.completion".to_string(),
        created: Utc::now().timestamp(),
        model: original_model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: Some(content),
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
            },
            finish_reason: Some("stop".to_string()),
        }],
        usage: Some(usage),
    })
}

/// Map any upstream non-success body shape into the canonical error envelope.
pub fn normalize_upstream_error(status: u16, body: &str) -> ErrorEnvelope {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(err) = value.get("error").filter(|e| e.is_object()) {
            return ErrorEnvelope {
                error: ErrorDetail {
                    message: err
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("upstream error")
                        .to_string(),
                    error_type: err
                        .get("type")
                        .and_then(|t| t.as_str())
                        .unwrap_or("upstream_error")
                        .to_string(),
                    code: err
                        .get("code")
                        .and_then(|c| c.as_str())
                        .map(String::from),
                },
            };
        }
        if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
            return ErrorEnvelope::new("upstream_error", message);
        }
    }

    let message = if body.trim().is_empty() {
        format!("upstream returned status {} with an undecodable body", status)
    } else {
        body.to_string()
    };
    ErrorEnvelope::new("upstream_error", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::claude_types::ClaudeUsage;
    use crate::translate::factory_types::{CompletedResponse, FactoryUsage, ResponseHeader};

    #[test]
    fn test_claude_unary_translation() {
        let resp = ClaudeResponse {
            id: "msg_xyz".to_string(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            content: vec![
                ClaudeResponseBlock::Thinking {
                    thinking: "hm".to_string(),
                    signature: None,
                },
                ClaudeResponseBlock::Text {
                    text: "Hello!".to_string(),
                },
            ],
            stop_reason: Some("end_turn".to_string()),
            usage: ClaudeUsage {
                input_tokens: 10,
                output_tokens: 4,
            },
        };

        let out = claude_to_chat_response(&resp, "bedrock-claude-3-5-sonnet-20241022");
        assert_eq!(out.id, "chatcmpl-xyz");
        assert_eq!(out.model, "bedrock-claude-3-5-sonnet-20241022");
        let choice = &out.choices[0];
        assert_eq!(choice.message.content.as_deref(), Some("Hello!"));
        assert_eq!(choice.message.reasoning_content.as_deref(), Some("hm"));
        assert_eq!(choice.finish_reason.as_deref(), Some("stop"));
        assert_eq!(out.usage.as_ref().unwrap().total_tokens, 14);
    }

    #[test]
    fn test_factory_aggregation_concatenates_output_text() {
        let completed: CompletedResponse = serde_json::from_value(serde_json::json!({
            "id": "resp_1",
            "output": [
                {"type": "reasoning"},
                {"type": "message", "role": "assistant", "content": [
                    {"type": "output_text", "text": "Hello"},
                    {"type": "output_text", "text": " world"}
                ]}
            ],
            "usage": {"input_tokens": 2, "output_tokens": 3}
        }))
        .unwrap();

        let events = vec![
            FactoryStreamEvent::Created {
                response: ResponseHeader {
                    id: "resp_1".to_string(),
                },
            },
            FactoryStreamEvent::OutputTextDelta {
                delta: "Hello".to_string(),
            },
            FactoryStreamEvent::Completed {
                response: completed,
            },
        ];

        let out = aggregate_factory_events(events, "gpt-4o").unwrap();
        assert_eq!(out.choices[0].message.content.as_deref(), Some("Hello world"));
        assert_eq!(out.usage.as_ref().unwrap().prompt_tokens, 2);
        assert_eq!(out.id, "chatcmpl-1");
    }

    #[test]
    fn test_factory_aggregation_error_short_circuits() {
        let events = vec![
            FactoryStreamEvent::OutputTextDelta {
                delta: "partial".to_string(),
            },
            FactoryStreamEvent::Error {
                message: Some("bad thing".to_string()),
                code: None,
            },
            FactoryStreamEvent::Completed {
                response: CompletedResponse {
                    id: None,
                    output: Vec::new(),
                    usage: Some(FactoryUsage::default()),
                },
            },
        ];

        let err = aggregate_factory_events(events, "gpt-4o").unwrap_err();
        match err {
            GatewayError::Upstream { status, envelope } => {
                assert_eq!(status, 502);
                assert_eq!(envelope.error.message, "bad thing");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[test]
    fn test_normalize_error_object() {
        let envelope = normalize_upstream_error(
            400,
            r#"{"error":{"message":"bad thing","type":"invalid_request_error"}}"#,
        );
        assert_eq!(envelope.error.message, "bad thing");
        assert_eq!(envelope.error.error_type, "invalid_request_error");
        assert!(envelope.error.code.is_none());
    }

    #[test]
    fn test_normalize_bare_message() {
        let envelope = normalize_upstream_error(503, r#"{"message":"overloaded"}"#);
        assert_eq!(envelope.error.message, "overloaded");
        assert_eq!(envelope.error.error_type, "upstream_error");
    }

    #[test]
    fn test_normalize_raw_body_and_empty_body() {
        let envelope = normalize_upstream_error(500, "Bad Gateway");
        assert_eq!(envelope.error.message, "Bad Gateway");

        let envelope = normalize_upstream_error(500, "");
        assert!(envelope.error.message.contains("500"));
    }
}
