//! State machines re-encoding upstream event streams as outbound
//! chat-completion chunks.
//!
//! Both translators share the same observable chunk semantics: one role
//! announcement, immediate forwarding of text and reasoning deltas, a final
//! chunk carrying finish reason, usage, and the full accumulated reasoning
//! text, and an error-shaped chunk on upstream error followed by normal
//! termination. The `data: [DONE]` sentinel is appended by the transport
//! layer after [`finished`](StreamState::finished) turns true.

use chrono::Utc;

use super::claude_types::{ClaudeDelta, ClaudeStreamEvent};
use super::factory_types::FactoryStreamEvent;
use super::openai_types::{ChatCompletionChunk, ChatUsage, ErrorDetail};

/// Per-call accumulator driven by the upstream event sequence. Never shared
/// between concurrent calls.
#[derive(Debug)]
struct StreamState {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
    finished: bool,
    input_tokens: u64,
    output_tokens: u64,
    reasoning: String,
    stop_reason: Option<String>,
}

impl StreamState {
    fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            model: model.to_string(),
            created: Utc::now().timestamp(),
            role_sent: false,
            finished: false,
            input_tokens: 0,
            output_tokens: 0,
            reasoning: String::new(),
            stop_reason: None,
        }
    }

    /// Role announcement chunk, emitted at most once per call.
    fn role_chunk(&mut self) -> Option<ChatCompletionChunk> {
        if self.role_sent {
            return None;
        }
        self.role_sent = true;
        Some(ChatCompletionChunk::role(
            &self.id,
            &self.model,
            self.created,
        ))
    }

    fn content_chunk(&self, text: &str) -> ChatCompletionChunk {
        ChatCompletionChunk::content_delta(&self.id, &self.model, self.created, text)
    }

    fn reasoning_chunk(&mut self, text: &str) -> ChatCompletionChunk {
        self.reasoning.push_str(text);
        ChatCompletionChunk::reasoning_delta(&self.id, &self.model, self.created, text)
    }

    fn finish_chunk(&mut self, default_reason: &str) -> ChatCompletionChunk {
        self.finished = true;
        let reason = self.stop_reason.as_deref().unwrap_or(default_reason);
        let reasoning = if self.reasoning.is_empty() {
            None
        } else {
            Some(self.reasoning.clone())
        };
        ChatCompletionChunk::finish(
            &self.id,
            &self.model,
            self.created,
            reason,
            Some(ChatUsage::new(self.input_tokens, self.output_tokens)),
            reasoning,
        )
    }

    fn error_chunk(&mut self, error: ErrorDetail) -> ChatCompletionChunk {
        self.finished = true;
        ChatCompletionChunk::error_chunk(&self.id, &self.model, self.created, error)
    }
}

/// Map the messages-endpoint stop reason onto the chat-completions one.
pub fn map_stop_reason(reason: &str) -> &str {
    match reason {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Claude-family streams
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ClaudeStreamTranslator {
    state: StreamState,
}

impl ClaudeStreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            state: StreamState::new(model),
        }
    }

    pub fn finished(&self) -> bool {
        self.state.finished
    }

    /// Process one parsed upstream event, returning the chunks to forward.
    pub fn process_event(&mut self, event: &ClaudeStreamEvent) -> Vec<ChatCompletionChunk> {
        if self.state.finished {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        match event {
            ClaudeStreamEvent::MessageStart { message } => {
                self.state.id = format!("chatcmpl-{}", message.id.trim_start_matches("msg_"));
                self.state.input_tokens = message.usage.input_tokens;
                self.state.output_tokens = message.usage.output_tokens;
                chunks.extend(self.state.role_chunk());
            }
            ClaudeStreamEvent::ContentBlockDelta { delta, .. } => {
                chunks.extend(self.state.role_chunk());
                match delta {
                    ClaudeDelta::TextDelta { text } => chunks.push(self.state.content_chunk(text)),
                    ClaudeDelta::ThinkingDelta { thinking } => {
                        chunks.push(self.state.reasoning_chunk(thinking));
                    }
                    ClaudeDelta::SignatureDelta { .. }
                    | ClaudeDelta::InputJsonDelta { .. }
                    | ClaudeDelta::Unknown => {}
                }
            }
            ClaudeStreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason.as_deref() {
                    self.state.stop_reason = Some(map_stop_reason(reason).to_string());
                }
                if let Some(usage) = usage {
                    if usage.input_tokens > 0 {
                        self.state.input_tokens = usage.input_tokens;
                    }
                    self.state.output_tokens = usage.output_tokens;
                }
            }
            ClaudeStreamEvent::MessageStop => {
                chunks.extend(self.state.role_chunk());
                chunks.push(self.state.finish_chunk("stop"));
            }
            ClaudeStreamEvent::Error { error } => {
                chunks.push(self.state.error_chunk(ErrorDetail {
                    message: error.message.clone(),
                    error_type: error.error_type.clone(),
                    code: None,
                }));
            }
            ClaudeStreamEvent::ContentBlockStart { .. }
            | ClaudeStreamEvent::ContentBlockStop { .. }
            | ClaudeStreamEvent::Ping
            | ClaudeStreamEvent::Unknown => {}
        }
        chunks
    }

    /// Close out a stream that ended without a terminal event.
    pub fn finish(&mut self) -> Vec<ChatCompletionChunk> {
        if self.state.finished {
            return Vec::new();
        }
        let mut chunks: Vec<_> = self.state.role_chunk().into_iter().collect();
        chunks.push(self.state.finish_chunk("stop"));
        chunks
    }
}

// ---------------------------------------------------------------------------
// Factory streams
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FactoryStreamTranslator {
    state: StreamState,
}

impl FactoryStreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            state: StreamState::new(model),
        }
    }

    pub fn finished(&self) -> bool {
        self.state.finished
    }

    pub fn process_event(&mut self, event: &FactoryStreamEvent) -> Vec<ChatCompletionChunk> {
        if self.state.finished {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        match event {
            FactoryStreamEvent::Created { response } => {
                self.state.id = format!("chatcmpl-{}", response.id.trim_start_matches("resp_"));
            }
            FactoryStreamEvent::OutputItemAdded => {
                chunks.extend(self.state.role_chunk());
            }
            FactoryStreamEvent::OutputTextDelta { delta } => {
                chunks.extend(self.state.role_chunk());
                chunks.push(self.state.content_chunk(delta));
            }
            FactoryStreamEvent::ReasoningSummaryDelta { delta } => {
                chunks.extend(self.state.role_chunk());
                chunks.push(self.state.reasoning_chunk(delta));
            }
            FactoryStreamEvent::Completed { response } => {
                if let Some(usage) = &response.usage {
                    self.state.input_tokens = usage.input_tokens;
                    self.state.output_tokens = usage.output_tokens;
                }
                chunks.extend(self.state.role_chunk());
                chunks.push(self.state.finish_chunk("stop"));
            }
            FactoryStreamEvent::Error { message, code } => {
                chunks.push(self.state.error_chunk(ErrorDetail {
                    message: message
                        .clone()
                        .unwrap_or_else(|| "upstream stream error".to_string()),
                    error_type: "upstream_error".to_string(),
                    code: code.clone(),
                }));
            }
            FactoryStreamEvent::Unknown => {}
        }
        chunks
    }

    pub fn finish(&mut self) -> Vec<ChatCompletionChunk> {
        if self.state.finished {
            return Vec::new();
        }
        let mut chunks: Vec<_> = self.state.role_chunk().into_iter().collect();
        chunks.push(self.state.finish_chunk("stop"));
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::claude_types::{ClaudeUsage, StopDelta, StreamErrorBody, StreamMessageHeader};
    use crate::translate::factory_types::{CompletedResponse, FactoryUsage, ResponseHeader};

    fn claude_text_delta(text: &str) -> ClaudeStreamEvent {
        ClaudeStreamEvent::ContentBlockDelta {
            index: 0,
            delta: ClaudeDelta::TextDelta {
                text: text.to_string(),
            },
        }
    }

    #[test]
    fn test_claude_stream_role_once_then_deltas() {
        let mut translator = ClaudeStreamTranslator::new("claude-3-5-sonnet");

        let chunks = translator.process_event(&ClaudeStreamEvent::MessageStart {
            message: StreamMessageHeader {
                id: "msg_abc".to_string(),
                usage: ClaudeUsage {
                    input_tokens: 12,
                    output_tokens: 0,
                },
            },
        });
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "chatcmpl-abc");
        assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));

        let chunks = translator.process_event(&claude_text_delta("Hello"));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("Hello"));

        translator.process_event(&ClaudeStreamEvent::MessageDelta {
            delta: StopDelta {
                stop_reason: Some("end_turn".to_string()),
            },
            usage: Some(ClaudeUsage {
                input_tokens: 0,
                output_tokens: 7,
            }),
        });

        let chunks = translator.process_event(&ClaudeStreamEvent::MessageStop);
        assert_eq!(chunks.len(), 1);
        let last = &chunks[0];
        assert_eq!(last.choices[0].finish_reason.as_deref(), Some("stop"));
        let usage = last.usage.as_ref().unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 7);
        assert!(translator.finished());
        assert!(translator.finish().is_empty());
    }

    #[test]
    fn test_claude_thinking_accumulated_and_reattached() {
        let mut translator = ClaudeStreamTranslator::new("claude-3-5-sonnet-thinking");

        let chunks = translator.process_event(&ClaudeStreamEvent::ContentBlockDelta {
            index: 0,
            delta: ClaudeDelta::ThinkingDelta {
                thinking: "step one, ".to_string(),
            },
        });
        // Role chunk arrives on first opportunity, then the reasoning delta
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[1].choices[0].delta.reasoning_content.as_deref(),
            Some("step one, ")
        );

        translator.process_event(&ClaudeStreamEvent::ContentBlockDelta {
            index: 0,
            delta: ClaudeDelta::ThinkingDelta {
                thinking: "step two".to_string(),
            },
        });

        let chunks = translator.process_event(&ClaudeStreamEvent::MessageStop);
        assert_eq!(
            chunks[0].choices[0].delta.reasoning_content.as_deref(),
            Some("step one, step two")
        );
    }

    #[test]
    fn test_claude_error_event_becomes_error_chunk() {
        let mut translator = ClaudeStreamTranslator::new("claude-3-5-sonnet");
        let chunks = translator.process_event(&ClaudeStreamEvent::Error {
            error: StreamErrorBody {
                message: "overloaded".to_string(),
                error_type: "overloaded_error".to_string(),
            },
        });
        assert_eq!(chunks.len(), 1);
        let error = chunks[0].error.as_ref().unwrap();
        assert_eq!(error.message, "overloaded");
        assert_eq!(error.error_type, "overloaded_error");
        assert!(translator.finished());
    }

    #[test]
    fn test_claude_finish_without_terminal_event() {
        let mut translator = ClaudeStreamTranslator::new("claude-3-5-sonnet");
        translator.process_event(&claude_text_delta("partial"));
        let chunks = translator.finish();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_factory_stream_shape() {
        let mut translator = FactoryStreamTranslator::new("gpt-4o");

        translator.process_event(&FactoryStreamEvent::Created {
            response: ResponseHeader {
                id: "resp_123".to_string(),
            },
        });
        let chunks = translator.process_event(&FactoryStreamEvent::OutputItemAdded);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "chatcmpl-123");
        assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));

        let chunks = translator.process_event(&FactoryStreamEvent::OutputTextDelta {
            delta: "Hi".to_string(),
        });
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("Hi"));

        let chunks = translator.process_event(&FactoryStreamEvent::ReasoningSummaryDelta {
            delta: "because".to_string(),
        });
        assert_eq!(
            chunks[0].choices[0].delta.reasoning_content.as_deref(),
            Some("because")
        );

        let chunks = translator.process_event(&FactoryStreamEvent::Completed {
            response: CompletedResponse {
                id: None,
                output: Vec::new(),
                usage: Some(FactoryUsage {
                    input_tokens: 3,
                    output_tokens: 5,
                }),
            },
        });
        let last = &chunks[0];
        assert_eq!(last.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(last.usage.as_ref().unwrap().completion_tokens, 5);
        assert_eq!(
            last.choices[0].delta.reasoning_content.as_deref(),
            Some("because")
        );
        assert!(translator.finished());
    }

    #[test]
    fn test_factory_error_then_termination() {
        let mut translator = FactoryStreamTranslator::new("gpt-4o");
        let chunks = translator.process_event(&FactoryStreamEvent::Error {
            message: Some("quota exceeded".to_string()),
            code: Some("insufficient_quota".to_string()),
        });
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].error.as_ref().unwrap().message, "quota exceeded");
        assert!(translator.finished());
        // Events after the terminal error are dropped
        assert!(translator
            .process_event(&FactoryStreamEvent::OutputTextDelta {
                delta: "late".to_string()
            })
            .is_empty());
    }

    #[test]
    fn test_map_stop_reason() {
        assert_eq!(map_stop_reason("end_turn"), "stop");
        assert_eq!(map_stop_reason("max_tokens"), "length");
        assert_eq!(map_stop_reason("tool_use"), "tool_calls");
        assert_eq!(map_stop_reason("weird"), "weird");
    }
}
