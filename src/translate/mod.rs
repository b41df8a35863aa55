//! Bidirectional wire-format translation.
//!
//! Inbound requests arrive in the OpenAI Chat Completions shape and are
//! re-emitted against one of two upstream protocols: the Anthropic-style
//! messages endpoint (Claude family, including Bedrock/Vertex variants) or
//! the Responses-style endpoint. Upstream event streams are translated back
//! into outbound chat-completion chunks or folded into one final response.

pub mod claude_types;
pub mod factory_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
