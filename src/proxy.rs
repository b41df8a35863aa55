//! Request pipeline: classify, inject, translate, call upstream, and turn
//! the upstream reply back into the caller's expected shape.

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::logging::SharedLogger;
use crate::models::{classify, ModelTarget, Provider};
use crate::sse::SseParser;
use crate::translate::claude_types::ClaudeStreamEvent;
use crate::translate::factory_types::FactoryStreamEvent;
use crate::translate::openai_types::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use crate::translate::request::{
    inject_compliance, inject_messages_system, to_claude_request, to_factory_request,
};
use crate::translate::response::{
    aggregate_factory_events, claude_to_chat_response, normalize_upstream_error,
};
use crate::translate::streaming::{ClaudeStreamTranslator, FactoryStreamTranslator};

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Outbound streaming payloads: each item is the `data:` payload of one
/// frame, ending with the literal `[DONE]` sentinel.
pub type ChunkStream =
    Pin<Box<dyn Stream<Item = std::result::Result<String, std::io::Error>> + Send>>;

/// What one chat-completion call produced.
pub enum ChatDispatch {
    Complete(Box<ChatCompletionResponse>),
    Stream(ChunkStream),
}

/// Run the full pipeline for one `/v1/chat/completions` call. The upstream
/// credential has already been resolved by the caller.
pub async fn dispatch_chat(
    mut req: ChatCompletionRequest,
    credential: &str,
    config: &GatewayConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<ChatDispatch> {
    let target = classify(&req.model);
    inject_compliance(&mut req.messages);

    let wants_stream = req.stream.unwrap_or(false);
    let original_model = req.model.clone();

    logger.info(
        "proxy",
        format!(
            "model={} provider={:?} thinking={} streaming={} messages={}",
            target.model,
            target.provider,
            target.thinking,
            wants_stream,
            req.messages.len()
        ),
    );

    if target.provider.is_claude_family() {
        if wants_stream {
            let response = send_claude(&req, &target, true, credential, config, client, logger).await?;
            Ok(ChatDispatch::Stream(claude_chunk_stream(
                response,
                original_model,
                logger.clone(),
            )))
        } else {
            let response = send_claude(&req, &target, false, credential, config, client, logger).await?;
            let body: crate::translate::claude_types::ClaudeResponse = response.json().await?;
            Ok(ChatDispatch::Complete(Box::new(claude_to_chat_response(
                &body,
                &original_model,
            ))))
        }
    } else {
        // The upstream call is always streaming; non-streaming callers get
        // the aggregated result once the stream completes.
        let response = send_factory(&req, &target, credential, config, client, logger).await?;
        if wants_stream {
            Ok(ChatDispatch::Stream(factory_chunk_stream(
                response,
                original_model,
                logger.clone(),
            )))
        } else {
            let events = collect_factory_events(response).await?;
            let complete = aggregate_factory_events(events, &original_model)?;
            Ok(ChatDispatch::Complete(Box::new(complete)))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn send_claude(
    req: &ChatCompletionRequest,
    target: &ModelTarget,
    stream: bool,
    credential: &str,
    config: &GatewayConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<reqwest::Response> {
    let upstream_req = to_claude_request(req, target, stream, logger)?;
    let url = config.messages_url();

    let response = client
        .post(&url)
        .header("x-api-key", credential)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header("x-factory-provider", target.provider.variant_header())
        .header("Content-Type", "application/json")
        .json(&upstream_req)
        .send()
        .await?;

    check_upstream_status(response, logger).await
}

async fn send_factory(
    req: &ChatCompletionRequest,
    target: &ModelTarget,
    credential: &str,
    config: &GatewayConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<reqwest::Response> {
    let upstream_req = to_factory_request(req, target);
    let url = config.responses_url();

    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {}", credential))
        .header("Content-Type", "application/json")
        .json(&upstream_req)
        .send()
        .await?;

    check_upstream_status(response, logger).await
}

/// Surface a non-success upstream response as a normalized error.
async fn check_upstream_status(
    response: reqwest::Response,
    logger: &SharedLogger,
) -> Result<reqwest::Response> {
    let status = response.status().as_u16();
    if status < 400 {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    logger.warn(
        "proxy",
        format!("upstream status={} body={}", status, truncate(&body, 300)),
    );
    Err(GatewayError::Upstream {
        status,
        envelope: normalize_upstream_error(status, &body),
    })
}

fn claude_chunk_stream(
    response: reqwest::Response,
    model: String,
    logger: SharedLogger,
) -> ChunkStream {
    let byte_stream = response.bytes_stream();
    Box::pin(async_stream::stream! {
        let mut parser = SseParser::new();
        let mut translator = ClaudeStreamTranslator::new(&model);

        tokio::pin!(byte_stream);
        'read: while let Some(chunk_result) = byte_stream.next().await {
            let bytes = match chunk_result {
                Ok(b) => b,
                Err(e) => {
                    logger.error("stream", format!("upstream read failed: {}", e));
                    break;
                }
            };
            for event in parser.feed(&bytes) {
                for chunk in process_claude_event(&mut translator, &event.data, &logger) {
                    yield Ok(chunk);
                }
                if translator.finished() {
                    break 'read;
                }
            }
        }

        if !translator.finished() {
            if let Some(event) = parser.finish() {
                for chunk in process_claude_event(&mut translator, &event.data, &logger) {
                    yield Ok(chunk);
                }
            }
            for chunk in translator.finish() {
                if let Ok(json) = serde_json::to_string(&chunk) {
                    yield Ok(json);
                }
            }
        }

        yield Ok("[DONE]".to_string());
        logger.info("stream", "stream completed");
    })
}

fn process_claude_event(
    translator: &mut ClaudeStreamTranslator,
    data: &str,
    logger: &SharedLogger,
) -> Vec<String> {
    if data.is_empty() || data == "[DONE]" {
        return Vec::new();
    }
    let event: ClaudeStreamEvent = match serde_json::from_str(data) {
        Ok(e) => e,
        Err(e) => {
            logger.debug("stream", format!("skipping unparseable event: {}", e));
            return Vec::new();
        }
    };
    serialize_chunks(translator.process_event(&event))
}

fn factory_chunk_stream(
    response: reqwest::Response,
    model: String,
    logger: SharedLogger,
) -> ChunkStream {
    let byte_stream = response.bytes_stream();
    Box::pin(async_stream::stream! {
        let mut parser = SseParser::new();
        let mut translator = FactoryStreamTranslator::new(&model);

        tokio::pin!(byte_stream);
        'read: while let Some(chunk_result) = byte_stream.next().await {
            let bytes = match chunk_result {
                Ok(b) => b,
                Err(e) => {
                    logger.error("stream", format!("upstream read failed: {}", e));
                    break;
                }
            };
            for event in parser.feed(&bytes) {
                for chunk in process_factory_event(&mut translator, &event.data, &logger) {
                    yield Ok(chunk);
                }
                if translator.finished() {
                    break 'read;
                }
            }
        }

        if !translator.finished() {
            if let Some(event) = parser.finish() {
                for chunk in process_factory_event(&mut translator, &event.data, &logger) {
                    yield Ok(chunk);
                }
            }
            for chunk in translator.finish() {
                if let Ok(json) = serde_json::to_string(&chunk) {
                    yield Ok(json);
                }
            }
        }

        yield Ok("[DONE]".to_string());
        logger.info("stream", "stream completed");
    })
}

fn process_factory_event(
    translator: &mut FactoryStreamTranslator,
    data: &str,
    logger: &SharedLogger,
) -> Vec<String> {
    if data.is_empty() || data == "[DONE]" {
        return Vec::new();
    }
    let event: FactoryStreamEvent = match serde_json::from_str(data) {
        Ok(e) => e,
        Err(e) => {
            logger.debug("stream", format!("skipping unparseable event: {}", e));
            return Vec::new();
        }
    };
    serialize_chunks(translator.process_event(&event))
}

fn serialize_chunks(chunks: Vec<ChatCompletionChunk>) -> Vec<String> {
    chunks
        .into_iter()
        .filter_map(|c| serde_json::to_string(&c).ok())
        .collect()
}

/// Drain an upstream event stream into parsed events for aggregation.
async fn collect_factory_events(response: reqwest::Response) -> Result<Vec<FactoryStreamEvent>> {
    let mut parser = SseParser::new();
    let mut events = Vec::new();
    let mut byte_stream = response.bytes_stream();

    while let Some(chunk_result) = byte_stream.next().await {
        let bytes =
            chunk_result.map_err(|e| GatewayError::stream(format!("upstream read failed: {e}")))?;
        for event in parser.feed(&bytes) {
            if let Some(parsed) = parse_factory_event(&event.data) {
                events.push(parsed);
            }
        }
    }
    if let Some(event) = parser.finish() {
        if let Some(parsed) = parse_factory_event(&event.data) {
            events.push(parsed);
        }
    }

    Ok(events)
}

fn parse_factory_event(data: &str) -> Option<FactoryStreamEvent> {
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    serde_json::from_str(data).ok()
}

/// Forward a native messages-endpoint body with compliance injection
/// applied to its `system` field. The upstream response (including errors)
/// is passed back for the transport layer to relay as-is.
pub async fn proxy_messages(
    body: Bytes,
    credential: &str,
    config: &GatewayConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<reqwest::Response> {
    let mut value: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::validation(format!("invalid JSON body: {e}")))?;

    let model = value
        .get("model")
        .and_then(|m| m.as_str())
        .ok_or_else(|| GatewayError::validation("missing required field: model"))?;
    let target = classify(model);
    if target.provider == Provider::Factory {
        return Err(GatewayError::validation(
            "only Claude-family models are accepted on /v1/messages",
        ));
    }
    value["model"] = serde_json::Value::String(target.model.clone());

    inject_messages_system(&mut value);

    logger.info(
        "proxy",
        format!("passthrough model={} provider={:?}", target.model, target.provider),
    );

    let response = client
        .post(config.messages_url())
        .header("x-api-key", credential)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header("x-factory-provider", target.provider.variant_header())
        .header("Content-Type", "application/json")
        .json(&value)
        .send()
        .await?;

    Ok(response)
}

/// Byte-bounded prefix, backed off to a char boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
