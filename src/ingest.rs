//! Inbound body normalization: JSON payload validation and multipart forms
//! carrying file attachments.
//!
//! A multipart form must include a `payload` field with the JSON request;
//! every file field is classified (image, text, or opaque) and appended as a
//! content part to the last user message, preserving form-field order.

use axum::extract::Multipart;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{GatewayError, Result};
use crate::translate::openai_types::{
    ChatCompletionRequest, ChatMessage, ChatRole, ContentPart, ImageUrlDetail, MessageContent,
};
use crate::translate::request::encode_data_url;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "c", "h", "cpp",
    "hpp", "cs", "rb", "php", "sh", "bash", "sql", "html", "css", "xml", "json", "yaml", "yml",
    "toml", "ini", "cfg", "csv", "log", "diff", "patch",
];

const SNIFF_WINDOW: usize = 1024;

/// Parse and validate a JSON chat-completion payload.
pub fn parse_chat_payload(raw: &[u8]) -> Result<ChatCompletionRequest> {
    let value: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| GatewayError::validation(format!("invalid JSON body: {e}")))?;

    if !value.get("model").map(|m| m.is_string()).unwrap_or(false) {
        return Err(GatewayError::validation("missing required field: model"));
    }
    if !value
        .get("messages")
        .map(|m| m.is_array())
        .unwrap_or(false)
    {
        return Err(GatewayError::validation("messages must be an array"));
    }

    serde_json::from_value(value)
        .map_err(|e| GatewayError::validation(format!("invalid request body: {e}")))
}

/// Consume a multipart form into a normalized chat-completion request.
pub async fn chat_request_from_multipart(
    mut multipart: Multipart,
) -> Result<ChatCompletionRequest> {
    let mut payload: Option<ChatCompletionRequest> = None;
    let mut derived: Vec<ContentPart> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::validation(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);

        let data = field
            .bytes()
            .await
            .map_err(|e| GatewayError::validation(format!("failed to read form field: {e}")))?;

        // The payload field wins on name, even when the client attached a
        // filename to it.
        if name == "payload" {
            payload = Some(parse_chat_payload(&data)?);
        } else if let Some(file_name) = file_name {
            derived.push(classify_file(&file_name, content_type.as_deref(), &data));
        }
    }

    let mut req = payload
        .ok_or_else(|| GatewayError::validation("multipart form is missing the payload field"))?;
    if !derived.is_empty() {
        attach_to_last_user_message(&mut req.messages, derived);
    }
    Ok(req)
}

/// Turn one uploaded file into a content part: images inline as data URLs,
/// recognizable text as a labeled fenced block, everything else as labeled
/// base64 text.
pub fn classify_file(file_name: &str, declared_mime: Option<&str>, data: &[u8]) -> ContentPart {
    let mime = declared_mime
        .map(str::to_string)
        .unwrap_or_else(|| mime_guess::from_path(file_name).first_or_octet_stream().to_string());

    if mime.starts_with("image/") {
        return ContentPart::ImageUrl {
            image_url: ImageUrlDetail {
                url: encode_data_url(&mime, &BASE64.encode(data)),
            },
        };
    }

    if looks_like_text(file_name, &mime, data) {
        if let Ok(text) = std::str::from_utf8(data) {
            let lang = extension(file_name).unwrap_or_default();
            return ContentPart::Text {
                text: format!("File: {}\n```{}\n{}\n```", file_name, lang, text),
            };
        }
    }

    ContentPart::Text {
        text: format!(
            "File: {} ({}, base64)\n{}",
            file_name,
            mime,
            BASE64.encode(data)
        ),
    }
}

fn extension(file_name: &str) -> Option<String> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

fn looks_like_text(file_name: &str, mime: &str, data: &[u8]) -> bool {
    if mime.starts_with("text/")
        || matches!(
            mime,
            "application/json" | "application/xml" | "application/toml" | "application/x-yaml"
        )
    {
        return true;
    }

    if let Some(ext) = extension(file_name) {
        if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            return true;
        }
    }

    // Content sniff: no NUL byte in the first 1KB and the whole payload
    // decodes as UTF-8
    let window = &data[..data.len().min(SNIFF_WINDOW)];
    !window.contains(&0) && std::str::from_utf8(data).is_ok()
}

/// Append derived parts, in order, to the content of the last user message;
/// a new trailing user message is created when none exists.
fn attach_to_last_user_message(messages: &mut Vec<ChatMessage>, derived: Vec<ContentPart>) {
    if let Some(msg) = messages.iter_mut().rev().find(|m| m.role == ChatRole::User) {
        let mut parts = msg.content.parts();
        parts.extend(derived);
        msg.content = MessageContent::Parts(parts);
    } else {
        messages.push(ChatMessage {
            role: ChatRole::User,
            content: MessageContent::Parts(derived),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::FromRequest;

    const BOUNDARY: &str = "gwtestboundary";

    fn form_part(name: &str, filename: Option<&str>, content_type: Option<&str>, body: &str) -> String {
        let mut part = format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"");
        if let Some(filename) = filename {
            part.push_str(&format!("; filename=\"{filename}\""));
        }
        part.push_str("\r\n");
        if let Some(ct) = content_type {
            part.push_str(&format!("Content-Type: {ct}\r\n"));
        }
        part.push_str("\r\n");
        part.push_str(body);
        part.push_str("\r\n");
        part
    }

    async fn multipart_from(parts: &[String]) -> Multipart {
        let body = format!("{}--{BOUNDARY}--\r\n", parts.concat());
        let request = axum::http::Request::builder()
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(axum::body::Body::from(body))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_multipart_payload_accepted_with_filename() {
        let multipart = multipart_from(&[form_part(
            "payload",
            Some("payload.json"),
            Some("application/json"),
            r#"{"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]}"#,
        )])
        .await;

        let req = chat_request_from_multipart(multipart).await.unwrap();
        assert_eq!(req.model, "gpt-4o");
        assert_eq!(req.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_multipart_files_attached_to_last_user_message() {
        let multipart = multipart_from(&[
            form_part(
                "payload",
                None,
                None,
                r#"{"model": "gpt-4o", "messages": [{"role": "user", "content": "see file"}]}"#,
            ),
            form_part("file1", Some("notes.md"), Some("text/markdown"), "# notes"),
        ])
        .await;

        let req = chat_request_from_multipart(multipart).await.unwrap();
        let parts = req.messages[0].content.parts();
        assert_eq!(parts.len(), 2);
        match &parts[1] {
            ContentPart::Text { text } => assert!(text.contains("# notes")),
            other => panic!("expected text part, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_multipart_without_payload_rejected() {
        let multipart =
            multipart_from(&[form_part("file1", Some("notes.txt"), None, "orphan")]).await;
        let err = chat_request_from_multipart(multipart).await.unwrap_err();
        assert!(err.to_string().contains("payload"));
    }

    #[test]
    fn test_parse_payload_requires_model_and_messages() {
        let err = parse_chat_payload(br#"{"messages": []}"#).unwrap_err();
        assert!(err.to_string().contains("model"));

        let err = parse_chat_payload(br#"{"model": "m", "messages": "nope"}"#).unwrap_err();
        assert!(err.to_string().contains("messages"));

        let req = parse_chat_payload(br#"{"model": "m", "messages": []}"#).unwrap();
        assert_eq!(req.model, "m");
    }

    #[test]
    fn test_image_file_becomes_data_url() {
        let part = classify_file("photo.png", Some("image/png"), b"\x89PNG");
        match part {
            ContentPart::ImageUrl { image_url } => {
                assert!(image_url.url.starts_with("data:image/png;base64,"));
            }
            other => panic!("expected image part, got {other:?}"),
        }
    }

    #[test]
    fn test_source_file_fenced_with_language() {
        let part = classify_file("main.rs", None, b"fn main() {}");
        match part {
            ContentPart::Text { text } => {
                assert!(text.starts_with("File: main.rs\n```rs\n"));
                assert!(text.contains("fn main() {}"));
            }
            other => panic!("expected text part, got {other:?}"),
        }
    }

    #[test]
    fn test_sniffed_text_without_known_extension() {
        let part = classify_file("NOTES", None, b"plain utf-8 notes");
        match part {
            ContentPart::Text { text } => assert!(text.contains("plain utf-8 notes")),
            other => panic!("expected text part, got {other:?}"),
        }
    }

    #[test]
    fn test_binary_file_becomes_labeled_base64() {
        let data = [0u8, 159, 146, 150];
        let part = classify_file("blob.bin", None, &data);
        match part {
            ContentPart::Text { text } => {
                assert!(text.starts_with("File: blob.bin"));
                assert!(text.contains("base64"));
                assert!(text.contains(&BASE64.encode(data)));
            }
            other => panic!("expected text part, got {other:?}"),
        }
    }

    #[test]
    fn test_nul_in_sniff_window_rejects_text() {
        let mut data = b"looks texty".to_vec();
        data.push(0);
        let part = classify_file("weird", None, &data);
        match part {
            ContentPart::Text { text } => assert!(text.contains("base64")),
            other => panic!("expected text part, got {other:?}"),
        }
    }

    #[test]
    fn test_attach_appends_to_last_user_message() {
        let mut messages = vec![
            ChatMessage {
                role: ChatRole::User,
                content: MessageContent::Text("look at this".to_string()),
            },
            ChatMessage {
                role: ChatRole::Assistant,
                content: MessageContent::Text("ok".to_string()),
            },
        ];
        attach_to_last_user_message(
            &mut messages,
            vec![ContentPart::Text {
                text: "attachment".to_string(),
            }],
        );

        let parts = messages[0].content.parts();
        assert_eq!(parts.len(), 2);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_attach_creates_user_message_when_absent() {
        let mut messages = Vec::new();
        attach_to_last_user_message(
            &mut messages,
            vec![ContentPart::Text {
                text: "attachment".to_string(),
            }],
        );
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, ChatRole::User);
    }
}
