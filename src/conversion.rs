//! Request normalization: sanitized Messages requests in, Chat Completions requests out,
//! plus the inverse message mapping used for previews and round trips.

use serde_json::{Map, Value};

use crate::config::{Dialect, MaxTokensField, ProxyConfig, Route};
use crate::error::ProxyError;
use crate::models::chat;
use crate::models::messages::{
    ContentBlock, MessageContent, MessagesMessage, MessagesRequest, Role, SystemPrompt,
};
use crate::sanitize::{sanitize_request, DroppedParams};
use crate::tools::{self, ToolChoice};

/// Result of translating one inbound Messages request.
#[derive(Debug, Clone)]
pub struct ConvertedRequest {
    pub request: chat::ChatCompletionRequest,
    pub dropped: DroppedParams,
    pub stream: bool,
    /// Model name reported back to the client (the one it asked for).
    pub downstream_model: String,
}

/// Sanitize, hoist system messages, and decode an inbound Messages request body.
pub fn prepare_messages_request(
    mut body: Value,
) -> Result<(MessagesRequest, DroppedParams), ProxyError> {
    let Some(obj) = body.as_object_mut() else {
        return Err(ProxyError::InvalidRequest(
            "request body must be a JSON object".into(),
        ));
    };
    let dropped = sanitize_request(obj);
    hoist_system_messages(obj);

    let request = serde_json::from_value(body)
        .map_err(|e| ProxyError::InvalidRequest(format!("invalid Messages request: {e}")))?;
    Ok((request, dropped))
}

/// Move `role: "system"` entries out of `messages` and merge them into `system`.
///
/// An existing `system` value comes first; all parts are joined with a blank line.
/// Nothing changes when `messages` holds no system entries.
pub fn hoist_system_messages(obj: &mut Map<String, Value>) {
    let Some(Value::Array(messages)) = obj.get_mut("messages") else {
        return;
    };
    let is_system = |m: &Value| m.get("role").and_then(|r| r.as_str()) == Some("system");
    if !messages.iter().any(is_system) {
        return;
    }

    let (system_msgs, rest): (Vec<Value>, Vec<Value>) =
        std::mem::take(messages).into_iter().partition(is_system);
    *messages = rest;

    let mut parts = Vec::with_capacity(system_msgs.len() + 1);
    if let Some(existing) = obj.remove("system") {
        parts.push(value_to_system_text(existing));
    }
    for msg in system_msgs {
        if let Some(content) = msg.get("content").cloned() {
            parts.push(value_to_system_text(content));
        }
    }
    let merged = parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    tracing::debug!(chars = merged.len(), "hoisted system messages into system field");
    obj.insert("system".into(), Value::String(merged));
}

fn value_to_system_text(v: Value) -> String {
    // SystemPrompt's last variant accepts any JSON value.
    serde_json::from_value::<SystemPrompt>(v)
        .map(|s| s.to_text())
        .unwrap_or_default()
}

// ============================================================================
// Block → flat
// ============================================================================

/// Convert Messages API messages (and optional system prompt) into Chat Completions messages.
pub fn blocks_to_chat_messages(
    system: Option<&SystemPrompt>,
    messages: &[MessagesMessage],
) -> Vec<chat::ChatMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);

    if let Some(text) = system.map(SystemPrompt::to_text).filter(|t| !t.is_empty()) {
        out.push(chat::ChatMessage::text(chat::Role::System, text));
    }

    for msg in messages {
        match msg.role {
            Role::User => push_user_message(&mut out, &msg.content),
            Role::Assistant => out.push(assistant_to_chat(&msg.content)),
            Role::System => {
                let text = content_text(&msg.content, "\n");
                if !text.is_empty() {
                    out.push(chat::ChatMessage::text(chat::Role::System, text));
                }
            }
            Role::Unknown => {
                tracing::warn!("dropping message with unsupported role");
            }
        }
    }
    out
}

fn assistant_to_chat(content: &MessageContent) -> chat::ChatMessage {
    let blocks = match content {
        MessageContent::Text(s) => return chat::ChatMessage::text(chat::Role::Assistant, s.clone()),
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut texts = Vec::new();
    let mut calls = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } if !text.is_empty() => texts.push(text.as_str()),
            ContentBlock::ToolUse { id, name, input } => {
                calls.push(tools::tool_use_to_call(id, name, input))
            }
            // Reasoning is never replayed upstream.
            _ => {}
        }
    }

    let content = if !texts.is_empty() {
        Value::String(texts.join(" "))
    } else if !calls.is_empty() {
        Value::Null
    } else {
        Value::String(String::new())
    };

    chat::ChatMessage {
        role: chat::Role::Assistant,
        content,
        name: None,
        tool_call_id: None,
        tool_calls: (!calls.is_empty()).then_some(calls),
        function_call: None,
    }
}

fn push_user_message(out: &mut Vec<chat::ChatMessage>, content: &MessageContent) {
    let blocks = match content {
        MessageContent::Text(s) => {
            out.push(chat::ChatMessage::text(chat::Role::User, s.clone()));
            return;
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    // Tool results must directly follow the assistant turn that issued the calls.
    for block in blocks {
        if let ContentBlock::ToolResult {
            tool_use_id,
            content,
            ..
        } = block
        {
            out.push(chat::ChatMessage {
                role: chat::Role::Tool,
                content: Value::String(tool_result_text(content)),
                name: None,
                tool_call_id: Some(tool_use_id.clone()),
                tool_calls: None,
                function_call: None,
            });
        }
    }

    let mut texts = Vec::new();
    let mut parts = Vec::new();
    let mut has_image = false;
    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                texts.push(text.as_str());
                parts.push(serde_json::json!({ "type": "text", "text": text }));
            }
            ContentBlock::Image { source } => match image_source_url(source) {
                Some(url) => {
                    has_image = true;
                    parts.push(serde_json::json!({
                        "type": "image_url",
                        "image_url": { "url": url }
                    }));
                }
                None => tracing::warn!("dropping image block with unsupported source"),
            },
            _ => {}
        }
    }

    if has_image {
        out.push(chat::ChatMessage {
            content: Value::Array(parts),
            ..chat::ChatMessage::text(chat::Role::User, "")
        });
    } else if !texts.is_empty() {
        out.push(chat::ChatMessage::text(chat::Role::User, texts.join("\n")));
    }
}

/// Flatten `tool_result.content` into the string a `tool` message carries.
fn tool_result_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item.get("text").and_then(|t| t.as_str()) {
                Some(t) => t.to_string(),
                None => item.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// `base64` sources become data URLs, `url` sources pass through.
fn image_source_url(source: &Value) -> Option<String> {
    match source.get("type").and_then(|t| t.as_str()) {
        Some("base64") => {
            let media_type = source
                .get("media_type")
                .and_then(|m| m.as_str())
                .unwrap_or("image/png");
            let data = source.get("data").and_then(|d| d.as_str())?;
            Some(format!("data:{media_type};base64,{data}"))
        }
        Some("url") => source
            .get("url")
            .and_then(|u| u.as_str())
            .map(str::to_string),
        _ => None,
    }
}

fn content_text(content: &MessageContent, sep: &str) -> String {
    match content {
        MessageContent::Text(s) => s.clone(),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(sep),
    }
}

// ============================================================================
// Flat → block
// ============================================================================

/// Convert Chat Completions messages into a system prompt plus Messages API messages.
pub fn chat_messages_to_blocks(
    messages: &[chat::ChatMessage],
) -> (Option<String>, Vec<MessagesMessage>) {
    let mut system_parts = Vec::new();
    let mut out = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            chat::Role::System => {
                let text = chat_content_text(&msg.content);
                if !text.is_empty() {
                    system_parts.push(text);
                }
            }
            chat::Role::User => out.push(MessagesMessage {
                role: Role::User,
                content: user_content_to_blocks(&msg.content),
            }),
            chat::Role::Assistant => {
                let mut blocks = Vec::new();
                if let Value::String(text) = &msg.content {
                    if !text.is_empty() {
                        blocks.push(ContentBlock::text(text.clone()));
                    }
                }
                for call in msg.tool_calls.iter().flatten() {
                    blocks.push(tools::call_to_tool_use(call));
                }
                if let Some(fc) = &msg.function_call {
                    blocks.push(ContentBlock::ToolUse {
                        id: tools::generate_tool_use_id(),
                        name: fc.name.clone(),
                        input: tools::parse_arguments(&fc.arguments),
                    });
                }
                if blocks.is_empty() {
                    tracing::debug!("skipping empty assistant message");
                    continue;
                }
                out.push(MessagesMessage {
                    role: Role::Assistant,
                    content: MessageContent::Blocks(blocks),
                });
            }
            chat::Role::Tool | chat::Role::Function => {
                let tool_use_id = msg
                    .tool_call_id
                    .clone()
                    .or_else(|| msg.name.clone())
                    .unwrap_or_default();
                out.push(MessagesMessage {
                    role: Role::User,
                    content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                        tool_use_id,
                        content: Value::String(chat_content_text(&msg.content)),
                        is_error: None,
                    }]),
                });
            }
            chat::Role::Unknown => {
                tracing::warn!("dropping chat message with unsupported role");
            }
        }
    }

    let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
    (system, out)
}

fn chat_content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn user_content_to_blocks(content: &Value) -> MessageContent {
    let Value::Array(parts) = content else {
        return MessageContent::Text(chat_content_text(content));
    };
    let blocks = parts
        .iter()
        .filter_map(|part| match part.get("type").and_then(|t| t.as_str()) {
            Some("text") => part
                .get("text")
                .and_then(|t| t.as_str())
                .map(ContentBlock::text),
            Some("image_url") => {
                let url = part
                    .get("image_url")
                    .and_then(|i| i.get("url").or(Some(i)))
                    .and_then(|u| u.as_str())?;
                Some(ContentBlock::Image {
                    source: image_url_to_source(url),
                })
            }
            _ => None,
        })
        .collect();
    MessageContent::Blocks(blocks)
}

fn image_url_to_source(url: &str) -> Value {
    if let Some((meta, data)) = url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
    {
        serde_json::json!({ "type": "base64", "media_type": meta, "data": data })
    } else {
        serde_json::json!({ "type": "url", "url": url })
    }
}

// ============================================================================
// Request conversion
// ============================================================================

/// Build the upstream Chat Completions request for a decoded Messages request.
pub fn to_chat_request(
    req: &MessagesRequest,
    route: &Route,
    dialect: &Dialect,
) -> (chat::ChatCompletionRequest, DroppedParams) {
    let mut dropped = DroppedParams::new();

    let model = route.model.clone().unwrap_or_else(|| req.model.clone());
    let messages = blocks_to_chat_messages(req.system.as_ref(), &req.messages);

    let limit = route.max_tokens.or(req.max_tokens);
    let (max_tokens, max_completion_tokens) = match dialect.max_tokens_field(route.class) {
        MaxTokensField::MaxTokens => (limit, None),
        MaxTokensField::MaxCompletionTokens => (None, limit),
    };

    if req.top_k.is_some() {
        dropped.push("top_k");
    }

    let tools = tools::map_tools_to_chat(req.tools.as_deref(), req.functions.as_deref());
    let tool_choice = tools
        .as_ref()
        .map(|_| ToolChoice::from_value(req.tool_choice.as_ref()).to_chat());

    let stream = req.is_stream();

    let request = chat::ChatCompletionRequest {
        model,
        messages,
        temperature: req.temperature,
        top_p: req.top_p,
        max_tokens,
        max_completion_tokens,
        stop: req.stop_sequences.clone().filter(|s| !s.is_empty()),
        user: req.user_id().map(str::to_string),
        reasoning_effort: route.reasoning_effort.clone(),
        tools,
        tool_choice,
        stream: stream.then_some(true),
        stream_options: stream.then_some(chat::StreamOptions {
            include_usage: true,
        }),
    };
    (request, dropped)
}

/// Full inbound pipeline: sanitize, decode, route, and convert.
pub fn convert_request(body: Value, config: &ProxyConfig) -> Result<ConvertedRequest, ProxyError> {
    let (req, mut dropped) = prepare_messages_request(body)?;
    let route = config.route(req.thinking_enabled());
    let (request, more) = to_chat_request(&req, &route, &config.dialect());
    dropped.extend(more);

    tracing::debug!(
        class = ?route.class,
        model = %request.model,
        messages = request.messages.len(),
        stream = req.is_stream(),
        "converted Messages request"
    );

    Ok(ConvertedRequest {
        stream: req.is_stream(),
        downstream_model: req.model,
        request,
        dropped,
    })
}
