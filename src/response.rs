//! Non-streaming response assembly: one Chat Completions response in, one Messages
//! response out.

use serde_json::Value;

use crate::error::ProxyError;
use crate::models::chat::{self, ChatCompletionResponse};
use crate::models::messages::{ContentBlock, MessagesResponse, MessagesUsage};
use crate::tools;

/// Chat Completions `finish_reason` → Messages `stop_reason`.
pub fn map_finish_reason(reason: Option<&str>) -> &'static str {
    match reason {
        Some("tool_calls") | Some("function_call") => "tool_use",
        Some("length") => "max_tokens",
        _ => "end_turn",
    }
}

/// Rewrite an upstream completion id into a message id.
pub fn message_id(upstream: Option<&str>) -> String {
    match upstream.filter(|id| !id.is_empty()) {
        Some(id) => match id.strip_prefix("chatcmpl-") {
            Some(rest) => format!("msg_{rest}"),
            None => format!("msg_{id}"),
        },
        None => format!("msg_{}", uuid::Uuid::new_v4().simple()),
    }
}

pub fn map_usage(usage: Option<&chat::ChatUsage>) -> MessagesUsage {
    match usage {
        Some(u) => MessagesUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            cache_read_input_tokens: u
                .prompt_tokens_details
                .as_ref()
                .and_then(|d| d.cached_tokens),
        },
        None => MessagesUsage::default(),
    }
}

/// Message of an `error` object embedded in an otherwise successful body.
pub fn embedded_error(body: &Value) -> Option<String> {
    let err = body.get("error").filter(|e| !e.is_null())?;
    Some(match err {
        Value::String(s) => s.clone(),
        other => other
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    })
}

/// Build the Messages response for a 200 Chat Completions body.
///
/// `model` is the name the client asked for; the upstream model name is not echoed.
pub fn to_messages_response(body: &Value, model: &str) -> Result<MessagesResponse, ProxyError> {
    if let Some(msg) = embedded_error(body) {
        return Err(ProxyError::UpstreamLogical(msg));
    }
    let parsed: ChatCompletionResponse = serde_json::from_value(body.clone())
        .map_err(|e| ProxyError::InvalidUpstream(e.to_string()))?;

    let mut response = MessagesResponse::empty(message_id(parsed.id.as_deref()), model.to_string());
    response.usage = map_usage(parsed.usage.as_ref());

    let Some(choice) = parsed.choices.into_iter().next() else {
        tracing::warn!("upstream response has no choices");
        response.stop_reason = Some(map_finish_reason(None).to_string());
        return Ok(response);
    };

    response.content = message_blocks(&choice.message);
    response.stop_reason = Some(map_finish_reason(choice.finish_reason.as_deref()).to_string());
    Ok(response)
}

fn message_blocks(message: &chat::ChatResponseMessage) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();

    let reasoning = message
        .reasoning_content
        .as_deref()
        .or(message.reasoning.as_deref())
        .filter(|r| !r.is_empty());
    if let Some(thinking) = reasoning {
        blocks.push(ContentBlock::Thinking {
            thinking: thinking.to_string(),
            signature: None,
        });
    }

    if let Some(text) = message.content.as_deref().filter(|t| !t.is_empty()) {
        blocks.push(ContentBlock::text(text));
    }

    for call in message.tool_calls.iter().flatten() {
        blocks.push(tools::call_to_tool_use(call));
    }
    if let Some(fc) = &message.function_call {
        blocks.push(ContentBlock::ToolUse {
            id: tools::generate_tool_use_id(),
            name: fc.name.clone(),
            input: tools::parse_arguments(&fc.arguments),
        });
    }
    blocks
}
