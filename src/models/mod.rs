//! Data models for the Chat Completions and Messages APIs.
//!
//! This module groups two submodules:
//! - `chat`: The subset of the OpenAI Chat Completions request, response and stream chunk models
//!   that OpenAI-compatible upstreams share.
//! - `messages`: Messages API requests with typed content blocks, responses, and stream events.
//!
//! The mapping logic between the two lives in `crate::conversion`, `crate::response` and
//! `crate::streaming`.

pub mod chat;
pub mod messages;

pub use chat::{ChatCompletionRequest, ChatMessage, FunctionDef, ToolDefinition};
pub use messages::{
    ContentBlock, MessageContent, MessagesMessage, MessagesRequest, MessagesResponse, StreamEvent,
};
