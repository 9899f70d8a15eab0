#![forbid(unsafe_code)]
#![doc = r#"
Messages2Chat

Translate Claude-style Messages API requests into OpenAI-compatible Chat Completions requests,
forward them upstream, and translate the answers (JSON or SSE streams) back.

Crate highlights
- Library: pure conversion via `convert_request(Value, &ProxyConfig)` and
  `to_messages_response(&Value, &str)`; streaming via `StreamTranslator`.
- HTTP server (in `server`): `/`, `/v1/messages` and `/convert`.
- Models: typed request/response/event models for both wire formats.

Modules
- `models`: Data structures for Chat Completions and Messages.
- `sanitize`: Parameter renaming/removal with dropped-parameter reporting.
- `tools`: Tool declarations, tool choice, and tool invocations in both shapes.
- `conversion`: Message and request mapping Messages → Chat Completions (and back).
- `response`: Non-streaming response assembly.
- `streaming`: SSE re-emission state machine.
- `config`, `upstream`, `error`: Proxy configuration, upstream client, error type.
- `server`: Axum router/handlers (the binary uses this).
- `util`: Shared helpers (tracing, env, CORS, secret masking).
"#]

pub mod config;
pub mod conversion;
pub mod error;
pub mod models;
pub mod response;
pub mod sanitize;
pub mod server;
pub mod streaming;
pub mod tools;
pub mod upstream;
pub mod util;

pub use crate::config::{Dialect, DialectKind, ProxyConfig};
pub use crate::conversion::{convert_request, ConvertedRequest};
pub use crate::error::ProxyError;
pub use crate::response::to_messages_response;
pub use crate::server::{build_router, AppState};
pub use crate::streaming::StreamTranslator;

// Re-export model namespaces for convenience (downstream users can do `use messages2chat::chat`).
pub use crate::models::{chat, messages};
