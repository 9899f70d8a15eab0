//! Streaming re-emission: Chat Completions SSE chunks in, Messages API events out.
//!
//! [`StreamTranslator`] is a synchronous state machine fed with raw upstream bytes. It keeps
//! a byte-level residual buffer, so frames and multi-byte characters split across network
//! chunks are reassembled before parsing. [`relay_events`] drives it from an async byte
//! stream and yields encoded `event:`/`data:` frames ready for the response body.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::convert::Infallible;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use serde_json::Value;

use crate::models::chat::{ChatCompletionChunk, ChatUsage, ToolCallDelta};
use crate::models::messages::{
    BlockDelta, ContentBlock, ErrorBody, MessageDeltaBody, MessagesResponse, MessagesUsage,
    StreamEvent,
};
use crate::response::{embedded_error, message_id};
use crate::tools::generate_tool_use_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No frame parsed yet; `message_start` not sent.
    AwaitingFirstEvent,
    Streaming,
    /// Closing blocks after the `[DONE]` sentinel.
    Finalizing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind {
    Text,
    Thinking,
}

#[derive(Debug)]
struct ToolSlot {
    block: usize,
    arguments: String,
}

/// Per-request stream accumulator.
#[derive(Debug)]
pub struct StreamTranslator {
    state: StreamState,
    model: String,
    residual: Vec<u8>,
    /// Bytes of `residual` already searched for a newline.
    scanned: usize,
    /// Unframed body lines seen before the first frame, kept to recover a plain JSON error.
    unframed: String,
    next_block: usize,
    open_blocks: BTreeSet<usize>,
    /// The text/thinking slot, when open: block index and kind.
    slot: Option<(usize, SlotKind)>,
    /// Upstream tool-call index → open `tool_use` block.
    tools: BTreeMap<u32, ToolSlot>,
    text: String,
    reasoning: String,
    saw_tool_call: bool,
    usage: Option<ChatUsage>,
}

impl StreamTranslator {
    /// `model` is reported in `message_start`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            state: StreamState::AwaitingFirstEvent,
            model: model.into(),
            residual: Vec::new(),
            scanned: 0,
            unframed: String::new(),
            next_block: 0,
            open_blocks: BTreeSet::new(),
            slot: None,
            tools: BTreeMap::new(),
            text: String::new(),
            reasoning: String::new(),
            saw_tool_call: false,
            usage: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Accumulated argument string for an upstream tool-call index.
    pub fn tool_arguments(&self, index: u32) -> Option<&str> {
        self.tools.get(&index).map(|t| t.arguments.as_str())
    }

    /// Feed one upstream chunk. Complete lines are processed; the trailing partial line
    /// stays buffered until the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.is_closed() {
            return events;
        }
        self.residual.extend_from_slice(chunk);

        while let Some(offset) = self.residual[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            let line: Vec<u8> = self.residual.drain(..=pos).collect();
            self.scanned = 0;
            self.handle_line(&line[..pos], &mut events);
            if self.is_closed() {
                self.residual.clear();
                return events;
            }
        }
        self.scanned = self.residual.len();
        events
    }

    /// Upstream reached EOF. A final unterminated line is still processed; a stream that
    /// never delivered `[DONE]` ends with an `error` event.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.is_closed() {
            return events;
        }
        if !self.residual.is_empty() {
            let line = std::mem::take(&mut self.residual);
            self.scanned = 0;
            self.handle_line(&line, &mut events);
        }
        if self.is_closed() {
            return events;
        }
        // Some upstreams answer a streaming request with a plain JSON error body.
        let plain_error = serde_json::from_str::<Value>(&self.unframed)
            .ok()
            .and_then(|body| embedded_error(&body));
        match plain_error {
            Some(message) => self.fail_into(&message, &mut events),
            None => self.fail_into("upstream stream ended before [DONE]", &mut events),
        }
        events
    }

    /// Abort with an `error` event. Idempotent: a closed stream emits nothing.
    pub fn fail(&mut self, message: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.fail_into(message, &mut events);
        events
    }

    fn fail_into(&mut self, message: &str, events: &mut Vec<StreamEvent>) {
        if self.is_closed() {
            return;
        }
        tracing::warn!(error = %message, "aborting stream");
        events.push(StreamEvent::Error {
            error: ErrorBody {
                kind: "api_error".to_string(),
                message: message.to_string(),
            },
        });
        self.state = StreamState::Closed;
    }

    fn handle_line(&mut self, line: &[u8], events: &mut Vec<StreamEvent>) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let Some(payload) = line.strip_prefix(b"data:") else {
            // Comments, `event:` lines, blank separators.
            self.keep_unframed(line);
            return;
        };
        let payload = match std::str::from_utf8(payload) {
            Ok(p) => p.trim(),
            Err(e) => {
                tracing::debug!(error = %e, "skipping non-UTF-8 frame");
                return;
            }
        };
        if payload.is_empty() {
            return;
        }
        if payload == "[DONE]" {
            self.finalize(events);
            return;
        }

        let value: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, frame = %payload, "skipping malformed frame");
                return;
            }
        };
        if let Some(message) = embedded_error(&value) {
            self.fail_into(&message, events);
            return;
        }
        match serde_json::from_value::<ChatCompletionChunk>(value) {
            Ok(chunk) => self.handle_chunk(chunk, events),
            Err(e) => tracing::debug!(error = %e, "skipping frame with unexpected shape"),
        }
    }

    fn keep_unframed(&mut self, line: &[u8]) {
        const LIMIT: usize = 64 * 1024;
        if self.state != StreamState::AwaitingFirstEvent
            || line.first().map_or(true, |b| *b == b':')
            || line.starts_with(b"event:")
            || self.unframed.len() + line.len() > LIMIT
        {
            return;
        }
        self.unframed.push_str(&String::from_utf8_lossy(line));
        self.unframed.push('\n');
    }

    fn handle_chunk(&mut self, chunk: ChatCompletionChunk, events: &mut Vec<StreamEvent>) {
        self.ensure_started(chunk.id.as_deref(), events);

        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }

        for choice in chunk.choices {
            let delta = choice.delta;

            if let Some(reasoning) = delta.reasoning_text().filter(|r| !r.is_empty()) {
                let index = self.open_slot(SlotKind::Thinking, events);
                self.reasoning.push_str(reasoning);
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: BlockDelta::ThinkingDelta {
                        thinking: reasoning.to_string(),
                    },
                });
            }

            if let Some(content) = delta.content.as_deref().filter(|c| !c.is_empty()) {
                let index = self.open_slot(SlotKind::Text, events);
                self.text.push_str(content);
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: BlockDelta::TextDelta {
                        text: content.to_string(),
                    },
                });
            }

            for tc in delta.tool_calls.iter().flatten() {
                self.handle_tool_delta(tc, events);
            }

            if choice.finish_reason.is_some() && self.open_blocks.is_empty() {
                self.open_slot(SlotKind::Text, events);
            }
        }
    }

    fn handle_tool_delta(&mut self, tc: &ToolCallDelta, events: &mut Vec<StreamEvent>) {
        if !self.tools.contains_key(&tc.index) {
            let id = tc
                .id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(generate_tool_use_id);
            let name = tc
                .function
                .as_ref()
                .and_then(|f| f.name.clone())
                .unwrap_or_default();
            let block = self.open_block(
                ContentBlock::ToolUse {
                    id,
                    name,
                    input: Value::Object(Default::default()),
                },
                events,
            );
            self.saw_tool_call = true;
            self.tools.insert(
                tc.index,
                ToolSlot {
                    block,
                    arguments: String::new(),
                },
            );
        }

        let Some(fragment) = tc.function.as_ref().and_then(|f| f.arguments.as_deref()) else {
            return;
        };
        let Some(slot) = self.tools.get_mut(&tc.index) else {
            return;
        };
        let before = slot.arguments.len();
        slot.arguments.push_str(fragment);
        if slot.arguments.len() > before {
            events.push(StreamEvent::ContentBlockDelta {
                index: slot.block,
                delta: BlockDelta::InputJsonDelta {
                    partial_json: slot.arguments[before..].to_string(),
                },
            });
        }
    }

    fn ensure_started(&mut self, upstream_id: Option<&str>, events: &mut Vec<StreamEvent>) {
        if self.state != StreamState::AwaitingFirstEvent {
            return;
        }
        events.push(StreamEvent::MessageStart {
            message: MessagesResponse::empty(message_id(upstream_id), self.model.clone()),
        });
        events.push(StreamEvent::Ping);
        self.state = StreamState::Streaming;
    }

    /// Block index of the text/thinking slot, opening it (or switching its kind) as needed.
    fn open_slot(&mut self, kind: SlotKind, events: &mut Vec<StreamEvent>) -> usize {
        match self.slot {
            Some((index, open)) if open == kind => return index,
            Some((index, _)) => self.close_block(index, events),
            None => {}
        }
        let block = match kind {
            SlotKind::Text => ContentBlock::text(""),
            SlotKind::Thinking => ContentBlock::Thinking {
                thinking: String::new(),
                signature: None,
            },
        };
        let index = self.open_block(block, events);
        self.slot = Some((index, kind));
        index
    }

    fn open_block(&mut self, content_block: ContentBlock, events: &mut Vec<StreamEvent>) -> usize {
        let index = self.next_block;
        self.next_block += 1;
        self.open_blocks.insert(index);
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block,
        });
        index
    }

    fn close_block(&mut self, index: usize, events: &mut Vec<StreamEvent>) {
        if self.open_blocks.remove(&index) {
            events.push(StreamEvent::ContentBlockStop { index });
        }
    }

    fn finalize(&mut self, events: &mut Vec<StreamEvent>) {
        if self.is_closed() {
            return;
        }
        self.ensure_started(None, events);
        if self.next_block == 0 {
            self.open_slot(SlotKind::Text, events);
        }
        self.state = StreamState::Finalizing;

        // BTreeSet iterates in ascending index order.
        for index in std::mem::take(&mut self.open_blocks) {
            events.push(StreamEvent::ContentBlockStop { index });
        }
        self.slot = None;

        let stop_reason = if self.saw_tool_call {
            "tool_use"
        } else {
            "end_turn"
        };
        let usage = self.final_usage();
        tracing::debug!(
            stop_reason,
            output_tokens = usage.output_tokens,
            blocks = self.next_block,
            "stream finished"
        );
        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop_reason.to_string()),
                stop_sequence: None,
            },
            usage,
        });
        events.push(StreamEvent::MessageStop);
        self.state = StreamState::Closed;
    }

    fn final_usage(&self) -> MessagesUsage {
        match &self.usage {
            Some(u) => MessagesUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                cache_read_input_tokens: u
                    .prompt_tokens_details
                    .as_ref()
                    .and_then(|d| d.cached_tokens),
            },
            None => MessagesUsage {
                input_tokens: 0,
                output_tokens: self.estimate_output_tokens(),
                cache_read_input_tokens: None,
            },
        }
    }

    /// Roughly four characters per token.
    fn estimate_output_tokens(&self) -> u64 {
        let chars = self.text.chars().count()
            + self.reasoning.chars().count()
            + self
                .tools
                .values()
                .map(|t| t.arguments.chars().count())
                .sum::<usize>();
        chars.div_ceil(4) as u64
    }
}

/// Encode one event as an SSE frame: `event: {name}\ndata: {json}\n\n`.
pub fn encode_event(event: &StreamEvent) -> Bytes {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        format!(r#"{{"type":"error","error":{{"type":"api_error","message":"{e}"}}}}"#)
    });
    Bytes::from(format!("event: {}\ndata: {}\n\n", event.name(), data))
}

struct Relay<S> {
    upstream: Pin<Box<S>>,
    translator: StreamTranslator,
    pending: VecDeque<Bytes>,
}

/// Translate an upstream SSE byte stream into encoded Messages API frames.
///
/// The upstream is not polled again once the translator closes, and dropping the returned
/// stream drops the upstream with it.
pub fn relay_events<S, E>(
    upstream: S,
    translator: StreamTranslator,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let relay = Relay {
        upstream: Box::pin(upstream),
        translator,
        pending: VecDeque::new(),
    };
    stream::unfold(relay, |mut relay| async move {
        loop {
            if let Some(frame) = relay.pending.pop_front() {
                return Some((Ok(frame), relay));
            }
            if relay.translator.is_closed() {
                return None;
            }
            let events = match relay.upstream.next().await {
                Some(Ok(chunk)) => relay.translator.push(&chunk),
                Some(Err(e)) => relay
                    .translator
                    .fail(&format!("upstream stream error: {e}")),
                None => relay.translator.finish(),
            };
            relay.pending.extend(events.iter().map(encode_event));
        }
    })
}
