//! Request parameter sanitization.
//!
//! Clients of the Messages endpoint frequently send Chat Completions parameters along with
//! (or instead of) their Messages equivalents. [`sanitize_request`] renames the ones that
//! have an equivalent, removes the ones that do not, and reports every removed name so the
//! caller can surface them in the `X-Dropped-Params` header.

use serde_json::{Map, Value};

/// Assigned when the request carries no token limit.
pub const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Parameters with no Messages equivalent, removed in this order.
pub const UNSUPPORTED_PARAMS: &[&str] = &[
    "n",
    "presence_penalty",
    "frequency_penalty",
    "logit_bias",
    "seed",
    "logprobs",
    "top_logprobs",
    "echo",
    "best_of",
    "response_format",
    "service_tier",
];

/// Ordered names of parameters removed from a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DroppedParams(Vec<String>);

impl DroppedParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>) {
        self.0.push(name.into());
    }

    pub fn extend(&mut self, other: DroppedParams) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Comma-joined value for the `X-Dropped-Params` header, `None` when nothing was dropped.
    pub fn header_value(&self) -> Option<String> {
        (!self.0.is_empty()).then(|| self.0.join(","))
    }
}

/// Sanitize a request body in place. Non-object values are left alone.
pub fn sanitize_value(v: &mut Value) -> DroppedParams {
    match v.as_object_mut() {
        Some(obj) => sanitize_request(obj),
        None => DroppedParams::new(),
    }
}

/// Sanitize a request object in place and return the dropped parameter names.
pub fn sanitize_request(obj: &mut Map<String, Value>) -> DroppedParams {
    let mut dropped = DroppedParams::new();

    rename_stop(obj, &mut dropped);
    move_user_to_metadata(obj, &mut dropped);

    for &param in UNSUPPORTED_PARAMS {
        if obj.remove(param).is_some() {
            dropped.push(param);
        }
    }

    ensure_max_tokens(obj, &mut dropped);

    if !dropped.is_empty() {
        tracing::debug!(dropped = ?dropped.as_slice(), "sanitized request parameters");
    }
    dropped
}

fn rename_stop(obj: &mut Map<String, Value>, dropped: &mut DroppedParams) {
    let Some(stop) = obj.remove("stop") else {
        return;
    };
    if stop.is_null() {
        return;
    }
    if obj.contains_key("stop_sequences") {
        dropped.push("stop");
        return;
    }
    let sequences = match stop {
        Value::String(s) => vec![Value::String(s)],
        Value::Array(items) => items.into_iter().filter(|i| i.is_string()).collect(),
        _ => {
            dropped.push("stop");
            return;
        }
    };
    obj.insert("stop_sequences".into(), Value::Array(sequences));
}

fn move_user_to_metadata(obj: &mut Map<String, Value>, dropped: &mut DroppedParams) {
    let Some(user) = obj.remove("user") else {
        return;
    };
    if user.is_null() {
        return;
    }
    dropped.push("user");

    let metadata = obj
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if !metadata.is_object() {
        *metadata = Value::Object(Map::new());
    }
    if let Some(meta) = metadata.as_object_mut() {
        meta.entry("user_id").or_insert(user);
    }
}

fn ensure_max_tokens(obj: &mut Map<String, Value>, dropped: &mut DroppedParams) {
    let legacy = obj.remove("max_completion_tokens").filter(|v| !v.is_null());
    let has_max = obj.get("max_tokens").is_some_and(|v| !v.is_null());
    match (has_max, legacy) {
        (true, Some(_)) => dropped.push("max_completion_tokens"),
        (true, None) => {}
        (false, Some(limit)) => {
            obj.insert("max_tokens".into(), limit);
        }
        (false, None) => {
            obj.insert("max_tokens".into(), Value::from(DEFAULT_MAX_TOKENS));
        }
    }
}
