//! Tool declarations, tool choice, and tool invocations in both wire formats.
//!
//! Declarations are normalized into [`ToolSpec`] (name, description, [`Schema`]) and emitted
//! in either nesting: Chat Completions wraps them under `function.parameters`, the Messages
//! API keeps them flat under `input_schema`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::chat;
use crate::models::messages::{ContentBlock, MessagesTool};

/// Synthetic tool some clients inject; no upstream accepts it.
pub const INCOMPATIBLE_TOOL: &str = "BatchTool";

/// Any tool declaration shape accepted on input.
///
/// Order matters for untagged decoding: the wrapped Chat form requires `type` + `function`,
/// the Messages form requires `input_schema`, and anything else carrying a `name` is read
/// as a legacy `functions[]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolDeclaration {
    Chat(chat::ToolDefinition),
    Messages(MessagesTool),
    Legacy(chat::FunctionDef),
}

// ============================================================================
// JSON Schema nodes
// ============================================================================

/// JSON Schema tree with the sub-schema positions made explicit.
///
/// Only the keys that can hold nested schemas are modelled; everything else is kept
/// verbatim in `rest`. Values that do not have the expected shape (e.g. `properties`
/// that is not an object) are also kept in `rest`, untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Node(Box<SchemaNode>),
    /// Array in schema position (tuple-form `items`).
    Tuple(Vec<Schema>),
    /// Booleans, strings, numbers, null.
    Leaf(Value),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaNode {
    pub properties: Option<Vec<(String, Schema)>>,
    pub items: Option<Schema>,
    pub additional_properties: Option<Schema>,
    pub any_of: Option<Vec<Schema>>,
    pub all_of: Option<Vec<Schema>>,
    pub one_of: Option<Vec<Schema>>,
    pub rest: Map<String, Value>,
}

impl From<Value> for Schema {
    fn from(v: Value) -> Self {
        match v {
            Value::Object(obj) => Schema::Node(Box::new(SchemaNode::from_map(obj))),
            Value::Array(arr) => Schema::Tuple(arr.into_iter().map(Schema::from).collect()),
            leaf => Schema::Leaf(leaf),
        }
    }
}

impl From<Schema> for Value {
    fn from(s: Schema) -> Self {
        match s {
            Schema::Node(node) => Value::Object(node.into_map()),
            Schema::Tuple(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Schema::Leaf(v) => v,
        }
    }
}

impl SchemaNode {
    fn from_map(mut obj: Map<String, Value>) -> Self {
        let properties = match obj.remove("properties") {
            Some(Value::Object(props)) => Some(
                props
                    .into_iter()
                    .map(|(k, v)| (k, Schema::from(v)))
                    .collect(),
            ),
            Some(other) => {
                obj.insert("properties".into(), other);
                None
            }
            None => None,
        };
        let items = obj.remove("items").map(Schema::from);
        let additional_properties = obj.remove("additionalProperties").map(Schema::from);
        let any_of = take_schema_list(&mut obj, "anyOf");
        let all_of = take_schema_list(&mut obj, "allOf");
        let one_of = take_schema_list(&mut obj, "oneOf");
        Self {
            properties,
            items,
            additional_properties,
            any_of,
            all_of,
            one_of,
            rest: obj,
        }
    }

    fn into_map(self) -> Map<String, Value> {
        let mut obj = self.rest;
        if let Some(props) = self.properties {
            let props = props.into_iter().map(|(k, s)| (k, Value::from(s))).collect();
            obj.insert("properties".into(), Value::Object(props));
        }
        if let Some(items) = self.items {
            obj.insert("items".into(), items.into());
        }
        if let Some(ap) = self.additional_properties {
            obj.insert("additionalProperties".into(), ap.into());
        }
        for (key, list) in [
            ("anyOf", self.any_of),
            ("allOf", self.all_of),
            ("oneOf", self.one_of),
        ] {
            if let Some(list) = list {
                obj.insert(
                    key.into(),
                    Value::Array(list.into_iter().map(Value::from).collect()),
                );
            }
        }
        obj
    }
}

fn take_schema_list(obj: &mut Map<String, Value>, key: &str) -> Option<Vec<Schema>> {
    match obj.remove(key) {
        Some(Value::Array(arr)) => Some(arr.into_iter().map(Schema::from).collect()),
        Some(other) => {
            obj.insert(key.into(), other);
            None
        }
        None => None,
    }
}

impl Schema {
    /// Remove `"format": "uri"` from this node and every nested sub-schema.
    pub fn strip_uri_format(&mut self) {
        match self {
            Schema::Node(node) => {
                let node = &mut **node;
                if node.rest.get("format").and_then(|f| f.as_str()) == Some("uri") {
                    node.rest.remove("format");
                }
                if let Some(props) = node.properties.as_mut() {
                    for (_, s) in props.iter_mut() {
                        s.strip_uri_format();
                    }
                }
                if let Some(items) = node.items.as_mut() {
                    items.strip_uri_format();
                }
                if let Some(ap) = node.additional_properties.as_mut() {
                    ap.strip_uri_format();
                }
                for list in [&mut node.any_of, &mut node.all_of, &mut node.one_of]
                    .into_iter()
                    .flatten()
                {
                    for s in list.iter_mut() {
                        s.strip_uri_format();
                    }
                }
            }
            Schema::Tuple(items) => {
                for s in items.iter_mut() {
                    s.strip_uri_format();
                }
            }
            Schema::Leaf(_) => {}
        }
    }
}

/// Convenience wrapper over [`Schema::strip_uri_format`] for raw JSON.
pub fn strip_uri_format(schema: Value) -> Value {
    let mut s = Schema::from(schema);
    s.strip_uri_format();
    s.into()
}

// ============================================================================
// Declarations
// ============================================================================

/// Canonical tool declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub schema: Schema,
}

impl From<&ToolDeclaration> for ToolSpec {
    fn from(decl: &ToolDeclaration) -> Self {
        let (name, description, schema) = match decl {
            ToolDeclaration::Chat(chat::ToolDefinition::Function { function })
            | ToolDeclaration::Legacy(function) => (
                &function.name,
                &function.description,
                &function.parameters,
            ),
            ToolDeclaration::Messages(tool) => (&tool.name, &tool.description, &tool.input_schema),
        };
        let mut schema = Schema::from(schema.clone());
        schema.strip_uri_format();
        ToolSpec {
            name: name.clone(),
            description: description.clone(),
            schema,
        }
    }
}

impl ToolSpec {
    pub fn to_chat(&self) -> chat::ToolDefinition {
        chat::ToolDefinition::Function {
            function: chat::FunctionDef {
                name: self.name.clone(),
                description: self.description.clone(),
                parameters: self.schema.clone().into(),
            },
        }
    }

    pub fn to_messages(&self) -> MessagesTool {
        MessagesTool {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.schema.clone().into(),
        }
    }
}

/// Merge `tools` and legacy `functions` into canonical specs, dropping [`INCOMPATIBLE_TOOL`].
pub fn collect_tool_specs(
    tools: Option<&[ToolDeclaration]>,
    functions: Option<&[ToolDeclaration]>,
) -> Vec<ToolSpec> {
    tools
        .unwrap_or_default()
        .iter()
        .chain(functions.unwrap_or_default())
        .map(ToolSpec::from)
        .filter(|spec| {
            if spec.name == INCOMPATIBLE_TOOL {
                tracing::debug!(tool = %spec.name, "dropping incompatible tool declaration");
                false
            } else {
                true
            }
        })
        .collect()
}

/// Chat Completions `tools`, or `None` when nothing survives filtering.
pub fn map_tools_to_chat(
    tools: Option<&[ToolDeclaration]>,
    functions: Option<&[ToolDeclaration]>,
) -> Option<Vec<chat::ToolDefinition>> {
    let mapped: Vec<_> = collect_tool_specs(tools, functions)
        .iter()
        .map(ToolSpec::to_chat)
        .collect();
    (!mapped.is_empty()).then_some(mapped)
}

/// Messages API `tools`, or `None` when nothing survives filtering.
pub fn map_tools_to_messages(
    tools: Option<&[ToolDeclaration]>,
    functions: Option<&[ToolDeclaration]>,
) -> Option<Vec<MessagesTool>> {
    let mapped: Vec<_> = collect_tool_specs(tools, functions)
        .iter()
        .map(ToolSpec::to_messages)
        .collect();
    (!mapped.is_empty()).then_some(mapped)
}

// ============================================================================
// Tool choice
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Specific(String),
}

impl ToolChoice {
    /// Read a `tool_choice` / `function_call` value in either format.
    pub fn from_value(v: Option<&Value>) -> Self {
        match v {
            Some(Value::String(s)) if s == "none" => ToolChoice::None,
            Some(Value::Object(obj)) => {
                let name = obj
                    .get("name")
                    .and_then(|n| n.as_str())
                    .or_else(|| {
                        obj.get("function")
                            .and_then(|f| f.get("name"))
                            .and_then(|n| n.as_str())
                    });
                match (name, obj.get("type").and_then(|t| t.as_str())) {
                    (Some(name), _) => ToolChoice::Specific(name.to_string()),
                    (None, Some("none")) => ToolChoice::None,
                    _ => ToolChoice::Auto,
                }
            }
            _ => ToolChoice::Auto,
        }
    }

    pub fn to_chat(&self) -> Value {
        match self {
            ToolChoice::Auto => Value::String("auto".into()),
            ToolChoice::None => Value::String("none".into()),
            ToolChoice::Specific(name) => {
                serde_json::json!({ "type": "function", "function": { "name": name } })
            }
        }
    }

    pub fn to_messages(&self) -> Value {
        match self {
            ToolChoice::Auto => serde_json::json!({ "type": "auto" }),
            ToolChoice::None => serde_json::json!({ "type": "none" }),
            ToolChoice::Specific(name) => serde_json::json!({ "type": "tool", "name": name }),
        }
    }
}

// ============================================================================
// Invocations
// ============================================================================

/// `tool_use` block → Chat `tool_calls[]` entry with JSON-encoded arguments.
pub fn tool_use_to_call(id: &str, name: &str, input: &Value) -> chat::ToolCall {
    let arguments = match input {
        Value::Null => "{}".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    chat::ToolCall {
        id: id.to_string(),
        call_type: "function".to_string(),
        function: chat::FunctionCall {
            name: name.to_string(),
            arguments: Value::String(arguments),
        },
    }
}

/// Chat `tool_calls[]` entry → `tool_use` block.
pub fn call_to_tool_use(call: &chat::ToolCall) -> ContentBlock {
    let id = if call.id.is_empty() {
        generate_tool_use_id()
    } else {
        call.id.clone()
    };
    ContentBlock::ToolUse {
        id,
        name: call.function.name.clone(),
        input: parse_arguments(&call.function.arguments),
    }
}

/// Decode function-call arguments: JSON strings are parsed, objects are used as-is, and
/// anything unusable becomes an empty object.
pub fn parse_arguments(arguments: &Value) -> Value {
    match arguments {
        Value::Object(_) => arguments.clone(),
        Value::String(s) if s.trim().is_empty() => Value::Object(Map::new()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(v @ Value::Object(_)) => v,
            Ok(other) => serde_json::json!({ "value": other }),
            Err(e) => {
                tracing::warn!(error = %e, "unparsable tool call arguments; using empty input");
                Value::Object(Map::new())
            }
        },
        _ => Value::Object(Map::new()),
    }
}

pub fn generate_tool_use_id() -> String {
    format!("toolu_{}", uuid::Uuid::new_v4().simple())
}
