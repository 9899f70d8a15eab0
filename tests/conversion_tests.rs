use messages2chat::chat::{self, ChatMessage, Role, ToolDefinition};
use messages2chat::config::ProxyConfig;
use messages2chat::conversion::{
    blocks_to_chat_messages, chat_messages_to_blocks, convert_request, prepare_messages_request,
};
use messages2chat::messages::{ContentBlock, MessageContent};
use messages2chat::tools::{map_tools_to_chat, map_tools_to_messages, ToolDeclaration};
use serde_json::json;

#[test]
fn tool_declarations_round_trip_chat_to_messages_to_chat() {
    let original: Vec<ToolDeclaration> = serde_json::from_value(json!([
        {
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "Current weather for a city",
                "parameters": {
                    "type": "object",
                    "properties": {"city": {"type": "string"}, "units": {"enum": ["c", "f"]}},
                    "required": ["city"]
                }
            }
        },
        {
            "type": "function",
            "function": {"name": "noop", "parameters": {"type": "object", "properties": {}}}
        }
    ]))
    .unwrap();

    let as_messages = map_tools_to_messages(Some(original.as_slice()), None).unwrap();
    assert_eq!(as_messages[0].name, "get_weather");
    assert_eq!(as_messages[0].input_schema["required"], json!(["city"]));

    let back: Vec<ToolDeclaration> = as_messages
        .into_iter()
        .map(ToolDeclaration::Messages)
        .collect();
    let round_tripped = map_tools_to_chat(Some(back.as_slice()), None).unwrap();

    let expected: Vec<ToolDefinition> = original
        .iter()
        .map(|d| match d {
            ToolDeclaration::Chat(def) => def.clone(),
            other => panic!("unexpected declaration {other:?}"),
        })
        .collect();
    assert_eq!(round_tripped, expected);
}

#[test]
fn uri_formats_are_removed_from_forwarded_tools() {
    let body = json!({
        "model": "m",
        "messages": [{"role": "user", "content": "hi"}],
        "tools": [{
            "name": "fetch",
            "input_schema": {
                "type": "object",
                "properties": {
                    "url": {"type": "string", "format": "uri"},
                    "urls": {"type": "array", "items": {"type": "string", "format": "uri"}}
                }
            }
        }]
    });
    let converted = convert_request(body, &ProxyConfig::default()).unwrap();
    let tools = serde_json::to_value(converted.request.tools.unwrap()).unwrap();
    let params = &tools[0]["function"]["parameters"];
    assert_eq!(params["properties"]["url"], json!({"type": "string"}));
    assert_eq!(params["properties"]["urls"]["items"], json!({"type": "string"}));
    assert_eq!(converted.request.tool_choice, Some(json!("auto")));
}

#[test]
fn system_entries_merge_with_blank_line() {
    let body = json!({
        "model": "m",
        "messages": [
            {"role": "system", "content": "a"},
            {"role": "system", "content": [{"type": "text", "text": "b"}]},
            {"role": "user", "content": "question"}
        ]
    });
    let converted = convert_request(body, &ProxyConfig::default()).unwrap();
    let messages = &converted.request.messages;
    assert_eq!(messages[0], ChatMessage::text(Role::System, "a\n\nb"));
    assert_eq!(
        messages.iter().filter(|m| m.role == Role::System).count(),
        1
    );
    assert_eq!(messages[1], ChatMessage::text(Role::User, "question"));
}

#[test]
fn dropped_parameters_in_order() {
    let body = json!({
        "model": "m",
        "messages": [],
        "presence_penalty": 0.5,
        "user": "u"
    });
    let converted = convert_request(body, &ProxyConfig::default()).unwrap();
    assert_eq!(converted.dropped.as_slice(), ["user", "presence_penalty"]);
    assert_eq!(converted.request.user.as_deref(), Some("u"));
}

#[test]
fn multi_turn_tool_conversation() {
    let (req, _) = prepare_messages_request(json!({
        "model": "m",
        "system": "be brief",
        "messages": [
            {"role": "user", "content": "weather in Paris?"},
            {"role": "assistant", "content": [
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Paris"}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "18C"}
            ]}
        ]
    }))
    .unwrap();

    let out = blocks_to_chat_messages(req.system.as_ref(), &req.messages);
    let roles: Vec<Role> = out.iter().map(|m| m.role.clone()).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::Tool]);
    assert_eq!(out[2].content, json!("Checking."));
    assert_eq!(
        out[2].tool_calls.as_ref().unwrap()[0].function.arguments,
        json!(r#"{"city":"Paris"}"#)
    );
    assert_eq!(out[3].tool_call_id.as_deref(), Some("toolu_1"));
    assert_eq!(out[3].content, json!("18C"));

    // And back again.
    let (system, blocks) = chat_messages_to_blocks(&out);
    assert_eq!(system.as_deref(), Some("be brief"));
    assert_eq!(blocks.len(), 3);
    assert_eq!(
        blocks[1].content,
        MessageContent::Blocks(vec![
            ContentBlock::text("Checking."),
            ContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: "get_weather".into(),
                input: json!({"city": "Paris"}),
            }
        ])
    );
}

#[test]
fn stream_request_asks_for_usage() {
    let converted = convert_request(
        json!({"model": "m", "stream": true, "messages": [{"role": "user", "content": "x"}]}),
        &ProxyConfig::default(),
    )
    .unwrap();
    assert!(converted.stream);
    assert_eq!(
        converted.request.stream_options,
        Some(chat::StreamOptions {
            include_usage: true
        })
    );
}
