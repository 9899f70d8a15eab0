use bytes::Bytes;
use futures_util::{stream, StreamExt};
use messages2chat::messages::{BlockDelta, ContentBlock, StreamEvent};
use messages2chat::streaming::{encode_event, relay_events, StreamState, StreamTranslator};

fn sse(frames: &[&str]) -> String {
    frames.iter().map(|f| format!("data: {f}\r\n\r\n")).collect()
}

fn unicode_stream() -> String {
    sse(&[
        r#"{"id":"chatcmpl-u","choices":[{"delta":{"content":"héllo "}}]}"#,
        r#"{"choices":[{"delta":{"content":"wörld 🌍"}}]}"#,
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"a","arguments":"{\"s\":\"日本\"}"}}]}}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        "[DONE]",
    ])
}

/// Drive a translator over the given byte slices and collect every event.
fn run(chunks: &[&[u8]]) -> Vec<StreamEvent> {
    let mut t = StreamTranslator::new("m");
    let mut events = Vec::new();
    for c in chunks {
        events.extend(t.push(c));
    }
    events.extend(t.finish());
    events
}

/// Message ids are random only when upstream omits them; this input always has one.
#[test]
fn byte_level_splits_are_equivalent() {
    let body = unicode_stream();
    let bytes = body.as_bytes();
    let whole = run(&[bytes]);
    assert_eq!(whole.last().map(StreamEvent::name), Some("message_stop"));

    // Every split point, including ones inside multi-byte characters.
    for split in 1..bytes.len() {
        let (a, b) = bytes.split_at(split);
        assert_eq!(run(&[a, b]), whole, "split at byte {split}");
    }

    // One byte at a time.
    let singles: Vec<&[u8]> = bytes.chunks(1).collect();
    assert_eq!(run(&singles), whole);

    let text: String = whole
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ContentBlockDelta {
                delta: BlockDelta::TextDelta { text },
                ..
            } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "héllo wörld 🌍");
}

#[test]
fn block_ordering_with_text_and_two_tools() {
    let body = sse(&[
        r#"{"choices":[{"delta":{"content":"Let me check."}}]}"#,
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_0","function":{"name":"first","arguments":""}}]}}]}"#,
        r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_1","function":{"name":"second","arguments":"{}"}}]}}]}"#,
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"a\":1}"}}]}}]}"#,
        "[DONE]",
    ]);
    let events = run(&[body.as_bytes()]);

    let mut started = Vec::new();
    let mut stopped = Vec::new();
    for (pos, e) in events.iter().enumerate() {
        match e {
            StreamEvent::ContentBlockStart { index, .. } => started.push((*index, pos)),
            StreamEvent::ContentBlockStop { index } => stopped.push((*index, pos)),
            StreamEvent::ContentBlockDelta { index, .. } => {
                let start = started.iter().find(|(i, _)| i == index).map(|(_, p)| *p);
                let stop = stopped.iter().find(|(i, _)| i == index);
                assert!(start.is_some_and(|s| s < pos), "delta before start for {index}");
                assert!(stop.is_none(), "delta after stop for {index}");
            }
            _ => {}
        }
    }
    let start_indices: Vec<usize> = started.iter().map(|(i, _)| *i).collect();
    let stop_indices: Vec<usize> = stopped.iter().map(|(i, _)| *i).collect();
    assert_eq!(start_indices, vec![0, 1, 2]);
    assert_eq!(stop_indices, vec![0, 1, 2]);

    let message_delta = events
        .iter()
        .position(|e| e.name() == "message_delta")
        .unwrap();
    assert!(stopped.iter().all(|(_, pos)| *pos < message_delta));

    assert!(matches!(
        &events[2],
        StreamEvent::ContentBlockStart { index: 0, content_block: ContentBlock::Text { .. } }
    ));
}

#[test]
fn missing_tool_call_id_is_generated() {
    let body = sse(&[
        r#"{"choices":[{"delta":{"tool_calls":[{"index":3,"function":{"name":"f","arguments":"{}"}}]}}]}"#,
        "[DONE]",
    ]);
    let events = run(&[body.as_bytes()]);
    let id = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::ContentBlockStart {
                content_block: ContentBlock::ToolUse { id, .. },
                ..
            } => Some(id.clone()),
            _ => None,
        })
        .unwrap();
    assert!(id.starts_with("toolu_"));
}

#[tokio::test]
async fn relay_encodes_frames_and_stops_after_close() {
    let body = sse(&[r#"{"choices":[{"delta":{"content":"x"}}]}"#, "[DONE]"]);
    let mut chunks: Vec<Result<Bytes, std::io::Error>> = body
        .as_bytes()
        .chunks(5)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    // Anything after the sentinel is never read.
    chunks.push(Err(std::io::Error::other("must not be polled")));

    let frames: Vec<Bytes> = relay_events(stream::iter(chunks), StreamTranslator::new("m"))
        .map(|f| match f {
            Ok(b) => b,
            Err(never) => match never {},
        })
        .collect()
        .await;
    let text: String = frames
        .iter()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .collect();
    assert!(text.starts_with("event: message_start\ndata: {"));
    assert!(text.ends_with("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n"));
    assert!(!text.contains("event: error"));
}

#[tokio::test]
async fn transport_error_becomes_error_event() {
    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::from(sse(&[r#"{"choices":[{"delta":{"content":"x"}}]}"#]))),
        Err(std::io::Error::other("connection reset")),
    ];
    let frames: Vec<_> = relay_events(stream::iter(chunks), StreamTranslator::new("m"))
        .collect()
        .await;
    let last = frames.last().unwrap().as_ref().unwrap();
    let last = String::from_utf8_lossy(last);
    assert!(last.starts_with("event: error\n"));
    assert!(last.contains("connection reset"));
}

#[test]
fn translator_state_progression() {
    let mut t = StreamTranslator::new("m");
    assert_eq!(t.state(), StreamState::AwaitingFirstEvent);
    t.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n");
    assert_eq!(t.state(), StreamState::Streaming);
    t.push(b"data: [DONE]\n");
    assert_eq!(t.state(), StreamState::Closed);
}

#[test]
fn encoded_frames_carry_event_name() {
    let ev = StreamEvent::ContentBlockStop { index: 4 };
    assert_eq!(
        encode_event(&ev),
        Bytes::from_static(b"event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":4}\n\n")
    );
}
