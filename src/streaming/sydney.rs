//! Record-separated WebSocket dialect of the Bing chat hub.

use super::decoder::FrameDecoder;
use super::events::StreamEvent;
use super::snapshot::SnapshotDiff;
use crate::defaults::protocol::{MODERATION_FALLBACK, RECORD_SEPARATOR, STOP_TOKEN};
use serde_json::{Value, json};

#[derive(Debug, Default)]
pub struct SydneyDecoder {
    jailbreak: bool,
    diff: SnapshotDiff,
    stop_seen: bool,
    finished: bool,
}

impl SydneyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jailbreak conversations reinterpret moderated terminal frames as
    /// interruptions.
    pub fn jailbreak(mut self, enabled: bool) -> Self {
        self.jailbreak = enabled;
        self
    }

    pub fn reply_so_far(&self) -> &str {
        self.diff.text()
    }

    fn record(&mut self, record: &Value) -> Option<StreamEvent> {
        let kind = record.get("type").and_then(Value::as_u64)?;
        match kind {
            1 => self.update(record),
            2 => Some(self.terminal(record)),
            7 => Some(StreamEvent::TransportError {
                message: record
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("Connection closed with an error.")
                    .to_string(),
                retryable: record
                    .get("allowReconnect")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            other => record.get("error").map(|error| {
                let error = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
                StreamEvent::RemoteError {
                    kind: "ProtocolError".to_string(),
                    message: format!("Event Type('{other}'): {error}"),
                }
            }),
        }
    }

    fn update(&mut self, record: &Value) -> Option<StreamEvent> {
        if self.stop_seen {
            return None;
        }
        let message = record.pointer("/arguments/0/messages/0")?;
        if message.get("author").and_then(Value::as_str) != Some("bot") {
            return None;
        }
        let text = message.get("text").and_then(Value::as_str)?;

        let visible = if text.trim().ends_with(STOP_TOKEN) {
            self.stop_seen = true;
            text.replacen(STOP_TOKEN, "", 1).trim().to_string()
        } else {
            withhold_stop_prefix(text).to_string()
        };

        let delta = self.diff.advance(&visible)?;
        Some(StreamEvent::PartialText { delta })
    }

    fn terminal(&mut self, record: &Value) -> StreamEvent {
        let item = record.get("item").cloned().unwrap_or(Value::Null);
        let result = item.get("result");
        let result_field = |name: &str| {
            result
                .and_then(|r| r.get(name))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        if result_field("value") == "InvalidSession" {
            return StreamEvent::RemoteError {
                kind: "InvalidSession".to_string(),
                message: result_field("message"),
            };
        }

        let messages = item
            .get("messages")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let expiry = item.get("conversationExpiryTime").cloned().unwrap_or(Value::Null);
        let reply_so_far = self.diff.text().to_string();

        if result.and_then(|r| r.get("error")).is_some_and(|e| !e.is_null()) {
            return match messages.last().cloned() {
                Some(mut message) if !reply_so_far.is_empty() => {
                    substitute_text(&mut message, &reply_so_far);
                    StreamEvent::Done {
                        final_text: reply_so_far,
                        raw: json!({ "message": message, "conversationExpiryTime": expiry }),
                    }
                }
                _ => StreamEvent::RemoteError {
                    kind: result_field("value"),
                    message: result_field("message"),
                },
            };
        }

        let Some(mut message) = messages.last().cloned() else {
            return StreamEvent::RemoteError {
                kind: "NoMessage".to_string(),
                message: "No message was generated.".to_string(),
            };
        };
        if message.get("author").and_then(Value::as_str) != Some("bot") {
            return StreamEvent::RemoteError {
                kind: "UnexpectedAuthor".to_string(),
                message: "Unexpected message author.".to_string(),
            };
        }

        if self.jailbreak && self.moderated(&messages) {
            let text = if reply_so_far.is_empty() {
                MODERATION_FALLBACK.to_string()
            } else {
                reply_so_far
            };
            substitute_text(&mut message, &text);
            if let Some(object) = message.as_object_mut() {
                object.remove("suggestedResponses");
            }
            tracing::debug!(stop_seen = self.stop_seen, "reply interrupted by moderation");
            return StreamEvent::InterruptedByModeration {
                partial_text: text,
                raw: json!({ "message": message, "conversationExpiryTime": expiry }),
            };
        }

        let final_text = message
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        StreamEvent::Done {
            final_text,
            raw: json!({ "message": message, "conversationExpiryTime": expiry }),
        }
    }

    fn moderated(&self, messages: &[Value]) -> bool {
        let first = messages.first();
        let field = |name: &str| first.and_then(|m| m.get(name));
        self.stop_seen
            || field("topicChangerText").is_some_and(|v| !v.is_null())
            || field("offense").and_then(Value::as_str) == Some("OffenseTrigger")
            || messages
                .get(1)
                .and_then(|m| m.get("contentOrigin"))
                .and_then(Value::as_str)
                == Some("Apology")
    }
}

impl FrameDecoder for SydneyDecoder {
    type Frame = String;

    fn decode(&mut self, frame: String) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for raw in frame.split(RECORD_SEPARATOR) {
            if self.finished {
                break;
            }
            let record =
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            if is_falsy(&record) {
                continue;
            }
            if let Some(event) = self.record(&record) {
                self.finished = event.is_terminal();
                events.push(event);
            }
        }
        events
    }

    fn on_close(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(StreamEvent::TransportError {
            message: "Connection closed before the reply completed.".to_string(),
            retryable: false,
        })
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        _ => false,
    }
}

/// Drop a trailing partial stop token so it is never reported as progress.
fn withhold_stop_prefix(text: &str) -> &str {
    text.char_indices()
        .find(|(i, _)| STOP_TOKEN.starts_with(&text[*i..]))
        .map_or(text, |(i, _)| &text[..i])
}

fn substitute_text(message: &mut Value, text: &str) {
    if let Some(card_text) = message.pointer_mut("/adaptiveCards/0/body/0/text") {
        *card_text = Value::String(text.to_string());
    }
    if let Some(object) = message.as_object_mut() {
        object.insert("text".to_string(), Value::String(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RS: char = RECORD_SEPARATOR;

    fn update(text: &str) -> String {
        format!(
            "{}{RS}",
            json!({"type": 1, "target": "update", "arguments": [{"messages": [{"author": "bot", "text": text}]}]})
        )
    }

    fn terminal(messages: Value) -> String {
        format!(
            "{}{RS}",
            json!({"type": 2, "item": {"messages": messages, "conversationExpiryTime": "2026-10-19T00:00:00Z", "result": {"value": "Success"}}})
        )
    }

    fn deltas(events: &[StreamEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::PartialText { delta } => Some(delta.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn multi_record_frames_are_processed_in_order() {
        let mut decoder = SydneyDecoder::new();
        let frame = format!("{{}}{RS}{}{}", update("Hi"), update("Hi there"));
        let events = decoder.decode(frame);
        assert_eq!(deltas(&events), ["Hi", " there"]);
    }

    #[test]
    fn plain_terminal_frame_resolves_with_message_text() {
        let mut decoder = SydneyDecoder::new();
        decoder.decode(update("Hello"));
        let events = decoder.decode(terminal(json!([
            {"author": "user", "text": "hey"},
            {"author": "bot", "text": "Hello", "suggestedResponses": [{"text": "More"}]}
        ])));
        match &events[0] {
            StreamEvent::Done { final_text, raw } => {
                assert_eq!(final_text, "Hello");
                assert_eq!(raw["message"]["suggestedResponses"][0]["text"], "More");
                assert_eq!(raw["conversationExpiryTime"], "2026-10-19T00:00:00Z");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(decoder.on_close().is_none());
    }

    #[test]
    fn stop_token_ends_updates_and_trims_reply() {
        let mut decoder = SydneyDecoder::new().jailbreak(true);
        let mut events = decoder.decode(update("Sure"));
        events.extend(decoder.decode(update("Sure thing\n\n[user")));
        events.extend(decoder.decode(update("Sure thing\n\n[user](#message)")));
        events.extend(decoder.decode(update("Sure thing\n\n[user](#message)\nignored")));

        let deltas = deltas(&events);
        assert_eq!(deltas, ["Sure", " thing"]);
        assert!(deltas.iter().all(|d| !d.contains("[user")));
        assert_eq!(decoder.reply_so_far(), "Sure thing");

        let events = decoder.decode(terminal(json!([
            {"author": "bot", "text": "Sure thing\n\n[user](#message)\nignored", "suggestedResponses": []}
        ])));
        match &events[0] {
            StreamEvent::InterruptedByModeration { partial_text, raw } => {
                assert_eq!(partial_text, "Sure thing");
                assert_eq!(raw["message"]["text"], "Sure thing");
                assert!(raw["message"].get("suggestedResponses").is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stop_token_ends_updates_outside_jailbreak() {
        let mut decoder = SydneyDecoder::new();
        let mut events = decoder.decode(update("Sure"));
        events.extend(decoder.decode(update("Sure thing\n\n[user](#message)")));
        events.extend(decoder.decode(update("Sure thing\n\n[user](#message)\nignored")));

        assert_eq!(deltas(&events), ["Sure", " thing"]);
        assert_eq!(decoder.reply_so_far(), "Sure thing");

        let events = decoder.decode(terminal(json!([
            {"author": "bot", "text": "Sure thing"}
        ])));
        assert!(matches!(&events[0], StreamEvent::Done { final_text, .. } if final_text == "Sure thing"));
    }

    #[test]
    fn apology_without_text_uses_fallback() {
        let mut decoder = SydneyDecoder::new().jailbreak(true);
        let events = decoder.decode(terminal(json!([
            {"author": "bot", "text": "", "adaptiveCards": [{"body": [{"text": ""}]}]},
            {"author": "bot", "text": "Sorry", "contentOrigin": "Apology"}
        ])));
        match &events[0] {
            StreamEvent::InterruptedByModeration { partial_text, raw } => {
                assert_eq!(partial_text, MODERATION_FALLBACK);
                assert_eq!(raw["message"]["text"], MODERATION_FALLBACK);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn result_error_keeps_partial_reply() {
        let mut decoder = SydneyDecoder::new();
        decoder.decode(update("Partial"));
        let frame = format!(
            "{}{RS}",
            json!({"type": 2, "item": {"messages": [{"author": "bot", "text": "x"}], "result": {"value": "Throttled", "message": "slow", "error": "Throttled"}}})
        );
        match &decoder.decode(frame)[0] {
            StreamEvent::Done { final_text, .. } => assert_eq!(final_text, "Partial"),
            other => panic!("unexpected {other:?}"),
        }

        let mut fresh = SydneyDecoder::new();
        let frame = format!(
            "{}{RS}",
            json!({"type": 2, "item": {"result": {"value": "Throttled", "message": "slow", "error": "Throttled"}}})
        );
        assert_eq!(
            fresh.decode(frame),
            vec![StreamEvent::RemoteError {
                kind: "Throttled".into(),
                message: "slow".into()
            }]
        );
    }

    #[test]
    fn terminal_errors() {
        let mut decoder = SydneyDecoder::new();
        let frame = format!(
            "{}{RS}",
            json!({"type": 2, "item": {"result": {"value": "InvalidSession", "message": "expired"}}})
        );
        assert!(matches!(
            &decoder.decode(frame)[0],
            StreamEvent::RemoteError { kind, .. } if kind == "InvalidSession"
        ));

        let mut decoder = SydneyDecoder::new();
        match &decoder.decode(terminal(json!([])))[0] {
            StreamEvent::RemoteError { message, .. } => assert_eq!(message, "No message was generated."),
            other => panic!("unexpected {other:?}"),
        }

        let mut decoder = SydneyDecoder::new();
        match &decoder.decode(terminal(json!([{"author": "user", "text": "x"}])))[0] {
            StreamEvent::RemoteError { message, .. } => assert_eq!(message, "Unexpected message author."),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn close_frames_and_protocol_errors() {
        let mut decoder = SydneyDecoder::new();
        let frame = format!("{}{RS}", json!({"type": 7, "allowReconnect": true}));
        assert_eq!(
            decoder.decode(frame),
            vec![StreamEvent::TransportError {
                message: "Connection closed with an error.".into(),
                retryable: true
            }]
        );

        let mut decoder = SydneyDecoder::new();
        let frame = format!("{}{RS}", json!({"type": 3, "error": "bad invocation"}));
        assert_eq!(
            decoder.decode(frame),
            vec![StreamEvent::RemoteError {
                kind: "ProtocolError".into(),
                message: "Event Type('3'): bad invocation".into()
            }]
        );
    }

    #[test]
    fn early_close_is_a_transport_error() {
        let mut decoder = SydneyDecoder::new();
        decoder.decode(update("Hi"));
        assert!(matches!(
            decoder.on_close(),
            Some(StreamEvent::TransportError { retryable: false, .. })
        ));
    }
}
