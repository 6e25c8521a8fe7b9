//! Server-sent-event dialect.

use super::decoder::FrameDecoder;
use super::events::StreamEvent;
use super::snapshot::SnapshotDiff;
use crate::defaults::protocol::SSE_DONE;
use serde_json::Value;

/// One parsed SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseFrame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: String::new(),
            data: data.into(),
        }
    }
}

impl From<eventsource_stream::Event> for SseFrame {
    fn from(event: eventsource_stream::Event) -> Self {
        Self {
            event: event.event,
            data: event.data,
        }
    }
}

/// Where the text lives in a JSON payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsePayload {
    /// Incremental delta at `choices[0].delta.content`.
    ChatDelta,
    /// Incremental delta at `choices[0].text`.
    TextDelta,
    /// Cumulative text at `message.content.parts[0]`. Unparseable payloads are
    /// skipped.
    Snapshot,
}

#[derive(Debug)]
pub struct SseDecoder {
    payload: SsePayload,
    text: String,
    snapshot: SnapshotDiff,
    last_payload: Value,
    finished: bool,
}

impl SseDecoder {
    pub fn new(payload: SsePayload) -> Self {
        Self {
            payload,
            text: String::new(),
            snapshot: SnapshotDiff::new(),
            last_payload: Value::Null,
            finished: false,
        }
    }

    fn done(&mut self) -> StreamEvent {
        self.finished = true;
        StreamEvent::Done {
            final_text: self.text.clone(),
            raw: self.last_payload.take(),
        }
    }

    fn delta(&mut self, payload: &Value) -> Option<String> {
        match self.payload {
            SsePayload::ChatDelta => payload
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
                .map(str::to_string),
            SsePayload::TextDelta => payload
                .pointer("/choices/0/text")
                .and_then(Value::as_str)
                .map(str::to_string),
            SsePayload::Snapshot => payload
                .pointer("/message/content/parts/0")
                .and_then(Value::as_str)
                .and_then(|snapshot| self.snapshot.advance(snapshot)),
        }
    }
}

impl FrameDecoder for SseDecoder {
    type Frame = SseFrame;

    fn decode(&mut self, frame: SseFrame) -> Vec<StreamEvent> {
        if self.finished || frame.event == "ping" {
            return Vec::new();
        }
        let data = frame.data.trim();
        if data.is_empty() {
            return Vec::new();
        }
        if data == SSE_DONE {
            return vec![self.done()];
        }

        let payload: Value = match serde_json::from_str(data) {
            Ok(payload) => payload,
            Err(e) if self.payload == SsePayload::Snapshot => {
                tracing::debug!(error = %e, "skipping unparseable snapshot payload");
                return Vec::new();
            }
            Err(e) => {
                self.finished = true;
                return vec![StreamEvent::Malformed {
                    message: format!("Invalid stream payload: {e}"),
                }];
            }
        };

        if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
            self.finished = true;
            let kind = error
                .get("type")
                .or_else(|| error.get("code"))
                .and_then(Value::as_str)
                .unwrap_or("api_error");
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return vec![StreamEvent::RemoteError {
                kind: kind.to_string(),
                message,
            }];
        }

        let delta = self.delta(&payload);
        self.last_payload = payload;
        match delta.filter(|d| !d.is_empty()) {
            Some(delta) => {
                self.text.push_str(&delta);
                vec![StreamEvent::PartialText { delta }]
            }
            None => Vec::new(),
        }
    }

    /// Some backends never send the sentinel; closing counts as done.
    fn on_close(&mut self) -> Option<StreamEvent> {
        (!self.finished).then(|| self.done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat_chunk(content: &str) -> SseFrame {
        SseFrame::data(json!({"choices": [{"delta": {"content": content}}]}).to_string())
    }

    fn snapshot(id: &str, text: &str) -> SseFrame {
        SseFrame::data(
            json!({"message": {"id": id, "content": {"parts": [text]}}, "conversation_id": "c1"})
                .to_string(),
        )
    }

    #[test]
    fn chat_deltas_accumulate_until_sentinel() {
        let mut decoder = SseDecoder::new(SsePayload::ChatDelta);
        let mut events = Vec::new();
        for part in ["Hi", "! How", " can I help?"] {
            events.extend(decoder.decode(chat_chunk(part)));
        }
        events.extend(decoder.decode(SseFrame::data("[DONE]")));
        events.extend(decoder.decode(chat_chunk("late")));

        assert_eq!(events.len(), 4);
        match &events[3] {
            StreamEvent::Done { final_text, .. } => assert_eq!(final_text, "Hi! How can I help?"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(decoder.on_close().is_none());
    }

    #[test]
    fn snapshots_become_deltas_and_close_is_done() {
        let mut decoder = SseDecoder::new(SsePayload::Snapshot);
        let mut deltas = Vec::new();
        for frame in [
            snapshot("a1", "Hi"),
            SseFrame::data("not json"),
            SseFrame {
                event: "ping".into(),
                data: "{}".into(),
            },
            snapshot("a1", "Hi there"),
            snapshot("a1", "Hi there"),
        ] {
            for event in decoder.decode(frame) {
                if let StreamEvent::PartialText { delta } = event {
                    deltas.push(delta);
                }
            }
        }
        assert_eq!(deltas, ["Hi", " there"]);

        match decoder.on_close() {
            Some(StreamEvent::Done { final_text, raw }) => {
                assert_eq!(final_text, "Hi there");
                assert_eq!(raw["message"]["id"], "a1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_delta_payload_is_terminal() {
        let mut decoder = SseDecoder::new(SsePayload::TextDelta);
        let events = decoder.decode(SseFrame::data("{oops"));
        assert!(matches!(events[0], StreamEvent::Malformed { .. }));
        assert!(decoder.on_close().is_none());
    }

    #[test]
    fn error_payload_is_remote_error() {
        let mut decoder = SseDecoder::new(SsePayload::ChatDelta);
        let events = decoder.decode(SseFrame::data(
            json!({"error": {"type": "server_error", "message": "overloaded"}}).to_string(),
        ));
        assert_eq!(
            events,
            vec![StreamEvent::RemoteError {
                kind: "server_error".into(),
                message: "overloaded".into()
            }]
        );
    }
}
