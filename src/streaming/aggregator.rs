//! One-turn reply state machine.

use super::events::StreamEvent;
use crate::defaults::protocol::MODERATION_FALLBACK;
use crate::error::LlmError;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    Idle,
    Streaming,
    Resolved,
    Rejected,
}

impl AggregatorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Rejected)
    }
}

/// Successful outcome of a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub text: String,
    pub raw: Value,
    pub interrupted: bool,
}

/// Effect of feeding one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Text to report as progress.
    Progress(String),
    Resolved(Resolution),
    Rejected(LlmError),
    /// Nothing observable changed.
    Ignored,
}

/// Accumulates the reply and resolves at most once.
#[derive(Debug)]
pub struct ResponseAggregator {
    state: AggregatorState,
    reply: String,
}

impl Default for ResponseAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self {
            state: AggregatorState::Idle,
            reply: String::new(),
        }
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    pub fn reply_so_far(&self) -> &str {
        &self.reply
    }

    /// Mark the stream as open. Feeding an event does this implicitly.
    pub fn start(&mut self) {
        if self.state == AggregatorState::Idle {
            self.state = AggregatorState::Streaming;
        }
    }

    pub fn apply(&mut self, event: StreamEvent) -> Transition {
        self.start();
        if self.state.is_terminal() {
            return Transition::Ignored;
        }
        match event {
            StreamEvent::PartialText { delta } if delta.is_empty() => Transition::Ignored,
            StreamEvent::PartialText { delta } => {
                self.reply.push_str(&delta);
                Transition::Progress(delta)
            }
            StreamEvent::Done { final_text, raw } => self.resolve(Resolution {
                text: final_text,
                raw,
                interrupted: false,
            }),
            StreamEvent::InterruptedByModeration { partial_text, raw } => {
                let text = if partial_text.is_empty() {
                    MODERATION_FALLBACK.to_string()
                } else {
                    partial_text
                };
                self.resolve(Resolution {
                    text,
                    raw,
                    interrupted: true,
                })
            }
            StreamEvent::TransportError { message, retryable } => {
                self.reject(LlmError::transport(message, retryable))
            }
            StreamEvent::RemoteError { kind, message } => {
                self.reject(LlmError::remote(kind, message))
            }
            StreamEvent::Malformed { message } => self.reject(LlmError::ParseError(message)),
        }
    }

    /// Reject with an error raised outside the event stream, such as a
    /// timeout. No-op once terminal.
    pub fn fail(&mut self, error: LlmError) -> Transition {
        if self.state.is_terminal() {
            return Transition::Ignored;
        }
        self.reject(error)
    }

    /// Idempotent external cancellation.
    pub fn cancel(&mut self) -> Transition {
        self.fail(LlmError::Cancelled("Request was cancelled.".to_string()))
    }

    fn resolve(&mut self, resolution: Resolution) -> Transition {
        self.state = AggregatorState::Resolved;
        Transition::Resolved(resolution)
    }

    fn reject(&mut self, error: LlmError) -> Transition {
        self.state = AggregatorState::Rejected;
        Transition::Rejected(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(delta: &str) -> StreamEvent {
        StreamEvent::PartialText {
            delta: delta.to_string(),
        }
    }

    #[test]
    fn resolves_once_with_final_text() {
        let mut agg = ResponseAggregator::new();
        assert_eq!(agg.state(), AggregatorState::Idle);
        assert_eq!(agg.apply(partial("Hi")), Transition::Progress("Hi".into()));
        assert_eq!(agg.state(), AggregatorState::Streaming);
        assert_eq!(agg.apply(partial("")), Transition::Ignored);
        assert_eq!(agg.reply_so_far(), "Hi");

        let done = agg.apply(StreamEvent::Done {
            final_text: "Hi".into(),
            raw: Value::Null,
        });
        assert!(matches!(done, Transition::Resolved(ref r) if r.text == "Hi" && !r.interrupted));
        assert_eq!(agg.apply(partial("more")), Transition::Ignored);
        assert_eq!(agg.cancel(), Transition::Ignored);
        assert_eq!(agg.state(), AggregatorState::Resolved);
    }

    #[test]
    fn moderation_resolves_with_fallback() {
        let mut agg = ResponseAggregator::new();
        match agg.apply(StreamEvent::InterruptedByModeration {
            partial_text: String::new(),
            raw: Value::Null,
        }) {
            Transition::Resolved(r) => {
                assert_eq!(r.text, MODERATION_FALLBACK);
                assert!(r.interrupted);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancellation_is_distinct_and_idempotent() {
        let mut agg = ResponseAggregator::new();
        agg.apply(partial("Hi"));
        match agg.cancel() {
            Transition::Rejected(e) => assert!(e.is_cancellation()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(agg.cancel(), Transition::Ignored);
        assert_eq!(agg.state(), AggregatorState::Rejected);
    }

    #[test]
    fn stream_errors_reject() {
        let mut agg = ResponseAggregator::new();
        match agg.apply(StreamEvent::TransportError {
            message: "closed".into(),
            retryable: true,
        }) {
            Transition::Rejected(e) => assert!(e.is_retryable()),
            other => panic!("unexpected {other:?}"),
        }

        let mut agg = ResponseAggregator::new();
        assert!(matches!(
            agg.apply(StreamEvent::Malformed { message: "x".into() }),
            Transition::Rejected(LlmError::ParseError(_))
        ));
    }
}
