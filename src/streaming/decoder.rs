use super::events::{EventStream, StreamEvent};
use crate::error::LlmError;
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// Raw transport frames of one turn.
pub type FrameStream<F> = Pin<Box<dyn Stream<Item = Result<F, LlmError>> + Send>>;

/// Backend-specific frame parser.
///
/// A decoder owns all per-turn parse state (accumulated snapshot, stop-token
/// flag) and is never shared.
pub trait FrameDecoder: Send {
    type Frame: Send;

    /// Zero or more events for one frame.
    fn decode(&mut self, frame: Self::Frame) -> Vec<StreamEvent>;

    /// Event to emit when the transport closes, if any.
    fn on_close(&mut self) -> Option<StreamEvent> {
        None
    }
}

/// Run `frames` through `decoder`.
///
/// A transport error becomes a terminal event and ends the stream.
pub fn decode_frames<D>(frames: FrameStream<D::Frame>, decoder: D) -> EventStream
where
    D: FrameDecoder + 'static,
{
    let mut frames = frames;
    let mut decoder = decoder;
    let events = async_stream::stream! {
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(frame) => {
                    for event in decoder.decode(frame) {
                        yield event;
                    }
                }
                Err(error) => {
                    tracing::debug!(%error, "transport failed mid-stream");
                    yield StreamEvent::from(error);
                    return;
                }
            }
        }
        if let Some(event) = decoder.on_close() {
            yield event;
        }
    };
    Box::pin(events)
}
