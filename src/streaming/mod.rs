//! Streaming reply protocol.
//!
//! Transport frames pass through a backend-specific [`FrameDecoder`] that
//! emits [`StreamEvent`]s; a [`ResponseAggregator`] folds those into exactly one
//! terminal outcome per turn.

mod aggregator;
mod decoder;
mod events;
mod snapshot;
mod sse;
mod sydney;

pub use aggregator::{AggregatorState, Resolution, ResponseAggregator, Transition};
pub use decoder::{FrameDecoder, FrameStream, decode_frames};
pub use events::{EventStream, ReplyEvent, ReplyStream, ReplyStreamHandle, StreamEvent};
pub use snapshot::SnapshotDiff;
pub use sse::{SseDecoder, SseFrame, SsePayload};
pub use sydney::SydneyDecoder;
