//! Wire transports.
//!
//! Backends only see the [`HttpTransport`] and [`WebSocketConnector`] traits,
//! so tests can swap in scripted implementations.

mod http;
mod websocket;

pub use http::{HttpTransport, ReqwestTransport, TransportRequest, build_http_client};
pub use websocket::{TungsteniteConnector, WebSocketConnector, WsConnection, WsPeer};
pub(crate) use websocket::AbortOnDrop;
