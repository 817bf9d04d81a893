//! The `transport` module is the gateway front-end: it carries unary sends,
//! health checks and streaming subscriptions between external clients and the
//! broker over WebSockets.
//!
//! It defines the JSON protocol, the per-subscription lifecycle, and the
//! server that ties connections to the broker.

pub mod message;
pub mod session;
pub mod websocket;

pub use message::{ClientMessage, ErrorCode, HealthStatus, ServerMessage};
pub use session::{CloseReason, CloseSignal, SessionState, StreamSubscriber, SubscriptionSession};
pub use websocket::{GatewayServer, GatewayState, start_websocket_server};
