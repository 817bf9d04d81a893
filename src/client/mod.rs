//! The `client` module is a small WebSocket client for the gateway protocol.
//!
//! It backs the binary's `client` subcommand and the end-to-end tests.

pub mod gateway_client;
pub use gateway_client::GatewayClient;
