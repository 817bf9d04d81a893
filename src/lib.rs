//! # mqgate
//!
//! `mqgate` is a fan-out gateway in front of a RocketMQ-style message queue.
//! It keeps one upstream publish connection, lazily starts one upstream
//! consumer per `(topic, group)`, and multiplexes each consumer's messages to
//! every client streaming that topic over WebSockets.
//!
//! ## Core Modules
//!
//! - `broker`: producer, consumer registry, subscription registry, broadcast and stats.
//! - `upstream`: the seam to the message queue, plus an in-memory loopback.
//! - `transport`: WebSocket front-end and per-client subscription sessions.
//! - `forward`: optional HTTP callback receiving every consumed message.
//! - `client`: WebSocket client for the gateway protocol.
//! - `config`: layered configuration loading.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod forward;
pub mod transport;
pub mod upstream;
pub mod utils;

#[cfg(test)]
mod tests;
