pub mod consumer;
pub mod engine;
pub mod message;
pub mod registry;
pub mod stats;
pub mod subscriber;

pub use engine::Broker;
pub use message::Delivery;
pub use registry::{ClientId, Registration};
pub use stats::StatsSnapshot;
pub use subscriber::Subscriber;
