use crate::broker::message::Delivery;
use crate::utils::error::DeliveryError;

/// Push-and-close capability for one live client, implemented by the
/// transport that carries deliveries to it.
///
/// Both methods may be called from any thread, including an upstream
/// consumer's delivery task, and must not block. `deliver` runs while the
/// subscription registry is read-locked, so it must not call back into the
/// broker. `close` is idempotent.
pub trait Subscriber: Send + Sync {
    /// Push one message. An error means the remote end is gone.
    fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError>;

    fn close(&self);
}
