//! Broker handles that accept a serialized envelope under a topic string.

mod mock;
mod mqtt;

pub use mock::Mock;
pub use mqtt::{Mqtt, MqttConfig};

use crate::error::PublishError;
use async_trait::async_trait;

/// Capability set shared by every publisher variant.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Sends `payload` under `topic`, returning `true` iff the broker acknowledged
    /// publication. A `false` return means the retry budget was exhausted, not that
    /// the call failed outright - callers treat both as "no publish this cycle".
    async fn send(&self, payload: &[u8], topic: &str) -> Result<bool, PublishError>;
}
