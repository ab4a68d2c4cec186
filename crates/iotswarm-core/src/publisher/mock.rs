use super::Publisher;
use crate::error::PublishError;
use async_trait::async_trait;

/// Logs the payload and always reports success. Used in tests and dry-run swarms.
#[derive(Debug, Default, Clone)]
pub struct Mock;

impl Mock {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Publisher for Mock {
    async fn send(&self, payload: &[u8], topic: &str) -> Result<bool, PublishError> {
        tracing::debug!(topic, bytes = payload.len(), "mock publish");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_succeeds() {
        let mock = Mock::new();
        assert!(mock.send(b"{}", "devices/ALIC1").await.unwrap());
    }
}
