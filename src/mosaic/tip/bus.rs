use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::mosaic::tip::error::TipError;

/// A named pub/sub bus subject, the decoupling point between TIP's
/// downloader producers and its decode-and-insert consumers.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TipError>;
    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, Bytes>, TipError>;
}

/// Production bus, backed by NATS. Publishes are flushed before returning
/// so a completed `publish` call is actually visible to subscribers —
/// matching the "durable or at-least-once" requirement for the subscribe-
/// before-first-producer ordering this pipeline depends on.
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    pub async fn connect(url: &str) -> Result<Self, TipError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|_| TipError::BusUnavailable)?;
        Ok(NatsBus { client })
    }

    pub fn from_client(client: async_nats::Client) -> Self {
        NatsBus { client }
    }
}

#[async_trait]
impl Bus for NatsBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TipError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|_| TipError::BusUnavailable)?;
        self.client.flush().await.map_err(|_| TipError::BusUnavailable)
    }

    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, Bytes>, TipError> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|_| TipError::BusUnavailable)?;
        Ok(subscriber.map(|msg| msg.payload).boxed())
    }
}

/// Test-only in-process bus. Good enough to exercise the "subscribe before
/// the first producer starts" ordering requirement without a live broker.
#[derive(Default)]
pub struct InMemoryBus {
    subjects: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, subject: &str) -> broadcast::Sender<Bytes> {
        let mut subjects = self.subjects.lock().unwrap();
        subjects
            .entry(subject.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone()
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TipError> {
        // No active subscribers is not an error: a message published before
        // any subscriber exists is simply dropped, mirroring a best-effort
        // bus. Callers are required to subscribe before publishing.
        if self.sender(subject).send(payload).is_err() {
            warn!(subject, "published with no active subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, Bytes>, TipError> {
        let receiver = self.sender(subject).subscribe();
        Ok(BroadcastStream::new(receiver)
            .filter_map(|item| async move { item.ok() })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_installed_before_publish_receives_message() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("downloads").await.unwrap();
        bus.publish("downloads", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let received = stream.next().await.unwrap();
        assert_eq!(received, Bytes::from_static(b"hello"));
    }
}
