//! Topic connector contract and an in-memory topic

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use omrs_core::wire::{decode_envelope, encode_envelope};
use omrs_core::{OmrsError, Result, WireEnvelope};
use std::pin::Pin;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info};

/// Stream of encoded envelopes delivered by a topic.
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Carries cohort envelopes between members.
///
/// A real deployment plugs a message broker in here; the cohort only needs
/// to publish envelopes and read back the encoded stream.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CohortTopic: Send + Sync {
    /// Send an envelope to every member of the cohort
    async fn publish(&self, envelope: WireEnvelope) -> Result<()>;

    /// Stream of encoded envelopes sent after the call
    async fn subscribe(&self) -> Result<EnvelopeStream>;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// Topic backed by a broadcast channel. Envelopes are encoded on publish so
/// subscribers see the same bytes a broker would deliver.
pub struct InMemoryTopic {
    name: String,
    tx: broadcast::Sender<Bytes>,
}

impl InMemoryTopic {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            name: name.into(),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Put raw bytes on the topic, bypassing envelope encoding.
    pub fn publish_raw(&self, bytes: Bytes) -> Result<()> {
        self.tx
            .send(bytes)
            .map(|_| ())
            .map_err(|_| OmrsError::TransportError(format!("no subscribers on {}", self.name)))
    }

    /// Get the number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl CohortTopic for InMemoryTopic {
    async fn publish(&self, envelope: WireEnvelope) -> Result<()> {
        let bytes = encode_envelope(&envelope)?;
        debug!(topic = %self.name, size = bytes.len(), "Publishing envelope");
        // nobody listening is not a failure for a broadcast topic
        if self.tx.send(bytes).is_err() {
            debug!(topic = %self.name, "Envelope published with no subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<EnvelopeStream> {
        let rx = self.tx.subscribe();
        let stream = BroadcastStream::new(rx);
        let stream = StreamExt::filter_map(stream, |result| async move {
            match result {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    error!("Topic stream error: {}", e);
                    None
                }
            }
        });
        Ok(StreamExt::boxed(stream))
    }

    async fn start(&self) -> Result<()> {
        info!(topic = %self.name, "In-memory topic started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        info!(topic = %self.name, "In-memory topic stopped");
        Ok(())
    }
}

/// Decode an item read from a topic stream.
pub fn read_envelope(bytes: &Bytes) -> Result<WireEnvelope> {
    decode_envelope(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use omrs_core::{EntityDetail, InstanceEvent, InstanceEventKind, InstanceType, Originator};

    fn envelope(guid: &str) -> WireEnvelope {
        let entity = EntityDetail::new(guid, InstanceType::new("t-asset", "Asset", 1), "mc-A");
        let event =
            InstanceEvent::outbound(Originator::new("mc-A"), InstanceEventKind::NewEntity { entity })
                .unwrap();
        WireEnvelope::from_instance_event(&event)
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let topic = InMemoryTopic::new("cohort.events", 16);
        let mut stream = topic.subscribe().await.unwrap();
        assert_eq!(topic.subscriber_count(), 1);

        let sent = envelope("e1");
        topic.publish(sent.clone()).await.unwrap();

        let bytes = stream.next().await.unwrap();
        assert_eq!(read_envelope(&bytes).unwrap(), sent);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let topic = InMemoryTopic::new("cohort.events", 4);
        assert!(topic.publish(envelope("e1")).await.is_ok());
        assert!(topic.publish_raw(Bytes::from_static(b"{}")).is_err());
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_envelope() {
        let topic = InMemoryTopic::new("cohort.events", 16);
        let mut first = topic.subscribe().await.unwrap();
        let mut second = topic.subscribe().await.unwrap();

        topic.publish_raw(Bytes::from_static(b"one")).unwrap();
        topic.publish_raw(Bytes::from_static(b"two")).unwrap();

        for stream in [&mut first, &mut second] {
            assert_eq!(stream.next().await.unwrap(), Bytes::from_static(b"one"));
            assert_eq!(stream.next().await.unwrap(), Bytes::from_static(b"two"));
        }
    }
}
