//! Message bus producer trait, a logging producer and an in-memory one.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;

/// Message headers, e.g. `trace-id`.
pub type Headers = HashMap<String, String>;

/// Errors reported by a message producer.
#[derive(Debug, Clone, Error)]
pub enum ProducerError {
    /// The broker could not be reached or refused the write.
    #[error("Message bus unavailable: {0}")]
    Unavailable(String),
}

/// Publishes keyed messages to a partitioned topic.
#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// Sends one message and returns the partition and offset it was written to.
    ///
    /// Messages with the same key always land on the same partition.
    async fn send_message(
        &self,
        topic: &str,
        key: &[u8],
        payload: &[u8],
        headers: &Headers,
    ) -> Result<(i32, i64), ProducerError>;
}

/// A message accepted by [`InMemoryProducer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
    pub headers: Headers,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Default)]
struct InMemoryProducerState {
    messages: Vec<PublishedMessage>,
    next_offsets: HashMap<(String, i32), i64>,
    fail_on_send: bool,
}

/// In-memory producer for tests and for running without a broker.
#[derive(Debug, Clone)]
pub struct InMemoryProducer {
    partitions: i32,
    state: Arc<Mutex<InMemoryProducerState>>,
}

impl Default for InMemoryProducer {
    fn default() -> Self {
        Self::new(3)
    }
}

impl InMemoryProducer {
    /// Creates a producer for topics with `partitions` partitions.
    pub fn new(partitions: i32) -> Self {
        Self {
            partitions: partitions.max(1),
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, InMemoryProducerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configures the producer to fail every send until reset.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.state().fail_on_send = fail;
    }

    /// Returns all messages accepted so far, in send order.
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.state().messages.clone()
    }

    /// Returns the number of messages accepted so far.
    pub fn message_count(&self) -> usize {
        self.state().messages.len()
    }

}

/// Partition a key is written to.
fn partition_for(key: &[u8], partitions: i32) -> i32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as i32
}

/// Hands out the next offset of a partition.
fn next_offset(offsets: &mut HashMap<(String, i32), i64>, topic: &str, partition: i32) -> i64 {
    let next = offsets.entry((topic.to_string(), partition)).or_insert(0);
    let offset = *next;
    *next += 1;
    offset
}

#[async_trait]
impl MessageProducer for InMemoryProducer {
    async fn send_message(
        &self,
        topic: &str,
        key: &[u8],
        payload: &[u8],
        headers: &Headers,
    ) -> Result<(i32, i64), ProducerError> {
        let partition = partition_for(key, self.partitions);
        let mut state = self.state();

        if state.fail_on_send {
            return Err(ProducerError::Unavailable(format!(
                "topic {topic} rejected the write"
            )));
        }

        let offset = next_offset(&mut state.next_offsets, topic, partition);

        state.messages.push(PublishedMessage {
            topic: topic.to_string(),
            key: key.to_vec(),
            payload: payload.to_vec(),
            headers: headers.clone(),
            partition,
            offset,
        });

        Ok((partition, offset))
    }
}

/// Producer that writes every message to the log and keeps nothing.
///
/// Used by the server when no broker is configured. Only the per-partition
/// offset counters are retained.
#[derive(Debug, Clone)]
pub struct LogProducer {
    partitions: i32,
    next_offsets: Arc<Mutex<HashMap<(String, i32), i64>>>,
}

impl Default for LogProducer {
    fn default() -> Self {
        Self::new(3)
    }
}

impl LogProducer {
    /// Creates a producer for topics with `partitions` partitions.
    pub fn new(partitions: i32) -> Self {
        Self {
            partitions: partitions.max(1),
            next_offsets: Arc::default(),
        }
    }
}

#[async_trait]
impl MessageProducer for LogProducer {
    async fn send_message(
        &self,
        topic: &str,
        key: &[u8],
        payload: &[u8],
        headers: &Headers,
    ) -> Result<(i32, i64), ProducerError> {
        let partition = partition_for(key, self.partitions);
        let offset = {
            let mut offsets = self.next_offsets.lock().unwrap_or_else(PoisonError::into_inner);
            next_offset(&mut offsets, topic, partition)
        };

        tracing::info!(
            topic,
            partition,
            offset,
            key = %String::from_utf8_lossy(key),
            trace_id = headers.get(crate::dispatcher::TRACE_ID_HEADER).map(String::as_str),
            payload = %String::from_utf8_lossy(payload),
            "message published"
        );
        Ok((partition, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_same_partition_with_growing_offsets() {
        let producer = InMemoryProducer::new(4);
        let headers = Headers::new();

        let (p1, o1) = producer
            .send_message("orders", b"42", b"a", &headers)
            .await
            .unwrap();
        let (p2, o2) = producer
            .send_message("orders", b"42", b"b", &headers)
            .await
            .unwrap();

        assert_eq!(p1, p2);
        assert!((0..4).contains(&p1));
        assert_eq!((o1, o2), (0, 1));
        assert_eq!(producer.message_count(), 2);
    }

    #[tokio::test]
    async fn offsets_are_per_topic() {
        let producer = InMemoryProducer::new(1);
        let headers = Headers::new();

        producer
            .send_message("a", b"1", b"x", &headers)
            .await
            .unwrap();
        let (_, offset) = producer
            .send_message("b", b"1", b"x", &headers)
            .await
            .unwrap();

        assert_eq!(offset, 0);
    }

    #[tokio::test]
    async fn failing_producer_records_nothing() {
        let producer = InMemoryProducer::default();
        producer.set_fail_on_send(true);

        let result = producer
            .send_message("orders", b"1", b"x", &Headers::new())
            .await;

        assert!(matches!(result, Err(ProducerError::Unavailable(_))));
        assert_eq!(producer.message_count(), 0);

        producer.set_fail_on_send(false);
        assert!(
            producer
                .send_message("orders", b"1", b"x", &Headers::new())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn log_producer_partitions_like_the_bus() {
        let producer = LogProducer::new(4);
        let reference = InMemoryProducer::new(4);
        let headers = Headers::from([("trace-id".to_string(), "abc".to_string())]);

        for key in [b"1".as_slice(), b"2", b"1", b"77"] {
            let logged = producer
                .send_message("orders", key, b"{}", &headers)
                .await
                .unwrap();
            let recorded = reference
                .send_message("orders", key, b"{}", &headers)
                .await
                .unwrap();
            assert_eq!(logged, recorded);
        }
    }

    #[tokio::test]
    async fn log_producer_retains_only_offsets() {
        let producer = LogProducer::new(1);
        let headers = Headers::new();

        for expected in 0..100 {
            let (_, offset) = producer
                .send_message("orders", b"9", &[0u8; 1024], &headers)
                .await
                .unwrap();
            assert_eq!(offset, expected);
        }
        producer
            .send_message("other", b"9", b"x", &headers)
            .await
            .unwrap();

        let offsets = producer.next_offsets.lock().unwrap();
        assert_eq!(offsets.len(), 2);
        assert_eq!(offsets[&("orders".to_string(), 0)], 100);
    }
}
