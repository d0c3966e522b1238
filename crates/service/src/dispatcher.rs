//! Background delivery of outbox events to the message bus.

use std::sync::Arc;
use std::time::Duration;

use common::EventId;
use storage::{OutboxRepository, Scope, StorageError, TxManager, run_in_transaction};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{Result, ServiceError};
use crate::producer::{Headers, MessageProducer};

/// Topic order status changes are published to unless configured otherwise.
pub const DEFAULT_TOPIC: &str = "loms.order-events";

/// Header carrying the trace id of a published message.
pub const TRACE_ID_HEADER: &str = "trace-id";

/// Configuration for the status event dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Destination topic.
    pub topic: String,
    /// How long to wait when the outbox is empty or publishing failed.
    pub idle_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            idle_interval: Duration::from_secs(1),
        }
    }
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// An event was published and marked as sent.
    Sent(EventId),
    /// Nothing was pending.
    Idle,
}

/// Drains the outbox into the message bus.
///
/// Each event is fetched, published and marked as sent inside one
/// transaction. A crash after publishing but before commit leaves the event
/// pending, so it is published again later: delivery is at-least-once.
pub struct StatusEventDispatcher<M: TxManager> {
    tx_manager: Arc<M>,
    outbox: Arc<dyn OutboxRepository<M::Tx>>,
    producer: Arc<dyn MessageProducer>,
    config: DispatcherConfig,
}

impl<M: TxManager + 'static> StatusEventDispatcher<M> {
    /// Creates a new dispatcher.
    pub fn new(
        tx_manager: Arc<M>,
        outbox: Arc<dyn OutboxRepository<M::Tx>>,
        producer: Arc<dyn MessageProducer>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            tx_manager,
            outbox,
            producer,
            config,
        }
    }

    /// Publishes the oldest pending event, if there is one.
    ///
    /// A fresh trace id is generated for the attempt. It is sent in the
    /// `trace-id` header and recorded on the dispatch span, so the logs of
    /// the attempt and the published message can be matched.
    pub async fn dispatch_next(&self) -> Result<Dispatched> {
        let trace_id = Uuid::new_v4().to_string();
        self.dispatch_with_trace_id(&trace_id).await
    }

    /// Publishes the oldest pending event under the caller's trace id.
    pub async fn dispatch_with_trace_id(&self, trace_id: &str) -> Result<Dispatched> {
        let span = tracing::info_span!("dispatch_status_event", trace_id);
        self.dispatch(trace_id.to_string()).instrument(span).await
    }

    async fn dispatch(&self, trace_id: String) -> Result<Dispatched> {
        let outbox = Arc::clone(&self.outbox);
        let producer = Arc::clone(&self.producer);
        let topic = self.config.topic.clone();

        run_in_transaction(&*self.tx_manager, Scope::Auto, move |tx| {
            Box::pin(async move {
                let event = match outbox
                    .fetch_next_order_status_changed_event(Scope::Within(&mut *tx))
                    .await
                {
                    Ok(event) => event,
                    Err(StorageError::NoElements) => return Ok(Dispatched::Idle),
                    Err(e) => return Err(ServiceError::from(e)),
                };

                let payload = serde_json::to_vec(&event)?;
                let headers = Headers::from([(TRACE_ID_HEADER.to_string(), trace_id)]);

                let (partition, offset) = producer
                    .send_message(&topic, &event.message_key(), &payload, &headers)
                    .await?;

                outbox
                    .mark_order_status_changed_event_as_sent(Scope::Within(tx), &event)
                    .await?;

                tracing::debug!(
                    event_id = %event.id,
                    order_id = %event.order_id,
                    status = %event.status,
                    partition,
                    offset,
                    "status event published"
                );
                Ok(Dispatched::Sent(event.id))
            })
        })
        .await
    }

    /// Dispatches until `shutdown` is cancelled.
    ///
    /// Pending events are drained back to back; after an empty outbox or a
    /// failed attempt the loop waits one idle interval.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            topic = %self.config.topic,
            idle_interval_ms = self.config.idle_interval.as_millis() as u64,
            "status event dispatcher started"
        );

        while !shutdown.is_cancelled() {
            match self.dispatch_next().await {
                Ok(Dispatched::Sent(_)) => {
                    metrics::counter!("loms_outbox_events_sent_total").increment(1);
                    continue;
                }
                Ok(Dispatched::Idle) => {}
                Err(e) => {
                    metrics::counter!("loms_outbox_publish_failures_total").increment(1);
                    tracing::error!(error = %e, "status event dispatch failed (will retry)");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.idle_interval) => {}
            }
        }

        tracing::info!("status event dispatcher stopped");
    }

    /// Starts the dispatcher on the runtime.
    pub fn spawn(self) -> DispatcherHandle {
        let token = CancellationToken::new();
        let join = tokio::spawn(self.run(token.clone()));
        DispatcherHandle { token, join }
    }
}

/// Handle of a running dispatcher.
pub struct DispatcherHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Stops the dispatcher and waits for the current iteration to finish.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "status event dispatcher task failed");
        }
    }
}
