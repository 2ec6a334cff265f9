//! Per-message ingest state machine: receive → normalize → persist →
//! acknowledge/reject.
//!
//! Normalization has no error path, so every received message reaches the
//! persistence attempt. A persist failure is contained to the one message:
//! the error and the full record are reported for operator forensics and
//! the message is rejected with the configured requeue flag. Nothing here
//! escalates to process termination.

use std::sync::Arc;

use tracing::error;

use crate::message::InboundMessage;
use crate::record::build_record;
use crate::store::DocumentSink;

/// Outcome signal sent back to the broker for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Reject { requeue: bool },
}

/// Static per-pipeline behavior; fixed at startup, never per-message.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Convert encodings and parse JSON content before persisting.
    pub translate_content: bool,
    /// Requeue messages whose persistence failed.
    pub requeue_errors: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            translate_content: true,
            requeue_errors: false,
        }
    }
}

/// Processes messages from one subscribed queue. Instances share the sink
/// across queues; no cross-message state is held.
pub struct IngestPipeline {
    queue: String,
    sink: Arc<dyn DocumentSink>,
    options: PipelineOptions,
}

impl IngestPipeline {
    pub fn new(
        queue: impl Into<String>,
        sink: Arc<dyn DocumentSink>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            queue: queue.into(),
            sink,
            options,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Runs one message through the state machine and returns the
    /// acknowledgment decision for the broker.
    pub async fn process(&self, message: InboundMessage) -> AckDecision {
        let record = build_record(message, &self.queue, self.options.translate_content);
        match self.sink.insert(&record).await {
            Ok(()) => AckDecision::Ack,
            Err(err) => {
                let serialized = serde_json::to_string(&record)
                    .unwrap_or_else(|ser_err| format!("<unserializable record: {ser_err}>"));
                error!(
                    queue = %self.queue,
                    error = %err,
                    record = %serialized,
                    "failed to persist message"
                );
                AckDecision::Reject {
                    requeue: self.options.requeue_errors,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DeliveryFields, MessageProperties};
    use crate::store::MemorySink;

    fn message(content: &[u8]) -> InboundMessage {
        InboundMessage {
            fields: DeliveryFields {
                delivery_tag: 9,
                exchange: "events".into(),
                routing_key: "orders.created".into(),
                redelivered: false,
                consumer_tag: "ctag-pipeline".into(),
            },
            properties: MessageProperties {
                content_type: Some("application/json".into()),
                ..Default::default()
            },
            content: content.to_vec(),
        }
    }

    #[tokio::test]
    async fn persist_success_acks() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = IngestPipeline::new("orders", sink.clone(), PipelineOptions::default());

        let decision = pipeline.process(message(b"{\"id\": 42}")).await;
        assert_eq!(decision, AckDecision::Ack);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].queue, "orders");
        assert!(records[0].error.is_none());
    }

    #[tokio::test]
    async fn persist_failure_rejects_with_configured_requeue() {
        for requeue in [false, true] {
            let sink = Arc::new(MemorySink::new());
            sink.fail_inserts(true);
            let pipeline = IngestPipeline::new(
                "orders",
                sink.clone(),
                PipelineOptions {
                    translate_content: true,
                    requeue_errors: requeue,
                },
            );

            let decision = pipeline.process(message(b"{}")).await;
            assert_eq!(decision, AckDecision::Reject { requeue });
            assert!(sink.is_empty());
        }
    }

    #[tokio::test]
    async fn parse_failure_is_still_persisted_and_acked() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = IngestPipeline::new("orders", sink.clone(), PipelineOptions::default());

        let decision = pipeline.process(message(b"{broken")).await;
        assert_eq!(decision, AckDecision::Ack);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].error.is_some());
    }
}
