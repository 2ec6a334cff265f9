//! Queue subscriptions: one consume loop per queue, each feeding an
//! [`IngestPipeline`] instance.
//!
//! Every delivery is processed on its own task so persistence calls run
//! concurrently; completions (and acknowledgments) may finish out of order
//! relative to delivery order. A per-subscription semaphore bounds how many
//! messages are in flight at once.

use std::sync::Arc;

use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicRejectOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::message::InboundMessage;
use crate::pipeline::{AckDecision, IngestPipeline, PipelineOptions};
use crate::store::DocumentSink;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connect(#[source] lapin::Error),

    #[error("channel setup failed: {0}")]
    Channel(#[source] lapin::Error),

    #[error("subscribing to queue '{queue}' failed: {source}")]
    Consume {
        queue: String,
        #[source]
        source: lapin::Error,
    },
}

/// Connects to the broker and opens the channel shared by all
/// subscriptions. The connection must be kept alive by the caller.
pub async fn connect_broker(url: &str) -> Result<(Connection, Channel), BrokerError> {
    let connection = Connection::connect(url, ConnectionProperties::default())
        .await
        .map_err(BrokerError::Connect)?;
    let channel = connection
        .create_channel()
        .await
        .map_err(BrokerError::Channel)?;
    Ok((connection, channel))
}

/// Binds one pipeline instance per requested queue. All subscriptions share
/// the channel and the sink; each owns its consume loop and in-flight limit.
pub struct QueueSubscriptionManager {
    channel: Channel,
    sink: Arc<dyn DocumentSink>,
    options: PipelineOptions,
    max_in_flight: usize,
}

impl QueueSubscriptionManager {
    pub fn new(
        channel: Channel,
        sink: Arc<dyn DocumentSink>,
        options: PipelineOptions,
        max_in_flight: usize,
    ) -> Self {
        Self {
            channel,
            sink,
            options,
            max_in_flight,
        }
    }

    /// Subscribes to every queue in order, failing fast on the first queue
    /// that cannot be consumed.
    pub async fn subscribe_all(
        &self,
        queues: &[String],
    ) -> Result<Vec<JoinHandle<()>>, BrokerError> {
        let mut handles = Vec::with_capacity(queues.len());
        for queue in queues {
            handles.push(self.subscribe(queue).await?);
        }
        Ok(handles)
    }

    /// Starts an independent subscription for one queue and returns the
    /// handle of its consume loop.
    pub async fn subscribe(&self, queue: &str) -> Result<JoinHandle<()>, BrokerError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| BrokerError::Consume {
                queue: queue.to_string(),
                source,
            })?;
        let consumer_tag = consumer.tag().to_string();
        info!(queue, consumer_tag = %consumer_tag, "consuming queue");

        let pipeline = Arc::new(IngestPipeline::new(queue, self.sink.clone(), self.options));
        let limit = Arc::new(Semaphore::new(self.max_in_flight));
        Ok(tokio::spawn(consume_loop(consumer, consumer_tag, pipeline, limit)))
    }
}

async fn consume_loop(
    mut consumer: Consumer,
    consumer_tag: String,
    pipeline: Arc<IngestPipeline>,
    limit: Arc<Semaphore>,
) {
    while let Some(next) = consumer.next().await {
        let delivery = match next {
            Ok(delivery) => delivery,
            Err(err) => {
                warn!(queue = %pipeline.queue(), error = %err, "consumer stream error, ending subscription");
                break;
            }
        };
        let Ok(permit) = limit.clone().acquire_owned().await else {
            break;
        };
        let pipeline = pipeline.clone();
        let consumer_tag = consumer_tag.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let (message, acker) = InboundMessage::from_delivery(delivery, &consumer_tag);
            let decision = pipeline.process(message).await;
            if let Err(err) = apply_decision(&acker, decision).await {
                warn!(queue = %pipeline.queue(), error = %err, "broker acknowledgment failed");
            }
        });
    }
    info!(queue = %pipeline.queue(), "subscription ended");
}

/// Reports one message's outcome back to the broker.
async fn apply_decision(acker: &Acker, decision: AckDecision) -> lapin::Result<()> {
    match decision {
        AckDecision::Ack => acker.ack(BasicAckOptions::default()).await,
        AckDecision::Reject { requeue } => acker.reject(BasicRejectOptions { requeue }).await,
    }
}
