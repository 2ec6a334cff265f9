//! Archive AMQP queue messages into a MongoDB collection.
//!
//! Broker deliveries are converted into [`InboundMessage`] values,
//! normalized into [`NormalizedRecord`] documents by the content
//! normalizer and record builder, persisted through a [`DocumentSink`],
//! and acknowledged or rejected based on the persistence outcome. One
//! [`IngestPipeline`] instance is bound per subscribed queue; messages are
//! processed independently with no cross-message state.

pub mod config;
pub mod message;
pub mod normalize;
pub mod pipeline;
pub mod record;
pub mod store;
pub mod subscribe;

pub use config::ArchiveConfig;
pub use message::{DeliveryFields, InboundMessage, MessageProperties};
pub use pipeline::{AckDecision, IngestPipeline, PipelineOptions};
pub use record::{build_record, NormalizedRecord, ParseFailure, RecordContent, OCTET_STREAM};
pub use store::{DocumentSink, MemorySink, MongoStore, StoreError};
pub use subscribe::{connect_broker, BrokerError, QueueSubscriptionManager};
