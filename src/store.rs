//! Document sinks: the persistence seam of the pipeline.
//!
//! [`MongoStore`] writes records into a named MongoDB collection.
//! [`MemorySink`] keeps them in memory; tests use it, and it doubles as a
//! dry-run sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{self, doc, Binary, Bson, Document};
use mongodb::{Client, Collection};
use thiserror::Error;

use crate::record::{NormalizedRecord, RecordContent};

/// Database used when the connection string names none in its path.
const DEFAULT_DATABASE: &str = "amqp";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connect(#[source] mongodb::error::Error),

    #[error("record serialization failed: {0}")]
    Serialize(#[from] bson::ser::Error),

    #[error("insert failed: {0}")]
    Insert(#[source] mongodb::error::Error),

    #[error("insert rejected: {0}")]
    Rejected(String),
}

/// Persistence seam for normalized records. Implementations must be safe
/// for concurrent use by many in-flight messages.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn insert(&self, record: &NormalizedRecord) -> Result<(), StoreError>;
}

/// MongoDB-backed sink writing into one collection.
pub struct MongoStore {
    collection: Collection<Document>,
}

impl MongoStore {
    /// Connects and verifies the server is reachable. The database name
    /// comes from the connection-string path, falling back to `amqp`.
    pub async fn connect(url: &str, collection: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(url).await.map_err(StoreError::Connect)?;
        let database = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE));
        // The driver connects lazily; ping so startup failures are fatal
        // here rather than surfacing on the first insert.
        database
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(StoreError::Connect)?;
        Ok(Self {
            collection: database.collection(collection),
        })
    }

    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }
}

#[async_trait]
impl DocumentSink for MongoStore {
    async fn insert(&self, record: &NormalizedRecord) -> Result<(), StoreError> {
        let mut document = bson::to_document(record)?;
        // Store the processing time as a native BSON datetime and raw
        // payloads as binary instead of their JSON representations.
        document.insert(
            "date",
            Bson::DateTime(bson::DateTime::from_chrono(record.date)),
        );
        if let RecordContent::Bytes(bytes) = &record.content {
            document.insert(
                "content",
                Bson::Binary(Binary {
                    subtype: BinarySubtype::Generic,
                    bytes: bytes.clone(),
                }),
            );
        }
        self.collection
            .insert_one(document, None)
            .await
            .map_err(StoreError::Insert)?;
        Ok(())
    }
}

/// In-memory sink. Inserts can be toggled to fail for exercising the
/// rejection path.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<NormalizedRecord>>,
    fail_inserts: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent insert fail (or succeed again).
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<NormalizedRecord> {
        self.records
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn insert(&self, record: &NormalizedRecord) -> Result<(), StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected(
                "memory sink configured to fail".to_string(),
            ));
        }
        self.records
            .lock()
            .map_err(|_| StoreError::Rejected("poisoned lock".to_string()))?
            .push(record.clone());
        Ok(())
    }
}
