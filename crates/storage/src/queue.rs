//! Redis Streams-based job queue for extraction requests, plus the
//! transport-level registry of periodic schedule jobs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::MultiplexedConnection, streams::*, AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use extract_common::time::Reftime;
use extract_common::{DataFormat, ExtractionError, ExtractionResult};
use postprocess::PostProcessorSpec;

use crate::records::TriggerSpec;

const STREAM_KEY: &str = "extract:jobs";
const CONSUMER_GROUP: &str = "extractors";
const PERIODIC_KEY: &str = "extract:periodic";

/// Closed set of job kinds carried on the queue. Dispatch goes through a
/// handler table registered at process start; enqueueing a kind nobody
/// registered fails at enqueue time, not at dequeue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    DataExtraction,
    RetentionCleanup,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataExtraction => "data_extraction",
            Self::RetentionCleanup => "retention_cleanup",
        }
    }
}

/// An extraction job descriptor: the queue payload and the argument bundle
/// persisted on request and schedule records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub kind: JobKind,
    pub user_id: Uuid,
    pub datasets: Vec<String>,
    pub reftime: Reftime,
    /// Dataset-agnostic filter vocabulary; unknown keys are carried as-is
    /// and dropped by backend translation.
    #[serde(default)]
    pub filters: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub postprocessors: Vec<PostProcessorSpec>,
    /// Requested output conversion, applied after all other stages.
    pub output_format: Option<DataFormat>,
    /// Present when a scheduler-created record already exists; fresh
    /// submissions create their own.
    pub request_id: Option<Uuid>,
    #[serde(default)]
    pub only_reliable: bool,
    pub push_queue: Option<String>,
    pub schedule_id: Option<Uuid>,
    #[serde(default)]
    pub data_ready: bool,
    #[serde(default)]
    pub opendata: bool,
}

impl ExtractionJob {
    /// Minimal one-off extraction job for the given user and datasets.
    pub fn new(user_id: Uuid, datasets: Vec<String>, reftime: Reftime) -> Self {
        Self {
            kind: JobKind::DataExtraction,
            user_id,
            datasets,
            reftime,
            filters: BTreeMap::new(),
            postprocessors: Vec::new(),
            output_format: None,
            request_id: None,
            only_reliable: false,
            push_queue: None,
            schedule_id: None,
            data_ready: false,
            opendata: false,
        }
    }
}

/// Redis Streams job queue for extraction requests.
pub struct JobQueue {
    conn: MultiplexedConnection,
    registered_kinds: Vec<JobKind>,
}

impl JobQueue {
    /// Connect to Redis and initialize the stream. `kinds` is the handler
    /// table contents: the job kinds this process can execute.
    pub async fn connect(redis_url: &str, kinds: &[JobKind]) -> ExtractionResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| ExtractionError::Queue(format!("Redis connection failed: {}", e)))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| ExtractionError::Queue(format!("Redis connection failed: {}", e)))?;

        // Create consumer group if it doesn't exist
        let _: Result<(), _> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(STREAM_KEY)
            .arg(CONSUMER_GROUP)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        Ok(Self {
            conn,
            registered_kinds: kinds.to_vec(),
        })
    }

    /// Enqueue a job. Fails fast when no handler is registered for its kind.
    pub async fn enqueue(&mut self, job: &ExtractionJob) -> ExtractionResult<String> {
        if !self.registered_kinds.contains(&job.kind) {
            return Err(ExtractionError::Queue(format!(
                "No handler registered for job kind: {}",
                job.kind.as_str()
            )));
        }

        let job_json = serde_json::to_string(job)?;

        let entry_id: String = redis::cmd("XADD")
            .arg(STREAM_KEY)
            .arg("*")
            .arg("kind")
            .arg(job.kind.as_str())
            .arg("data")
            .arg(&job_json)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| ExtractionError::Queue(format!("Enqueue failed: {}", e)))?;

        Ok(entry_id)
    }

    /// Claim and return the next available job (for workers).
    pub async fn claim_next(
        &mut self,
        consumer_name: &str,
    ) -> ExtractionResult<Option<(String, ExtractionJob)>> {
        let opts = StreamReadOptions::default()
            .group(CONSUMER_GROUP, consumer_name)
            .count(1)
            .block(5000); // 5 second block

        let result: StreamReadReply = self
            .conn
            .xread_options(&[STREAM_KEY], &[">"], &opts)
            .await
            .map_err(|e| ExtractionError::Queue(format!("Read failed: {}", e)))?;

        for stream_key in result.keys {
            for entry in stream_key.ids {
                if let Some(data) = entry.map.get("data") {
                    let bytes: Vec<u8> = redis::from_redis_value(data)
                        .map_err(|e| ExtractionError::Queue(format!("Parse failed: {}", e)))?;
                    let job: ExtractionJob = serde_json::from_slice(&bytes)?;
                    return Ok(Some((entry.id, job)));
                }
            }
        }

        Ok(None)
    }

    /// Acknowledge a processed entry.
    pub async fn ack(&mut self, entry_id: &str) -> ExtractionResult<()> {
        let _: i64 = self
            .conn
            .xack(STREAM_KEY, CONSUMER_GROUP, &[entry_id])
            .await
            .map_err(|e| ExtractionError::Queue(format!("Ack failed: {}", e)))?;

        Ok(())
    }

    /// Publish a notification message to a user's push queue.
    pub async fn publish(&mut self, queue: &str, payload: &str) -> ExtractionResult<()> {
        let _: i64 = self
            .conn
            .publish(queue, payload)
            .await
            .map_err(|e| ExtractionError::Queue(format!("Publish failed: {}", e)))?;

        Ok(())
    }

    /// Queue depth (pending jobs).
    pub async fn queue_depth(&mut self) -> ExtractionResult<u64> {
        let info: StreamInfoStreamReply = self
            .conn
            .xinfo_stream(STREAM_KEY)
            .await
            .map_err(|e| ExtractionError::Queue(format!("XINFO failed: {}", e)))?;

        Ok(info.length as u64)
    }
}

/// A registered transport-level periodic job for one schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportEntry {
    pub schedule_id: Uuid,
    pub trigger: TriggerSpec,
    pub payload: ExtractionJob,
    pub registered_at: DateTime<Utc>,
    /// Last time the beat loop enqueued a job for this entry.
    pub last_fired: Option<DateTime<Utc>>,
}

/// Registry of transport-level periodic/crontab jobs. The schedule manager
/// registers and cancels entries; the beat loop scans them and enqueues
/// extraction jobs when due.
#[async_trait]
pub trait PeriodicTransport: Send + Sync {
    async fn register(
        &self,
        schedule_id: Uuid,
        trigger: &TriggerSpec,
        payload: &ExtractionJob,
    ) -> ExtractionResult<()>;

    async fn cancel(&self, schedule_id: Uuid) -> ExtractionResult<()>;

    async fn is_registered(&self, schedule_id: Uuid) -> ExtractionResult<bool>;

    async fn list(&self) -> ExtractionResult<Vec<TransportEntry>>;

    async fn mark_fired(&self, schedule_id: Uuid, at: DateTime<Utc>) -> ExtractionResult<()>;
}

/// Redis-backed transport registry: one hash, one field per schedule.
pub struct RedisTransport {
    conn: MultiplexedConnection,
}

impl RedisTransport {
    pub async fn connect(redis_url: &str) -> ExtractionResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| ExtractionError::Queue(format!("Redis connection failed: {}", e)))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| ExtractionError::Queue(format!("Redis connection failed: {}", e)))?;

        Ok(Self { conn })
    }

    async fn get_entry(&self, schedule_id: Uuid) -> ExtractionResult<Option<TransportEntry>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .hget(PERIODIC_KEY, schedule_id.to_string())
            .await
            .map_err(|e| ExtractionError::Queue(format!("Registry read failed: {}", e)))?;

        raw.map(|raw| serde_json::from_str(&raw).map_err(Into::into))
            .transpose()
    }

    async fn put_entry(&self, entry: &TransportEntry) -> ExtractionResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(
                PERIODIC_KEY,
                entry.schedule_id.to_string(),
                serde_json::to_string(entry)?,
            )
            .await
            .map_err(|e| ExtractionError::Queue(format!("Registry write failed: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl PeriodicTransport for RedisTransport {
    async fn register(
        &self,
        schedule_id: Uuid,
        trigger: &TriggerSpec,
        payload: &ExtractionJob,
    ) -> ExtractionResult<()> {
        self.put_entry(&TransportEntry {
            schedule_id,
            trigger: *trigger,
            payload: payload.clone(),
            registered_at: Utc::now(),
            last_fired: None,
        })
        .await
    }

    async fn cancel(&self, schedule_id: Uuid) -> ExtractionResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .hdel(PERIODIC_KEY, schedule_id.to_string())
            .await
            .map_err(|e| ExtractionError::Queue(format!("Registry delete failed: {}", e)))?;

        Ok(())
    }

    async fn is_registered(&self, schedule_id: Uuid) -> ExtractionResult<bool> {
        Ok(self.get_entry(schedule_id).await?.is_some())
    }

    async fn list(&self) -> ExtractionResult<Vec<TransportEntry>> {
        let mut conn = self.conn.clone();
        let raw: std::collections::HashMap<String, String> = conn
            .hgetall(PERIODIC_KEY)
            .await
            .map_err(|e| ExtractionError::Queue(format!("Registry read failed: {}", e)))?;

        raw.into_values()
            .map(|value| serde_json::from_str(&value).map_err(Into::into))
            .collect()
    }

    async fn mark_fired(&self, schedule_id: Uuid, at: DateTime<Utc>) -> ExtractionResult<()> {
        if let Some(mut entry) = self.get_entry(schedule_id).await? {
            entry.last_fired = Some(at);
            self.put_entry(&entry).await?;
        }

        Ok(())
    }
}
