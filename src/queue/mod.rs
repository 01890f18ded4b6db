//! The durable queue: producer path, consumer loops, and state waits.
//!
//! A [`RedisQueue`] coordinates any number of producers and consumer
//! processes exclusively through the store. Producers call
//! [`RedisQueue::push`]; each consumer process calls
//! [`RedisQueue::start_consumer`], which spawns the claim loop and the
//! in-flight scan loop. State transitions are published per document so any
//! party can await completion with [`RedisQueue::state_wait`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, Stream, StreamExt};
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::codec::{Codec, JsonCodec};
use crate::core::{Document, ExtendedStateInfo, State, StateInfo, TimedPayload};
use crate::error::{HandlerError, RedqError, Result};
use crate::metrics::{NullRecorder, QueueMetrics, Recorder};

mod config;
mod consumer;
mod names;
mod reaper;
mod scheduler;
mod waiter;

pub use config::QueueConfig;
pub use names::KeySpace;
pub use waiter::StateWait;

use scheduler::HandlerScheduler;

/// How long `close` waits for in-progress handlers before giving up on them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

/// Processes documents claimed from a queue.
///
/// Handlers should be idempotent: a document whose consumer dies mid-job is
/// re-queued and will be handled again.
#[async_trait]
pub trait Handler<T>: Send + Sync {
    /// Process one document.
    ///
    /// Returning `Ok` records the document as `DONE`; returning `Err` records
    /// it as `FAILED` with the error message as detail.
    async fn handle(&self, document: T) -> std::result::Result<(), HandlerError>;
}

/// Milliseconds since the epoch, the timestamp unit of all queue records.
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// State shared between the queue handle, its loops, and its handler workers.
pub(crate) struct QueueCore<T: Document> {
    pub(crate) config: QueueConfig,
    pub(crate) names: KeySpace,
    pub(crate) client: redis::Client,
    pub(crate) manager: ConnectionManager,
    pub(crate) payload_codec: Arc<dyn Codec<TimedPayload<T>>>,
    pub(crate) state_codec: Arc<dyn Codec<StateInfo>>,
    pub(crate) metrics: QueueMetrics,
}

impl<T: Document> QueueCore<T> {
    /// Write a fresh state record and publish it on the document's channel.
    ///
    /// Both commands go out as one pipelined pair, write first, so a
    /// subscriber that reacts to the publish can already read the record.
    pub(crate) async fn set_state_on<C>(
        &self,
        conn: &mut C,
        timestamp_ms: i64,
        id: &str,
        state: State,
        info: &str,
    ) -> Result<()>
    where
        C: ConnectionLike + Send,
    {
        let record = StateInfo::new(state, timestamp_ms, info);
        let serialized = self.state_codec.serialize(&record)?;
        let mut pipe = redis::pipe();
        pipe.set_ex(
            self.names.state_key(id),
            &serialized,
            self.config.state_ttl.as_secs(),
        )
        .ignore()
        .publish(self.names.channel_key(id), &serialized)
        .ignore();
        pipe.query_async::<()>(conn).await?;
        Ok(())
    }

    pub(crate) async fn set_state(&self, id: &str, state: State, info: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        self.set_state_on(&mut conn, now_ms(), id, state, info).await
    }

    pub(crate) async fn state(&self, id: &str) -> Result<Option<StateInfo>> {
        self.state_for_key(&self.names.state_key(id)).await
    }

    pub(crate) async fn state_for_key(&self, key: &str) -> Result<Option<StateInfo>> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.get(key).await?;
        raw.map(|raw| self.state_codec.deserialize(&raw)).transpose()
    }

    /// Atomically move an in-flight document back to the head of the ready
    /// list.
    pub(crate) async fn restore_to_ready<C>(&self, conn: &mut C, id: &str) -> Result<()>
    where
        C: ConnectionLike + Send,
    {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(self.names.inflight_key(), 1, id)
            .ignore()
            .lpush(self.names.ready_key(), id)
            .ignore();
        pipe.query_async::<()>(conn).await?;
        Ok(())
    }

    /// Record a terminal state and acknowledge the in-flight entry.
    pub(crate) async fn finish(&self, id: &str, state: State, info: &str) -> Result<()> {
        self.set_state(id, state, info).await?;
        let mut conn = self.manager.clone();
        conn.lrem::<_, _, ()>(self.names.inflight_key(), 1, id)
            .await?;
        Ok(())
    }
}

/// A durable, at-least-once job queue backed by Redis.
///
/// Accepted documents are eventually processed to `DONE`, recorded as
/// `FAILED`, or rescued from a dead consumer and re-queued. See the crate
/// documentation for the full protocol.
///
/// ## Example
/// ```rust,no_run
/// use redq::{Handler, HandlerError, QueueConfig, RedisQueue};
/// use async_trait::async_trait;
/// use std::sync::Arc;
///
/// # #[derive(Clone, serde::Serialize, serde::Deserialize)]
/// # struct Invoice { id: String }
/// # impl redq::Document for Invoice { fn id(&self) -> &str { &self.id } }
/// struct Biller;
///
/// #[async_trait]
/// impl Handler<Invoice> for Biller {
///     async fn handle(&self, invoice: Invoice) -> Result<(), HandlerError> {
///         // charge the invoice...
///         Ok(())
///     }
/// }
///
/// # async fn example() -> redq::Result<()> {
/// let client = redis::Client::open("redis://127.0.0.1:6379")
///     .map_err(redq::RedqError::from)?;
/// let queue = RedisQueue::new(QueueConfig::new("invoices"), client, Arc::new(Biller)).await?;
/// queue.start_consumer();
/// queue.push(Invoice { id: "inv-1".to_string() }).await?;
/// # Ok(())
/// # }
/// ```
pub struct RedisQueue<T: Document> {
    core: Arc<QueueCore<T>>,
    scheduler: Arc<HandlerScheduler<T>>,
    running: Arc<AtomicBool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Document> std::fmt::Debug for RedisQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueue")
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<T> RedisQueue<T>
where
    T: Document + Serialize + DeserializeOwned,
{
    /// Create a queue with the default JSON codecs and no metrics.
    pub async fn new(
        config: QueueConfig,
        client: redis::Client,
        handler: Arc<dyn Handler<T>>,
    ) -> Result<Self> {
        Self::with_recorder(config, client, handler, Arc::new(NullRecorder)).await
    }

    /// Create a queue with the default JSON codecs and the given recorder.
    pub async fn with_recorder(
        config: QueueConfig,
        client: redis::Client,
        handler: Arc<dyn Handler<T>>,
        recorder: Arc<dyn Recorder>,
    ) -> Result<Self> {
        let payload_codec: Arc<dyn Codec<TimedPayload<T>>> =
            Arc::new(JsonCodec::<TimedPayload<T>>::new());
        let state_codec: Arc<dyn Codec<StateInfo>> = Arc::new(JsonCodec::<StateInfo>::new());
        Self::with_codecs(config, client, handler, recorder, payload_codec, state_codec).await
    }
}

impl<T: Document> RedisQueue<T> {
    /// Create a queue with explicit codecs.
    ///
    /// Fails with [`RedqError::Configuration`] when the settings are invalid,
    /// notably when the state TTL does not exceed the lock time by a safe
    /// margin, and with [`RedqError::Queue`] when the store is unreachable.
    pub async fn with_codecs(
        config: QueueConfig,
        client: redis::Client,
        handler: Arc<dyn Handler<T>>,
        recorder: Arc<dyn Recorder>,
        payload_codec: Arc<dyn Codec<TimedPayload<T>>>,
        state_codec: Arc<dyn Codec<StateInfo>>,
    ) -> Result<Self> {
        config.validate()?;
        let manager = ConnectionManager::new(client.clone()).await?;
        let names = KeySpace::new(&config.name);
        let metrics = QueueMetrics::new(recorder);
        let core = Arc::new(QueueCore {
            config,
            names,
            client,
            manager,
            payload_codec,
            state_codec,
            metrics,
        });
        let scheduler = Arc::new(HandlerScheduler::start(Arc::clone(&core), handler));
        Ok(Self {
            core,
            scheduler,
            running: Arc::new(AtomicBool::new(false)),
            loops: Mutex::new(Vec::new()),
        })
    }

    /// Enqueue a document.
    ///
    /// Pre-locks the document, pushes its ID onto the ready list, stores the
    /// timed payload and the initial `NEW` state, and publishes that state,
    /// all as one atomic group. Returns once the store has applied the group.
    pub async fn push(&self, document: T) -> Result<()> {
        let id = document.id().to_string();
        if id.is_empty() {
            return Err(RedqError::queue("document id must not be empty"));
        }
        let timestamp_ms = now_ms();
        let record = StateInfo::new(State::New, timestamp_ms, "");
        let payload = TimedPayload::new(document, timestamp_ms);
        let serialized = match self.core.payload_codec.serialize(&payload) {
            Ok(serialized) => serialized,
            Err(e) => {
                self.core.metrics.serialization_errors.increment(1);
                return Err(e);
            }
        };
        let state_serialized = match self.core.state_codec.serialize(&record) {
            Ok(serialized) => serialized,
            Err(e) => {
                self.core.metrics.serialization_errors.increment(1);
                return Err(e);
            }
        };

        let names = &self.core.names;
        let config = &self.core.config;
        let mut conn = self.core.manager.clone();
        let _push = self.core.metrics.push.start();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set_ex(
                names.lock_key(&id),
                KeySpace::LOCK_VALUE,
                config.lock_time.as_secs(),
            )
            .ignore()
            .lpush(names.ready_key(), &id)
            .ignore()
            .set_ex(names.content_key(&id), serialized, config.state_ttl.as_secs())
            .ignore()
            .set_ex(
                names.state_key(&id),
                &state_serialized,
                config.state_ttl.as_secs(),
            )
            .ignore()
            .publish(names.channel_key(&id), &state_serialized)
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;
        debug!(%id, lock_time_s = config.lock_time.as_secs(), "pushed document");
        Ok(())
    }

    /// Start the consumer: one claim loop and one in-flight scan loop.
    pub fn start_consumer(&self) {
        debug!(queue = %self.core.config.name, "starting consumer");
        self.running.store(true, Ordering::SeqCst);
        let main = tokio::spawn(consumer::run(
            Arc::clone(&self.core),
            Arc::clone(&self.scheduler),
            Arc::clone(&self.running),
        ));
        let scan = tokio::spawn(reaper::run(
            Arc::clone(&self.core),
            Arc::clone(&self.running),
        ));
        self.loops
            .lock()
            .expect("loop handles poisoned")
            .extend([main, scan]);
    }

    /// Whether the consumer loops are scheduled.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Record a state for a document and publish it on its channel.
    pub async fn set_state(&self, id: &str, state: State, info: &str) -> Result<()> {
        self.core.set_state(id, state, info).await
    }

    /// Read the current state record of a document, if any.
    pub async fn state(&self, id: &str) -> Result<Option<StateInfo>> {
        self.core.state(id).await
    }

    /// Enumerate the state records of every document in this queue.
    ///
    /// Keys are listed eagerly; each record is fetched lazily as the stream
    /// is polled. An entry is `None` when its record expired between the
    /// listing and the read.
    pub async fn states(
        &self,
    ) -> Result<impl Stream<Item = Result<Option<ExtendedStateInfo>>> + Send> {
        let mut conn = self.core.manager.clone();
        let keys: Vec<String> = conn.keys(self.core.names.state_key_pattern()).await?;
        let core = Arc::clone(&self.core);
        Ok(stream::iter(keys).then(move |key| {
            let core = Arc::clone(&core);
            async move {
                let record = core.state_for_key(&key).await?;
                Ok(record.map(|state_info| ExtendedStateInfo::new(key, state_info)))
            }
        }))
    }

    /// Create a wait that completes when the document reaches any of the
    /// given states, with the configured default timeout.
    ///
    /// The subscription is active before this returns, so a state published
    /// immediately afterwards cannot be missed.
    pub async fn state_wait(
        &self,
        states: impl IntoIterator<Item = State>,
        id: &str,
    ) -> Result<StateWait> {
        self.state_wait_with_timeout(states, id, self.core.config.subscription_timeout)
            .await
    }

    /// Create a wait with an explicit timeout.
    pub async fn state_wait_with_timeout(
        &self,
        states: impl IntoIterator<Item = State>,
        id: &str,
        timeout: Duration,
    ) -> Result<StateWait> {
        let targets: HashSet<State> = states.into_iter().collect();
        StateWait::subscribe(
            &self.core.client,
            self.core.manager.clone(),
            Arc::clone(&self.core.state_codec),
            self.core.names.channel_key(id),
            self.core.names.state_key(id),
            targets,
            id.to_string(),
            timeout,
        )
        .await
    }

    /// Push a document and block until it reaches `DONE` or `FAILED`.
    ///
    /// The wait is subscribed before the push so the initial `NEW` publish,
    /// and any completion racing with it, is observed.
    pub async fn push_and_wait(&self, document: T, timeout: Duration) -> Result<()> {
        let id = document.id().to_string();
        let wait = self
            .state_wait_with_timeout([State::Done, State::Failed], &id, timeout)
            .await?;
        self.push(document).await?;
        wait.wait().await?;
        Ok(())
    }

    /// Stop the consumer loops, drain them, and shut down the handler pool.
    ///
    /// The claim loop wakes within the pop timeout and the scan loop within
    /// the scan interval. `push` remains valid afterwards, but no consumer
    /// progress happens until a consumer is started again.
    pub async fn close(&self) {
        debug!(queue = %self.core.config.name, "closing queue");
        self.running.store(false, Ordering::SeqCst);
        let handles: Vec<JoinHandle<()>> = {
            let mut loops = self.loops.lock().expect("loop handles poisoned");
            loops.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(queue = %self.core.config.name, error = %e, "queue loop ended abnormally");
            }
        }
        self.scheduler.close(SHUTDOWN_GRACE).await;
        info!(queue = %self.core.config.name, "queue closed");
    }

    /// The queue name.
    pub fn name(&self) -> &str {
        &self.core.config.name
    }

    /// The key scheme of this queue.
    pub fn names(&self) -> &KeySpace {
        &self.core.names
    }

    /// The queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.core.config
    }
}
