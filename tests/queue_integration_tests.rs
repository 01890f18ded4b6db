//! Integration tests against a local Redis.
//!
//! Each test uses a uniquely named queue so runs never interfere. When no
//! Redis is reachable the tests skip themselves, mirroring how the storage
//! backends are tested.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redq::{
    Document, Handler, HandlerError, QueueConfig, RedisQueue, RedqError, State, WaitError,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Task {
    id: String,
    body: String,
}

impl Document for Task {
    fn id(&self) -> &str {
        &self.id
    }
}

fn task(id: &str) -> Task {
    Task {
        id: id.to_string(),
        body: "payload".to_string(),
    }
}

#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl Handler<Task> for RecordingHandler {
    async fn handle(&self, task: Task) -> Result<(), HandlerError> {
        self.seen.lock().await.push(task.id);
        Ok(())
    }
}

struct FailingHandler;

#[async_trait]
impl Handler<Task> for FailingHandler {
    async fn handle(&self, _task: Task) -> Result<(), HandlerError> {
        Err(HandlerError::new("simulated failure"))
    }
}

async fn test_client() -> Option<redis::Client> {
    let url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let client = redis::Client::open(url).ok()?;
    // Probe the connection; skip the test when Redis is not around.
    client.get_multiplexed_async_connection().await.ok()?;
    Some(client)
}

fn test_config(reaper_interval: Duration) -> QueueConfig {
    QueueConfig::new(format!("it-{}", Uuid::new_v4()))
        .with_pop_timeout(Duration::from_secs(1))
        .with_lock_time(Duration::from_secs(2))
        .with_reaper_interval(reaper_interval)
}

#[tokio::test]
async fn push_reaches_done_under_live_consumer() {
    let Some(client) = test_client().await else {
        eprintln!("skipping: redis not available");
        return;
    };
    let handler = Arc::new(RecordingHandler::default());
    let queue = RedisQueue::new(
        test_config(Duration::from_secs(1)),
        client,
        handler.clone(),
    )
    .await
    .unwrap();
    queue.start_consumer();

    let wait = queue
        .state_wait_with_timeout([State::Done, State::Failed], "A", Duration::from_secs(5))
        .await
        .unwrap();
    queue.push(task("A")).await.unwrap();
    wait.wait().await.unwrap();

    let record = queue.state("A").await.unwrap().unwrap();
    assert_eq!(record.state(), State::Done);
    assert_eq!(handler.seen.lock().await.as_slice(), ["A".to_string()]);
    queue.close().await;
}

#[tokio::test]
async fn handler_failure_is_recorded_with_detail() {
    let Some(client) = test_client().await else {
        eprintln!("skipping: redis not available");
        return;
    };
    let queue = RedisQueue::new(
        test_config(Duration::from_secs(1)),
        client.clone(),
        Arc::new(FailingHandler),
    )
    .await
    .unwrap();
    queue.start_consumer();

    queue
        .push_and_wait(task("F"), Duration::from_secs(5))
        .await
        .unwrap();

    let record = queue.state("F").await.unwrap().unwrap();
    assert_eq!(record.state(), State::Failed);
    assert_eq!(record.info(), "simulated failure");

    // The failed document was acknowledged, not left in flight.
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let inflight: Vec<String> = conn.lrange(queue.names().inflight_key(), 0, -1).await.unwrap();
    assert!(inflight.is_empty());
    queue.close().await;
}

#[tokio::test]
async fn orphaned_processing_document_is_restored_and_completed() {
    let Some(client) = test_client().await else {
        eprintln!("skipping: redis not available");
        return;
    };
    let handler = Arc::new(RecordingHandler::default());
    let queue = RedisQueue::new(
        test_config(Duration::from_secs(1)),
        client.clone(),
        handler.clone(),
    )
    .await
    .unwrap();
    queue.push(task("B")).await.unwrap();

    // Simulate a consumer that claimed the document and died before the
    // handler ran: ID in the in-flight list, a short lock, state PROCESSING.
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let moved: Option<String> = conn
        .rpoplpush(queue.names().ready_key(), queue.names().inflight_key())
        .await
        .unwrap();
    assert_eq!(moved.as_deref(), Some("B"));
    conn.set_ex::<_, _, ()>(queue.names().lock_key("B"), "locked", 1)
        .await
        .unwrap();
    queue.set_state("B", State::Processing, "").await.unwrap();

    let wait = queue
        .state_wait_with_timeout([State::Done], "B", Duration::from_secs(10))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await; // let the lock expire
    queue.start_consumer();
    wait.wait().await.unwrap();

    assert_eq!(handler.seen.lock().await.as_slice(), ["B".to_string()]);
    queue.close().await;
}

#[tokio::test]
async fn over_age_document_is_claimed_but_not_dispatched() {
    let Some(client) = test_client().await else {
        eprintln!("skipping: redis not available");
        return;
    };
    // A huge scan interval keeps the scan loop from touching the entry while
    // the test observes it.
    let config = test_config(Duration::from_secs(3_600)).with_discard_time(Duration::from_secs(1));
    let handler = Arc::new(RecordingHandler::default());
    let queue = RedisQueue::new(config, client, handler.clone())
        .await
        .unwrap();

    queue.push(task("C")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await; // age past discard
    queue.start_consumer();
    tokio::time::sleep(Duration::from_millis(2_500)).await;

    assert!(handler.seen.lock().await.is_empty());
    let record = queue.state("C").await.unwrap().unwrap();
    assert_eq!(record.state(), State::Processing);
    queue.close().await;
}

#[tokio::test]
async fn reaped_done_document_releases_waiters_with_stop() {
    let Some(client) = test_client().await else {
        eprintln!("skipping: redis not available");
        return;
    };
    let queue: RedisQueue<Task> = RedisQueue::new(
        test_config(Duration::from_secs(1)),
        client.clone(),
        Arc::new(RecordingHandler::default()),
    )
    .await
    .unwrap();

    // An entry whose worker finished but never acknowledged: DONE state in
    // the in-flight list, no lock.
    queue.set_state("D", State::Done, "").await.unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    conn.lpush::<_, _, ()>(queue.names().inflight_key(), "D")
        .await
        .unwrap();

    let wait = queue
        .state_wait_with_timeout([State::Failed], "D", Duration::from_secs(10))
        .await
        .unwrap();
    queue.start_consumer();

    let err = wait.wait().await.unwrap_err();
    assert!(matches!(err, WaitError::Stopped { .. }));

    let inflight: Vec<String> = conn.lrange(queue.names().inflight_key(), 0, -1).await.unwrap();
    assert!(inflight.is_empty());
    queue.close().await;
}

#[tokio::test]
async fn push_and_wait_with_instant_handler_does_not_deadlock() {
    let Some(client) = test_client().await else {
        eprintln!("skipping: redis not available");
        return;
    };
    let queue = RedisQueue::new(
        test_config(Duration::from_secs(1)),
        client,
        Arc::new(RecordingHandler::default()),
    )
    .await
    .unwrap();
    queue.start_consumer();

    queue
        .push_and_wait(task("E"), Duration::from_secs(10))
        .await
        .unwrap();

    let record = queue.state("E").await.unwrap().unwrap();
    assert_eq!(record.state(), State::Done);
    queue.close().await;
}

#[tokio::test]
async fn construction_rejects_insufficient_ttl_margin() {
    // Validation happens before any connection is made.
    let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
    let config = QueueConfig::new("rejected")
        .with_state_ttl(Duration::from_secs(60))
        .with_lock_time(Duration::from_secs(10));
    let err = RedisQueue::<Task>::new(config, client, Arc::new(RecordingHandler::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, RedqError::Configuration { .. }));
}

#[tokio::test]
async fn states_enumerates_queue_documents() {
    let Some(client) = test_client().await else {
        eprintln!("skipping: redis not available");
        return;
    };
    let queue = RedisQueue::new(
        test_config(Duration::from_secs(1)),
        client,
        Arc::new(RecordingHandler::default()),
    )
    .await
    .unwrap();

    queue.push(task("G1")).await.unwrap();
    queue.push(task("G2")).await.unwrap();

    let stream = queue.states().await.unwrap();
    let mut ids: Vec<String> = stream
        .filter_map(|entry| async move {
            entry
                .unwrap()
                .map(|extended| extended.key().rsplit(':').next().unwrap().to_string())
        })
        .collect()
        .await;
    ids.sort();
    assert_eq!(ids, ["G1".to_string(), "G2".to_string()]);

    for id in ["G1", "G2"] {
        let record = queue.state(id).await.unwrap().unwrap();
        assert_eq!(record.state(), State::New);
    }
    queue.close().await;
}

#[tokio::test]
async fn push_after_close_is_accepted() {
    let Some(client) = test_client().await else {
        eprintln!("skipping: redis not available");
        return;
    };
    let queue = RedisQueue::new(
        test_config(Duration::from_secs(1)),
        client,
        Arc::new(RecordingHandler::default()),
    )
    .await
    .unwrap();
    queue.start_consumer();
    queue.close().await;
    assert!(!queue.is_running());

    // The queue is closed, not the producer path.
    queue.push(task("H")).await.unwrap();
    let record = queue.state("H").await.unwrap().unwrap();
    assert_eq!(record.state(), State::New);
}
