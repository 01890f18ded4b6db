//! Waiting for a document to reach a target state.
//!
//! A [`StateWait`] owns a dedicated pub/sub connection inside a task. The
//! subscription is established before the wait is handed out, and the current
//! state is read back only after that, so a publish can never fall between
//! the two: it is either caught up or received on the channel.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::names::KeySpace;
use crate::codec::Codec;
use crate::core::{State, StateInfo};
use crate::error::{RedqError, Result, WaitError};

/// An in-progress wait for a document to reach one of a set of states.
///
/// Created by [`RedisQueue::state_wait`](crate::queue::RedisQueue::state_wait);
/// consumed by [`StateWait::wait`].
pub struct StateWait {
    rx: oneshot::Receiver<std::result::Result<(), WaitError>>,
    task: JoinHandle<()>,
    timeout: Duration,
    id: String,
}

impl StateWait {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn subscribe(
        client: &redis::Client,
        manager: ConnectionManager,
        state_codec: Arc<dyn Codec<StateInfo>>,
        channel_key: String,
        state_key: String,
        targets: HashSet<State>,
        id: String,
        timeout: Duration,
    ) -> Result<StateWait> {
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| RedqError::subscription_failed(id.clone(), e.to_string()))?;
        pubsub
            .subscribe(&channel_key)
            .await
            .map_err(|e| RedqError::subscription_failed(id.clone(), e.to_string()))?;

        let (mut tx, rx) = oneshot::channel();
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                outcome = watch(pubsub, manager, state_codec, state_key, targets, &task_id) => {
                    let _ = tx.send(outcome);
                }
                // The wait handle was dropped; nobody is listening anymore.
                _ = tx.closed() => {
                    debug!(id = %task_id, "wait abandoned before completion");
                }
            }
        });
        Ok(StateWait {
            rx,
            task,
            timeout,
            id,
        })
    }

    /// Block until a target state is reached or the wait fails.
    pub async fn wait(self) -> std::result::Result<(), WaitError> {
        let StateWait {
            rx,
            task,
            timeout,
            id,
        } = self;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(WaitError::Canceled { id }),
            Err(_) => {
                task.abort();
                Err(WaitError::Timeout { id, after: timeout })
            }
        }
    }

    /// The document ID this wait observes.
    pub fn id(&self) -> &str {
        &self.id
    }
}

async fn watch(
    pubsub: redis::aio::PubSub,
    manager: ConnectionManager,
    state_codec: Arc<dyn Codec<StateInfo>>,
    state_key: String,
    targets: HashSet<State>,
    id: &str,
) -> std::result::Result<(), WaitError> {
    // Catch-up read. The subscription is already active, so any publish
    // racing with this read is delivered on the channel instead of lost.
    let mut conn = manager;
    let current: Option<String> = match conn.get(&state_key).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(%id, error = %e, "catch-up state read failed");
            None
        }
    };
    if let Some(raw) = current {
        match state_codec.deserialize(&raw) {
            Ok(record) if targets.contains(&record.state()) => {
                debug!(%id, state = %record.state(), "target state already reached");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => warn!(%id, error = %e, "unreadable state record during catch-up"),
        }
    }

    let mut messages = pubsub.into_on_message();
    while let Some(message) = messages.next().await {
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%id, error = %e, "unreadable channel message");
                continue;
            }
        };
        if payload == KeySpace::STOP {
            return Err(WaitError::Stopped { id: id.to_string() });
        }
        match state_codec.deserialize(&payload) {
            Ok(record) if targets.contains(&record.state()) => {
                debug!(%id, state = %record.state(), "target state reached");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => debug!(%id, error = %e, "ignoring unparseable channel message"),
        }
    }
    Err(WaitError::Canceled { id: id.to_string() })
}
