//! The claim loop: blocking dequeue, lock, and handler dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, error, trace, warn};

use super::names::KeySpace;
use super::scheduler::{DispatchError, HandlerScheduler};
use super::{now_ms, QueueCore};
use crate::core::{Document, State};
use crate::error::Result;

/// Pause after a failed iteration before retrying with a fresh connection.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

pub(crate) async fn run<T: Document>(
    core: Arc<QueueCore<T>>,
    scheduler: Arc<HandlerScheduler<T>>,
    running: Arc<AtomicBool>,
) {
    debug!(queue = %core.config.name, "claim loop started");
    while running.load(Ordering::SeqCst) {
        // The blocking pop needs its own connection so it cannot stall
        // unrelated traffic on the shared one.
        let mut conn = match core.client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(queue = %core.config.name, error = %e, "could not open claim connection");
                tokio::time::sleep(RETRY_BACKOFF).await;
                continue;
            }
        };
        while running.load(Ordering::SeqCst) {
            if let Err(e) = iteration(&core, &scheduler, &mut conn).await {
                error!(queue = %core.config.name, error = %e, "claim iteration failed");
                tokio::time::sleep(RETRY_BACKOFF).await;
                break;
            }
        }
    }
    debug!(queue = %core.config.name, "claim loop stopped");
}

async fn iteration<T: Document>(
    core: &QueueCore<T>,
    scheduler: &HandlerScheduler<T>,
    conn: &mut MultiplexedConnection,
) -> Result<()> {
    let popped: Option<String> = {
        let _idle = core.metrics.idle.start();
        conn.brpoplpush(
            core.names.ready_key(),
            core.names.inflight_key(),
            core.config.pop_timeout.as_secs_f64(),
        )
        .await?
    };
    let Some(id) = popped else {
        trace!(queue = %core.config.name, "ready list empty");
        return Ok(());
    };
    debug!(%id, "claimed document");

    // From here on the ID sits in the in-flight list; any abandoned
    // iteration is picked up by the scan loop once the lock expires.
    let claimed_at_ms = now_ms();
    let raw = match lock_and_fetch(core, conn, claimed_at_ms, &id).await? {
        Some(raw) => raw,
        None => {
            warn!(%id, "no content for claimed document");
            return Ok(());
        }
    };
    let payload = match core.payload_codec.deserialize(&raw) {
        Ok(payload) => payload,
        Err(e) => {
            error!(%id, error = %e, "failed deserialization, skipping document");
            return Ok(());
        }
    };

    let age_ms = payload.age_ms_at(claimed_at_ms);
    if age_ms >= core.config.discard_time.as_millis() as i64 {
        debug!(%id, age_ms, "document past discard time, not dispatching");
        return Ok(());
    }

    let dispatched = {
        let _wait = core.metrics.execute_wait.start();
        scheduler.dispatch(payload.into_document())
    };
    match dispatched {
        Ok(()) => {}
        Err(DispatchError::Full) => {
            error!(%id, "handler queue full, re-enqueueing document");
            core.restore_to_ready(conn, &id).await?;
        }
        Err(DispatchError::Closed) => {
            warn!(%id, "handler pool closed, re-enqueueing document");
            core.restore_to_ready(conn, &id).await?;
        }
    }
    Ok(())
}

/// Re-lock the claimed document, move it to `PROCESSING`, and read its
/// content.
async fn lock_and_fetch<T: Document>(
    core: &QueueCore<T>,
    conn: &mut MultiplexedConnection,
    timestamp_ms: i64,
    id: &str,
) -> Result<Option<String>> {
    conn.set_ex::<_, _, ()>(
        core.names.lock_key(id),
        KeySpace::LOCK_VALUE,
        core.config.lock_time.as_secs(),
    )
    .await?;

    let existing: Option<String> = conn.get(core.names.state_key(id)).await?;
    if let Some(raw) = existing {
        match core.state_codec.deserialize(&raw) {
            Ok(record) if record.state() != State::New => {
                warn!(%id, state = %record.state(), "state already present for claimed document");
            }
            Ok(_) => {}
            Err(e) => warn!(%id, error = %e, "unreadable state record for claimed document"),
        }
    }

    core.set_state_on(conn, timestamp_ms, id, State::Processing, "")
        .await?;
    let content: Option<String> = conn.get(core.names.content_key(id)).await?;
    Ok(content)
}
