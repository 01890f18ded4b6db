//! The in-flight scan loop: rescues documents from dead consumers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, error, info, trace, warn};

use super::names::KeySpace;
use super::QueueCore;
use crate::core::{Document, State};
use crate::error::Result;

pub(crate) async fn run<T: Document>(core: Arc<QueueCore<T>>, running: Arc<AtomicBool>) {
    debug!(queue = %core.config.name, "in-flight scan loop started");
    while running.load(Ordering::SeqCst) {
        if let Err(e) = scan(&core).await {
            error!(queue = %core.config.name, error = %e, "in-flight scan failed");
        }
        tokio::time::sleep(core.config.reaper_interval).await;
    }
    debug!(queue = %core.config.name, "in-flight scan loop stopped");
}

async fn scan<T: Document>(core: &QueueCore<T>) -> Result<()> {
    let mut conn = core.manager.clone();
    let ids: Vec<String> = conn.lrange(core.names.inflight_key(), 0, -1).await?;
    trace!(queue = %core.config.name, count = ids.len(), "documents in flight");
    for id in ids {
        if let Err(e) = inspect(core, &mut conn, &id).await {
            error!(%id, error = %e, "could not inspect in-flight document");
        }
    }
    if core.metrics.ready_length.refresh_due() {
        let len: i64 = conn.llen(core.names.ready_key()).await?;
        core.metrics.ready_length.set(len as f64);
    }
    Ok(())
}

/// Decide the fate of one in-flight entry.
///
/// A live lock means some consumer owns the document. An expired lock is
/// judged by the state record: a `PROCESSING` document lost its worker and is
/// restored to the ready list; anything else can no longer progress, so the
/// entry is cleared and waiters are released with the stop sentinel.
async fn inspect<T: Document>(
    core: &QueueCore<T>,
    conn: &mut ConnectionManager,
    id: &str,
) -> Result<()> {
    let lock_key = core.names.lock_key(id);
    let ttl: i64 = conn.ttl(&lock_key).await?;
    trace!(%id, ttl, "in-flight lock ttl");
    if ttl != 0 && ttl != -2 {
        return Ok(());
    }

    let Some(record) = core.state(id).await? else {
        warn!(%id, "expired in-flight document has no state record");
        return Ok(());
    };

    match record.state() {
        State::Processing => {
            info!(%id, ttl, "restoring unlocked in-flight document");
            let _restore = core.metrics.restore_blocked.start();
            core.restore_to_ready(conn, id).await?;
        }
        state => {
            if state == State::Done {
                debug!(%id, %state, "unlocked document already done, clearing in-flight entry");
            } else {
                error!(%id, %state, "losing a job: unlocked in-flight document cannot progress");
            }
            conn.lrem::<_, _, ()>(core.names.inflight_key(), 1, id)
                .await?;
            conn.publish::<_, _, ()>(core.names.channel_key(id), KeySpace::STOP)
                .await?;
        }
    }
    Ok(())
}
