//! Bounded handler pool that drains claimed documents.
//!
//! Claimed documents are submitted through a bounded channel; a fixed set of
//! worker tasks runs the user handler and records the terminal state. A full
//! channel rejects the submission, which the claim loop compensates for by
//! re-enqueueing the document.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::{Handler, QueueCore};
use crate::core::{Document, State};

/// Why a submission to the handler pool was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchError {
    /// The dispatch queue is at capacity.
    Full,
    /// The pool has been shut down.
    Closed,
}

pub(crate) struct HandlerScheduler<T: Document> {
    tx: Mutex<Option<mpsc::Sender<T>>>,
    workers: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl<T: Document> HandlerScheduler<T> {
    /// Spawn the worker tasks and return the pool handle.
    pub(crate) fn start(core: Arc<QueueCore<T>>, handler: Arc<dyn Handler<T>>) -> Self {
        let (tx, rx) = mpsc::channel(core.config.scheduler_capacity);
        let rx = Arc::new(AsyncMutex::new(rx));
        let mut workers = Vec::with_capacity(core.config.scheduler_workers);
        for worker in 0..core.config.scheduler_workers {
            workers.push(tokio::spawn(worker_loop(
                worker,
                Arc::clone(&rx),
                Arc::clone(&core),
                Arc::clone(&handler),
            )));
        }
        Self {
            tx: Mutex::new(Some(tx)),
            workers: AsyncMutex::new(workers),
        }
    }

    /// Submit a document without blocking.
    pub(crate) fn dispatch(&self, document: T) -> Result<(), DispatchError> {
        let guard = self.tx.lock().expect("dispatch sender poisoned");
        let Some(tx) = guard.as_ref() else {
            return Err(DispatchError::Closed);
        };
        tx.try_send(document).map_err(|e| match e {
            TrySendError::Full(_) => DispatchError::Full,
            TrySendError::Closed(_) => DispatchError::Closed,
        })
    }

    /// Stop accepting documents and join the workers within `grace`.
    pub(crate) async fn close(&self, grace: Duration) {
        self.tx.lock().expect("dispatch sender poisoned").take();
        let deadline = tokio::time::Instant::now() + grace;
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "handler worker ended abnormally"),
                Err(_) => warn!("handler worker did not stop within the grace period"),
            }
        }
    }
}

async fn worker_loop<T: Document>(
    worker: usize,
    rx: Arc<AsyncMutex<mpsc::Receiver<T>>>,
    core: Arc<QueueCore<T>>,
    handler: Arc<dyn Handler<T>>,
) {
    debug!(worker, queue = %core.config.name, "handler worker started");
    loop {
        // Hold the receiver only for one bounded wait so that shutdown and
        // the other workers are never starved.
        let next = {
            let mut rx = rx.lock().await;
            match tokio::time::timeout(core.config.poll_delay, rx.recv()).await {
                Ok(next) => next,
                Err(_) => continue,
            }
        };
        let Some(document) = next else {
            break;
        };
        run_one(&core, handler.as_ref(), document).await;
    }
    debug!(worker, queue = %core.config.name, "handler worker stopped");
}

/// Run the user handler and acknowledge the in-flight entry.
async fn run_one<T: Document>(core: &QueueCore<T>, handler: &dyn Handler<T>, document: T) {
    let id = document.id().to_string();
    match handler.handle(document).await {
        Ok(()) => {
            if let Err(e) = core.finish(&id, State::Done, "").await {
                error!(%id, error = %e, "could not record completion");
            }
        }
        Err(handler_error) => {
            warn!(%id, error = %handler_error, "handler failed");
            if let Err(e) = core
                .finish(&id, State::Failed, &handler_error.to_string())
                .await
            {
                error!(%id, error = %e, "could not record failure");
            }
        }
    }
}
