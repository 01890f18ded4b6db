//! # redq
//!
//! A durable, at-least-once job queue on top of Redis.
//!
//! **redq** lets producers hand opaque documents to one or more consumer
//! processes. Every document accepted by [`RedisQueue::push`] eventually ends
//! up `DONE`, `FAILED`, or — when the consumer working on it dies — back in
//! the ready list for someone else. State transitions are published per
//! document over pub/sub, so any party can synchronously await completion.
//!
//! ## 🚀 Features
//!
//! - **Atomic enqueue**: content, state, lock, and ready-list entry are
//!   written in one MULTI/EXEC group, with the initial `NEW` state published
//!   in the same group
//! - **Two-list dequeue**: consumers move IDs from the ready list into an
//!   in-flight list with `BRPOPLPUSH`, so a crash never drops a claim
//! - **Liveness via lock TTLs**: a short-TTL lock key distinguishes a slow
//!   worker from a dead one; the in-flight scan restores orphaned documents
//! - **Race-free waits**: [`RedisQueue::state_wait`] subscribes before
//!   reading the current state, so a completion can never slip between the
//!   two
//! - **Pluggable edges**: serialization ([`Codec`]), metrics ([`Recorder`]),
//!   and the per-document [`Handler`] are all injected
//!
//! ## 🎯 Quick start
//!
//! ```rust,no_run
//! use redq::{Document, Handler, HandlerError, QueueConfig, RedisQueue};
//! use async_trait::async_trait;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Email {
//!     id: String,
//!     to: String,
//! }
//!
//! impl Document for Email {
//!     fn id(&self) -> &str {
//!         &self.id
//!     }
//! }
//!
//! struct Mailer;
//!
//! #[async_trait]
//! impl Handler<Email> for Mailer {
//!     async fn handle(&self, email: Email) -> Result<(), HandlerError> {
//!         println!("sending to {}", email.to);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> redq::Result<()> {
//!     let client = redis::Client::open("redis://127.0.0.1:6379")
//!         .map_err(redq::RedqError::from)?;
//!     let queue = RedisQueue::new(QueueConfig::new("mail"), client, Arc::new(Mailer)).await?;
//!     queue.start_consumer();
//!
//!     queue
//!         .push_and_wait(
//!             Email {
//!                 id: "msg-1".to_string(),
//!                 to: "user@example.com".to_string(),
//!             },
//!             Duration::from_secs(5),
//!         )
//!         .await?;
//!
//!     queue.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## 🔄 Document lifecycle
//!
//! ```text
//! push ──→ NEW ──→ PROCESSING ──→ DONE
//!                       │
//!                       └──→ FAILED
//! ```
//!
//! A consumer claims a document by moving its ID into the in-flight list and
//! refreshing its lock. The handler's result decides the terminal state and
//! clears the in-flight entry. If neither happens before the lock expires,
//! the scan loop restores a `PROCESSING` document to the ready list; an
//! entry in any other unlocked state is cleared, and waiters on it are
//! released with an error.
//!
//! Delivery is at-least-once: a consumer that stalls past its lock TTL and
//! then finishes races with the replacement consumer. Handlers should be
//! idempotent.
//!
//! ## 📊 Observability
//!
//! The queue reports push/idle/dispatch/restore timings, a ready-list length
//! gauge, and a serialization-failure counter through an injected
//! [`Recorder`]. [`MetricsRecorder`] bridges to the `metrics` facade crate;
//! the default [`NullRecorder`] disables reporting. Internal logging goes
//! through `tracing`.

pub mod codec;
pub mod core;
pub mod error;
pub mod metrics;
pub mod queue;

// Re-export main types for convenience
pub use codec::{Codec, JsonCodec};
pub use core::{Document, ExtendedStateInfo, State, StateInfo, TimedPayload};
pub use error::{HandlerError, RedqError, Result, WaitError};
pub use metrics::{MetricsRecorder, NullRecorder, Recorder};
pub use queue::{Handler, KeySpace, QueueConfig, RedisQueue, StateWait};
