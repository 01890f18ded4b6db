//! User documents and the timed wrapper stored alongside them.

use serde::{Deserialize, Serialize};

/// A user payload that can travel through a queue.
///
/// The queue treats the payload as opaque; the only capability it needs is a
/// stable, non-empty string identity. Every derived key, lock, and channel
/// for the document is keyed by this ID, so two pushes with the same ID refer
/// to the same logical document.
///
/// ## Example
/// ```rust
/// use redq::Document;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Invoice {
///     invoice_id: String,
///     amount_cents: u64,
/// }
///
/// impl Document for Invoice {
///     fn id(&self) -> &str {
///         &self.invoice_id
///     }
/// }
/// ```
pub trait Document: Send + Sync + 'static {
    /// The stable identity of this document.
    fn id(&self) -> &str;
}

/// A document together with the moment it was accepted by `push`.
///
/// The timestamp is assigned once at enqueue time and never updated; the
/// consumer compares it against the configured discard time to decide whether
/// the document is still worth dispatching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedPayload<T> {
    document: T,
    enqueued_at_ms: i64,
}

impl<T> TimedPayload<T> {
    /// Wrap a document with its enqueue timestamp (milliseconds since epoch).
    pub fn new(document: T, enqueued_at_ms: i64) -> Self {
        Self {
            document,
            enqueued_at_ms,
        }
    }

    /// The wrapped document.
    pub fn document(&self) -> &T {
        &self.document
    }

    /// Unwrap into the document, dropping the timestamp.
    pub fn into_document(self) -> T {
        self.document
    }

    /// When the document was enqueued, in milliseconds since the epoch.
    pub fn enqueued_at_ms(&self) -> i64 {
        self.enqueued_at_ms
    }

    /// Age of the payload at the given instant, in milliseconds.
    pub fn age_ms_at(&self, now_ms: i64) -> i64 {
        now_ms - self.enqueued_at_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Probe {
        id: String,
    }

    impl Document for Probe {
        fn id(&self) -> &str {
            &self.id
        }
    }

    #[test]
    fn timed_payload_age() {
        let payload = TimedPayload::new(
            Probe {
                id: "p1".to_string(),
            },
            1_000,
        );
        assert_eq!(payload.enqueued_at_ms(), 1_000);
        assert_eq!(payload.age_ms_at(4_500), 3_500);
        assert_eq!(payload.document().id(), "p1");
    }

    #[test]
    fn timed_payload_round_trip() {
        let payload = TimedPayload::new(
            Probe {
                id: "p2".to_string(),
            },
            42,
        );
        let raw = serde_json::to_string(&payload).unwrap();
        let back: TimedPayload<Probe> = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, payload);
    }
}
