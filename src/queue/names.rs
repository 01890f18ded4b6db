//! Derived key and channel names for one queue.

/// Deterministic mapping from a queue name and document ID to the store keys
/// and channels the queue uses.
///
/// Every derived name embeds the queue name, so any number of queues can
/// share a single store without colliding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    queue: String,
    ready: String,
    inflight: String,
}

impl KeySpace {
    /// Sentinel channel message published when a document is dropped.
    ///
    /// Serialized state records are JSON objects, so this bare word can never
    /// be confused with one.
    pub const STOP: &'static str = "STOP";

    /// Sentinel value stored under lock keys.
    pub(crate) const LOCK_VALUE: &'static str = "locked";

    pub fn new(queue: impl Into<String>) -> Self {
        let queue = queue.into();
        let ready = format!("redq:{queue}:ready");
        let inflight = format!("redq:{queue}:inflight");
        Self {
            queue,
            ready,
            inflight,
        }
    }

    /// The queue name all keys are derived from.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// List of IDs awaiting a consumer.
    pub fn ready_key(&self) -> &str {
        &self.ready
    }

    /// List of IDs a consumer has claimed but not acknowledged.
    pub fn inflight_key(&self) -> &str {
        &self.inflight
    }

    /// Key holding the serialized timed payload of a document.
    pub fn content_key(&self, id: &str) -> String {
        format!("redq:{}:content:{}", self.queue, id)
    }

    /// Key holding the serialized state record of a document.
    pub fn state_key(&self, id: &str) -> String {
        format!("redq:{}:state:{}", self.queue, id)
    }

    /// Short-TTL key whose presence means a consumer owns the document.
    pub fn lock_key(&self, id: &str) -> String {
        format!("redq:{}:lock:{}", self.queue, id)
    }

    /// Pub/sub channel carrying state records (or [`KeySpace::STOP`]) for a
    /// document.
    pub fn channel_key(&self, id: &str) -> String {
        format!("redq:{}:channel:{}", self.queue, id)
    }

    /// Glob pattern matching every state key of this queue.
    pub fn state_key_pattern(&self) -> String {
        self.state_key("*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_embed_queue_name() {
        let names = KeySpace::new("billing");
        assert_eq!(names.ready_key(), "redq:billing:ready");
        assert_eq!(names.inflight_key(), "redq:billing:inflight");
        assert_eq!(names.content_key("a"), "redq:billing:content:a");
        assert_eq!(names.state_key("a"), "redq:billing:state:a");
        assert_eq!(names.lock_key("a"), "redq:billing:lock:a");
        assert_eq!(names.channel_key("a"), "redq:billing:channel:a");
    }

    #[test]
    fn queues_do_not_collide() {
        let a = KeySpace::new("a");
        let b = KeySpace::new("b");
        assert_ne!(a.ready_key(), b.ready_key());
        assert_ne!(a.state_key("x"), b.state_key("x"));
    }

    #[test]
    fn pattern_matches_state_keys_only() {
        let names = KeySpace::new("q");
        assert_eq!(names.state_key_pattern(), "redq:q:state:*");
    }

    #[test]
    fn stop_sentinel_is_not_json() {
        assert!(serde_json::from_str::<serde_json::Value>(KeySpace::STOP).is_err());
    }
}
