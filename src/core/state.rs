//! Document states and the records published on state channels.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The lifecycle state of a document in a queue.
///
/// States progress along a fixed graph:
///
/// ```text
/// NEW → PROCESSING → DONE
///             ↓
///          FAILED
/// ```
///
/// `DONE` and `FAILED` are terminal; the queue never updates a document past
/// them, and their records simply expire with the state TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Accepted by `push`, not yet claimed by a consumer.
    New,
    /// Claimed by a consumer; the handler may be running.
    Processing,
    /// The handler completed successfully.
    Done,
    /// The handler reported an error; detail is in the state info.
    Failed,
}

impl State {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Done | State::Failed)
    }

    /// Whether the transition graph allows moving to `target` from here.
    pub fn can_transition_to(&self, target: State) -> bool {
        matches!(
            (self, target),
            (State::New, State::Processing)
                | (State::Processing, State::Done)
                | (State::Processing, State::Failed)
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::New => "NEW",
            State::Processing => "PROCESSING",
            State::Done => "DONE",
            State::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// A state record as stored under the state key and published on the state
/// channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateInfo {
    state: State,
    updated_at_ms: i64,
    info: String,
}

impl StateInfo {
    /// Create a record for `state` stamped at `updated_at_ms`.
    ///
    /// `info` is free-form; by convention it carries the handler's error
    /// message when the state is [`State::Failed`] and is empty otherwise.
    pub fn new(state: State, updated_at_ms: i64, info: impl Into<String>) -> Self {
        Self {
            state,
            updated_at_ms,
            info: info.into(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn updated_at_ms(&self) -> i64 {
        self.updated_at_ms
    }

    pub fn info(&self) -> &str {
        &self.info
    }
}

/// A state record paired with the store key it was read from, as yielded by
/// state enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedStateInfo {
    key: String,
    state_info: StateInfo,
}

impl ExtendedStateInfo {
    pub fn new(key: impl Into<String>, state_info: StateInfo) -> Self {
        Self {
            key: key.into(),
            state_info,
        }
    }

    /// The store key the record was read from.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state_info(&self) -> &StateInfo {
        &self.state_info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_graph() {
        assert!(State::New.can_transition_to(State::Processing));
        assert!(State::Processing.can_transition_to(State::Done));
        assert!(State::Processing.can_transition_to(State::Failed));

        // No shortcuts, no reversals.
        assert!(!State::New.can_transition_to(State::Done));
        assert!(!State::New.can_transition_to(State::Failed));
        assert!(!State::Processing.can_transition_to(State::New));
        assert!(!State::Done.can_transition_to(State::Processing));
        assert!(!State::Failed.can_transition_to(State::Processing));
        assert!(!State::Done.can_transition_to(State::Failed));
    }

    #[test]
    fn terminal_states() {
        assert!(!State::New.is_terminal());
        assert!(!State::Processing.is_terminal());
        assert!(State::Done.is_terminal());
        assert!(State::Failed.is_terminal());
    }

    #[test]
    fn state_wire_names() {
        assert_eq!(serde_json::to_string(&State::New).unwrap(), "\"NEW\"");
        assert_eq!(
            serde_json::to_string(&State::Processing).unwrap(),
            "\"PROCESSING\""
        );
        assert_eq!(serde_json::to_string(&State::Done).unwrap(), "\"DONE\"");
        assert_eq!(serde_json::to_string(&State::Failed).unwrap(), "\"FAILED\"");
    }

    #[test]
    fn state_info_round_trip() {
        let info = StateInfo::new(State::Failed, 1_234, "boom");
        let raw = serde_json::to_string(&info).unwrap();
        let back: StateInfo = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, info);
        assert_eq!(back.info(), "boom");
    }
}
