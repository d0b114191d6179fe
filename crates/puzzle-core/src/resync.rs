//! Late-join resynchronization.
//!
//! The replicated field only holds the latest message, so a joiner
//! cannot replay history. It asks the authority once for a full
//! [`SyncSnapshot`] instead.

use crate::state::{Difficulty, GamePhase, SystemState, TargetArea};

/// Full session state carried by a `SYNC_STATE` message.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    pub system: SystemState,
    pub phase: GamePhase,
    pub difficulty: Difficulty,
    pub area: TargetArea,
    /// Seconds since the game clock started.
    pub elapsed: f32,
    /// Per-piece correctness, piece index ascending.
    pub correctness: Vec<bool>,
    /// Serialized score ledger.
    pub ledger: String,
}

/// Progress of this participant's resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResyncState {
    #[default]
    NotRequested,
    Requested,
    Satisfied,
}

/// Decides when a participant asks for a fresh snapshot after the
/// initial one.
pub trait ResyncPolicy: Send {
    /// Called once per tick while the session is running.
    fn should_request(&mut self, now: f32, state: ResyncState) -> bool;
}

/// Requests only once, on join.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinOnly;

impl ResyncPolicy for JoinOnly {
    fn should_request(&mut self, _now: f32, _state: ResyncState) -> bool {
        false
    }
}

/// Retries at a fixed interval until a snapshot arrives.
#[derive(Debug, Clone, Copy)]
pub struct RetryUnanswered {
    pub interval: f32,
    last: Option<f32>,
}

impl RetryUnanswered {
    pub const fn new(interval: f32) -> Self {
        Self {
            interval,
            last: None,
        }
    }
}

impl ResyncPolicy for RetryUnanswered {
    fn should_request(&mut self, now: f32, state: ResyncState) -> bool {
        if state != ResyncState::Requested {
            self.last = None;
            return false;
        }
        match self.last {
            None => {
                self.last = Some(now);
                false
            }
            Some(last) if now - last >= self.interval => {
                self.last = Some(now);
                true
            }
            Some(_) => false,
        }
    }
}

/// Resync state machine of one participant.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResyncProtocol {
    state: ResyncState,
}

impl ResyncProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn state(&self) -> ResyncState {
        self.state
    }

    /// Marks a request as sent. Returns false for the authority, which
    /// never requests.
    pub fn request(&mut self, is_authority: bool) -> bool {
        if is_authority {
            return false;
        }
        self.state = ResyncState::Requested;
        true
    }

    /// Whether an incoming snapshot should be applied. Snapshots are
    /// accepted from the first request on, and keep being accepted after
    /// one was applied.
    pub const fn accepts_snapshot(&self) -> bool {
        !matches!(self.state, ResyncState::NotRequested)
    }

    pub fn satisfied(&mut self) {
        if self.accepts_snapshot() {
            self.state = ResyncState::Satisfied;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_progression() {
        let mut resync = ResyncProtocol::new();
        assert_eq!(resync.state(), ResyncState::NotRequested);
        assert!(!resync.accepts_snapshot());

        resync.satisfied();
        assert_eq!(resync.state(), ResyncState::NotRequested);

        assert!(resync.request(false));
        assert_eq!(resync.state(), ResyncState::Requested);
        assert!(resync.accepts_snapshot());

        resync.satisfied();
        assert_eq!(resync.state(), ResyncState::Satisfied);
        assert!(resync.accepts_snapshot());
    }

    #[test]
    fn test_authority_never_requests() {
        let mut resync = ResyncProtocol::new();
        assert!(!resync.request(true));
        assert_eq!(resync.state(), ResyncState::NotRequested);
    }

    #[test]
    fn test_join_only_policy() {
        let mut policy = JoinOnly;
        assert!(!policy.should_request(100.0, ResyncState::Requested));
    }

    #[test]
    fn test_retry_policy() {
        let mut policy = RetryUnanswered::new(5.0);
        assert!(!policy.should_request(0.0, ResyncState::Requested));
        assert!(!policy.should_request(4.0, ResyncState::Requested));
        assert!(policy.should_request(5.0, ResyncState::Requested));
        assert!(!policy.should_request(6.0, ResyncState::Requested));
        assert!(!policy.should_request(20.0, ResyncState::Satisfied));
    }
}
