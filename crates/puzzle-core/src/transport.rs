//! The single replicated string field that carries every message.
//!
//! The field behaves like a one-slot mailbox: whoever owns it may write,
//! the latest write in a propagation window wins, and peers only ever see
//! the committed value. [`SharedField`] is the in-memory model used by
//! tests and the simulator.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::state::ParticipantId;

/// Error type for field writes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("participant {writer} wrote without owning the field (owner: {owner:?})")]
    NotOwner {
        writer: ParticipantId,
        owner: Option<ParticipantId>,
    },
}

/// Write access to the replicated field.
pub trait ReplicatedField {
    /// Participant this handle writes as.
    fn participant(&self) -> ParticipantId;

    fn owner(&self) -> Option<ParticipantId>;

    fn is_owner(&self) -> bool {
        self.owner() == Some(self.participant())
    }

    /// Takes write ownership. Ownership moves to the last claimant.
    fn claim(&mut self);

    /// Stores `value` locally. Fails unless this handle owns the field.
    fn write(&mut self, value: String) -> Result<(), TransportError>;

    /// Asks the transport to propagate the last written value.
    fn request_serialization(&mut self);
}

/// Which committed writes are lost on the way to peers.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DropPolicy {
    #[default]
    Never,
    /// Drop every n-th propagated write (1-based).
    EveryNth(u32),
    /// Drop each propagated write with probability `p`.
    Probability { p: f32, seed: u64 },
}

#[derive(Debug)]
struct Committed {
    seq: u64,
    writer: ParticipantId,
    value: String,
}

#[derive(Debug)]
struct Pending {
    writer: ParticipantId,
    value: String,
    requested: bool,
}

#[derive(Debug, Default)]
struct FieldSlot {
    owner: Option<ParticipantId>,
    pending: Option<Pending>,
    committed: Option<Committed>,
    policy: DropPolicy,
    drop_rng: Option<ChaCha8Rng>,
    propagated: u64,
    dropped: u64,
    overwritten: u64,
}

impl FieldSlot {
    fn should_drop(&mut self) -> bool {
        match self.policy {
            DropPolicy::Never => false,
            DropPolicy::EveryNth(n) => n > 0 && self.propagated % u64::from(n) == 0,
            DropPolicy::Probability { p, seed } => {
                let rng = self
                    .drop_rng
                    .get_or_insert_with(|| ChaCha8Rng::seed_from_u64(seed));
                rng.random::<f32>() < p
            }
        }
    }
}

/// In-memory replicated field shared by every participant of a room.
#[derive(Debug, Clone, Default)]
pub struct SharedField {
    slot: Arc<Mutex<FieldSlot>>,
}

impl SharedField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drop_policy(policy: DropPolicy) -> Self {
        let field = Self::new();
        field.set_drop_policy(policy);
        field
    }

    pub fn set_drop_policy(&self, policy: DropPolicy) {
        let mut slot = self.slot.lock();
        slot.policy = policy;
        slot.drop_rng = None;
    }

    /// Handle for one participant.
    pub fn endpoint(&self, participant: ParticipantId) -> FieldEndpoint {
        FieldEndpoint {
            field: self.clone(),
            participant,
            seen_seq: 0,
        }
    }

    /// Ends the current propagation window: the surviving pending write
    /// is committed unless the drop policy loses it.
    pub fn propagate(&self) -> bool {
        let mut slot = self.slot.lock();
        let Some(pending) = slot.pending.take() else {
            return false;
        };
        if !pending.requested {
            slot.pending = Some(pending);
            return false;
        }

        slot.propagated += 1;
        if slot.should_drop() {
            slot.dropped += 1;
            tracing::debug!("[field] dropped write from {}: {}", pending.writer, pending.value);
            return false;
        }

        let seq = slot.committed.as_ref().map_or(1, |c| c.seq + 1);
        slot.committed = Some(Committed {
            seq,
            writer: pending.writer,
            value: pending.value,
        });
        true
    }

    pub fn committed_value(&self) -> Option<String> {
        self.slot.lock().committed.as_ref().map(|c| c.value.clone())
    }

    pub fn owner(&self) -> Option<ParticipantId> {
        self.slot.lock().owner
    }

    /// Writes lost to the drop policy so far.
    pub fn dropped_count(&self) -> u64 {
        self.slot.lock().dropped
    }

    /// Writes replaced by a later write in the same window.
    pub fn overwritten_count(&self) -> u64 {
        self.slot.lock().overwritten
    }
}

/// One participant's handle on a [`SharedField`].
#[derive(Debug, Clone)]
pub struct FieldEndpoint {
    field: SharedField,
    participant: ParticipantId,
    seen_seq: u64,
}

impl FieldEndpoint {
    /// Returns the committed value if it changed since the last poll and
    /// was written by someone else.
    pub fn poll(&mut self) -> Option<String> {
        let slot = self.field.slot.lock();
        let committed = slot.committed.as_ref()?;
        if committed.seq <= self.seen_seq {
            return None;
        }
        self.seen_seq = committed.seq;
        (committed.writer != self.participant).then(|| committed.value.clone())
    }

    pub fn field(&self) -> &SharedField {
        &self.field
    }
}

impl ReplicatedField for FieldEndpoint {
    fn participant(&self) -> ParticipantId {
        self.participant
    }

    fn owner(&self) -> Option<ParticipantId> {
        self.field.owner()
    }

    fn claim(&mut self) {
        let mut slot = self.field.slot.lock();
        if slot.owner != Some(self.participant) {
            tracing::debug!("[field] ownership {:?} -> {}", slot.owner, self.participant);
            slot.owner = Some(self.participant);
        }
    }

    fn write(&mut self, value: String) -> Result<(), TransportError> {
        let mut slot = self.field.slot.lock();
        if slot.owner != Some(self.participant) {
            return Err(TransportError::NotOwner {
                writer: self.participant,
                owner: slot.owner,
            });
        }
        if let Some(prev) = slot.pending.take() {
            slot.overwritten += 1;
            tracing::debug!("[field] write from {} replaced by {}", prev.writer, self.participant);
        }
        slot.pending = Some(Pending {
            writer: self.participant,
            value,
            requested: false,
        });
        Ok(())
    }

    fn request_serialization(&mut self) {
        let mut slot = self.field.slot.lock();
        if let Some(pending) = slot.pending.as_mut() {
            if pending.writer == self.participant {
                pending.requested = true;
            }
        }
    }
}
