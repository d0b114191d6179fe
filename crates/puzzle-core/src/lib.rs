//! Puzzle-Live Core Library
//!
//! Session synchronization and game state for a shared jigsaw puzzle.
//! Every participant runs one [`Session`]; sessions agree on a single
//! game state by exchanging short text messages through one replicated
//! string field with last-write-wins semantics.
//!
//! The scene (piece transforms, grabbing, audio, UI) is reached only
//! through the [`Scene`] trait and the [`Effect`] stream.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod clock;
pub mod codec;
pub mod config;
pub mod game;
pub mod headless;
pub mod ledger;
pub mod ownership;
pub mod piece;
pub mod pose;
pub mod resync;
pub mod scene;
pub mod session;
pub mod state;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

pub use catalog::{Catalog, CatalogError, DetailCard, PieceInfo};
pub use clock::format_clock;
pub use codec::{CodecError, Message, MessageKind};
pub use config::{SessionConfig, ShuffleRails, Tolerances};
pub use game::{GameContext, GameStateMachine};
pub use headless::{HeadlessScene, SharedWorld};
pub use ledger::ScoreLedger;
pub use ownership::{PieceOwnershipTracker, PieceTransition, Settle, settle};
pub use piece::{PieceSet, PuzzlePiece};
pub use pose::{Pose, Tolerance};
pub use resync::{
    JoinOnly, ResyncPolicy, ResyncProtocol, ResyncState, RetryUnanswered, SyncSnapshot,
};
pub use scene::{Banner, Cue, Effect, Outbox, PieceColor, PieceLabel, Scene, SessionEvent};
pub use session::{DispatchError, Session};
pub use state::{Difficulty, GamePhase, IslandType, ParticipantId, SystemState, TargetArea};
pub use transport::{DropPolicy, FieldEndpoint, ReplicatedField, SharedField, TransportError};
