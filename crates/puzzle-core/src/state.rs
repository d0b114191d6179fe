//! Lifecycle and selection enums shared by every component.
//!
//! Each enum carries an explicit wire code. The codes are part of the
//! message format and must not follow declaration order by accident.

use serde::{Deserialize, Serialize};

/// Platform-assigned identifier of a participant.
pub type ParticipantId = u32;

/// Coarse state of the whole puzzle system on one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SystemState {
    /// Waiting for the scene to settle; no messages are sent or handled.
    #[default]
    Initialize,
    /// Free play, pieces can be picked up and inspected.
    Idle,
    /// A game is running; see [`GamePhase`] for the detail.
    InGame,
}

impl SystemState {
    pub const fn code(self) -> u8 {
        match self {
            Self::Initialize => 0,
            Self::Idle => 1,
            Self::InGame => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Initialize),
            1 => Some(Self::Idle),
            2 => Some(Self::InGame),
            _ => None,
        }
    }
}

/// Phase of a game. Only meaningful while the system is [`SystemState::InGame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GamePhase {
    #[default]
    Idle,
    /// Countdown before the pieces become grabbable.
    WaitStart,
    /// Clock is running.
    InGame,
    /// All target pieces placed; dwelling before the result.
    Finish,
    /// Result shown; resets on the next tick.
    Result,
}

impl GamePhase {
    pub const fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::WaitStart => 1,
            Self::InGame => 2,
            Self::Finish => 3,
            Self::Result => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Idle),
            1 => Some(Self::WaitStart),
            2 => Some(Self::InGame),
            3 => Some(Self::Finish),
            4 => Some(Self::Result),
            _ => None,
        }
    }
}

/// Game difficulty. Controls placement tolerance and label verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Difficulty {
    #[default]
    Easy,
    Normal,
    Difficult,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Self::Easy, Self::Normal, Self::Difficult];

    pub const fn code(self) -> u8 {
        match self {
            Self::Easy => 0,
            Self::Normal => 1,
            Self::Difficult => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Easy),
            1 => Some(Self::Normal),
            2 => Some(Self::Difficult),
            _ => None,
        }
    }

    /// Whether piece names stay hidden for the whole game.
    pub const fn hides_labels(self) -> bool {
        matches!(self, Self::Difficult)
    }
}

/// Which island group a piece belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum IslandType {
    #[default]
    Main,
    Remote,
}

impl IslandType {
    pub const fn code(self) -> u8 {
        match self {
            Self::Main => 0,
            Self::Remote => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Main),
            1 => Some(Self::Remote),
            _ => None,
        }
    }
}

/// Which pieces take part in a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum TargetArea {
    All,
    #[default]
    OnlyMain,
    OnlyRemote,
}

impl TargetArea {
    pub const ALL: [TargetArea; 3] = [Self::All, Self::OnlyMain, Self::OnlyRemote];

    pub const fn code(self) -> u8 {
        match self {
            Self::All => 0,
            Self::OnlyMain => 1,
            Self::OnlyRemote => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::All),
            1 => Some(Self::OnlyMain),
            2 => Some(Self::OnlyRemote),
            _ => None,
        }
    }

    /// Returns true if a piece on `island` is in scope for this area.
    pub const fn includes(self, island: IslandType) -> bool {
        match self {
            Self::All => true,
            Self::OnlyMain => matches!(island, IslandType::Main),
            Self::OnlyRemote => matches!(island, IslandType::Remote),
        }
    }
}
