//! Boundary between the session and the 3D scene.
//!
//! The session reads the scene through [`Scene`] and writes to it only
//! by emitting [`Effect`]s. Notifications for UI and audio layers are
//! emitted as [`SessionEvent`]s.

use crate::catalog::DetailCard;
use crate::pose::Pose;
use crate::state::{Difficulty, GamePhase, ParticipantId, SystemState, TargetArea};

/// Read access to the scene plus object ownership.
pub trait Scene {
    fn local_participant(&self) -> ParticipantId;

    /// True for the single participant that answers resync requests.
    fn is_local_authority(&self) -> bool;

    /// Takes manipulation rights over a piece object.
    fn claim_ownership(&mut self, piece: usize);

    fn is_grasped(&self, piece: usize) -> bool;

    /// Participant currently grasping the piece, if the platform knows.
    fn grasping_participant(&self, piece: usize) -> Option<ParticipantId>;

    /// `None` when the piece has no object in the scene.
    fn current_pose(&self, piece: usize) -> Option<Pose>;

    /// Pose of the piece's canonical anchor object.
    fn anchor_pose(&self, piece: usize) -> Option<Pose>;
}

/// Piece tint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceColor {
    Default,
    /// In-scope piece that still has to be placed.
    Unplaced,
}

/// Floating label above a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceLabel {
    /// Name only, or name with its reading.
    Simple { kana: bool },
    /// Full detail card.
    Detail,
    Hidden,
}

/// Sound effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cue {
    TabClick,
    Pickup,
    CountDown,
    GameStart,
    GameClear,
    NewRecord,
    Reset,
    PieceCorrect,
}

/// Banner animation triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Banner {
    CountDown,
    GameClear,
    NewRecord,
    Reset,
    /// Selector panel flash on clear.
    Blink,
}

/// A change the scene should apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Animate a piece to `pose` over `duration` seconds (0 = snap).
    MovePiece {
        piece: usize,
        pose: Pose,
        duration: f32,
    },
    SetPickupable {
        piece: usize,
        pickupable: bool,
    },
    SetPieceColor {
        piece: usize,
        color: PieceColor,
    },
    SetPieceLabel {
        piece: usize,
        label: PieceLabel,
    },
    /// Text shown by the grab prompt. `None` clears it.
    SetGrabHint {
        piece: usize,
        hint: Option<String>,
    },
    ShowPieceDetail {
        piece: usize,
        card: DetailCard,
    },
    PlayCue(Cue),
    Banner(Banner),
    TimerText(String),
    HighlightDifficulty(Difficulty),
    HighlightArea(TargetArea),
    SelectorInteractable(bool),
    BestScoreText {
        difficulty: Difficulty,
        area: TargetArea,
        text: String,
    },
}

/// Notifications for collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PieceLocked(usize),
    PhaseChanged {
        system: SystemState,
        phase: GamePhase,
    },
    CorrectnessChanged {
        piece: usize,
        correct: bool,
    },
    CountdownTick(u32),
    ScoreImproved {
        difficulty: Difficulty,
        area: TargetArea,
        time: f32,
    },
}

/// Pending effects and events, drained by the host once per frame.
#[derive(Debug, Default)]
pub struct Outbox {
    effects: Vec<Effect>,
    events: Vec<SessionEvent>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub fn event(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    pub fn cue(&mut self, cue: Cue) {
        self.effects.push(Effect::PlayCue(cue));
    }

    pub fn banner(&mut self, banner: Banner) {
        self.effects.push(Effect::Banner(banner));
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }
}
