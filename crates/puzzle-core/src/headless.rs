//! In-memory scene for tests and the simulator.
//!
//! [`SharedWorld`] holds what every participant observes: piece poses,
//! grasp state and object ownership. Each participant gets its own
//! [`HeadlessScene`] on top of it, which also keeps the purely local
//! presentation state (pickup flags, labels, sounds, texts).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::catalog::DetailCard;
use crate::pose::Pose;
use crate::scene::{Banner, Cue, Effect, PieceColor, PieceLabel, Scene};
use crate::state::{Difficulty, ParticipantId, TargetArea};

#[derive(Debug, Default)]
struct WorldState {
    anchors: Vec<Option<Pose>>,
    poses: Vec<Option<Pose>>,
    grasped: Vec<bool>,
    grasped_by: Vec<Option<ParticipantId>>,
    owners: Vec<Option<ParticipantId>>,
}

/// Scene objects shared by all participants of a room.
#[derive(Debug, Clone, Default)]
pub struct SharedWorld {
    inner: Arc<Mutex<WorldState>>,
}

impl SharedWorld {
    /// One entry per piece; `None` means the piece has no object. Pieces
    /// start on their anchors.
    pub fn new(anchors: Vec<Option<Pose>>) -> Self {
        let n = anchors.len();
        Self {
            inner: Arc::new(Mutex::new(WorldState {
                poses: anchors.clone(),
                anchors,
                grasped: vec![false; n],
                grasped_by: vec![None; n],
                owners: vec![None; n],
            })),
        }
    }

    /// Local view for one participant.
    pub fn scene(&self, participant: ParticipantId, is_authority: bool) -> HeadlessScene {
        let n = self.inner.lock().poses.len();
        HeadlessScene {
            world: self.clone(),
            participant,
            is_authority,
            pickupable: vec![true; n],
            colors: vec![PieceColor::Default; n],
            labels: vec![PieceLabel::Simple { kana: false }; n],
            hints: vec![None; n],
            detail: None,
            cues: Vec::new(),
            banners: Vec::new(),
            timer_text: String::new(),
            highlight: (Difficulty::default(), TargetArea::default()),
            selector_interactable: true,
            best_scores: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pose(&self, piece: usize) -> Option<Pose> {
        self.inner.lock().poses.get(piece).copied().flatten()
    }

    pub fn anchor(&self, piece: usize) -> Option<Pose> {
        self.inner.lock().anchors.get(piece).copied().flatten()
    }

    /// Moves an existing piece object. Returns false if it has none.
    pub fn set_pose(&self, piece: usize, pose: Pose) -> bool {
        let mut world = self.inner.lock();
        match world.poses.get_mut(piece) {
            Some(slot) if slot.is_some() => {
                *slot = Some(pose);
                true
            }
            _ => false,
        }
    }

    /// Marks a piece as grasped, bypassing pickup flags.
    pub fn grasp(&self, piece: usize, by: Option<ParticipantId>) {
        let mut world = self.inner.lock();
        if piece < world.grasped.len() {
            world.grasped[piece] = true;
            world.grasped_by[piece] = by;
            if by.is_some() {
                world.owners[piece] = by;
            }
        }
    }

    pub fn ungrasp(&self, piece: usize) {
        let mut world = self.inner.lock();
        if piece < world.grasped.len() {
            world.grasped[piece] = false;
            world.grasped_by[piece] = None;
        }
    }

    pub fn owner(&self, piece: usize) -> Option<ParticipantId> {
        self.inner.lock().owners.get(piece).copied().flatten()
    }
}

/// One participant's scene: shared objects plus local presentation.
#[derive(Debug)]
pub struct HeadlessScene {
    world: SharedWorld,
    participant: ParticipantId,
    is_authority: bool,
    pickupable: Vec<bool>,
    colors: Vec<PieceColor>,
    labels: Vec<PieceLabel>,
    hints: Vec<Option<String>>,
    detail: Option<(usize, DetailCard)>,
    cues: Vec<Cue>,
    banners: Vec<Banner>,
    timer_text: String,
    highlight: (Difficulty, TargetArea),
    selector_interactable: bool,
    best_scores: HashMap<(Difficulty, TargetArea), String>,
}

impl HeadlessScene {
    pub fn apply(&mut self, effects: impl IntoIterator<Item = Effect>) {
        for effect in effects {
            self.apply_one(effect);
        }
    }

    fn apply_one(&mut self, effect: Effect) {
        match effect {
            Effect::MovePiece { piece, pose, .. } => {
                self.world.set_pose(piece, pose);
            }
            Effect::SetPickupable { piece, pickupable } => {
                if let Some(flag) = self.pickupable.get_mut(piece) {
                    *flag = pickupable;
                }
            }
            Effect::SetPieceColor { piece, color } => {
                if let Some(slot) = self.colors.get_mut(piece) {
                    *slot = color;
                }
            }
            Effect::SetPieceLabel { piece, label } => {
                if let Some(slot) = self.labels.get_mut(piece) {
                    *slot = label;
                }
            }
            Effect::SetGrabHint { piece, hint } => {
                if let Some(slot) = self.hints.get_mut(piece) {
                    *slot = hint;
                }
            }
            Effect::ShowPieceDetail { piece, card } => self.detail = Some((piece, card)),
            Effect::PlayCue(cue) => self.cues.push(cue),
            Effect::Banner(banner) => self.banners.push(banner),
            Effect::TimerText(text) => self.timer_text = text,
            Effect::HighlightDifficulty(difficulty) => self.highlight.0 = difficulty,
            Effect::HighlightArea(area) => self.highlight.1 = area,
            Effect::SelectorInteractable(on) => self.selector_interactable = on,
            Effect::BestScoreText {
                difficulty,
                area,
                text,
            } => {
                self.best_scores.insert((difficulty, area), text);
            }
        }
    }

    /// Grabs a piece as this participant. Fails when the piece is not
    /// pickupable here, has no object, or is already held.
    pub fn grab(&mut self, piece: usize) -> bool {
        if !self.pickupable.get(piece).copied().unwrap_or(false) {
            return false;
        }
        if self.world.pose(piece).is_none() || self.is_grasped(piece) {
            return false;
        }
        self.world.grasp(piece, Some(self.participant));
        true
    }

    /// Moves a piece this participant is holding.
    pub fn move_held(&mut self, piece: usize, pose: Pose) -> bool {
        if self.grasping_participant(piece) != Some(self.participant) {
            return false;
        }
        self.world.set_pose(piece, pose)
    }

    pub fn release(&mut self, piece: usize) -> bool {
        if self.grasping_participant(piece) != Some(self.participant) {
            return false;
        }
        self.world.ungrasp(piece);
        true
    }

    pub fn world(&self) -> &SharedWorld {
        &self.world
    }

    pub fn pickupable(&self, piece: usize) -> bool {
        self.pickupable.get(piece).copied().unwrap_or(false)
    }

    pub fn color(&self, piece: usize) -> Option<PieceColor> {
        self.colors.get(piece).copied()
    }

    pub fn label(&self, piece: usize) -> Option<PieceLabel> {
        self.labels.get(piece).copied()
    }

    pub fn hint(&self, piece: usize) -> Option<&str> {
        self.hints.get(piece).and_then(|h| h.as_deref())
    }

    pub fn detail(&self) -> Option<&(usize, DetailCard)> {
        self.detail.as_ref()
    }

    pub fn cues(&self) -> &[Cue] {
        &self.cues
    }

    pub fn banners(&self) -> &[Banner] {
        &self.banners
    }

    pub fn timer_text(&self) -> &str {
        &self.timer_text
    }

    pub const fn highlight(&self) -> (Difficulty, TargetArea) {
        self.highlight
    }

    pub const fn selector_interactable(&self) -> bool {
        self.selector_interactable
    }

    pub fn best_score(&self, difficulty: Difficulty, area: TargetArea) -> Option<&str> {
        self.best_scores.get(&(difficulty, area)).map(String::as_str)
    }
}

impl Scene for HeadlessScene {
    fn local_participant(&self) -> ParticipantId {
        self.participant
    }

    fn is_local_authority(&self) -> bool {
        self.is_authority
    }

    fn claim_ownership(&mut self, piece: usize) {
        let mut world = self.world.inner.lock();
        if let Some(owner) = world.owners.get_mut(piece) {
            *owner = Some(self.participant);
        }
    }

    fn is_grasped(&self, piece: usize) -> bool {
        self.world.inner.lock().grasped.get(piece).copied().unwrap_or(false)
    }

    fn grasping_participant(&self, piece: usize) -> Option<ParticipantId> {
        self.world.inner.lock().grasped_by.get(piece).copied().flatten()
    }

    fn current_pose(&self, piece: usize) -> Option<Pose> {
        self.world.pose(piece)
    }

    fn anchor_pose(&self, piece: usize) -> Option<Pose> {
        self.world.anchor(piece)
    }
}
