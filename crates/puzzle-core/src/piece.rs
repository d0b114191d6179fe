//! Puzzle pieces and their per-session flags.

use crate::catalog::Catalog;
use crate::pose::Pose;
use crate::scene::{Outbox, Scene, SessionEvent};
use crate::state::{IslandType, ParticipantId, TargetArea};

/// One jigsaw piece.
#[derive(Debug, Clone, PartialEq)]
pub struct PuzzlePiece {
    pub index: usize,
    pub name: String,
    pub island: IslandType,
    /// Canonical pose captured when the session was created. `None` when
    /// the scene had no anchor for this piece.
    pub anchor: Option<Pose>,
    pub held_by: Option<ParticipantId>,
    /// Who grabbed the piece last; `None` if the platform could not tell.
    pub last_owner: Option<ParticipantId>,
    pub on_right_position: bool,
}

impl PuzzlePiece {
    /// Invalid pieces are skipped by every per-piece operation.
    pub const fn is_valid(&self) -> bool {
        self.anchor.is_some()
    }
}

/// All pieces of a session, index-aligned with the catalog.
#[derive(Debug, Clone, Default)]
pub struct PieceSet {
    pieces: Vec<PuzzlePiece>,
}

impl PieceSet {
    /// Builds the set from the catalog, capturing anchors from the scene.
    pub fn from_catalog(catalog: &Catalog, scene: &dyn Scene) -> Self {
        let pieces = catalog
            .pieces
            .iter()
            .enumerate()
            .map(|(index, info)| {
                let anchor = scene.anchor_pose(index);
                if anchor.is_none() {
                    tracing::warn!("[piece] no anchor for {} ({})", info.object_name, index);
                }
                PuzzlePiece {
                    index,
                    name: info.name.clone(),
                    island: info.island,
                    anchor,
                    held_by: None,
                    last_owner: None,
                    on_right_position: false,
                }
            })
            .collect();
        Self { pieces }
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PuzzlePiece> {
        self.pieces.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PuzzlePiece> {
        self.pieces.get_mut(index)
    }

    /// Valid piece at `index`.
    pub fn valid(&self, index: usize) -> Option<&PuzzlePiece> {
        self.get(index).filter(|p| p.is_valid())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PuzzlePiece> {
        self.pieces.iter()
    }

    pub fn iter_valid(&self) -> impl Iterator<Item = &PuzzlePiece> {
        self.pieces.iter().filter(|p| p.is_valid())
    }

    /// Valid and part of the game for `area`.
    pub fn in_scope(&self, index: usize, area: TargetArea) -> bool {
        self.valid(index).is_some_and(|p| area.includes(p.island))
    }

    /// True when every valid in-scope piece is correctly placed.
    pub fn is_clear(&self, area: TargetArea) -> bool {
        self.iter_valid()
            .filter(|p| area.includes(p.island))
            .all(|p| p.on_right_position)
    }

    pub fn correctness_bits(&self) -> Vec<bool> {
        self.pieces.iter().map(|p| p.on_right_position).collect()
    }

    pub fn set_correct(&mut self, index: usize, correct: bool, out: &mut Outbox) {
        if let Some(piece) = self.pieces.get_mut(index) {
            if piece.on_right_position != correct {
                piece.on_right_position = correct;
                out.event(SessionEvent::CorrectnessChanged {
                    piece: index,
                    correct,
                });
            }
        }
    }

    pub fn reset_correctness(&mut self, out: &mut Outbox) {
        for index in 0..self.pieces.len() {
            self.set_correct(index, false, out);
        }
    }

    /// Overwrites every flag from a snapshot. A bitmap of the wrong length
    /// is ignored and false is returned.
    pub fn apply_bits(&mut self, bits: &[bool], out: &mut Outbox) -> bool {
        if bits.len() != self.pieces.len() {
            tracing::warn!(
                "[piece] correctness bitmap has {} entries, expected {}",
                bits.len(),
                self.pieces.len()
            );
            return false;
        }
        for (index, &correct) in bits.iter().enumerate() {
            self.set_correct(index, correct, out);
        }
        true
    }
}
