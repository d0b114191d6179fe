//! Grab and release detection.
//!
//! The platform only exposes "is this piece grasped right now", so
//! the tracker keeps the last observation per piece and reports edges.

use crate::piece::PieceSet;
use crate::pose::Pose;
use crate::scene::Scene;
use crate::state::ParticipantId;

/// Grab state edge of one piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceTransition {
    Held {
        piece: usize,
        by: Option<ParticipantId>,
    },
    Released {
        piece: usize,
        last_owner: Option<ParticipantId>,
    },
}

/// Pose corrections applied when a piece is let go.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settle {
    /// Snapped instantly.
    pub upright: Pose,
    /// Animated to when the piece sank below the floor.
    pub raised: Option<Pose>,
}

/// Upright snap plus floor clamp for a released piece.
pub fn settle(pose: Pose, floor: f32) -> Settle {
    let upright = pose.upright();
    Settle {
        upright,
        raised: upright.raised_to(floor),
    }
}

#[derive(Debug, Clone, Default)]
pub struct PieceOwnershipTracker {
    held: Vec<bool>,
}

impl PieceOwnershipTracker {
    pub fn new(piece_count: usize) -> Self {
        Self {
            held: vec![false; piece_count],
        }
    }

    /// Compares the scene's grasp flags with the last scan. Invalid pieces
    /// are skipped.
    pub fn scan(&mut self, pieces: &mut PieceSet, scene: &dyn Scene) -> Vec<PieceTransition> {
        self.held.resize(pieces.len(), false);
        let mut transitions = Vec::new();
        for index in 0..pieces.len() {
            let Some(piece) = pieces.get_mut(index).filter(|p| p.is_valid()) else {
                continue;
            };
            let held = scene.is_grasped(index);
            if self.held[index] == held {
                continue;
            }
            self.held[index] = held;
            if held {
                let by = scene.grasping_participant(index);
                piece.held_by = by;
                piece.last_owner = by;
                transitions.push(PieceTransition::Held { piece: index, by });
            } else {
                piece.held_by = None;
                transitions.push(PieceTransition::Released {
                    piece: index,
                    last_owner: piece.last_owner,
                });
            }
        }
        transitions
    }

    pub fn is_held(&self, piece: usize) -> bool {
        self.held.get(piece).copied().unwrap_or(false)
    }
}
