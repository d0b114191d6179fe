//! Session tuning loaded from JSON.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::pose::Tolerance;
use crate::state::{Difficulty, TargetArea};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{field} must be non-negative, got {value}")]
    Negative { field: &'static str, value: f32 },
}

/// Placement thresholds per difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    pub easy: Tolerance,
    pub normal: Tolerance,
    pub difficult: Tolerance,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            easy: Tolerance::position_only(1.0),
            normal: Tolerance::with_angle(0.8, 100.0),
            difficult: Tolerance::with_angle(0.4, 50.0),
        }
    }
}

impl Tolerances {
    pub const fn for_difficulty(&self, difficulty: Difficulty) -> Tolerance {
        match difficulty {
            Difficulty::Easy => self.easy,
            Difficulty::Normal => self.normal,
            Difficulty::Difficult => self.difficult,
        }
    }
}

/// Polylines that shuffled pieces are scattered along.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShuffleRails {
    #[serde(default)]
    pub main: Vec<Vec3>,
    #[serde(default)]
    pub remote: Vec<Vec3>,
}

impl ShuffleRails {
    /// Rail used for a given target area.
    pub fn for_area(&self, area: TargetArea) -> &[Vec3] {
        match area {
            TargetArea::OnlyRemote => &self.remote,
            TargetArea::All | TargetArea::OnlyMain => &self.main,
        }
    }
}

/// Timing and geometry settings shared by every participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds spent in `Initialize` after construction.
    pub initialization_time: f32,
    /// Seconds between countdown steps.
    pub countdown_interval: f32,
    /// Seconds between clear and result.
    pub finish_dwell: f32,
    /// Minimum piece height after release.
    pub piece_floor_height: f32,
    pub move_duration: f32,
    pub shuffle_move_duration: f32,
    pub tolerances: Tolerances,
    pub shuffle_rails: ShuffleRails,
    /// Fixed seed for shuffles and message ids. Random when absent.
    pub rng_seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initialization_time: 2.0,
            countdown_interval: 1.0,
            finish_dwell: 2.0,
            piece_floor_height: 0.05,
            move_duration: 0.25,
            shuffle_move_duration: 1.0,
            tolerances: Tolerances::default(),
            shuffle_rails: ShuffleRails::default(),
            rng_seed: None,
        }
    }
}

impl SessionConfig {
    /// Loads a configuration from a JSON string. Missing fields keep
    /// their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let timings = [
            ("initialization_time", self.initialization_time),
            ("countdown_interval", self.countdown_interval),
            ("finish_dwell", self.finish_dwell),
            ("move_duration", self.move_duration),
            ("shuffle_move_duration", self.shuffle_move_duration),
        ];
        for (field, value) in timings {
            if value.is_nan() || value < 0.0 {
                return Err(ConfigError::Negative { field, value });
            }
        }
        Ok(())
    }
}
