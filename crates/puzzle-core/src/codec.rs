//! Text message codec for the replicated session field.
//!
//! Every message is a single `:`-separated line:
//! `<message id>:<type code>:<arg0>:<arg1>:...`
//!
//! The message id only exists so that two identical payloads in a row
//! still count as a value change on the transport. Decoders skip it.

use rand::Rng;

use crate::resync::SyncSnapshot;
use crate::state::{Difficulty, GamePhase, SystemState, TargetArea};

/// Field separator. Never produced by any encoded argument.
pub const SEPARATOR: char = ':';

/// Every message has at least an id and a type code.
pub const MIN_FIELDS: usize = 2;

/// Exclusive upper bound of random message ids.
pub const MESSAGE_ID_LIMIT: u32 = 9999;

/// Fixed-point scale used for floats carried as integers.
const FLOAT_SCALE: f32 = 10_000.0;

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    RequestSyncState,
    SyncState,
    StartGame,
    ClearGame,
    Reset,
    PieceCorrect,
    ChangeDifficulty,
    ChangeTargetArea,
}

impl MessageKind {
    pub const fn code(self) -> u8 {
        match self {
            Self::RequestSyncState => 0,
            Self::SyncState => 1,
            Self::StartGame => 2,
            Self::ClearGame => 3,
            Self::Reset => 4,
            Self::PieceCorrect => 5,
            Self::ChangeDifficulty => 6,
            Self::ChangeTargetArea => 7,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::RequestSyncState),
            1 => Some(Self::SyncState),
            2 => Some(Self::StartGame),
            3 => Some(Self::ClearGame),
            4 => Some(Self::Reset),
            5 => Some(Self::PieceCorrect),
            6 => Some(Self::ChangeDifficulty),
            7 => Some(Self::ChangeTargetArea),
            _ => None,
        }
    }

    /// Exact field count (id and type included), or `None` when any
    /// count of at least [`MIN_FIELDS`] is accepted.
    pub const fn field_count(self) -> Option<usize> {
        match self {
            Self::RequestSyncState | Self::Reset => None,
            Self::SyncState => Some(9),
            Self::StartGame => Some(4),
            Self::ClearGame => Some(5),
            Self::PieceCorrect | Self::ChangeDifficulty | Self::ChangeTargetArea => Some(3),
        }
    }
}

/// Error type for message decoding.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("message has {0} fields, need at least {MIN_FIELDS}")]
    TooShort(usize),
    #[error("type code is not an integer: {0:?}")]
    BadTypeCode(String),
    #[error("unknown message type code {0}")]
    UnknownType(i64),
    #[error("{kind:?} expects {expected} fields, got {actual}")]
    FieldCount {
        kind: MessageKind,
        expected: usize,
        actual: usize,
    },
    #[error("field {index} is not an integer: {value:?}")]
    BadInt { index: usize, value: String },
    #[error("field {index} is not a finite number: {value:?}")]
    BadFloat { index: usize, value: String },
    #[error("field {index} holds unknown {what} code {code}")]
    OutOfRange {
        index: usize,
        what: &'static str,
        code: i64,
    },
}

/// A decoded session message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Late joiner asks the authority for a full snapshot.
    RequestSyncState,
    /// Full snapshot, answered by the authority.
    SyncState(SyncSnapshot),
    /// Someone pressed start.
    StartGame {
        difficulty: Difficulty,
        area: TargetArea,
    },
    /// The sender placed the last target piece.
    ClearGame {
        clear_time: f32,
        is_best: bool,
        piece: usize,
    },
    /// Universal abort back to idle.
    Reset,
    /// The sender placed a piece correctly.
    PieceCorrect { piece: usize },
    /// Selector highlight change.
    ChangeDifficulty(Difficulty),
    /// Selector highlight change.
    ChangeTargetArea(TargetArea),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::RequestSyncState => MessageKind::RequestSyncState,
            Self::SyncState(_) => MessageKind::SyncState,
            Self::StartGame { .. } => MessageKind::StartGame,
            Self::ClearGame { .. } => MessageKind::ClearGame,
            Self::Reset => MessageKind::Reset,
            Self::PieceCorrect { .. } => MessageKind::PieceCorrect,
            Self::ChangeDifficulty(_) => MessageKind::ChangeDifficulty,
            Self::ChangeTargetArea(_) => MessageKind::ChangeTargetArea,
        }
    }

    /// Encode the message with the given transport id.
    pub fn encode(&self, message_id: u32) -> String {
        let mut fields = vec![message_id.to_string(), self.kind().code().to_string()];
        match self {
            Self::RequestSyncState | Self::Reset => {}
            Self::SyncState(snapshot) => {
                fields.push(snapshot.system.code().to_string());
                fields.push(snapshot.phase.code().to_string());
                fields.push(snapshot.difficulty.code().to_string());
                fields.push(snapshot.area.code().to_string());
                fields.push(encode_float(snapshot.elapsed).to_string());
                fields.push(bools_to_string(&snapshot.correctness));
                fields.push(snapshot.ledger.clone());
            }
            Self::StartGame { difficulty, area } => {
                fields.push(difficulty.code().to_string());
                fields.push(area.code().to_string());
            }
            Self::ClearGame {
                clear_time,
                is_best,
                piece,
            } => {
                fields.push(clear_time.to_string());
                fields.push(u8::from(*is_best).to_string());
                fields.push(piece.to_string());
            }
            Self::PieceCorrect { piece } => fields.push(piece.to_string()),
            Self::ChangeDifficulty(difficulty) => fields.push(difficulty.code().to_string()),
            Self::ChangeTargetArea(area) => fields.push(area.code().to_string()),
        }
        fields.join(&SEPARATOR.to_string())
    }

    /// Decode a message. The message id is not validated.
    pub fn decode(data: &str) -> Result<Self, CodecError> {
        let fields: Vec<&str> = data.split(SEPARATOR).collect();
        if fields.len() < MIN_FIELDS {
            return Err(CodecError::TooShort(fields.len()));
        }

        let code: i64 = fields[1]
            .trim()
            .parse()
            .map_err(|_| CodecError::BadTypeCode(fields[1].to_string()))?;
        let kind = MessageKind::from_code(code).ok_or(CodecError::UnknownType(code))?;

        if let Some(expected) = kind.field_count() {
            if fields.len() != expected {
                return Err(CodecError::FieldCount {
                    kind,
                    expected,
                    actual: fields.len(),
                });
            }
        }

        let message = match kind {
            MessageKind::RequestSyncState => Self::RequestSyncState,
            MessageKind::Reset => Self::Reset,
            MessageKind::SyncState => {
                let system = parse_code(&fields, 2, "system state", SystemState::from_code)?;
                let phase = parse_code(&fields, 3, "game phase", GamePhase::from_code)?;
                let difficulty = parse_code(&fields, 4, "difficulty", Difficulty::from_code)?;
                let area = parse_code(&fields, 5, "target area", TargetArea::from_code)?;
                let elapsed = parse_int(&fields, 6)?;
                let elapsed = i32::try_from(elapsed).map_err(|_| CodecError::BadInt {
                    index: 6,
                    value: fields[6].to_string(),
                })?;
                Self::SyncState(SyncSnapshot {
                    system,
                    phase,
                    difficulty,
                    area,
                    elapsed: decode_float(elapsed),
                    correctness: string_to_bools(fields[7]),
                    ledger: fields[8].to_string(),
                })
            }
            MessageKind::StartGame => Self::StartGame {
                difficulty: parse_code(&fields, 2, "difficulty", Difficulty::from_code)?,
                area: parse_code(&fields, 3, "target area", TargetArea::from_code)?,
            },
            MessageKind::ClearGame => Self::ClearGame {
                clear_time: parse_float(&fields, 2)?,
                is_best: parse_int(&fields, 3)? == 1,
                piece: parse_index(&fields, 4)?,
            },
            MessageKind::PieceCorrect => Self::PieceCorrect {
                piece: parse_index(&fields, 2)?,
            },
            MessageKind::ChangeDifficulty => Self::ChangeDifficulty(parse_code(
                &fields,
                2,
                "difficulty",
                Difficulty::from_code,
            )?),
            MessageKind::ChangeTargetArea => Self::ChangeTargetArea(parse_code(
                &fields,
                2,
                "target area",
                TargetArea::from_code,
            )?),
        };
        Ok(message)
    }
}

fn parse_int(fields: &[&str], index: usize) -> Result<i64, CodecError> {
    fields[index]
        .trim()
        .parse()
        .map_err(|_| CodecError::BadInt {
            index,
            value: fields[index].to_string(),
        })
}

fn parse_index(fields: &[&str], index: usize) -> Result<usize, CodecError> {
    let value = parse_int(fields, index)?;
    usize::try_from(value).map_err(|_| CodecError::OutOfRange {
        index,
        what: "piece",
        code: value,
    })
}

fn parse_float(fields: &[&str], index: usize) -> Result<f32, CodecError> {
    match fields[index].trim().parse::<f32>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(CodecError::BadFloat {
            index,
            value: fields[index].to_string(),
        }),
    }
}

fn parse_code<T>(
    fields: &[&str],
    index: usize,
    what: &'static str,
    from_code: fn(i64) -> Option<T>,
) -> Result<T, CodecError> {
    let code = parse_int(fields, index)?;
    from_code(code).ok_or(CodecError::OutOfRange { index, what, code })
}

/// Draws a fresh transport id.
pub fn random_message_id<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    rng.random_range(0..MESSAGE_ID_LIMIT)
}

/// Fixed-point float encoding, truncated toward zero.
#[allow(clippy::cast_possible_truncation)]
pub fn encode_float(v: f32) -> i32 {
    (v * FLOAT_SCALE) as i32
}

#[allow(clippy::cast_precision_loss)]
pub fn decode_float(v: i32) -> f32 {
    v as f32 / FLOAT_SCALE
}

/// One `'0'`/`'1'` character per flag, index ascending.
pub fn bools_to_string(flags: &[bool]) -> String {
    flags.iter().map(|&f| if f { '1' } else { '0' }).collect()
}

/// Inverse of [`bools_to_string`]. A character that is not a digit
/// decodes to `false` without affecting its neighbours.
pub fn string_to_bools(s: &str) -> Vec<bool> {
    s.chars().map(|c| c.to_digit(10) == Some(1)).collect()
}
