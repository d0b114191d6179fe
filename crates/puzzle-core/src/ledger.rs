//! Best clear times per (difficulty, area).
//!
//! The ledger is never synced incrementally. It travels as a whole in
//! every snapshot as a flat comma list of `difficulty,area,time` triples.

use crate::state::{Difficulty, TargetArea};

/// Best-time table. `None` marks a slot without a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreLedger {
    best: [[Option<f32>; 3]; 3],
}

impl ScoreLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, difficulty: Difficulty, area: TargetArea) -> Option<f32> {
        self.best[usize::from(difficulty.code())][usize::from(area.code())]
    }

    /// Overwrites a slot unconditionally.
    pub fn set(&mut self, difficulty: Difficulty, area: TargetArea, time: f32) {
        self.best[usize::from(difficulty.code())][usize::from(area.code())] = Some(time);
    }

    /// Whether `time` beats an existing record. The first clear of a
    /// slot is a record but not a "new best".
    pub fn is_new_best(&self, difficulty: Difficulty, area: TargetArea, time: f32) -> bool {
        self.get(difficulty, area).is_some_and(|best| time < best)
    }

    /// Stores `time` if it improves the slot. Returns true when stored.
    pub fn record(&mut self, difficulty: Difficulty, area: TargetArea, time: f32) -> bool {
        match self.get(difficulty, area) {
            Some(best) if time >= best => false,
            _ => {
                self.set(difficulty, area, time);
                true
            }
        }
    }

    /// All recorded slots, area-major like the wire order.
    pub fn entries(&self) -> impl Iterator<Item = (Difficulty, TargetArea, f32)> + '_ {
        TargetArea::ALL.into_iter().flat_map(move |area| {
            Difficulty::ALL.into_iter().filter_map(move |difficulty| {
                self.get(difficulty, area).map(|t| (difficulty, area, t))
            })
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    pub fn serialize(&self) -> String {
        self.entries()
            .map(|(difficulty, area, time)| {
                format!("{},{},{}", difficulty.code(), area.code(), time)
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Merges a serialized ledger, keeping the better time per slot.
    ///
    /// A token count that is not a multiple of three discards the whole
    /// string. Individual unreadable triples are skipped. Returns the
    /// slots that changed.
    pub fn merge_str(&mut self, data: &str) -> Vec<(Difficulty, TargetArea, f32)> {
        if data.is_empty() {
            return Vec::new();
        }

        let tokens: Vec<&str> = data.split(',').collect();
        if tokens.len() % 3 != 0 {
            tracing::warn!(
                "[ledger] Discarding ledger with {} tokens (not a multiple of 3)",
                tokens.len()
            );
            return Vec::new();
        }

        let mut changed = Vec::new();
        for triple in tokens.chunks_exact(3) {
            let Some((difficulty, area, time)) = parse_triple(triple) else {
                tracing::debug!("[ledger] Skipping unreadable entry {:?}", triple);
                continue;
            };
            if self.record(difficulty, area, time) {
                changed.push((difficulty, area, time));
            }
        }
        changed
    }

    /// Parses a serialized ledger into a fresh table.
    pub fn parse(data: &str) -> Self {
        let mut ledger = Self::new();
        ledger.merge_str(data);
        ledger
    }
}

fn parse_triple(triple: &[&str]) -> Option<(Difficulty, TargetArea, f32)> {
    let difficulty = Difficulty::from_code(triple[0].trim().parse().ok()?)?;
    let area = TargetArea::from_code(triple[1].trim().parse().ok()?)?;
    let time: f32 = triple[2].trim().parse().ok()?;
    time.is_finite().then_some((difficulty, area, time))
}
