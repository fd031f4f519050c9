use serde::{Deserialize, Serialize};

use crate::PatternId;

/// Addresses a single editable cell in a pattern's grid (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorLocation {
    pub pattern_id: PatternId,
    /// 0..8
    pub channel: u8,
    pub row: u32,
}

/// The subset of `Event` a user can write directly into a row (§4.2 `NspcRowEvent`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowEvent {
    Note { pitch: u8 },
    Tie,
    Rest,
    Percussion { index: u8 },
}
