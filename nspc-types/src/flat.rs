use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::{EventId, PatternId, SubroutineId, TrackId};

/// Which kind of owner a `FlatEvent`'s source entry lives in (§4.2, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventOwner {
    Track,
    Subroutine,
}

/// Resolves a flattened event back to its originating owner entry (§9).
/// `event_id` is the canonical identity; `event_index` is a best-effort hint
/// that may go stale after other edits reorder the owner's event vec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub owner: EventOwner,
    /// Track id or subroutine id, depending on `owner`.
    pub owner_id: i32,
    pub event_index: usize,
    pub event_id: EventId,
}

/// One inlined subroutine call frame on the flattener's call stack (§4.2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SubroutineFrame {
    pub subroutine_id: SubroutineId,
    pub iteration: u8,
    pub call_event: EventRef,
}

/// One event in a flattened channel, carrying its absolute tick and a
/// back-reference to the owning stream (§4.2, GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatEvent {
    pub tick: u32,
    pub event: Event,
    pub source: EventRef,
    pub subroutine_stack: Vec<SubroutineFrame>,
}

/// The flattened contents of one pattern channel (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatChannel {
    pub channel: u8,
    pub track_id: Option<TrackId>,
    pub total_ticks: u32,
    pub events: Vec<FlatEvent>,
}

impl FlatChannel {
    pub fn empty(channel: u8) -> Self {
        Self { channel, track_id: None, total_ticks: 0, events: Vec::new() }
    }
}

/// Eight flattened channels covering the whole playback of one pattern (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatPattern {
    pub pattern_id: PatternId,
    pub total_ticks: u32,
    pub channels: [FlatChannel; 8],
}

/// Tuning knobs for the flattener (§4.2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlattenOptions {
    pub max_subroutine_depth: u16,
    pub max_events_per_channel: u32,
    pub max_ticks_per_channel: u32,
    /// If true, `FlatPattern.total_ticks` is the least tick at which any
    /// track emits `End`; otherwise the max total among channels (§4.2).
    pub clip_to_earliest_track_end: bool,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            max_subroutine_depth: 16,
            max_events_per_channel: 100_000,
            max_ticks_per_channel: 0x100000,
            clip_to_earliest_track_end: true,
        }
    }
}
