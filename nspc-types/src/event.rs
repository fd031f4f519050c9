use serde::{Deserialize, Serialize};

use crate::vcmd::Vcmd;
use crate::{EventId, RowEvent};

/// Duration state: governs the tick length (and optional quantize/velocity)
/// of subsequent tick-consuming events until the next `Duration` (§3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duration {
    pub ticks: u8,
    pub quant: Option<u8>,
    pub velocity: Option<u8>,
}

impl Duration {
    pub fn new(ticks: u8) -> Self {
        Self { ticks, quant: None, velocity: None }
    }
}

/// One entry in an event stream (§3.2). Every owner holds an ordered `Vec<Entry>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: EventId,
    pub event: Event,
    /// Informational parse-time source address; absent for entries created by the editor.
    pub original_addr: Option<u16>,
}

impl Entry {
    pub fn new(id: EventId, event: Event) -> Self {
        Self { id, event, original_addr: None }
    }

    pub fn with_original_addr(id: EventId, event: Event, addr: u16) -> Self {
        Self { id, event, original_addr: Some(addr) }
    }
}

/// The tagged sum of event variants (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Duration(Duration),
    Note { pitch: u8 },
    Tie,
    Rest,
    Percussion { index: u8 },
    Vcmd(Vcmd),
    /// Transient marker seen only while decoding nested subroutine streams;
    /// never present in a fully-parsed owner's event list (§3.2).
    Subroutine,
    End,
}

impl Event {
    /// Tick-consuming events are exactly `{Note, Tie, Rest, Percussion}` (§3.2).
    pub fn is_tick_consuming(&self) -> bool {
        matches!(self, Event::Note { .. } | Event::Tie | Event::Rest | Event::Percussion { .. })
    }

    pub fn as_row_event(&self) -> Option<RowEvent> {
        match self {
            Event::Note { pitch } => Some(RowEvent::Note { pitch: *pitch }),
            Event::Tie => Some(RowEvent::Tie),
            Event::Rest => Some(RowEvent::Rest),
            Event::Percussion { index } => Some(RowEvent::Percussion { index: *index }),
            _ => None,
        }
    }
}

impl From<RowEvent> for Event {
    fn from(value: RowEvent) -> Self {
        match value {
            RowEvent::Note { pitch } => Event::Note { pitch },
            RowEvent::Tie => Event::Tie,
            RowEvent::Rest => Event::Rest,
            RowEvent::Percussion { index } => Event::Percussion { index },
        }
    }
}

/// The row event a continuation row (one that merely extends a preceding span)
/// implicitly carries: a sustained note or percussion continues as `Tie`; a
/// rest continues as `Rest` (§4.3.1, grounded in `continuationEvent`).
pub fn continuation_event(event: RowEvent) -> RowEvent {
    match event {
        RowEvent::Note { .. } | RowEvent::Tie | RowEvent::Percussion { .. } => RowEvent::Tie,
        RowEvent::Rest => RowEvent::Rest,
    }
}

/// Structural equality for row events, ignoring anything but the variant's payload.
pub fn same_row_event(a: RowEvent, b: RowEvent) -> bool {
    match (a, b) {
        (RowEvent::Note { pitch: p1 }, RowEvent::Note { pitch: p2 }) => p1 == p2,
        (RowEvent::Tie, RowEvent::Tie) => true,
        (RowEvent::Rest, RowEvent::Rest) => true,
        (RowEvent::Percussion { index: i1 }, RowEvent::Percussion { index: i2 }) => i1 == i2,
        _ => false,
    }
}
