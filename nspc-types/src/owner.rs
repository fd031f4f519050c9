use serde::{Deserialize, Serialize};

use crate::event::Entry;
use crate::{SubroutineId, TrackId};

/// A channel event stream, referenced by patterns (§3.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub events: Vec<Entry>,
    pub original_addr: u16,
}

impl Track {
    pub fn new(id: TrackId) -> Self {
        Self { id, events: Vec::new(), original_addr: 0 }
    }
}

/// An event stream callable from any track or subroutine (§3.4). An `End`
/// terminates its body; on parse, `End` is collapsed to zero bytes in the
/// source (the parser never sees a trailing `0x00` consumed as a subroutine's
/// own byte — it marks the end of the decode loop).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subroutine {
    pub id: SubroutineId,
    pub events: Vec<Entry>,
    pub original_addr: u16,
}

impl Subroutine {
    pub fn new(id: SubroutineId) -> Self {
        Self { id, events: Vec::new(), original_addr: 0 }
    }
}
