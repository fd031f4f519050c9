use serde::{Deserialize, Serialize};

use crate::{PatternId, TrackId};

/// Binds up to eight channels to tracks (§3.4). A channel slot of `-1` means
/// "silent"; `None` for the whole array means "no track table emitted"
/// (rare — a pattern whose sequence entry had a zero track-table address).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub channel_track_ids: Option<[TrackId; 8]>,
    pub track_table_addr: u16,
}

impl Pattern {
    pub fn new(id: PatternId) -> Self {
        Self { id, channel_track_ids: Some([-1; 8]), track_table_addr: 0 }
    }

    pub fn track_id_for_channel(&self, channel: u8) -> Option<TrackId> {
        self.channel_track_ids
            .and_then(|ids| ids.get(channel as usize).copied())
            .filter(|id| *id >= 0)
    }
}
