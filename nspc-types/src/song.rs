use serde::{Deserialize, Serialize};

use crate::owner::{Subroutine, Track};
use crate::pattern::Pattern;
use crate::project::ContentOrigin;
use crate::sequence::SeqOp;
use crate::{EventId, PatternId, SongId, SubroutineId, TrackId};

/// One playable entity (§3.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    pub name: String,
    pub author: String,
    pub content_origin: ContentOrigin,
    pub sequence: Vec<SeqOp>,
    pub patterns: Vec<Pattern>,
    pub tracks: Vec<Track>,
    pub subroutines: Vec<Subroutine>,
    pub next_event_id: EventId,
}

impl Song {
    pub fn new_empty(id: SongId) -> Self {
        Self {
            id,
            name: String::new(),
            author: String::new(),
            content_origin: ContentOrigin::UserProvided,
            sequence: Vec::new(),
            patterns: Vec::new(),
            tracks: Vec::new(),
            subroutines: Vec::new(),
            next_event_id: 1,
        }
    }

    /// Allocates and returns a fresh event id, bumping `next_event_id` (§3.7).
    pub fn alloc_event_id(&mut self) -> EventId {
        let id = self.next_event_id;
        self.next_event_id += 1;
        id
    }

    /// Reserves `count` consecutive fresh event ids without handing any out
    /// individually; used by bulk operations that build many entries at once.
    pub fn peek_next_event_id(&self) -> EventId {
        self.next_event_id
    }

    pub fn sync_next_event_id(&mut self, used: EventId) {
        if used >= self.next_event_id {
            self.next_event_id = used + 1;
        }
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(usize::try_from(id).ok()?).filter(|t| t.id == id)
    }

    pub fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        let idx = usize::try_from(id).ok()?;
        self.tracks.get_mut(idx).filter(|t| t.id == id)
    }

    pub fn subroutine(&self, id: SubroutineId) -> Option<&Subroutine> {
        self.subroutines.get(usize::try_from(id).ok()?).filter(|s| s.id == id)
    }

    pub fn subroutine_mut(&mut self, id: SubroutineId) -> Option<&mut Subroutine> {
        let idx = usize::try_from(id).ok()?;
        self.subroutines.get_mut(idx).filter(|s| s.id == id)
    }

    pub fn pattern(&self, id: PatternId) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.id == id)
    }

    pub fn pattern_mut(&mut self, id: PatternId) -> Option<&mut Pattern> {
        self.patterns.iter_mut().find(|p| p.id == id)
    }

    /// Appends a new empty track, renumbering it densely, and returns its id (§3.8).
    pub fn add_track(&mut self) -> TrackId {
        let id = self.tracks.len() as TrackId;
        self.tracks.push(Track::new(id));
        id
    }

    /// Appends a new empty subroutine, renumbering it densely, and returns its id (§3.8).
    pub fn add_subroutine(&mut self) -> SubroutineId {
        let id = self.subroutines.len() as SubroutineId;
        self.subroutines.push(Subroutine::new(id));
        id
    }

    /// Renumbers tracks densely and remaps every pattern's `channel_track_ids`
    /// to match. Required invariant after any structural track removal (§3.7).
    pub fn renumber_tracks(&mut self, removed_id: TrackId) {
        let mut remap = std::collections::HashMap::new();
        for (new_idx, track) in self.tracks.iter_mut().enumerate() {
            remap.insert(track.id, new_idx as TrackId);
            track.id = new_idx as TrackId;
        }
        for pattern in &mut self.patterns {
            if let Some(ids) = pattern.channel_track_ids.as_mut() {
                for slot in ids.iter_mut() {
                    if *slot == removed_id {
                        *slot = -1;
                    } else if let Some(new_id) = remap.get(slot) {
                        *slot = *new_id;
                    }
                }
            }
        }
    }

    /// Renumbers subroutines densely after a removal and remaps every
    /// `VcmdSubroutineCall::subroutine_id` across all tracks/subroutines (§3.7, §4.3.8).
    pub fn renumber_subroutines(&mut self, removed_id: SubroutineId) {
        let mut remap = std::collections::HashMap::new();
        for (new_idx, sub) in self.subroutines.iter_mut().enumerate() {
            remap.insert(sub.id, new_idx as SubroutineId);
            sub.id = new_idx as SubroutineId;
        }
        let remap_call = |event: &mut crate::Event| {
            if let crate::Event::Vcmd(crate::Vcmd::SubroutineCall { subroutine_id, .. }) = event {
                if *subroutine_id == removed_id {
                    // Caller is responsible for inlining calls to the removed
                    // subroutine before invoking this; any surviving call to
                    // it is a bug in the caller. Leave as-is defensively.
                } else if let Some(new_id) = remap.get(subroutine_id) {
                    *subroutine_id = *new_id;
                }
            }
        };
        for track in &mut self.tracks {
            for entry in &mut track.events {
                remap_call(&mut entry.event);
            }
        }
        for sub in &mut self.subroutines {
            for entry in &mut sub.events {
                remap_call(&mut entry.event);
            }
        }
    }

    /// Maximum event id currently in use across every track and subroutine (§8.1).
    pub fn max_event_id(&self) -> Option<EventId> {
        self.tracks
            .iter()
            .flat_map(|t| t.events.iter())
            .chain(self.subroutines.iter().flat_map(|s| s.events.iter()))
            .map(|e| e.id)
            .max()
    }
}
