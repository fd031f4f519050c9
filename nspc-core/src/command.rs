//! Commands (§4.4): each editor mutation wrapped as a [`Command`] so the
//! history can record, undo, and redo it uniformly.
//!
//! The original engine's command objects know how to undo themselves by
//! reversing their own edit. This port instead has [`crate::history::CommandHistory`]
//! snapshot the whole [`Song`] before and after a command runs and restore
//! those snapshots on undo/redo — editor mutations here touch enough
//! interdependent state (ids, continuation rows, subroutine tables) that a
//! self-reversing command would have to duplicate most of the editor's own
//! logic to stay correct. Commands therefore only need `apply`, not `undo`.

use nspc_types::{EditorLocation, PatternId, RowEvent, Song, SubroutineId, Vcmd};

use crate::editor;

/// A single undoable unit of work against a [`Song`] (§4.4).
pub trait Command: std::fmt::Debug {
    /// Applies the edit, returning whether anything actually changed.
    fn apply(&self, song: &mut Song) -> bool;

    /// Human-readable label shown in undo/redo menus (§4.4, §4.8).
    fn description(&self) -> String;
}

#[derive(Debug)]
pub struct SetRowEvent {
    pub location: EditorLocation,
    pub event: RowEvent,
}

impl Command for SetRowEvent {
    fn apply(&self, song: &mut Song) -> bool {
        editor::set_row_event(song, &self.location, self.event)
    }
    fn description(&self) -> String {
        "Set row event".to_string()
    }
}

#[derive(Debug)]
pub struct DeleteRowEvent {
    pub location: EditorLocation,
}

impl Command for DeleteRowEvent {
    fn apply(&self, song: &mut Song) -> bool {
        editor::delete_row_event(song, &self.location)
    }
    fn description(&self) -> String {
        "Delete row event".to_string()
    }
}

#[derive(Debug)]
pub struct InsertTickAtRow {
    pub location: EditorLocation,
}

impl Command for InsertTickAtRow {
    fn apply(&self, song: &mut Song) -> bool {
        editor::insert_tick_at_row(song, &self.location)
    }
    fn description(&self) -> String {
        "Insert tick".to_string()
    }
}

#[derive(Debug)]
pub struct RemoveTickAtRow {
    pub location: EditorLocation,
}

impl Command for RemoveTickAtRow {
    fn apply(&self, song: &mut Song) -> bool {
        editor::remove_tick_at_row(song, &self.location)
    }
    fn description(&self) -> String {
        "Remove tick".to_string()
    }
}

#[derive(Debug)]
pub struct SetInstrumentAtRow {
    pub location: EditorLocation,
    pub instrument: Option<u8>,
}

impl Command for SetInstrumentAtRow {
    fn apply(&self, song: &mut Song) -> bool {
        editor::set_instrument_at_row(song, &self.location, self.instrument)
    }
    fn description(&self) -> String {
        "Set instrument".to_string()
    }
}

#[derive(Debug)]
pub struct SetVolumeAtRow {
    pub location: EditorLocation,
    pub volume: Option<u8>,
}

impl Command for SetVolumeAtRow {
    fn apply(&self, song: &mut Song) -> bool {
        editor::set_volume_at_row(song, &self.location, self.volume)
    }
    fn description(&self) -> String {
        "Set volume".to_string()
    }
}

#[derive(Debug)]
pub struct SetQvAtRow {
    pub location: EditorLocation,
    pub qv: Option<(u8, u8)>,
}

impl Command for SetQvAtRow {
    fn apply(&self, song: &mut Song) -> bool {
        editor::set_qv_at_row(song, &self.location, self.qv)
    }
    fn description(&self) -> String {
        "Set quantize/velocity".to_string()
    }
}

#[derive(Debug)]
pub struct SetEffectAtRow {
    pub location: EditorLocation,
    pub effect: Option<Vcmd>,
}

impl Command for SetEffectAtRow {
    fn apply(&self, song: &mut Song) -> bool {
        editor::set_effect_at_row(song, &self.location, self.effect.clone())
    }
    fn description(&self) -> String {
        "Set effect".to_string()
    }
}

#[derive(Debug)]
pub struct AddEffectAtRow {
    pub location: EditorLocation,
    pub effect: Vcmd,
}

impl Command for AddEffectAtRow {
    fn apply(&self, song: &mut Song) -> bool {
        editor::add_effect_at_row(song, &self.location, self.effect.clone())
    }
    fn description(&self) -> String {
        "Add effect".to_string()
    }
}

#[derive(Debug)]
pub struct ClearEffectsAtRow {
    pub location: EditorLocation,
    pub preserve_subroutine_calls: bool,
}

impl Command for ClearEffectsAtRow {
    fn apply(&self, song: &mut Song) -> bool {
        editor::clear_effects_at_row(song, &self.location, self.preserve_subroutine_calls)
    }
    fn description(&self) -> String {
        "Clear effects".to_string()
    }
}

/// Created subroutine id is captured here once `apply` runs, for callers
/// that need it after the command has been handed to the history (§4.4).
#[derive(Debug)]
pub struct CreateSubroutineFromRowRange {
    pub location: EditorLocation,
    pub start_row: u32,
    pub end_row: u32,
    pub created_id: std::cell::Cell<Option<SubroutineId>>,
}

impl CreateSubroutineFromRowRange {
    pub fn new(location: EditorLocation, start_row: u32, end_row: u32) -> Self {
        Self { location, start_row, end_row, created_id: std::cell::Cell::new(None) }
    }
}

impl Command for CreateSubroutineFromRowRange {
    fn apply(&self, song: &mut Song) -> bool {
        let id = editor::create_subroutine_from_row_range(song, &self.location, self.start_row, self.end_row);
        self.created_id.set(id);
        id.is_some()
    }
    fn description(&self) -> String {
        "Create subroutine".to_string()
    }
}

#[derive(Debug)]
pub struct FlattenSubroutineOnChannel {
    pub location: EditorLocation,
    pub subroutine_id: SubroutineId,
}

impl Command for FlattenSubroutineOnChannel {
    fn apply(&self, song: &mut Song) -> bool {
        editor::flatten_subroutine_on_channel(song, &self.location, self.subroutine_id)
    }
    fn description(&self) -> String {
        "Flatten subroutine".to_string()
    }
}

#[derive(Debug)]
pub struct DeleteSubroutine {
    pub subroutine_id: SubroutineId,
}

impl Command for DeleteSubroutine {
    fn apply(&self, song: &mut Song) -> bool {
        editor::delete_subroutine(song, self.subroutine_id)
    }
    fn description(&self) -> String {
        "Delete subroutine".to_string()
    }
}

#[derive(Debug)]
pub struct SetPatternLength {
    pub pattern_id: PatternId,
    pub target_tick: u32,
}

impl Command for SetPatternLength {
    fn apply(&self, song: &mut Song) -> bool {
        editor::set_pattern_length(song, self.pattern_id, self.target_tick)
    }
    fn description(&self) -> String {
        "Set pattern length".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nspc_types::Pattern;

    fn new_song() -> Song {
        let mut song = Song::new_empty(0);
        song.patterns.push(Pattern::new(0));
        song
    }

    #[test]
    fn set_row_event_command_applies() {
        let mut song = new_song();
        let cmd = SetRowEvent {
            location: EditorLocation { pattern_id: 0, channel: 0, row: 0 },
            event: RowEvent::Note { pitch: 5 },
        };
        assert!(cmd.apply(&mut song));
        assert_eq!(song.tracks.len(), 1);
    }

    #[test]
    fn create_subroutine_command_captures_id() {
        let mut song = new_song();
        SetRowEvent {
            location: EditorLocation { pattern_id: 0, channel: 0, row: 0 },
            event: RowEvent::Note { pitch: 0 },
        }
        .apply(&mut song);
        let cmd = CreateSubroutineFromRowRange::new(EditorLocation { pattern_id: 0, channel: 0, row: 0 }, 0, 0);
        assert!(cmd.apply(&mut song));
        assert!(cmd.created_id.get().is_some());
    }
}
