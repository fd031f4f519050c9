//! Pattern editor UI driver (§4.8, grounded on `PatternEditorPanel.hpp`'s
//! cursor/selection/clipboard state and its `Editing.cpp` keyboard-handling
//! methods). This module owns exactly the stateful part of editing a
//! pattern grid: cursor position, cell selection, clipboard, and the typed
//! hex-digit accumulator used for value columns. It does not render
//! anything — a host UI reads [`UiDriver::rows`] and [`UiDriver::cursor`]
//! to draw the grid, and calls the methods here in response to input.

use nspc_types::{EditorLocation, FlatPattern, FlattenOptions, PatternId, RowEvent, Vcmd};

use crate::command::{self, Command};
use crate::editor;
use crate::flatten::flatten_pattern_by_id;
use crate::history::CommandHistory;

/// Which field of a row a cursor/selection cell refers to (the original's
/// `PatternCell` column set, minus anything rendering-only).
///
/// Effect columns aren't cursorable here: the source's `handleFxHexEditing`
/// types a raw effect id plus parameter bytes through its own multi-char
/// accumulator, not the single-byte commit path the other columns share, and
/// porting that accumulator is out of scope for this driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditItem {
    Note,
    Instrument,
    Volume,
    Qv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub row: u32,
    pub channel: u8,
    pub item: EditItem,
}

impl Cursor {
    fn location(&self, pattern_id: PatternId) -> EditorLocation {
        EditorLocation { pattern_id, channel: self.channel, row: self.row }
    }
}

/// One selected cell, addressed the same way a cursor is (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SelectionCell {
    pub row: u32,
    pub channel: u8,
    pub item: EditItem,
}

/// One clipboard slot: a selected cell's content, stored offset from the
/// copy anchor so paste can replay it at any cursor position (mirrors
/// `ClipboardCell`'s `rowOffset`/`flatColumnOffset`).
#[derive(Debug, Clone)]
pub struct ClipboardCell {
    pub row_offset: u32,
    pub channel_offset: i8,
    pub item: EditItem,
    pub row_event: Option<RowEvent>,
    pub byte_value: Option<u8>,
    pub effect: Option<Vcmd>,
}

/// Drives one pattern's editing session: cursor, selection, clipboard, the
/// hex-input accumulator, and a cache of the pattern's flattened contents
/// for display and hit-testing. Rendering is the host's job.
pub struct UiDriver {
    pub pattern_id: PatternId,
    pub cursor: Cursor,
    selection: Vec<SelectionCell>,
    anchor: Option<SelectionCell>,
    clipboard: Vec<ClipboardCell>,
    hex_input: Option<u8>,
    flatten_options: FlattenOptions,
    flat: Option<FlatPattern>,
    visible_rows: u32,
}

const ITEM_ORDER: [EditItem; 4] = [
    EditItem::Note,
    EditItem::Instrument,
    EditItem::Volume,
    EditItem::Qv,
];

impl UiDriver {
    pub fn new(pattern_id: PatternId) -> Self {
        Self {
            pattern_id,
            cursor: Cursor { row: 0, channel: 0, item: EditItem::Note },
            selection: Vec::new(),
            anchor: None,
            clipboard: Vec::new(),
            hex_input: None,
            flatten_options: FlattenOptions::default(),
            flat: None,
            visible_rows: nspc_types::DEFAULT_VISIBLE_ROWS,
        }
    }

    /// Re-flattens the pattern from `song`; call after any command runs so
    /// the displayed grid reflects the new state (§4.2, §4.8).
    pub fn refresh(&mut self, song: &nspc_types::Song) {
        self.flat = flatten_pattern_by_id(song, self.pattern_id, &self.flatten_options);
    }

    pub fn flat_pattern(&self) -> Option<&FlatPattern> {
        self.flat.as_ref()
    }

    fn max_row(&self) -> u32 {
        self.flat.as_ref().map(|f| f.total_ticks.max(1) - 1).unwrap_or(0).min(self.visible_rows.saturating_sub(1))
    }

    // --- cursor movement -------------------------------------------------

    pub fn move_cursor_row(&mut self, delta: i32, extend_selection: bool) {
        let max_row = self.max_row();
        let new_row = (self.cursor.row as i64 + delta as i64).clamp(0, max_row as i64) as u32;
        self.cursor.row = new_row;
        self.update_selection_from_cursor(extend_selection);
    }

    pub fn move_cursor_channel(&mut self, delta: i32, extend_selection: bool) {
        let new_channel = (self.cursor.channel as i32 + delta).rem_euclid(8) as u8;
        self.cursor.channel = new_channel;
        self.update_selection_from_cursor(extend_selection);
    }

    /// Cycles the cursor's item column in display order (Note, Instrument,
    /// Volume, Qv), wrapping.
    pub fn cycle_item(&mut self, forward: bool) {
        let idx = ITEM_ORDER.iter().position(|i| *i == self.cursor.item).unwrap_or(0);
        let next = if forward {
            (idx + 1) % ITEM_ORDER.len()
        } else {
            (idx + ITEM_ORDER.len() - 1) % ITEM_ORDER.len()
        };
        self.cursor.item = ITEM_ORDER[next];
        self.hex_input = None;
    }

    fn update_selection_from_cursor(&mut self, extending: bool) {
        self.hex_input = None;
        if !extending {
            self.anchor = None;
            return;
        }
        let anchor = *self.anchor.get_or_insert(SelectionCell { row: self.cursor.row, channel: self.cursor.channel, item: self.cursor.item });
        self.select_range(anchor, SelectionCell { row: self.cursor.row, channel: self.cursor.channel, item: self.cursor.item });
    }

    // --- selection ---------------------------------------------------------

    pub fn clear_selection(&mut self) {
        self.selection.clear();
        self.anchor = None;
    }

    pub fn is_selected(&self, cell: SelectionCell) -> bool {
        self.selection.contains(&cell)
    }

    pub fn selected_cells(&self) -> &[SelectionCell] {
        &self.selection
    }

    /// Selects every cell of the same item column between `anchor` and
    /// `focus`, inclusive, across both row and channel ranges (§4.8's
    /// rectangular cell selection).
    pub fn select_range(&mut self, anchor: SelectionCell, focus: SelectionCell) {
        self.selection.clear();
        let (row_lo, row_hi) = (anchor.row.min(focus.row), anchor.row.max(focus.row));
        let (chan_lo, chan_hi) = (anchor.channel.min(focus.channel), anchor.channel.max(focus.channel));
        for row in row_lo..=row_hi {
            for channel in chan_lo..=chan_hi {
                self.selection.push(SelectionCell { row, channel, item: anchor.item });
            }
        }
    }

    pub fn select_single_cell(&mut self, cell: SelectionCell, reset_anchor: bool) {
        self.selection.clear();
        self.selection.push(cell);
        if reset_anchor {
            self.anchor = Some(cell);
        }
    }

    // --- clipboard -----------------------------------------------------

    /// Copies every selected cell's current content into the clipboard,
    /// offset from the selection's top-left corner (§4.8).
    pub fn copy_selection(&mut self) {
        let Some(flat) = &self.flat else {
            self.clipboard.clear();
            return;
        };
        if self.selection.is_empty() {
            self.clipboard.clear();
            return;
        }
        let row_origin = self.selection.iter().map(|c| c.row).min().unwrap();
        let channel_origin = self.selection.iter().map(|c| c.channel).min().unwrap();

        self.clipboard = self
            .selection
            .iter()
            .map(|cell| {
                let row_event = find_row_event(flat, cell.row, cell.channel);
                ClipboardCell {
                    row_offset: cell.row - row_origin,
                    channel_offset: cell.channel as i8 - channel_origin as i8,
                    item: cell.item,
                    row_event,
                    byte_value: None,
                    effect: None,
                }
            })
            .collect();
    }

    /// Copies the selection, then clears the source cells via commands
    /// executed through `history` (§4.8's cut = copy + clear-selected).
    pub fn cut_selection(&mut self, song: &mut nspc_types::Song, history: &mut CommandHistory) -> bool {
        self.copy_selection();
        self.clear_selected_cells(song, history)
    }

    /// Replays the clipboard at the cursor's row/channel as the new anchor,
    /// wrapped in one undo group (§4.8).
    pub fn paste_at_cursor(&mut self, song: &mut nspc_types::Song, history: &mut CommandHistory) -> bool {
        if self.clipboard.is_empty() {
            return false;
        }
        history.begin_group(song, "Paste");
        let mut any = false;
        for cell in &self.clipboard {
            let row = self.cursor.row + cell.row_offset;
            let channel = (self.cursor.channel as i16 + cell.channel_offset as i16).clamp(0, 7) as u8;
            let location = EditorLocation { pattern_id: self.pattern_id, channel, row };
            if let Some(event) = cell.row_event {
                any |= history.execute(song, &command::SetRowEvent { location, event });
            }
        }
        history.end_group(song);
        any
    }

    /// Clears every selected cell's row event, as one undo group.
    pub fn clear_selected_cells(&mut self, song: &mut nspc_types::Song, history: &mut CommandHistory) -> bool {
        if self.selection.is_empty() {
            return false;
        }
        history.begin_group(song, "Clear cells");
        let mut any = false;
        for cell in self.selection.clone() {
            let location = EditorLocation { pattern_id: self.pattern_id, channel: cell.channel, row: cell.row };
            any |= history.execute(song, &command::DeleteRowEvent { location });
        }
        history.end_group(song);
        any
    }

    // --- typed hex input -------------------------------------------------

    /// Feeds one hex digit into the accumulator for the cursor's current
    /// value column, committing a byte once two digits have been entered
    /// (mirrors `handleValueColumnHexEditing`'s nibble accumulation).
    pub fn type_hex_digit(&mut self, digit: u8, song: &mut nspc_types::Song, history: &mut CommandHistory) -> bool {
        debug_assert!(digit < 16);
        let combined = match self.hex_input {
            None => {
                self.hex_input = Some(digit);
                return false;
            }
            Some(high) => (high << 4) | digit,
        };
        self.hex_input = None;
        self.commit_value_byte(combined, song, history)
    }

    pub fn cancel_hex_input(&mut self) {
        self.hex_input = None;
    }

    fn commit_value_byte(&mut self, byte: u8, song: &mut nspc_types::Song, history: &mut CommandHistory) -> bool {
        let location = self.cursor.location(self.pattern_id);
        match self.cursor.item {
            EditItem::Note => history.execute(song, &command::SetRowEvent { location, event: RowEvent::Note { pitch: byte & 0x7F } }),
            EditItem::Instrument => history.execute(song, &command::SetInstrumentAtRow { location, instrument: Some(byte) }),
            EditItem::Volume => history.execute(song, &command::SetVolumeAtRow { location, volume: Some(byte) }),
            EditItem::Qv => {
                let existing = self.flat.as_ref().and_then(|f| find_qv(f, location.row, location.channel)).unwrap_or((0, 0));
                history.execute(song, &command::SetQvAtRow { location, qv: Some((byte, existing.1)) })
            }
        }
    }

    // --- keyboard-event translation -------------------------------------

    /// Sets the row event at the cursor directly (note/tie/rest/percussion
    /// entry, as opposed to typed hex editing of a byte column).
    pub fn enter_row_event(&mut self, event: RowEvent, song: &mut nspc_types::Song, history: &mut CommandHistory) -> bool {
        let location = self.cursor.location(self.pattern_id);
        history.execute(song, &command::SetRowEvent { location, event })
    }

    pub fn delete_at_cursor(&mut self, song: &mut nspc_types::Song, history: &mut CommandHistory) -> bool {
        let location = self.cursor.location(self.pattern_id);
        history.execute(song, &command::DeleteRowEvent { location })
    }

    pub fn insert_tick_at_cursor(&mut self, song: &mut nspc_types::Song, history: &mut CommandHistory) -> bool {
        let location = self.cursor.location(self.pattern_id);
        history.execute(song, &command::InsertTickAtRow { location })
    }

    pub fn remove_tick_at_cursor(&mut self, song: &mut nspc_types::Song, history: &mut CommandHistory) -> bool {
        let location = self.cursor.location(self.pattern_id);
        history.execute(song, &command::RemoveTickAtRow { location })
    }

    /// Creates a subroutine from the current selection's row range on the
    /// cursor's channel, returning the new id on success (§4.3.4, §4.8).
    pub fn create_subroutine_from_selection(&mut self, song: &mut nspc_types::Song, history: &mut CommandHistory) -> Option<nspc_types::SubroutineId> {
        if self.selection.is_empty() {
            return None;
        }
        let start_row = self.selection.iter().map(|c| c.row).min().unwrap();
        let end_row = self.selection.iter().map(|c| c.row).max().unwrap();
        let location = EditorLocation { pattern_id: self.pattern_id, channel: self.cursor.channel, row: start_row };
        let cmd = command::CreateSubroutineFromRowRange::new(location, start_row, end_row);
        history.execute(song, &cmd);
        cmd.created_id.get()
    }
}

fn find_row_event(flat: &FlatPattern, row: u32, channel: u8) -> Option<RowEvent> {
    let ch = flat.channels.get(channel as usize)?;
    ch.events.iter().find(|e| e.tick == row).and_then(|e| e.event.as_row_event())
}

fn find_qv(flat: &FlatPattern, row: u32, channel: u8) -> Option<(u8, u8)> {
    let ch = flat.channels.get(channel as usize)?;
    let idx = ch.events.iter().position(|e| e.tick == row && e.event.is_tick_consuming())?;
    for e in ch.events[..idx].iter().rev() {
        if let nspc_types::Event::Duration(d) = &e.event {
            return Some((d.quant.unwrap_or(0), d.velocity.unwrap_or(0)));
        }
        if e.event.is_tick_consuming() {
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use nspc_types::{Pattern, Song};

    fn new_song() -> Song {
        let mut song = Song::new_empty(0);
        song.patterns.push(Pattern::new(0));
        song
    }

    #[test]
    fn cursor_moves_within_bounds() {
        let mut song = new_song();
        let mut history = CommandHistory::new();
        let mut ui = UiDriver::new(0);
        ui.enter_row_event(RowEvent::Note { pitch: 1 }, &mut song, &mut history);
        ui.refresh(&song);
        ui.move_cursor_row(-5, false);
        assert_eq!(ui.cursor.row, 0);
    }

    #[test]
    fn select_range_covers_rectangle() {
        let mut ui = UiDriver::new(0);
        ui.select_range(
            SelectionCell { row: 0, channel: 0, item: EditItem::Note },
            SelectionCell { row: 2, channel: 1, item: EditItem::Note },
        );
        assert_eq!(ui.selected_cells().len(), 6);
        assert!(ui.is_selected(SelectionCell { row: 1, channel: 1, item: EditItem::Note }));
    }

    #[test]
    fn copy_then_paste_replays_notes_at_new_cursor() {
        let mut song = new_song();
        let mut history = CommandHistory::new();
        let mut ui = UiDriver::new(0);
        ui.cursor = Cursor { row: 0, channel: 0, item: EditItem::Note };
        ui.enter_row_event(RowEvent::Note { pitch: 7 }, &mut song, &mut history);
        ui.refresh(&song);

        ui.select_single_cell(SelectionCell { row: 0, channel: 0, item: EditItem::Note }, true);
        ui.copy_selection();
        assert_eq!(ui.clipboard.len(), 1);

        ui.cursor = Cursor { row: 4, channel: 2, item: EditItem::Note };
        assert!(ui.paste_at_cursor(&mut song, &mut history));
        ui.refresh(&song);
        assert_eq!(find_row_event(ui.flat_pattern().unwrap(), 4, 2), Some(RowEvent::Note { pitch: 7 }));
    }

    #[test]
    fn two_hex_digits_commit_instrument_byte() {
        let mut song = new_song();
        let mut history = CommandHistory::new();
        let mut ui = UiDriver::new(0);
        ui.enter_row_event(RowEvent::Note { pitch: 1 }, &mut song, &mut history);
        ui.refresh(&song);
        ui.cursor.item = EditItem::Instrument;

        assert!(!ui.type_hex_digit(0x1, &mut song, &mut history));
        assert!(ui.type_hex_digit(0xA, &mut song, &mut history));
        ui.refresh(&song);
        let channel_events = &ui.flat_pattern().unwrap().channels[0].events;
        assert!(channel_events.iter().any(|e| matches!(&e.event, nspc_types::Event::Vcmd(Vcmd::Inst { instrument }) if *instrument == 0x1A)));
    }

    #[test]
    fn cycle_item_wraps_around() {
        let mut ui = UiDriver::new(0);
        for _ in 0..ITEM_ORDER.len() {
            ui.cycle_item(true);
        }
        assert_eq!(ui.cursor.item, EditItem::Note);
    }
}
