//! Structural editor (§4.3): mutation operations on a song's tracks and
//! subroutines, preserving the continuation/anchor semantics of the tracker
//! grid. Operations take an `&mut Song` and an [`EditorLocation`]; each
//! returns whether it actually changed anything.

use nspc_types::{
    continuation_event, same_row_event, Duration, EditorLocation, Entry, Event, EventOwner,
    EventRef, FlattenOptions, PatternId, RowEvent, Song, SubroutineId, TrackId, Vcmd,
    MAX_DURATION_TICKS,
};

use crate::flatten::flatten_pattern_by_id;

const MIN_DURATION_TICKS: u8 = 1;

fn clamp_ticks(ticks: u32) -> u8 {
    ticks.clamp(MIN_DURATION_TICKS as u32, MAX_DURATION_TICKS as u32) as u8
}

/// One row-level span on a flattened channel: a tick-consuming event's
/// footprint, plus the owner entry it came from (§4.3.1).
struct RowSpan {
    start_tick: u32,
    length: u32,
    event: RowEvent,
    source: EventRef,
}

fn collect_row_spans(flat: &nspc_types::FlatChannel) -> Vec<RowSpan> {
    let timed: Vec<_> = flat
        .events
        .iter()
        .filter(|e| e.event.is_tick_consuming())
        .collect();
    let mut spans = Vec::with_capacity(timed.len());
    for (i, e) in timed.iter().enumerate() {
        let next_tick = timed.get(i + 1).map(|n| n.tick).unwrap_or(flat.total_ticks.max(e.tick + 1));
        let length = next_tick.saturating_sub(e.tick).max(1);
        spans.push(RowSpan {
            start_tick: e.tick,
            length,
            event: e.event.as_row_event().expect("filtered to tick-consuming"),
            source: e.source,
        });
    }
    spans
}

fn find_target_span_index(spans: &[RowSpan], row: u32) -> Option<usize> {
    spans.iter().position(|s| row >= s.start_tick && row < s.start_tick + s.length)
}

/// True when `source` points directly into the channel's own track, as
/// opposed to an inlined subroutine call. Mid-span structural edits (splits,
/// merges) are only supported on track-owned spans — a row inside an
/// inlined subroutine call can still be overwritten whole (§4.3.2's "only a
/// subroutine call" branch), but splitting it would mean cloning the shared
/// subroutine, which this editor does not do implicitly.
fn is_track_owned(source: &EventRef, track_id: TrackId) -> bool {
    source.owner == EventOwner::Track && source.owner_id == track_id
}

fn resolve_owner_events_mut(song: &mut Song, owner: EventOwner, owner_id: i32) -> Option<&mut Vec<Entry>> {
    match owner {
        EventOwner::Track => song.track_mut(owner_id).map(|t| &mut t.events),
        EventOwner::Subroutine => song.subroutine_mut(owner_id).map(|s| &mut s.events),
    }
}

fn allocate_track_id(song: &Song) -> TrackId {
    song.tracks
        .iter()
        .enumerate()
        .find(|(i, t)| t.id != *i as TrackId)
        .map(|(i, _)| i as TrackId)
        .unwrap_or(song.tracks.len() as TrackId)
}

fn resolve_track_by_id(song: &mut Song, track_id: TrackId, create_if_missing: bool) -> Option<TrackId> {
    if track_id < 0 {
        return None;
    }
    if song.track(track_id).is_some() {
        return Some(track_id);
    }
    if !create_if_missing {
        return None;
    }
    let idx = track_id as usize;
    if idx >= song.tracks.len() {
        song.tracks.resize_with(idx + 1, || nspc_types::Track::new(-1));
    }
    song.tracks[idx] = nspc_types::Track::new(track_id);
    Some(track_id)
}

/// Finds (creating if requested) the track backing `location`'s channel in
/// its pattern, allocating a pattern channel-track slot if needed (§4.3.2 final bullet).
fn resolve_channel_track(song: &mut Song, location: &EditorLocation, create_if_missing: bool) -> Option<TrackId> {
    if location.channel >= 8 {
        return None;
    }

    let had_pattern = song.pattern(location.pattern_id).is_some();
    if !had_pattern {
        return None;
    }

    {
        let pattern = song.pattern_mut(location.pattern_id)?;
        if pattern.channel_track_ids.is_none() {
            if !create_if_missing {
                return None;
            }
            pattern.channel_track_ids = Some([-1; 8]);
        }
    }

    let existing_track_id = song.pattern(location.pattern_id)?.channel_track_ids.unwrap()[location.channel as usize];
    let track_id = if existing_track_id >= 0 {
        existing_track_id
    } else {
        if !create_if_missing {
            return None;
        }
        let new_id = allocate_track_id(song);
        song.pattern_mut(location.pattern_id)?.channel_track_ids.as_mut().unwrap()[location.channel as usize] = new_id;
        new_id
    };

    resolve_track_by_id(song, track_id, create_if_missing)
}

fn channel_has_assigned_track(song: &Song, location: &EditorLocation) -> bool {
    song.pattern(location.pattern_id)
        .and_then(|p| p.channel_track_ids)
        .map(|ids| ids[location.channel as usize] >= 0)
        .unwrap_or(false)
}

fn pattern_end_tick(song: &Song, pattern_id: PatternId) -> Option<u32> {
    let flat = flatten_pattern_by_id(song, pattern_id, &FlattenOptions::default())?;
    Some(flat.total_ticks)
}

fn flatten_channel(song: &Song, location: &EditorLocation) -> Option<nspc_types::FlatChannel> {
    let flat = flatten_pattern_by_id(song, location.pattern_id, &FlattenOptions::default())?;
    flat.channels.into_iter().nth(location.channel as usize)
}

fn insert_duration_event(events: &mut Vec<Entry>, index: usize, ticks: u8, song: &mut Song) {
    let id = song.alloc_event_id();
    events.insert(index, Entry::new(id, Event::Duration(Duration { ticks, quant: None, velocity: None })));
}

fn find_end_index(events: &[Entry]) -> usize {
    events.iter().position(|e| matches!(e.event, Event::End)).unwrap_or(events.len())
}

/// Extends a brand-new channel track with continuation filler up to `target_tick`
/// so it lines up with the pattern's existing baseline length (§8.4 scenario 2).
fn extend_channel_to_tick(song: &mut Song, location: &EditorLocation, target_tick: u32) -> bool {
    let Some(track_id) = channel_track_id(song, location) else { return false };
    let Some(events) = song.track_mut(track_id).map(|t| &mut t.events) else { return false };
    let mut gap = target_tick;
    if gap == 0 {
        return false;
    }
    let insert_at = find_end_index(events);
    let fill = RowEvent::Tie;
    let mut idx = insert_at;
    while gap > 0 {
        let chunk = clamp_ticks(gap);
        let id1 = song.alloc_event_id();
        song.track_mut(track_id).unwrap().events.insert(
            idx,
            Entry::new(id1, Event::Duration(Duration { ticks: chunk, quant: None, velocity: None })),
        );
        idx += 1;
        let id2 = song.alloc_event_id();
        song.track_mut(track_id).unwrap().events.insert(idx, Entry::new(id2, fill.into()));
        idx += 1;
        gap -= chunk as u32;
    }
    let events = &mut song.track_mut(track_id).unwrap().events;
    if events.is_empty() || !matches!(events.last().unwrap().event, Event::End) {
        let id = song.alloc_event_id();
        song.track_mut(track_id).unwrap().events.push(Entry::new(id, Event::End));
    }
    true
}

fn channel_track_id(song: &Song, location: &EditorLocation) -> Option<TrackId> {
    song.pattern(location.pattern_id)?.channel_track_ids.map(|ids| ids[location.channel as usize]).filter(|id| *id >= 0)
}

/// Writes a row event at `location` (§4.3.2).
pub fn set_row_event(song: &mut Song, location: &EditorLocation, event: RowEvent) -> bool {
    let had_track_before = channel_has_assigned_track(song, location);
    let baseline_end = if had_track_before { None } else { pattern_end_tick(song, location.pattern_id) };

    let Some(track_id) = resolve_channel_track(song, location, true) else { return false };
    let Some(flat) = flatten_channel(song, location) else { return false };
    let spans = collect_row_spans(&flat);

    let changed = match find_target_span_index(&spans, location.row) {
        None => set_row_event_past_end(song, location, track_id, &spans, event),
        Some(idx) => set_row_event_in_span(song, track_id, &spans[idx], location.row, event),
    };

    if changed && !had_track_before {
        if let Some(end) = baseline_end {
            if end > location.row {
                extend_channel_to_tick(song, location, end);
            }
        }
    }
    if changed {
        song.content_origin = nspc_types::ContentOrigin::UserProvided;
    }
    changed
}

fn set_row_event_past_end(
    song: &mut Song,
    location: &EditorLocation,
    track_id: TrackId,
    spans: &[RowSpan],
    event: RowEvent,
) -> bool {
    let (end_tick, fill) = match spans.last() {
        Some(last) => (last.start_tick + last.length, continuation_event(last.event)),
        None => (0, RowEvent::Tie),
    };
    if location.row < end_tick {
        return false;
    }

    let mut gap = location.row - end_tick;
    let mut insert_idx = find_end_index(&song.track(track_id).unwrap().events);
    while gap > 0 {
        let chunk = clamp_ticks(gap);
        insert_duration_event(&mut song.track_mut(track_id).unwrap().events, insert_idx, chunk, song);
        insert_idx += 1;
        let id = song.alloc_event_id();
        song.track_mut(track_id).unwrap().events.insert(insert_idx, Entry::new(id, Event::from(fill)));
        insert_idx += 1;
        gap -= chunk as u32;
    }

    insert_duration_event(&mut song.track_mut(track_id).unwrap().events, insert_idx, 1, song);
    insert_idx += 1;
    let id = song.alloc_event_id();
    song.track_mut(track_id).unwrap().events.insert(insert_idx, Entry::new(id, Event::from(event)));

    let events = &mut song.track_mut(track_id).unwrap().events;
    if events.is_empty() || !matches!(events.last().unwrap().event, Event::End) {
        let id = song.alloc_event_id();
        song.track_mut(track_id).unwrap().events.push(Entry::new(id, Event::End));
    }
    true
}

fn set_row_event_in_span(song: &mut Song, track_id: TrackId, target: &RowSpan, row: u32, event: RowEvent) -> bool {
    if row == target.start_tick {
        let changed = write_event_at_source(song, &target.source, Event::from(event));
        if changed {
            compact_continuation_at_row(song, track_id, row);
        }
        return changed;
    }

    if !is_track_owned(&target.source, track_id) {
        // Row falls mid-span inside an inlined subroutine call: whole-span
        // overwrites only, per above.
        return false;
    }

    if same_row_event(event, continuation_event(target.event)) {
        return false;
    }

    let before_len = row - target.start_tick;
    let tail_len = target.length - before_len;
    if before_len == 0 || tail_len == 0 {
        return false;
    }

    let Some(events) = resolve_owner_events_mut(song, target.source.owner, target.source.owner_id) else { return false };
    let Some(idx) = resolve_event_index(events, &target.source) else { return false };

    let original_ticks = clamp_ticks(target.length);
    ensure_duration_before(song, target.source.owner, target.source.owner_id, idx, clamp_ticks(before_len));

    let events = resolve_owner_events_mut(song, target.source.owner, target.source.owner_id).unwrap();
    let mut insert_idx = idx + 1;
    insert_duration_event(events, insert_idx, clamp_ticks(tail_len), song);
    insert_idx += 1;
    let id = song.alloc_event_id();
    resolve_owner_events_mut(song, target.source.owner, target.source.owner_id)
        .unwrap()
        .insert(insert_idx, Entry::new(id, Event::from(event)));

    restore_duration_before_next_timed(song, target.source.owner, target.source.owner_id, insert_idx + 1, original_ticks);
    compact_continuation_at_row(song, track_id, row);
    true
}

fn write_event_at_source(song: &mut Song, source: &EventRef, event: Event) -> bool {
    let Some(events) = resolve_owner_events_mut(song, source.owner, source.owner_id) else { return false };
    let Some(idx) = resolve_event_index(events, source) else { return false };
    events[idx].event = event;
    true
}

/// Resolves a flattener-produced `EventRef` back to a live index in the
/// owner's current event vec. `event_index` is a hint; `event_id` is
/// authoritative if the hint went stale (§9, grounded in `resolveEventIndex`).
fn resolve_event_index(events: &[Entry], source: &EventRef) -> Option<usize> {
    if let Some(entry) = events.get(source.event_index) {
        if entry.id == source.event_id {
            return Some(source.event_index);
        }
    }
    events.iter().position(|e| e.id == source.event_id)
}

fn ensure_duration_before(song: &mut Song, owner: EventOwner, owner_id: i32, index: usize, ticks: u8) {
    let events = resolve_owner_events_mut(song, owner, owner_id).unwrap();
    if index > 0 {
        if let Event::Duration(d) = &mut events[index - 1].event {
            d.ticks = ticks;
            return;
        }
    }
    insert_duration_event(events, index, ticks, song);
}

fn restore_duration_before_next_timed(song: &mut Song, owner: EventOwner, owner_id: i32, scan_from: usize, ticks: u8) {
    let events = resolve_owner_events_mut(song, owner, owner_id).unwrap();
    for i in scan_from..events.len() {
        match &events[i].event {
            Event::End => return,
            Event::Duration(_) => return,
            e if e.is_tick_consuming() => {
                insert_duration_event(events, i, ticks, song);
                return;
            }
            _ => continue,
        }
    }
}

/// Merges a span into its predecessor when it is the predecessor's implicit
/// continuation and the combined length still fits in one `Duration` (§4.3.5).
fn compact_continuation_at_row(song: &mut Song, track_id: TrackId, row: u32) {
    if row == 0 {
        return;
    }
    let Some(track) = song.track(track_id) else { return };
    let events = &track.events;

    // Walk the track's own stream (compaction only applies to spans that
    // live directly in the channel's track, never inside subroutines).
    let mut tick = 0u32;
    let mut duration = Duration { ticks: 1, quant: None, velocity: None };
    let mut prev: Option<(usize, u32, u32, RowEvent)> = None; // index, start, length, event
    for (i, entry) in events.iter().enumerate() {
        match &entry.event {
            Event::Duration(d) => duration = *d,
            Event::End => break,
            e => {
                if let Some(row_event) = e.as_row_event() {
                    let length = duration.ticks.max(MIN_DURATION_TICKS) as u32;
                    if tick == row {
                        if let Some((prev_idx, prev_start, prev_len, prev_event)) = prev {
                            if same_row_event(row_event, continuation_event(prev_event))
                                && i.saturating_sub(prev_idx) >= 1
                                && prev_len + length <= MAX_DURATION_TICKS as u32
                            {
                                merge_spans(song, track_id, prev_idx, i, prev_start, prev_len + length);
                            }
                        }
                        return;
                    }
                    prev = Some((i, tick, length, row_event));
                    tick += length;
                }
            }
        }
    }
}

fn merge_spans(song: &mut Song, track_id: TrackId, prev_event_idx: usize, target_event_idx: usize, _prev_start: u32, new_len: u32) {
    let Some(track) = song.track_mut(track_id) else { return };
    let events = &mut track.events;
    if prev_event_idx > 0 {
        if let Event::Duration(d) = &mut events[prev_event_idx - 1].event {
            d.ticks = clamp_ticks(new_len);
        }
    }
    // Erase everything from just after the previous anchor through the
    // target anchor (its governing Duration plus the anchor itself).
    let erase_start = prev_event_idx + 1;
    let erase_end = target_event_idx + 1;
    if erase_end > erase_start && erase_end <= events.len() {
        events.drain(erase_start..erase_end);
    }
}

/// Deletes the row event at `location` (§4.3.3).
pub fn delete_row_event(song: &mut Song, location: &EditorLocation) -> bool {
    let Some(track_id) = channel_track_id(song, location) else { return false };
    let Some(flat) = flatten_channel(song, location) else { return false };
    let spans = collect_row_spans(&flat);
    let Some(target_idx) = find_target_span_index(&spans, location.row) else { return false };
    let target = &spans[target_idx];
    if location.row != target.start_tick {
        return false;
    }
    if !is_track_owned(&target.source, track_id) {
        return false;
    }

    let previous = target_idx.checked_sub(1).map(|i| &spans[i]).filter(|p| is_track_owned(&p.source, track_id));

    let changed = if matches!(target.event, RowEvent::Tie) {
        let Some(previous) = previous else { return false };
        let previous_continues_as_tie = matches!(continuation_event(previous.event), RowEvent::Tie);
        let overflow_continuation_tie = previous_continues_as_tie && previous.length >= 0xFF;
        if overflow_continuation_tie {
            false
        } else {
            merge_into_previous(song, track_id, previous, target)
        }
    } else if let Some(previous) = previous {
        if merge_into_previous(song, track_id, previous, target) {
            true
        } else {
            write_event_at_source(song, &target.source, Event::from(continuation_event(previous.event)));
            compact_continuation_at_row(song, track_id, target.start_tick);
            true
        }
    } else if matches!(target.event, RowEvent::Tie) {
        false
    } else {
        write_event_at_source(song, &target.source, Event::Tie)
    };

    if changed {
        song.content_origin = nspc_types::ContentOrigin::UserProvided;
    }
    changed
}

fn merge_into_previous(song: &mut Song, track_id: TrackId, previous: &RowSpan, target: &RowSpan) -> bool {
    if previous.length + target.length > MAX_DURATION_TICKS as u32 {
        return false;
    }
    let Some(track) = song.track(track_id) else { return false };
    let events = &track.events;
    let Some(prev_idx) = resolve_event_index(events, &previous.source) else { return false };
    let Some(target_idx) = resolve_event_index(events, &target.source) else { return false };
    merge_spans(song, track_id, prev_idx, target_idx, previous.start_tick, previous.length + target.length);
    true
}

/// Extends the row's span by 1 tick (§4.3.4).
pub fn insert_tick_at_row(song: &mut Song, location: &EditorLocation) -> bool {
    let Some(track_id) = resolve_channel_track(song, location, true) else { return false };
    let Some(flat) = flatten_channel(song, location) else { return false };
    let spans = collect_row_spans(&flat);

    let changed = match find_target_span_index(&spans, location.row) {
        Some(idx) if is_track_owned(&spans[idx].source, track_id) => {
            let span = &spans[idx];
            let events = &song.track(track_id).unwrap().events;
            let Some(event_idx) = resolve_event_index(events, &span.source) else { return false };
            let new_len = span.length + 1;
            ensure_duration_before(song, EventOwner::Track, track_id, event_idx, clamp_ticks(new_len));
            true
        }
        Some(_) => false,
        None => {
            // Beyond all spans: extend with one tick of continuation filler.
            extend_channel_to_tick(song, location, location.row + 1)
        }
    };
    if changed {
        song.content_origin = nspc_types::ContentOrigin::UserProvided;
    }
    changed
}

/// Shrinks the row's span by 1 tick, removing the anchor if it reaches zero
/// length (§4.3.4). Refuses when the track contains subroutine calls,
/// mirroring the original's guard against ambiguous shrinks through a call.
pub fn remove_tick_at_row(song: &mut Song, location: &EditorLocation) -> bool {
    let Some(track_id) = channel_track_id(song, location) else { return false };
    if track_has_subroutine_calls(song, track_id) {
        return false;
    }
    let Some(flat) = flatten_channel(song, location) else { return false };
    let spans = collect_row_spans(&flat);
    let Some(idx) = find_target_span_index(&spans, location.row) else { return false };
    let target = &spans[idx];
    if !is_track_owned(&target.source, track_id) {
        return false;
    }

    let events = &song.track(track_id).unwrap().events;
    let Some(event_idx) = resolve_event_index(events, &target.source) else { return false };

    let changed = if target.length <= 1 {
        let events = &mut song.track_mut(track_id).unwrap().events;
        if event_idx >= events.len() || !events[event_idx].event.is_tick_consuming() {
            false
        } else {
            events.remove(event_idx);
            erase_orphan_duration_before(events, event_idx);
            true
        }
    } else {
        let new_len = target.length - 1;
        ensure_duration_before(song, EventOwner::Track, track_id, event_idx, clamp_ticks(new_len));
        true
    };
    if changed {
        song.content_origin = nspc_types::ContentOrigin::UserProvided;
    }
    changed
}

fn erase_orphan_duration_before(events: &mut Vec<Entry>, erased_index: usize) {
    if erased_index == 0 {
        return;
    }
    let before = erased_index - 1;
    let orphaned = matches!(events[before].event, Event::Duration(_))
        && events.get(erased_index).map(|e| !e.event.is_tick_consuming() && !matches!(e.event, Event::Duration(_))).unwrap_or(true);
    if orphaned {
        events.remove(before);
    }
}

fn track_has_subroutine_calls(song: &Song, track_id: TrackId) -> bool {
    song.track(track_id)
        .map(|t| t.events.iter().any(|e| matches!(e.event, Event::Vcmd(Vcmd::SubroutineCall { .. }))))
        .unwrap_or(false)
}

fn vcmds_at_tick(flat: &nspc_types::FlatChannel, row: u32) -> Vec<(EventRef, Vcmd)> {
    flat.events
        .iter()
        .filter(|e| e.tick == row)
        .filter_map(|e| match &e.event {
            Event::Vcmd(v) => Some((e.source, v.clone())),
            _ => None,
        })
        .collect()
}

fn replace_vcmd_at_row(
    song: &mut Song,
    location: &EditorLocation,
    matches_fn: impl Fn(&Vcmd) -> bool,
    replacement: Option<Vcmd>,
) -> bool {
    let had_track_before = channel_has_assigned_track(song, location);
    let baseline_end = if had_track_before { None } else { pattern_end_tick(song, location.pattern_id) };
    let Some(track_id) = resolve_channel_track(song, location, true) else { return false };
    let Some(flat) = flatten_channel(song, location) else { return false };

    let existing: Vec<_> = vcmds_at_tick(&flat, location.row).into_iter().filter(|(_, v)| matches_fn(v)).collect();

    let mut changed = false;
    match replacement {
        None => {
            for (source, _) in &existing {
                if let Some(events) = resolve_owner_events_mut(song, source.owner, source.owner_id) {
                    if let Some(idx) = resolve_event_index(events, source) {
                        events.remove(idx);
                        changed = true;
                    }
                }
            }
        }
        Some(new_vcmd) => {
            if let Some((keep, rest)) = existing.split_first() {
                if let Some(events) = resolve_owner_events_mut(song, keep.0.owner, keep.0.owner_id) {
                    if let Some(idx) = resolve_event_index(events, &keep.0) {
                        events[idx].event = Event::Vcmd(new_vcmd);
                        changed = true;
                    }
                }
                for (source, _) in rest {
                    if let Some(events) = resolve_owner_events_mut(song, source.owner, source.owner_id) {
                        if let Some(idx) = resolve_event_index(events, source) {
                            events.remove(idx);
                        }
                    }
                }
            } else {
                // None existed at this tick: insert immediately before the
                // row's anchor, splitting if the row is mid-span.
                changed = insert_vcmd_before_row(song, track_id, location.row, new_vcmd);
            }
        }
    }

    if changed && !had_track_before {
        if let Some(end) = baseline_end {
            if end > location.row {
                extend_channel_to_tick(song, location, end);
            }
        }
    }
    if changed {
        song.content_origin = nspc_types::ContentOrigin::UserProvided;
    }
    changed
}

/// Inserts `vcmd` into the channel's track, just before the anchor of the
/// timed event governing `row` (or at the track's `End` if `row` is beyond
/// every span). Only ever called against a channel's own track: VCMDs with
/// no existing instance at a tick are written to the track, not into
/// whichever subroutine happens to be playing at that tick.
fn insert_vcmd_before_row(song: &mut Song, track_id: TrackId, row: u32, vcmd: Vcmd) -> bool {
    let events = &song.track(track_id).unwrap().events;
    let mut tick = 0u32;
    let mut duration_ticks = 1u8;
    let mut insert_index = events.len();
    for (i, entry) in events.iter().enumerate() {
        match &entry.event {
            Event::Duration(d) => duration_ticks = d.ticks.max(MIN_DURATION_TICKS),
            Event::End => {
                insert_index = i;
                break;
            }
            e if e.is_tick_consuming() => {
                if tick >= row {
                    insert_index = i;
                    break;
                }
                tick += duration_ticks as u32;
            }
            _ => {}
        }
    }
    let id = song.alloc_event_id();
    song.track_mut(track_id).unwrap().events.insert(insert_index, Entry::new(id, Event::Vcmd(vcmd)));
    true
}

pub fn set_instrument_at_row(song: &mut Song, location: &EditorLocation, instrument: Option<u8>) -> bool {
    replace_vcmd_at_row(song, location, Vcmd::is_instrument, instrument.map(|instrument| Vcmd::Inst { instrument }))
}

pub fn set_volume_at_row(song: &mut Song, location: &EditorLocation, volume: Option<u8>) -> bool {
    replace_vcmd_at_row(song, location, Vcmd::is_volume, volume.map(|volume| Vcmd::Volume { volume }))
}

/// Writes `(quant, velocity)` into the Duration governing the row; `None`
/// clears both fields (§4.3.6).
pub fn set_qv_at_row(song: &mut Song, location: &EditorLocation, qv: Option<(u8, u8)>) -> bool {
    let Some(track_id) = resolve_channel_track(song, location, true) else { return false };
    let Some(flat) = flatten_channel(song, location) else { return false };
    let spans = collect_row_spans(&flat);
    let Some(idx) = find_target_span_index(&spans, location.row) else { return false };
    let target = &spans[idx];
    if !is_track_owned(&target.source, track_id) {
        return false;
    }
    let events = &mut song.track_mut(track_id).unwrap().events;
    let Some(event_idx) = resolve_event_index(events, &target.source) else { return false };
    if event_idx > 0 {
        if let Event::Duration(d) = &mut events[event_idx - 1].event {
            match qv {
                Some((q, v)) => {
                    d.quant = Some(q);
                    d.velocity = Some(v);
                }
                None => {
                    d.quant = None;
                    d.velocity = None;
                }
            }
            song.content_origin = nspc_types::ContentOrigin::UserProvided;
            return true;
        }
    }
    let ticks = clamp_ticks(target.length);
    let id = song.alloc_event_id();
    let (quant, velocity) = qv.map(|(q, v)| (Some(q), Some(v))).unwrap_or((None, None));
    song.track_mut(track_id).unwrap().events.insert(
        event_idx,
        Entry::new(id, Event::Duration(Duration { ticks, quant, velocity })),
    );
    song.content_origin = nspc_types::ContentOrigin::UserProvided;
    true
}

pub fn set_effect_at_row(song: &mut Song, location: &EditorLocation, effect: Option<Vcmd>) -> bool {
    replace_vcmd_at_row(song, location, Vcmd::is_effect, effect)
}

/// Appends a new effect after the last effect at the tick, rather than
/// replacing (§4.3.7).
pub fn add_effect_at_row(song: &mut Song, location: &EditorLocation, effect: Vcmd) -> bool {
    let had_track_before = channel_has_assigned_track(song, location);
    let baseline_end = if had_track_before { None } else { pattern_end_tick(song, location.pattern_id) };
    let Some(track_id) = resolve_channel_track(song, location, true) else { return false };
    let Some(flat) = flatten_channel(song, location) else { return false };
    let existing = vcmds_at_tick(&flat, location.row);
    let last_effect = existing.iter().rev().find(|(_, v)| v.is_effect()).cloned();

    let changed = match last_effect {
        Some((source, _)) => {
            if let Some(events) = resolve_owner_events_mut(song, source.owner, source.owner_id) {
                if let Some(idx) = resolve_event_index(events, &source) {
                    let id = song.alloc_event_id();
                    let events = resolve_owner_events_mut(song, source.owner, source.owner_id).unwrap();
                    events.insert(idx + 1, Entry::new(id, Event::Vcmd(effect)));
                    true
                } else {
                    false
                }
            } else {
                false
            }
        }
        None => insert_vcmd_before_row(song, track_id, location.row, effect),
    };

    if changed && !had_track_before {
        if let Some(end) = baseline_end {
            if end > location.row {
                extend_channel_to_tick(song, location, end);
            }
        }
    }
    if changed {
        song.content_origin = nspc_types::ContentOrigin::UserProvided;
    }
    changed
}

/// Removes all effect VCMDs at the tick. Subroutine calls are preserved by
/// default (`preserve_subroutine_calls = true`, §4.3.7).
pub fn clear_effects_at_row(song: &mut Song, location: &EditorLocation, preserve_subroutine_calls: bool) -> bool {
    replace_vcmd_at_row(
        song,
        location,
        |v| v.is_effect() && !(preserve_subroutine_calls && v.is_subroutine_call()),
        None,
    )
}

/// Extracts `[start_row, end_row]` of the channel's track into a new
/// subroutine, replacing the slice with a single call (§4.3.8).
pub fn create_subroutine_from_row_range(
    song: &mut Song,
    location: &EditorLocation,
    start_row: u32,
    end_row: u32,
) -> Option<SubroutineId> {
    if end_row < start_row {
        return None;
    }
    let track_id = channel_track_id(song, location)?;
    let flat = flatten_channel(song, location)?;
    let spans = collect_row_spans(&flat);
    let start_span = spans.iter().find(|s| s.start_tick >= start_row && is_track_owned(&s.source, track_id))?;
    let end_span = spans
        .iter()
        .rev()
        .find(|s| s.start_tick <= end_row && is_track_owned(&s.source, track_id))?;

    let events = &song.track(track_id).unwrap().events;
    let start_idx = resolve_event_index(events, &start_span.source)?;
    let end_idx = resolve_event_index(events, &end_span.source)?;
    if end_idx < start_idx {
        return None;
    }

    // Carry the governing Duration along with the slice.
    let slice_start = if start_idx > 0 && matches!(events[start_idx - 1].event, Event::Duration(_)) {
        start_idx - 1
    } else {
        start_idx
    };

    let slice: Vec<Entry> = events[slice_start..=end_idx].to_vec();
    let sub_id = song.add_subroutine();
    {
        let sub = song.subroutine_mut(sub_id).unwrap();
        sub.events = slice
            .into_iter()
            .map(|entry| {
                let id = song.alloc_event_id();
                Entry::new(id, entry.event)
            })
            .collect();
    }
    let end_id = song.alloc_event_id();
    song.subroutine_mut(sub_id).unwrap().events.push(Entry::new(end_id, Event::End));

    let call_id = song.alloc_event_id();
    let call = Entry::new(
        call_id,
        Event::Vcmd(Vcmd::SubroutineCall { subroutine_id: sub_id, original_addr: 0, count: 1 }),
    );
    let track_events = &mut song.track_mut(track_id).unwrap().events;
    track_events.splice(slice_start..=end_idx, std::iter::once(call));

    song.content_origin = nspc_types::ContentOrigin::UserProvided;
    Some(sub_id)
}

/// Inlines every call to `sub_id` on this channel's track, replacing each
/// with `count` verbatim copies of the subroutine's events (excluding End),
/// each with fresh ids (§4.3.8).
pub fn flatten_subroutine_on_channel(song: &mut Song, location: &EditorLocation, sub_id: SubroutineId) -> bool {
    let Some(track_id) = channel_track_id(song, location) else { return false };
    inline_subroutine_calls_in_track(song, track_id, sub_id)
}

fn inline_subroutine_calls_in_track(song: &mut Song, track_id: TrackId, sub_id: SubroutineId) -> bool {
    let Some(sub_events) = song.subroutine(sub_id).map(|s| s.events.clone()) else { return false };
    let body: Vec<Entry> = sub_events.into_iter().filter(|e| !matches!(e.event, Event::End)).collect();

    let mut changed = false;
    loop {
        let Some(call_idx) = song
            .track(track_id)
            .unwrap()
            .events
            .iter()
            .position(|e| matches!(&e.event, Event::Vcmd(Vcmd::SubroutineCall { subroutine_id, .. }) if *subroutine_id == sub_id))
        else {
            break;
        };
        let count = match &song.track(track_id).unwrap().events[call_idx].event {
            Event::Vcmd(Vcmd::SubroutineCall { count, .. }) => *count,
            _ => 1,
        };
        let mut replacement = Vec::new();
        for _ in 0..count.max(1) {
            for entry in &body {
                let id = song.alloc_event_id();
                replacement.push(Entry::new(id, entry.event.clone()));
            }
        }
        song.track_mut(track_id).unwrap().events.splice(call_idx..=call_idx, replacement);
        changed = true;
    }
    if changed {
        song.content_origin = nspc_types::ContentOrigin::UserProvided;
    }
    changed
}

/// Inlines and removes `sub_id` everywhere, renumbering densely (§4.3.8).
pub fn delete_subroutine(song: &mut Song, sub_id: SubroutineId) -> bool {
    if song.subroutine(sub_id).is_none() {
        return false;
    }
    let track_ids: Vec<TrackId> = song.tracks.iter().map(|t| t.id).collect();
    for track_id in track_ids {
        inline_subroutine_calls_in_track(song, track_id, sub_id);
    }
    let other_sub_ids: Vec<SubroutineId> = song.subroutines.iter().map(|s| s.id).filter(|id| *id != sub_id).collect();
    for other_id in other_sub_ids {
        inline_subroutine_in_subroutine(song, other_id, sub_id);
    }

    let idx = song.subroutines.iter().position(|s| s.id == sub_id).unwrap();
    song.subroutines.remove(idx);
    song.renumber_subroutines(sub_id);
    song.content_origin = nspc_types::ContentOrigin::UserProvided;
    true
}

fn inline_subroutine_in_subroutine(song: &mut Song, host_id: SubroutineId, sub_id: SubroutineId) {
    let Some(sub_events) = song.subroutine(sub_id).map(|s| s.events.clone()) else { return };
    let body: Vec<Entry> = sub_events.into_iter().filter(|e| !matches!(e.event, Event::End)).collect();
    loop {
        let Some(host) = song.subroutine(host_id) else { return };
        let Some(call_idx) = host
            .events
            .iter()
            .position(|e| matches!(&e.event, Event::Vcmd(Vcmd::SubroutineCall { subroutine_id, .. }) if *subroutine_id == sub_id))
        else {
            return;
        };
        let count = match &host.events[call_idx].event {
            Event::Vcmd(Vcmd::SubroutineCall { count, .. }) => *count,
            _ => 1,
        };
        let mut replacement = Vec::new();
        for _ in 0..count.max(1) {
            for entry in &body {
                let id = song.alloc_event_id();
                replacement.push(Entry::new(id, entry.event.clone()));
            }
        }
        song.subroutine_mut(host_id).unwrap().events.splice(call_idx..=call_idx, replacement);
    }
}

/// Trims or extends every track this pattern references so total ticks equal
/// `target_tick` (§4.3.9). Refuses if any affected track has subroutine
/// calls, matching the original's ambiguity guard.
pub fn set_pattern_length(song: &mut Song, pattern_id: PatternId, target_tick: u32) -> bool {
    let Some(pattern) = song.pattern(pattern_id) else { return false };
    let Some(track_ids) = pattern.channel_track_ids else { return false };
    let track_ids: Vec<TrackId> = track_ids.into_iter().filter(|id| *id >= 0).collect();

    if track_ids.iter().any(|id| track_has_subroutine_calls(song, *id)) {
        return false;
    }

    let mut changed = false;
    for track_id in track_ids {
        let flat = flatten_pattern_by_id(song, pattern_id, &FlattenOptions::default());
        let Some(flat) = flat else { continue };
        let channel = flat.channels.iter().find(|c| c.track_id == Some(track_id));
        let Some(channel) = channel else { continue };
        let spans = collect_row_spans(channel);

        match find_target_span_index(&spans, target_tick) {
            Some(idx) if spans[idx].start_tick == target_tick => {
                let events = &song.track(track_id).unwrap().events;
                if let Some(event_idx) = resolve_event_index(events, &spans[idx].source) {
                    let events = &mut song.track_mut(track_id).unwrap().events;
                    let end = find_end_index(events).min(events.len());
                    let trim_from = if event_idx > 0 && matches!(events[event_idx - 1].event, Event::Duration(_)) {
                        event_idx - 1
                    } else {
                        event_idx
                    };
                    if trim_from < end {
                        events.drain(trim_from..end);
                    }
                    let id = song.alloc_event_id();
                    song.track_mut(track_id).unwrap().events.push(Entry::new(id, Event::End));
                    changed = true;
                }
            }
            Some(idx) => {
                // target falls mid-span: split, keep the prefix.
                let target = &spans[idx];
                let before_len = target_tick - target.start_tick;
                let events = &song.track(track_id).unwrap().events;
                if let Some(event_idx) = resolve_event_index(events, &target.source) {
                    ensure_duration_before(song, EventOwner::Track, track_id, event_idx, clamp_ticks(before_len));
                    let events = &mut song.track_mut(track_id).unwrap().events;
                    let end = find_end_index(events).min(events.len());
                    if event_idx + 1 < end {
                        events.drain(event_idx + 1..end);
                    }
                    let id = song.alloc_event_id();
                    song.track_mut(track_id).unwrap().events.push(Entry::new(id, Event::End));
                    changed = true;
                }
            }
            None => {
                // Beyond current content: extend with continuation filler.
                let current_end = channel.total_ticks;
                if target_tick > current_end {
                    let loc = EditorLocation { pattern_id, channel: channel.channel, row: target_tick };
                    changed |= extend_channel_to_tick(song, &loc, target_tick - current_end);
                }
            }
        }
    }

    if changed {
        song.content_origin = nspc_types::ContentOrigin::UserProvided;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use nspc_types::Pattern;

    fn new_song_with_empty_pattern() -> Song {
        let mut song = Song::new_empty(0);
        song.patterns.push(Pattern::new(0));
        song
    }

    #[test]
    fn set_row_event_on_empty_channel_creates_track() {
        let mut song = new_song_with_empty_pattern();
        let loc = EditorLocation { pattern_id: 0, channel: 0, row: 0 };
        assert!(set_row_event(&mut song, &loc, RowEvent::Note { pitch: 12 }));
        assert_eq!(song.tracks.len(), 1);
        assert_eq!(song.content_origin, nspc_types::ContentOrigin::UserProvided);

        let flat = flatten_pattern_by_id(&song, 0, &FlattenOptions::default()).unwrap();
        let ch0 = &flat.channels[0];
        assert!(ch0.events.iter().any(|e| matches!(e.event, Event::Note { pitch: 12 })));
    }

    #[test]
    fn set_row_event_past_end_fills_gap_with_ties() {
        let mut song = new_song_with_empty_pattern();
        let loc = EditorLocation { pattern_id: 0, channel: 0, row: 5 };
        assert!(set_row_event(&mut song, &loc, RowEvent::Note { pitch: 3 }));
        let flat = flatten_pattern_by_id(&song, 0, &FlattenOptions::default()).unwrap();
        let note = flat.channels[0].events.iter().find(|e| matches!(e.event, Event::Note { .. })).unwrap();
        assert_eq!(note.tick, 5);
    }

    #[test]
    fn delete_row_event_on_first_row_becomes_tie() {
        let mut song = new_song_with_empty_pattern();
        let loc = EditorLocation { pattern_id: 0, channel: 0, row: 0 };
        set_row_event(&mut song, &loc, RowEvent::Note { pitch: 9 });
        assert!(delete_row_event(&mut song, &loc));
        let flat = flatten_pattern_by_id(&song, 0, &FlattenOptions::default()).unwrap();
        assert!(matches!(flat.channels[0].events[0].event, Event::Tie));
    }

    #[test]
    fn set_instrument_inserts_vcmd() {
        let mut song = new_song_with_empty_pattern();
        let loc = EditorLocation { pattern_id: 0, channel: 0, row: 0 };
        set_row_event(&mut song, &loc, RowEvent::Note { pitch: 0 });
        assert!(set_instrument_at_row(&mut song, &loc, Some(4)));
        let flat = flatten_pattern_by_id(&song, 0, &FlattenOptions::default()).unwrap();
        assert!(flat.channels[0]
            .events
            .iter()
            .any(|e| matches!(&e.event, Event::Vcmd(Vcmd::Inst { instrument: 4 }))));
    }

    #[test]
    fn insert_then_remove_tick_round_trips_length() {
        let mut song = new_song_with_empty_pattern();
        let loc = EditorLocation { pattern_id: 0, channel: 0, row: 0 };
        set_row_event(&mut song, &loc, RowEvent::Note { pitch: 0 });
        let before = flatten_pattern_by_id(&song, 0, &FlattenOptions::default()).unwrap().total_ticks;
        assert!(insert_tick_at_row(&mut song, &loc));
        let after_insert = flatten_pattern_by_id(&song, 0, &FlattenOptions::default()).unwrap().total_ticks;
        assert_eq!(after_insert, before + 1);
        assert!(remove_tick_at_row(&mut song, &loc));
        let after_remove = flatten_pattern_by_id(&song, 0, &FlattenOptions::default()).unwrap().total_ticks;
        assert_eq!(after_remove, before);
    }

    #[test]
    fn create_and_delete_subroutine_round_trips() {
        let mut song = new_song_with_empty_pattern();
        let loc = EditorLocation { pattern_id: 0, channel: 0, row: 0 };
        set_row_event(&mut song, &loc, RowEvent::Note { pitch: 0 });
        let sub_id = create_subroutine_from_row_range(&mut song, &loc, 0, 0);
        assert!(sub_id.is_some());
        assert_eq!(song.subroutines.len(), 1);
        assert!(delete_subroutine(&mut song, sub_id.unwrap()));
        assert!(song.subroutines.is_empty());
    }
}
