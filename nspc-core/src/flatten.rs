//! Pattern flattener (§4.2): depth-first traversal of each channel's track,
//! inlining subroutine calls, producing tick-indexed streams for the editor
//! and compiler to share a common view of "what plays when".

use nspc_types::{
    Duration, Event, EventOwner, EventRef, FlatChannel, FlatEvent, FlatPattern, FlattenOptions,
    Pattern, Song, SubroutineFrame,
};

fn resolve_events<'a>(song: &'a Song, owner: EventOwner, owner_id: i32) -> Option<&'a [nspc_types::Entry]> {
    if owner_id < 0 {
        return None;
    }
    let idx = owner_id as usize;
    match owner {
        EventOwner::Track => song.tracks.get(idx).filter(|t| t.id == owner_id).map(|t| t.events.as_slice()),
        EventOwner::Subroutine => song
            .subroutines
            .get(idx)
            .filter(|s| s.id == owner_id)
            .map(|s| s.events.as_slice()),
    }
}

struct FlattenState<'a> {
    song: &'a Song,
    options: &'a FlattenOptions,
    channel: &'a mut FlatChannel,
    tick: u32,
    current_duration: Duration,
    call_stack: Vec<SubroutineFrame>,
}

/// Returns `false` when a ceiling (`max_events_per_channel` or
/// `max_ticks_per_channel`) was hit and the caller should stop immediately.
fn push_flat_event(
    state: &mut FlattenState,
    entry: &nspc_types::Entry,
    owner: EventOwner,
    owner_id: i32,
    event_index: usize,
) -> bool {
    if state.channel.events.len() as u32 >= state.options.max_events_per_channel {
        return false;
    }
    state.channel.events.push(FlatEvent {
        tick: state.tick,
        event: entry.event.clone(),
        source: EventRef { owner, owner_id, event_index, event_id: entry.id },
        subroutine_stack: state.call_stack.clone(),
    });
    true
}

fn would_recurse(state: &FlattenState, subroutine_id: i32) -> bool {
    state.call_stack.iter().any(|f| f.subroutine_id == subroutine_id)
}

/// Walks one owner's event stream, inlining subroutine calls as it goes.
/// Returns `false` if a hard ceiling was hit (caller should stop the whole channel).
fn flatten_stream(state: &mut FlattenState, owner: EventOwner, owner_id: i32) -> bool {
    let events = match resolve_events(state.song, owner, owner_id) {
        Some(events) => events,
        None => return true,
    };

    for (i, entry) in events.iter().enumerate() {
        if !push_flat_event(state, entry, owner, owner_id, i) {
            return false;
        }

        match &entry.event {
            Event::Duration(d) => {
                state.current_duration = *d;
            }
            Event::Vcmd(nspc_types::Vcmd::SubroutineCall { subroutine_id, count, .. }) => {
                if state.call_stack.len() as u16 >= state.options.max_subroutine_depth {
                    continue;
                }
                if would_recurse(state, *subroutine_id) {
                    continue;
                }
                for iteration in 0..*count {
                    state.call_stack.push(SubroutineFrame {
                        subroutine_id: *subroutine_id,
                        iteration,
                        call_event: EventRef { owner, owner_id, event_index: i, event_id: entry.id },
                    });
                    if !flatten_stream(state, EventOwner::Subroutine, *subroutine_id) {
                        return false;
                    }
                    state.call_stack.pop();
                }
            }
            Event::End => return true,
            _ if entry.event.is_tick_consuming() => {
                state.tick += state.current_duration.ticks as u32;
                if state.tick >= state.options.max_ticks_per_channel {
                    return false;
                }
            }
            _ => {}
        }
    }

    true
}

/// Tick at which a channel's *own track* (not any inlined subroutine) emits
/// `End`, used to clip the whole pattern to the earliest such tick.
fn find_track_end_tick(channel: &FlatChannel) -> Option<u32> {
    channel
        .events
        .iter()
        .find(|e| e.source.owner == EventOwner::Track && matches!(e.event, Event::End))
        .map(|e| e.tick)
}

pub fn flatten_pattern(song: &Song, pattern: &Pattern, options: &FlattenOptions) -> FlatPattern {
    let mut channels: [FlatChannel; 8] = std::array::from_fn(|i| FlatChannel::empty(i as u8));
    let mut earliest_pattern_end_tick: Option<u32> = None;
    let mut total_ticks = 0u32;

    for (channel_index, flat_channel) in channels.iter_mut().enumerate() {
        let track_id = match &pattern.channel_track_ids {
            Some(ids) => ids[channel_index],
            None => continue,
        };
        flat_channel.track_id = if track_id >= 0 { Some(track_id) } else { None };
        if track_id < 0 {
            continue;
        }

        let mut state = FlattenState {
            song,
            options,
            channel: flat_channel,
            tick: 0,
            current_duration: Duration { ticks: 1, quant: None, velocity: None },
            call_stack: Vec::new(),
        };
        let _ = flatten_stream(&mut state, EventOwner::Track, track_id);
        flat_channel.total_ticks = state.tick;

        match find_track_end_tick(flat_channel) {
            Some(end_tick) => {
                earliest_pattern_end_tick =
                    Some(earliest_pattern_end_tick.map_or(end_tick, |prev| prev.min(end_tick)));
            }
            None => {
                total_ticks = total_ticks.max(state.tick);
            }
        }
    }

    if !options.clip_to_earliest_track_end {
        for channel in &channels {
            total_ticks = total_ticks.max(channel.total_ticks);
        }
    }

    if options.clip_to_earliest_track_end {
        if let Some(stop_tick) = earliest_pattern_end_tick {
            total_ticks = stop_tick;
            for channel in &mut channels {
                channel.events.retain(|e| e.tick <= stop_tick);
                channel.total_ticks = channel.total_ticks.min(stop_tick);
            }
        }
    }

    FlatPattern { pattern_id: pattern.id, total_ticks, channels }
}

pub fn flatten_pattern_by_id(song: &Song, pattern_id: i32, options: &FlattenOptions) -> Option<FlatPattern> {
    if pattern_id < 0 {
        return None;
    }
    let pattern = song.patterns.iter().find(|p| p.id == pattern_id)?;
    Some(flatten_pattern(song, pattern, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nspc_types::{Entry, Subroutine, Track};

    fn song_with_track(events: Vec<Entry>) -> Song {
        let mut song = Song::new_empty(0);
        song.tracks.push(Track { id: 0, events, original_addr: 0 });
        song.patterns.push(Pattern { id: 0, channel_track_ids: Some([0, -1, -1, -1, -1, -1, -1, -1]), track_table_addr: 0 });
        song
    }

    #[test]
    fn flattens_simple_note_run() {
        let song = song_with_track(vec![
            Entry::new(0, Event::Duration(Duration { ticks: 4, quant: None, velocity: None })),
            Entry::new(1, Event::Note { pitch: 12 }),
            Entry::new(2, Event::End),
        ]);
        let flat = flatten_pattern_by_id(&song, 0, &FlattenOptions::default()).unwrap();
        let ch0 = &flat.channels[0];
        assert_eq!(ch0.events.len(), 3);
        assert_eq!(ch0.events[1].tick, 0);
        assert_eq!(ch0.events[2].tick, 4);
        assert_eq!(flat.total_ticks, 4);
    }

    #[test]
    fn inlines_subroutine_call_per_iteration() {
        let mut song = song_with_track(vec![
            Entry::new(0, Event::Duration(Duration { ticks: 2, quant: None, velocity: None })),
            Entry::new(1, Event::Vcmd(nspc_types::Vcmd::SubroutineCall { subroutine_id: 0, original_addr: 0, count: 2 })),
            Entry::new(2, Event::End),
        ]);
        song.subroutines.push(Subroutine {
            id: 0,
            events: vec![Entry::new(3, Event::Note { pitch: 0 }), Entry::new(4, Event::End)],
            original_addr: 0,
        });

        let flat = flatten_pattern_by_id(&song, 0, &FlattenOptions::default()).unwrap();
        let ch0 = &flat.channels[0];
        // Duration, 2x(Note, End) = 5 flat events total, but subroutine End does
        // not terminate the outer stream.
        assert_eq!(ch0.events.len(), 1 + 2 * 2);
        assert_eq!(ch0.total_ticks, 4);
    }

    #[test]
    fn recursive_subroutine_call_is_skipped() {
        let mut song = song_with_track(vec![
            Entry::new(0, Event::Vcmd(nspc_types::Vcmd::SubroutineCall { subroutine_id: 0, original_addr: 0, count: 1 })),
            Entry::new(1, Event::End),
        ]);
        song.subroutines.push(Subroutine {
            id: 0,
            events: vec![
                Entry::new(2, Event::Vcmd(nspc_types::Vcmd::SubroutineCall { subroutine_id: 0, original_addr: 0, count: 1 })),
                Entry::new(3, Event::End),
            ],
            original_addr: 0,
        });

        // Should terminate rather than recurse forever.
        let flat = flatten_pattern_by_id(&song, 0, &FlattenOptions::default()).unwrap();
        assert!(flat.channels[0].events.len() < 10);
    }
}
