//! Subroutine optimizer (§4.5, grounded on `NspcOptimize.hpp`'s use from
//! `buildSongScopedUpload`/`buildUserContentUpload`): deduplicates
//! structurally identical subroutines before compilation so the ARAM layout
//! planner doesn't have to reserve space for the same bytes twice.

use std::collections::HashMap;

use nspc_types::{Entry, Event, Song, SubroutineId, Vcmd};

#[derive(Debug, Clone, Copy)]
pub struct OptimizerOptions {
    /// Merge subroutines whose event bodies are structurally identical,
    /// remapping every call to the surviving id.
    pub dedupe_identical_subroutines: bool,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self { dedupe_identical_subroutines: true }
    }
}

#[derive(Debug, Default)]
pub struct OptimizerReport {
    /// `(removed_id, kept_id)` pairs, in the order subroutines were merged.
    pub merged: Vec<(SubroutineId, SubroutineId)>,
}

/// Runs the optimizer on a clone-on-write basis: takes `song` by value,
/// returns the optimized song plus a report of what changed. Callers that
/// want to keep the unoptimized song (e.g. `apply_optimized_song_to_project
/// = false`) simply discard the returned `Song` and use only the report's
/// upload-relevant side effects via a fresh call against a clone.
pub fn optimize_song(mut song: Song, options: &OptimizerOptions) -> (Song, OptimizerReport) {
    let mut report = OptimizerReport::default();
    if options.dedupe_identical_subroutines {
        dedupe_subroutines(&mut song, &mut report);
    }
    (song, report)
}

fn canonical_key(events: &[Entry]) -> Vec<String> {
    events.iter().map(|e| format!("{:?}", strip_call_target(&e.event))).collect()
}

/// Subroutine calls compare by `(subroutine_id, count)`: the callee must
/// match exactly, since two bodies that are identical except for which
/// subroutine they call are not interchangeable. Only `original_addr` is
/// normalized away, since it's just the address the call happened to be
/// parsed from and carries no semantic weight.
fn strip_call_target(event: &Event) -> Event {
    match event {
        Event::Vcmd(Vcmd::SubroutineCall { subroutine_id, count, .. }) => {
            Event::Vcmd(Vcmd::SubroutineCall { subroutine_id: *subroutine_id, original_addr: 0, count: *count })
        }
        other => other.clone(),
    }
}

fn dedupe_subroutines(song: &mut Song, report: &mut OptimizerReport) {
    loop {
        let mut seen: HashMap<Vec<String>, SubroutineId> = HashMap::new();
        let mut remap: HashMap<SubroutineId, SubroutineId> = HashMap::new();

        for sub in &song.subroutines {
            let key = canonical_key(&sub.events);
            match seen.get(&key) {
                Some(kept_id) if *kept_id != sub.id => {
                    remap.insert(sub.id, *kept_id);
                }
                _ => {
                    seen.insert(key, sub.id);
                }
            }
        }

        if remap.is_empty() {
            return;
        }

        for track in &mut song.tracks {
            remap_calls(&mut track.events, &remap);
        }
        for sub in &mut song.subroutines {
            remap_calls(&mut sub.events, &remap);
        }

        // Remove duplicates highest-id-first so earlier removals don't
        // shift the indices of ones still pending.
        let mut removed_ids: Vec<SubroutineId> = remap.keys().copied().collect();
        removed_ids.sort_unstable_by(|a, b| b.cmp(a));
        for removed_id in removed_ids {
            if let Some(idx) = song.subroutines.iter().position(|s| s.id == removed_id) {
                song.subroutines.remove(idx);
                song.renumber_subroutines(removed_id);
            }
            let kept_id = remap[&removed_id];
            report.merged.push((removed_id, kept_id));
        }
    }
}

fn remap_calls(events: &mut [Entry], remap: &HashMap<SubroutineId, SubroutineId>) {
    for entry in events {
        if let Event::Vcmd(Vcmd::SubroutineCall { subroutine_id, .. }) = &mut entry.event {
            if let Some(new_id) = remap.get(subroutine_id) {
                *subroutine_id = *new_id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nspc_types::{Duration, Subroutine, Track};

    fn song_with_duplicate_subroutines() -> Song {
        let mut song = Song::new_empty(0);
        let body = vec![
            Entry::new(10, Event::Duration(Duration::new(4))),
            Entry::new(11, Event::Note { pitch: 9 }),
            Entry::new(12, Event::End),
        ];
        song.subroutines.push(Subroutine { id: 0, events: body.clone(), original_addr: 0 });
        song.subroutines.push(Subroutine {
            id: 1,
            events: vec![
                Entry::new(20, Event::Duration(Duration::new(4))),
                Entry::new(21, Event::Note { pitch: 9 }),
                Entry::new(22, Event::End),
            ],
            original_addr: 0,
        });
        song.tracks.push(Track {
            id: 0,
            events: vec![
                Entry::new(1, Event::Vcmd(Vcmd::SubroutineCall { subroutine_id: 0, original_addr: 0, count: 1 })),
                Entry::new(2, Event::Vcmd(Vcmd::SubroutineCall { subroutine_id: 1, original_addr: 0, count: 1 })),
                Entry::new(3, Event::End),
            ],
            original_addr: 0,
        });
        song
    }

    #[test]
    fn merges_structurally_identical_subroutines() {
        let song = song_with_duplicate_subroutines();
        let (optimized, report) = optimize_song(song, &OptimizerOptions::default());
        assert_eq!(optimized.subroutines.len(), 1);
        assert_eq!(report.merged.len(), 1);
        for entry in &optimized.tracks[0].events {
            if let Event::Vcmd(Vcmd::SubroutineCall { subroutine_id, .. }) = &entry.event {
                assert_eq!(*subroutine_id, 0);
            }
        }
    }

    #[test]
    fn leaves_distinct_subroutines_alone() {
        let mut song = song_with_duplicate_subroutines();
        song.subroutines[1].events[1] = Entry::new(21, Event::Note { pitch: 3 });
        let (optimized, report) = optimize_song(song, &OptimizerOptions::default());
        assert_eq!(optimized.subroutines.len(), 2);
        assert!(report.merged.is_empty());
    }

    #[test]
    fn disabled_option_is_a_no_op() {
        let song = song_with_duplicate_subroutines();
        let options = OptimizerOptions { dedupe_identical_subroutines: false };
        let (optimized, report) = optimize_song(song, &options);
        assert_eq!(optimized.subroutines.len(), 2);
        assert!(report.merged.is_empty());
    }
}
