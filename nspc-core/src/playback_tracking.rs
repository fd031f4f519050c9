//! Lock-free playback indicator state (§5 "Concurrency"): the only shared
//! memory between the core and an audio-emulator thread, grounded on
//! `UiManager.cpp`'s `resetPlaybackTracking`/`app::PlaybackTrackingState`.
//!
//! The emulator thread is the sole writer; the core (and any UI polling it
//! for indicators) only ever reads these fields, with acquire/relaxed loads.
//! Nothing here spawns a thread or runs an emulator — that's out of scope —
//! this just defines the shape a host's audio thread publishes into.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

/// Atomic counters an audio-emulator thread updates as a song plays, polled
/// by the UI thread for playback indicators (current row, current pattern,
/// tick position) without any locking.
#[derive(Debug, Default)]
pub struct PlaybackTrackingState {
    pub hooks_installed: AtomicBool,
    pub awaiting_first_pattern_trigger: AtomicBool,
    pub pending_stop_at_end: AtomicBool,
    pub event_serial: AtomicU32,
    pub engine_tick_events: AtomicU32,
    pub sequence_row: AtomicI32,
    pub pattern_id: AtomicI32,
    pub pattern_tick: AtomicI32,
}

impl PlaybackTrackingState {
    pub fn new() -> Self {
        let state = Self::default();
        state.reset();
        state
    }

    /// Returns every field to its pre-playback value. Called by the host
    /// before starting or after stopping playback; never called from the
    /// emulator thread itself.
    pub fn reset(&self) {
        self.hooks_installed.store(false, Ordering::Relaxed);
        self.awaiting_first_pattern_trigger.store(false, Ordering::Relaxed);
        self.pending_stop_at_end.store(false, Ordering::Relaxed);
        self.event_serial.store(0, Ordering::Relaxed);
        self.engine_tick_events.store(0, Ordering::Relaxed);
        self.sequence_row.store(-1, Ordering::Relaxed);
        self.pattern_id.store(-1, Ordering::Relaxed);
        self.pattern_tick.store(-1, Ordering::Relaxed);
    }

    /// Snapshot of the current indicator state, for a UI frame to read once
    /// rather than issue eight separate atomic loads.
    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            hooks_installed: self.hooks_installed.load(Ordering::Acquire),
            awaiting_first_pattern_trigger: self.awaiting_first_pattern_trigger.load(Ordering::Acquire),
            pending_stop_at_end: self.pending_stop_at_end.load(Ordering::Acquire),
            event_serial: self.event_serial.load(Ordering::Acquire),
            engine_tick_events: self.engine_tick_events.load(Ordering::Acquire),
            sequence_row: self.sequence_row.load(Ordering::Acquire),
            pattern_id: self.pattern_id.load(Ordering::Acquire),
            pattern_tick: self.pattern_tick.load(Ordering::Acquire),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub hooks_installed: bool,
    pub awaiting_first_pattern_trigger: bool,
    pub pending_stop_at_end: bool,
    pub event_serial: u32,
    pub engine_tick_events: u32,
    pub sequence_row: i32,
    pub pattern_id: i32,
    pub pattern_tick: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_starts_reset() {
        let state = PlaybackTrackingState::new();
        let snap = state.snapshot();
        assert_eq!(snap.sequence_row, -1);
        assert_eq!(snap.pattern_id, -1);
        assert_eq!(snap.pattern_tick, -1);
        assert_eq!(snap.event_serial, 0);
        assert!(!snap.hooks_installed);
    }

    #[test]
    fn reset_clears_writes_from_the_emulator_side() {
        let state = PlaybackTrackingState::new();
        state.hooks_installed.store(true, Ordering::Release);
        state.sequence_row.store(7, Ordering::Release);
        state.event_serial.store(42, Ordering::Release);

        state.reset();

        let snap = state.snapshot();
        assert!(!snap.hooks_installed);
        assert_eq!(snap.sequence_row, -1);
        assert_eq!(snap.event_serial, 0);
    }
}
