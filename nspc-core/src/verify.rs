//! Round-trip verification (§4.7, grounded on `NspcCompile.hpp`'s
//! `verifySongRoundTrip`/`NspcRoundTripReport`): compiles a song, applies the
//! upload to a copy of the project's base image, reparses it, and compares
//! the result back against the in-memory song to catch compiler/parser
//! mismatches before they reach a real SPC player.

use nspc_types::{Entry, Project};

use crate::compiler::{self, BuildOptions, CompileError};
use crate::optimizer;
use crate::parser::{self, ParseError};

#[derive(Debug)]
pub enum VerifyError {
    Compile(CompileError),
    Parse(ParseError),
    SongNotFound,
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::Compile(e) => write!(f, "round-trip compile failed: {e}"),
            VerifyError::Parse(e) => write!(f, "round-trip reparse failed: {e}"),
            VerifyError::SongNotFound => write!(f, "song index not found in project"),
        }
    }
}

impl std::error::Error for VerifyError {}

#[derive(Debug, Default)]
pub struct RoundTripReport {
    pub equivalent: bool,
    pub objects_compared: usize,
    pub bytes_compared: usize,
    pub differing_bytes: usize,
    pub pointer_differences_ignored: usize,
    pub messages: Vec<String>,
}

const SPC_HEADER_LEN: usize = 0x100;
const ARAM_LEN: usize = 0x10000;
/// DSP register mirror + unused + IPL ROM tail every real SPC file carries
/// after the 64 KiB ARAM dump (§6.1).
const SPC_TAIL_LEN: usize = 0x100;
const SPC_TOTAL_LEN: usize = SPC_HEADER_LEN + ARAM_LEN + SPC_TAIL_LEN;

/// Compiles `project`'s song at `song_index`, applies it to a copy of the
/// project's own ARAM, reparses that image, and compares the reparsed song
/// to the (optimized) in-memory song structurally — ignoring `original_addr`
/// fields and `EventId`s, which are expected to differ after a fresh layout
/// pass (§4.7).
pub fn verify_song_round_trip(project: &Project, song_index: usize) -> Result<RoundTripReport, VerifyError> {
    let original_song = project.songs.get(song_index).ok_or(VerifyError::SongNotFound)?;
    let options = BuildOptions::default();
    let optimized_song = if options.optimize_subroutines {
        optimizer::optimize_song(original_song.clone(), &options.optimizer_options).0
    } else {
        original_song.clone()
    };

    let output = compiler::build_song_scoped_upload(project, song_index, &options).map_err(VerifyError::Compile)?;

    let mut base = vec![0u8; SPC_TOTAL_LEN];
    base[..28].copy_from_slice(b"SNES-SPC700 Sound File Data");
    base[SPC_HEADER_LEN..SPC_HEADER_LEN + ARAM_LEN].copy_from_slice(project.aram.as_slice());
    let patched = compiler::apply_upload_to_spc_image(&output.upload, &base).map_err(VerifyError::Compile)?;

    let reparsed_project = parser::load(&patched, std::slice::from_ref(&project.engine_config), &[optimized_song.id])
        .map_err(VerifyError::Parse)?;
    let reparsed_song = reparsed_project.songs.first().ok_or(VerifyError::SongNotFound)?;

    let mut report = RoundTripReport { equivalent: true, ..Default::default() };
    report.messages.extend(output.warnings);

    compare_counts(&optimized_song.tracks, &reparsed_song.tracks, "track", &mut report);
    compare_counts(&optimized_song.subroutines, &reparsed_song.subroutines, "subroutine", &mut report);

    let track_pairs = optimized_song.tracks.iter().zip(reparsed_song.tracks.iter());
    for (original, reparsed) in track_pairs {
        compare_event_streams(&original.events, &reparsed.events, &mut report);
    }
    let sub_pairs = optimized_song.subroutines.iter().zip(reparsed_song.subroutines.iter());
    for (original, reparsed) in sub_pairs {
        compare_event_streams(&original.events, &reparsed.events, &mut report);
    }

    if optimized_song.sequence.len() != reparsed_song.sequence.len() {
        report.equivalent = false;
        report.messages.push(format!(
            "sequence length differs: {} vs {}",
            optimized_song.sequence.len(),
            reparsed_song.sequence.len()
        ));
    }

    if report.equivalent {
        log::info!(target: "nspc_core::verify", "song {} round-trips cleanly ({} bytes compared)", original_song.id, report.bytes_compared);
    } else {
        log::warn!(target: "nspc_core::verify", "song {} round-trip mismatch: {:?}", original_song.id, report.messages);
    }

    Ok(report)
}

fn compare_counts<T>(original: &[T], reparsed: &[T], label: &str, report: &mut RoundTripReport) {
    report.objects_compared += 1;
    if original.len() != reparsed.len() {
        report.equivalent = false;
        report.messages.push(format!("{label} count differs: {} vs {}", original.len(), reparsed.len()));
    }
}

/// `Entry.original_addr` and `Entry.id` are expected to differ after a fresh
/// compile/reparse cycle; those differences are counted separately and never
/// flip `equivalent` to false.
fn compare_event_streams(original: &[Entry], reparsed: &[Entry], report: &mut RoundTripReport) {
    report.objects_compared += 1;
    let len = original.len().max(reparsed.len());
    report.bytes_compared += len;

    for i in 0..len {
        match (original.get(i), reparsed.get(i)) {
            (Some(a), Some(b)) => {
                if format!("{:?}", a.event) != format!("{:?}", b.event) {
                    report.differing_bytes += 1;
                    report.equivalent = false;
                }
                if a.original_addr.is_some() != b.original_addr.is_some() {
                    report.pointer_differences_ignored += 1;
                }
            }
            _ => {
                report.differing_bytes += 1;
                report.equivalent = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nspc_types::{Duration, EngineConfig, Event, Pattern, SeqOp, Song, Track};

    fn stub_engine() -> EngineConfig {
        EngineConfig {
            id: "t".into(),
            name: "Test".into(),
            entry_point: 0x0400,
            sample_headers: 0x6C00,
            instrument_headers: 0x6E00,
            percussion_headers: 0x6F00,
            song_index_pointers: 0x0500,
            instrument_entry_bytes: 6,
            echo_buffer: 0xF000,
            echo_buffer_len: 0x0A00,
            engine_bytes: Vec::new(),
            reserved: Vec::new(),
            command_map: None,
            extension_vcmd_prefix: 0xFF,
            extensions: Vec::new(),
            default_engine_provided_song_ids: Vec::new(),
            default_engine_provided_instrument_ids: Vec::new(),
            default_engine_provided_sample_ids: Vec::new(),
            has_default_engine_provided_songs: false,
            has_default_engine_provided_instruments: false,
            has_default_engine_provided_samples: false,
        }
    }

    #[test]
    fn round_trips_a_simple_song() {
        let engine = stub_engine();
        let aram = Box::new([0u8; ARAM_LEN]);
        let mut project = Project::new(engine, aram);
        let mut song = Song::new_empty(0);
        song.tracks.push(Track {
            id: 0,
            events: vec![
                Entry::new(0, Event::Duration(Duration::new(4))),
                Entry::new(1, Event::Note { pitch: 3 }),
                Entry::new(2, Event::End),
            ],
            original_addr: 0,
        });
        song.patterns.push(Pattern { id: 0, channel_track_ids: Some([0, -1, -1, -1, -1, -1, -1, -1]), track_table_addr: 0 });
        song.sequence.push(SeqOp::PlayPattern { pattern_id: 0, track_table_addr: 0 });
        song.sequence.push(SeqOp::EndSequence);
        project.songs.push(song);

        let report = verify_song_round_trip(&project, 0).unwrap();
        assert!(report.equivalent, "messages: {:?}", report.messages);
        assert_eq!(report.differing_bytes, 0);
    }
}
