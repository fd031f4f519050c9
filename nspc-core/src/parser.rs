//! Binary ARAM/SPC parser (§4.1).
//!
//! Decodes an SPC file's 64 KiB ARAM payload into a [`nspc_types::Project`]
//! by matching the engine's signature bytes, then walking each song's
//! sequence, tracks, and subroutines out of that ARAM image.

use std::collections::HashMap;

use nspc_types::{
    ContentOrigin, Entry, Event, EventId, Pattern, Song, Subroutine, Track, Vcmd,
};

use crate::config::match_engine_config;

const SPC_HEADER_MAGIC: &[u8] = b"SNES-SPC700 Sound File Data";
const SPC_HEADER_LEN: usize = 0x100;
const ARAM_LEN: usize = 0x10000;
/// DSP register mirror + unused + IPL ROM tail every real SPC file carries
/// after the 64 KiB ARAM dump (§6.1).
const SPC_TAIL_LEN: usize = 0x100;
const SPC_TOTAL_LEN: usize = SPC_HEADER_LEN + ARAM_LEN + SPC_TAIL_LEN;

const NOTE_START: u8 = 0x80;
const NOTE_END: u8 = 0xC7;
const TIE: u8 = 0xC8;
const REST: u8 = 0xC9;
const PERCUSSION_START: u8 = 0xCA;
const PERCUSSION_END: u8 = 0xDF;
const VCMD_START: u8 = 0xE0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    InvalidConfig,
    InvalidHeader,
    UnsupportedVersion,
    UnexpectedEndOfData,
    InvalidEventData,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ParseError::InvalidConfig => "no engine configurations available",
            ParseError::InvalidHeader => "missing SPC file header",
            ParseError::UnsupportedVersion => "no engine configuration matched this ARAM image",
            ParseError::UnexpectedEndOfData => "buffer shorter than a full SPC file",
            ParseError::InvalidEventData => "malformed event stream",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ParseError {}

/// Loads an SPC file buffer (header + 64 KiB ARAM) into a project, matching
/// it against the given engine configs and decoding every song reachable
/// from the song index table entries present in the ARAM image.
pub fn load(
    data: &[u8],
    engine_configs: &[nspc_types::EngineConfig],
    song_ids: &[i32],
) -> Result<nspc_types::Project, ParseError> {
    if engine_configs.is_empty() {
        return Err(ParseError::InvalidConfig);
    }
    if data.len() < SPC_HEADER_LEN {
        return Err(ParseError::UnexpectedEndOfData);
    }
    if &data[..SPC_HEADER_MAGIC.len()] != SPC_HEADER_MAGIC {
        return Err(ParseError::InvalidHeader);
    }
    if data.len() < SPC_HEADER_LEN + ARAM_LEN {
        return Err(ParseError::UnexpectedEndOfData);
    }
    if data.len() < SPC_TOTAL_LEN {
        log::debug!(target: "nspc_core::parser", "input is {} bytes, short of the full {SPC_TOTAL_LEN}-byte SPC layout (DSP/extra-RAM tail missing); parsing anyway", data.len());
    }

    let mut aram = Box::new([0u8; ARAM_LEN]);
    aram.copy_from_slice(&data[SPC_HEADER_LEN..SPC_HEADER_LEN + ARAM_LEN]);

    let engine_config = match_engine_config(engine_configs, &aram)
        .cloned()
        .ok_or(ParseError::UnsupportedVersion)?;
    log::debug!(target: "nspc_core::parser", "matched engine config {}", engine_config.id);

    let mut project = nspc_types::Project::new(engine_config, aram);
    project.source_spc_data = Some(data.to_vec());

    for &song_id in song_ids {
        let song = parse_song(&project, song_id)?;
        project.songs.push(song);
    }

    classify_origins(&mut project);
    log::info!(target: "nspc_core::parser", "parsed {} song(s)", project.songs.len());
    Ok(project)
}

/// Parsed but not-yet-densely-numbered track/subroutine tables, keyed by
/// their original ARAM address so repeated references reuse one owner.
struct DecodeTables {
    tracks: Vec<(u16, Vec<Entry>)>,
    subroutines: Vec<(u16, Vec<Entry>)>,
    track_index_by_addr: HashMap<u16, usize>,
    subroutine_index_by_addr: HashMap<u16, usize>,
    next_event_id: EventId,
}

impl DecodeTables {
    fn new() -> Self {
        Self {
            tracks: Vec::new(),
            subroutines: Vec::new(),
            track_index_by_addr: HashMap::new(),
            subroutine_index_by_addr: HashMap::new(),
            next_event_id: 0,
        }
    }

    fn alloc_id(&mut self) -> EventId {
        let id = self.next_event_id;
        self.next_event_id += 1;
        id
    }
}

fn parse_song(project: &nspc_types::Project, song_id: i32) -> Result<Song, ParseError> {
    let config = &project.engine_config;
    let aram = &project.aram;

    let entry_addr = config.song_index_entry_addr(song_id) as usize;
    let sequence_head = read_u16(aram, entry_addr).ok_or(ParseError::UnexpectedEndOfData)?;

    let mut tables = DecodeTables::new();
    let mut patterns = Vec::new();
    let mut sequence = Vec::new();
    decode_sequence(aram, sequence_head, &mut tables, &mut patterns, &mut sequence)?;

    let tracks = tables
        .tracks
        .into_iter()
        .enumerate()
        .map(|(id, (addr, events))| Track {
            id: id as i32,
            events,
            original_addr: addr,
        })
        .collect();

    let subroutines = tables
        .subroutines
        .into_iter()
        .enumerate()
        .map(|(id, (addr, events))| Subroutine {
            id: id as i32,
            events,
            original_addr: addr,
        })
        .collect();

    let mut song = Song {
        id: song_id,
        name: format!("Song {song_id}"),
        author: String::new(),
        content_origin: ContentOrigin::EngineProvided,
        sequence,
        patterns,
        tracks,
        subroutines,
        next_event_id: tables.next_event_id,
    };
    remap_sequence_track_ids(&mut song);
    Ok(song)
}

/// Sequence decoding: a non-zero pointer introduces a PlayPattern (followed
/// by an 8-entry track table); control bytes select JumpTimes / AlwaysJump /
/// fast-forward / EndSequence (§4.1 step 2).
///
/// `JumpTimes`/`AlwaysJump` pad their one-byte count/opcode with an explicit
/// zero byte before the two-byte target (`compiler.rs`'s
/// `place_and_encode_sequence` writes this same padding), so the word at
/// `pos` is `< 0x100` for every control entry and `>= 0x100` for every real
/// pattern pointer (ARAM addresses used by patterns are never inside the
/// zero page). Disambiguating on the raw opcode byte's value range alone
/// would collide with a pattern pointer whose low byte happens to fall in
/// the same range; the padding makes the word-level check exact instead.
fn decode_sequence(
    aram: &[u8; ARAM_LEN],
    start: u16,
    tables: &mut DecodeTables,
    patterns: &mut Vec<Pattern>,
    sequence: &mut Vec<nspc_types::SeqOp>,
) -> Result<(), ParseError> {
    let mut pos = start as usize;
    loop {
        let opcode = *aram.get(pos).ok_or(ParseError::UnexpectedEndOfData)?;
        match opcode {
            0x00 => {
                sequence.push(nspc_types::SeqOp::EndSequence);
                return Ok(());
            }
            0x80 => {
                sequence.push(nspc_types::SeqOp::FastForwardOn);
                pos += 1;
                continue;
            }
            0x81 => {
                sequence.push(nspc_types::SeqOp::FastForwardOff);
                pos += 1;
                continue;
            }
            _ => {}
        }

        let ptr = read_u16(aram, pos).ok_or(ParseError::UnexpectedEndOfData)?;
        if ptr >= 0x100 {
            // Non-zero pointer: a PlayPattern followed by an 8-entry track table.
            let pattern_id = patterns.len() as i32;
            let track_table_addr = ptr;
            let mut channel_track_ids = [-1i32; 8];
            for (channel, slot) in channel_track_ids.iter_mut().enumerate() {
                let entry_addr = track_table_addr as usize + channel * 2;
                let track_addr =
                    read_u16(aram, entry_addr).ok_or(ParseError::UnexpectedEndOfData)?;
                if track_addr != 0 {
                    *slot = intern_track(aram, track_addr, tables)? as i32;
                }
            }
            patterns.push(Pattern {
                id: pattern_id,
                channel_track_ids: Some(channel_track_ids),
                track_table_addr,
            });
            sequence.push(nspc_types::SeqOp::PlayPattern {
                pattern_id,
                track_table_addr,
            });
            pos += 2;
            continue;
        }

        // `ptr < 0x100` confirms the padding byte at `pos + 1` is zero, so
        // `opcode` (the byte at `pos`) is genuinely the count/opcode and the
        // target follows the padding at `pos + 2`.
        let target = read_u16(aram, pos + 2).ok_or(ParseError::UnexpectedEndOfData)?;
        match opcode {
            0x01..=0x7F => {
                sequence.push(nspc_types::SeqOp::JumpTimes {
                    count: opcode,
                    target: nspc_types::SeqTarget::Absolute(target),
                });
            }
            0x82..=0xFF => {
                sequence.push(nspc_types::SeqOp::AlwaysJump {
                    opcode,
                    target: nspc_types::SeqTarget::Absolute(target),
                });
            }
            _ => unreachable!(),
        }
        pos += 4;
    }
}

/// Parses (or returns the already-parsed index of) the track owner at `addr`.
fn intern_track(
    aram: &[u8; ARAM_LEN],
    addr: u16,
    tables: &mut DecodeTables,
) -> Result<usize, ParseError> {
    if let Some(&idx) = tables.track_index_by_addr.get(&addr) {
        return Ok(idx);
    }
    let events = parse_event_stream(aram, addr, tables)?;
    let idx = tables.tracks.len();
    tables.tracks.push((addr, events));
    tables.track_index_by_addr.insert(addr, idx);
    Ok(idx)
}

fn intern_subroutine(
    aram: &[u8; ARAM_LEN],
    addr: u16,
    tables: &mut DecodeTables,
) -> Result<usize, ParseError> {
    if let Some(&idx) = tables.subroutine_index_by_addr.get(&addr) {
        return Ok(idx);
    }
    // Reserve the slot before recursing so a subroutine that calls itself
    // at the same address does not infinitely re-parse.
    let idx = tables.subroutines.len();
    tables.subroutines.push((addr, Vec::new()));
    tables.subroutine_index_by_addr.insert(addr, idx);
    let events = parse_event_stream(aram, addr, tables)?;
    tables.subroutines[idx].1 = events;
    Ok(idx)
}

/// Decodes one event stream until `End` (§4.1 step 4).
fn parse_event_stream(
    aram: &[u8; ARAM_LEN],
    start: u16,
    tables: &mut DecodeTables,
) -> Result<Vec<Entry>, ParseError> {
    let mut events = Vec::new();
    let mut pos = start as usize;

    loop {
        let byte = *aram.get(pos).ok_or(ParseError::UnexpectedEndOfData)?;
        pos += 1;

        let event = match byte {
            0x00 => {
                let id = tables.alloc_id();
                events.push(Entry::new(id, Event::End));
                break;
            }
            0x01..=0x7F => {
                let mut quant = None;
                let mut velocity = None;
                if let Some(&next) = aram.get(pos) {
                    if (0x01..=0x7F).contains(&next) {
                        quant = Some(next >> 4);
                        velocity = Some(next & 0x0F);
                        pos += 1;
                    }
                }
                Event::Duration(nspc_types::Duration { ticks: byte, quant, velocity })
            }
            NOTE_START..=NOTE_END => Event::Note { pitch: byte - NOTE_START },
            TIE => Event::Tie,
            REST => Event::Rest,
            PERCUSSION_START..=PERCUSSION_END => Event::Percussion { index: byte - PERCUSSION_START },
            VCMD_START..=0xFF => {
                let (vcmd, consumed) = parse_vcmd(aram, pos, byte, tables)?;
                pos += consumed;
                Event::Vcmd(vcmd)
            }
        };

        let id = tables.alloc_id();
        events.push(Entry::new(id, event));
    }

    Ok(events)
}

fn parse_vcmd(
    aram: &[u8; ARAM_LEN],
    pos: usize,
    raw_id: u8,
    tables: &mut DecodeTables,
) -> Result<(Vcmd, usize), ParseError> {
    let b = |offset: usize| -> Result<u8, ParseError> {
        aram.get(pos + offset).copied().ok_or(ParseError::UnexpectedEndOfData)
    };

    Ok(match raw_id {
        0xE0 => (Vcmd::Inst { instrument: b(0)? }, 1),
        0xE1 => (Vcmd::Panning { panning: b(0)? }, 1),
        0xE2 => (Vcmd::PanFade { time: b(0)?, target: b(1)? }, 2),
        0xE3 => (Vcmd::VibratoOn { delay: b(0)?, rate: b(1)?, depth: b(2)? }, 3),
        0xE4 => (Vcmd::VibratoOff, 0),
        0xE5 => (Vcmd::GlobalVolume { volume: b(0)? }, 1),
        0xE6 => (Vcmd::GlobalVolumeFade { time: b(0)?, target: b(1)? }, 2),
        0xE7 => (Vcmd::Tempo { tempo: b(0)? }, 1),
        0xE8 => (Vcmd::TempoFade { time: b(0)?, target: b(1)? }, 2),
        0xE9 => (Vcmd::GlobalTranspose { semitones: b(0)? as i8 }, 1),
        0xEA => (Vcmd::PerVoiceTranspose { semitones: b(0)? as i8 }, 1),
        0xEB => (Vcmd::TremoloOn { delay: b(0)?, rate: b(1)?, depth: b(2)? }, 3),
        0xEC => (Vcmd::TremoloOff, 0),
        0xED => (Vcmd::Volume { volume: b(0)? }, 1),
        0xEE => (Vcmd::VolumeFade { time: b(0)?, target: b(1)? }, 2),
        0xEF => {
            let addr = read_u16(aram, pos).ok_or(ParseError::UnexpectedEndOfData)?;
            let count = b(2)?;
            let subroutine_id = intern_subroutine(aram, addr, tables)? as i32;
            (
                Vcmd::SubroutineCall { subroutine_id, original_addr: addr, count },
                3,
            )
        }
        0xF0 => (Vcmd::VibratoFadeIn { time: b(0)? }, 1),
        0xF1 => (Vcmd::PitchEnvelopeTo { delay: b(0)?, length: b(1)?, semitone: b(2)? }, 3),
        0xF2 => (Vcmd::PitchEnvelopeFrom { delay: b(0)?, length: b(1)?, semitone: b(2)? }, 3),
        0xF3 => (Vcmd::PitchEnvelopeOff, 0),
        0xF4 => (Vcmd::FineTune { semitones: b(0)? as i8 }, 1),
        0xF5 => (Vcmd::EchoOn { channels: b(0)?, left: b(1)?, right: b(2)? }, 3),
        0xF6 => (Vcmd::EchoOff, 0),
        0xF7 => (Vcmd::EchoParams { delay: b(0)?, feedback: b(1)?, fir_index: b(2)? }, 3),
        0xF8 => (Vcmd::EchoVolumeFade { time: b(0)?, left_target: b(1)?, right_target: b(2)? }, 3),
        0xF9 => (Vcmd::PitchSlideToNote { delay: b(0)?, length: b(1)?, note: b(2)? }, 3),
        0xFA => (Vcmd::PercussionBaseInstrument { index: b(0)? }, 1),
        0xFB => {
            let nop_bytes = read_u16(aram, pos).ok_or(ParseError::UnexpectedEndOfData)?;
            (Vcmd::Nop { nop_bytes }, nop_bytes as usize)
        }
        0xFC => (Vcmd::MuteChannel, 0),
        0xFD => (Vcmd::FastForwardOn, 0),
        0xFE => (Vcmd::FastForwardOff, 0),
        0xFF => return Err(ParseError::InvalidEventData),
        _ => unreachable!("raw_id out of VCMD range"),
    })
}

fn read_u16(aram: &[u8; ARAM_LEN], addr: usize) -> Option<u16> {
    let lo = *aram.get(addr)?;
    let hi = *aram.get(addr + 1)?;
    Some(u16::from_le_bytes([lo, hi]))
}

/// The decoder builds tracks/subroutines in first-seen order during parsing,
/// which is already dense (ids are their Vec index) — this just double
/// checks the PlayPattern channel slots reference valid ids after the fact,
/// matching the compiler/editor's assumption that ids are indices (§3.7).
fn remap_sequence_track_ids(song: &mut Song) {
    for pattern in &mut song.patterns {
        if let Some(ids) = &mut pattern.channel_track_ids {
            for id in ids.iter_mut() {
                if *id >= 0 && *id as usize >= song.tracks.len() {
                    *id = -1;
                }
            }
        }
    }
}

/// Stamps each song/instrument/sample as `EngineProvided` iff its id is
/// listed in the matched engine config's default-provided list (§4.1, final
/// paragraph).
fn classify_origins(project: &mut nspc_types::Project) {
    let config = &project.engine_config;
    for song in &mut project.songs {
        song.content_origin = if config.has_default_engine_provided_songs
            && config.default_engine_provided_song_ids.contains(&song.id)
        {
            ContentOrigin::EngineProvided
        } else {
            ContentOrigin::UserProvided
        };
    }
    for instrument in &mut project.instruments {
        instrument.content_origin = if config.has_default_engine_provided_instruments
            && config.default_engine_provided_instrument_ids.contains(&instrument.id)
        {
            ContentOrigin::EngineProvided
        } else {
            ContentOrigin::UserProvided
        };
    }
    for sample in &mut project.samples {
        sample.content_origin = if config.has_default_engine_provided_samples
            && config.default_engine_provided_sample_ids.contains(&sample.id)
        {
            ContentOrigin::EngineProvided
        } else {
            ContentOrigin::UserProvided
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> nspc_types::EngineConfig {
        nspc_types::EngineConfig {
            id: "test".into(),
            name: "Test Engine".into(),
            entry_point: 0x0400,
            sample_headers: 0x6C00,
            instrument_headers: 0x6E00,
            percussion_headers: 0x6F00,
            song_index_pointers: 0x0500,
            instrument_entry_bytes: 6,
            echo_buffer: 0xF000,
            echo_buffer_len: 0x0A00,
            engine_bytes: vec![0xAB, 0xCD],
            reserved: Vec::new(),
            command_map: None,
            extension_vcmd_prefix: 0xFF,
            extensions: Vec::new(),
            default_engine_provided_song_ids: vec![0],
            default_engine_provided_instrument_ids: Vec::new(),
            default_engine_provided_sample_ids: Vec::new(),
            has_default_engine_provided_songs: true,
            has_default_engine_provided_instruments: false,
            has_default_engine_provided_samples: false,
        }
    }

    fn spc_image_with(aram_patches: &[(usize, &[u8])]) -> Vec<u8> {
        let mut file = vec![0u8; SPC_HEADER_LEN + ARAM_LEN];
        file[..SPC_HEADER_MAGIC.len()].copy_from_slice(SPC_HEADER_MAGIC);
        for (addr, bytes) in aram_patches {
            let base = SPC_HEADER_LEN + addr;
            file[base..base + bytes.len()].copy_from_slice(bytes);
        }
        file
    }

    #[test]
    fn rejects_short_buffer() {
        let config = stub_config();
        let err = load(&[0u8; 10], std::slice::from_ref(&config), &[0]).unwrap_err();
        assert_eq!(err, ParseError::UnexpectedEndOfData);
    }

    #[test]
    fn rejects_bad_header() {
        let mut file = vec![0u8; SPC_HEADER_LEN + ARAM_LEN];
        file[0] = b'X';
        let config = stub_config();
        let err = load(&file, std::slice::from_ref(&config), &[0]).unwrap_err();
        assert_eq!(err, ParseError::InvalidHeader);
    }

    #[test]
    fn parses_empty_track_into_song() {
        let config = stub_config();
        // song index entry at 0x0500 -> sequence head 0x0600
        // sequence at 0x0600: pointer 0x0700 (pattern), then 0x00 (end sequence)
        // track table at 0x0700: channel 0 -> track at 0x0710, rest 0
        // track at 0x0710: just End (0x00)
        let file = spc_image_with(&[
            (0x0400, &[0xAB, 0xCD]),
            (0x0500, &0x0600u16.to_le_bytes()),
            (0x0600, &0x0700u16.to_le_bytes()),
            (0x0602, &[0x00]),
            (0x0700, &0x0710u16.to_le_bytes()),
            (0x0710, &[0x00]),
        ]);

        let project = load(&file, std::slice::from_ref(&config), &[0]).expect("should parse");
        assert_eq!(project.songs.len(), 1);
        let song = &project.songs[0];
        assert_eq!(song.tracks.len(), 1);
        assert_eq!(song.patterns.len(), 1);
        assert_eq!(song.patterns[0].channel_track_ids.unwrap()[0], 0);
        assert_eq!(song.content_origin, ContentOrigin::EngineProvided);
    }
}
