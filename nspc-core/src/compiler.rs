//! Binary compiler (§4.5): turns in-memory songs back into ARAM bytes,
//! planning a layout for the pieces that changed and producing an upload
//! list a caller can apply to a base SPC image (grounded on
//! `NspcCompile.hpp`'s `buildSongScopedUpload`/`buildUserContentUpload`/
//! `applyUploadToSpcImage`/`encodeEventStreamForEngine`).

use std::collections::HashMap;

use nspc_types::{Entry, EngineConfig, Event, Project, Song, Vcmd};

use crate::optimizer::{self, OptimizerOptions};

const ARAM_LEN: usize = 0x10000;
/// DSP register mirror + unused + IPL ROM tail every real SPC file carries
/// after the 64 KiB ARAM dump (§6.1).
const SPC_TAIL_LEN: usize = 0x100;
const SPC_TOTAL_LEN: usize = SPC_HEADER_LEN + ARAM_LEN + SPC_TAIL_LEN;
const SPC_HEADER_LEN: usize = 0x100;

const SPC_PC_OFFSET: usize = 0x25;
const SPC_A_OFFSET: usize = 0x27;
const SPC_X_OFFSET: usize = 0x28;
const SPC_Y_OFFSET: usize = 0x29;
const SPC_PS_OFFSET: usize = 0x2A;
const SPC_SP_OFFSET: usize = 0x2B;
const SPC_SONG_TITLE_OFFSET: usize = 0x2E;
const SPC_SONG_TITLE_LEN: usize = 0x20;
const SPC_ARTIST_OFFSET: usize = 0xB1;
const SPC_ARTIST_LEN: usize = 0x20;
const SPC_DSP_REG_OFFSET: usize = SPC_HEADER_LEN + ARAM_LEN;
const SPC_DSP_REG_LEN: usize = 128;
const SPC_EXTRA_RAM_OFFSET: usize = 0x101C0;
const SPC_EXTRA_RAM_LEN: usize = 0x40;

/// The result of warming up a real SPC-700 emulator against a patched image
/// (CPU registers, DSP register mirror, and the high 64 bytes of ARAM the
/// $FFC0 echo region conventionally carries). Running that emulator is out
/// of scope here; this struct only defines the shape `build_auto_play_spc`
/// stamps into the file, so a caller that does own an emulator can supply
/// its post-warmup state (§4.5, grounded on `NspcSpcExport.cpp`'s
/// `buildAutoPlaySpc`).
#[derive(Debug, Clone)]
pub struct PlaybackWarmupState {
    pub pc: u16,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub psw: u8,
    pub sp: u8,
    pub dsp_registers: [u8; SPC_DSP_REG_LEN],
    pub extra_ram: [u8; SPC_EXTRA_RAM_LEN],
    pub trigger_port: u8,
    pub trigger_value: u8,
}

impl Default for PlaybackWarmupState {
    fn default() -> Self {
        Self {
            pc: 0,
            a: 0,
            x: 0,
            y: 0,
            psw: 0,
            sp: 0,
            dsp_registers: [0; SPC_DSP_REG_LEN],
            extra_ram: [0; SPC_EXTRA_RAM_LEN],
            trigger_port: 0,
            trigger_value: 0,
        }
    }
}

fn write_spc_text_field(out: &mut [u8], offset: usize, len: usize, value: &str) {
    if offset + len > out.len() || len == 0 {
        return;
    }
    out[offset..offset + len].fill(0);
    let bytes = value.as_bytes();
    let copy_len = bytes.len().min(len - 1);
    out[offset..offset + copy_len].copy_from_slice(&bytes[..copy_len]);
}

fn stamp_playback_warmup_state(out: &mut [u8], warmup: &PlaybackWarmupState) {
    let pc = warmup.pc.to_le_bytes();
    out[SPC_PC_OFFSET] = pc[0];
    out[SPC_PC_OFFSET + 1] = pc[1];
    out[SPC_A_OFFSET] = warmup.a;
    out[SPC_X_OFFSET] = warmup.x;
    out[SPC_Y_OFFSET] = warmup.y;
    out[SPC_PS_OFFSET] = warmup.psw;
    out[SPC_SP_OFFSET] = warmup.sp;
    out[SPC_DSP_REG_OFFSET..SPC_DSP_REG_OFFSET + SPC_DSP_REG_LEN].copy_from_slice(&warmup.dsp_registers);
    out[SPC_EXTRA_RAM_OFFSET..SPC_EXTRA_RAM_OFFSET + SPC_EXTRA_RAM_LEN].copy_from_slice(&warmup.extra_ram);
    let trigger_port = (warmup.trigger_port & 0x03) as usize;
    out[SPC_HEADER_LEN + 0xF4 + trigger_port] = warmup.trigger_value;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    UnknownSubroutineTarget(i32),
    UnrepresentableEvent(String),
    LayoutExhausted,
    BaseImageTooShort,
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::UnknownSubroutineTarget(id) => write!(f, "subroutine call targets unplaced subroutine {id}"),
            CompileError::UnrepresentableEvent(what) => write!(f, "cannot encode event: {what}"),
            CompileError::LayoutExhausted => write!(f, "no free ARAM region large enough for this upload"),
            CompileError::BaseImageTooShort => write!(f, "base SPC image shorter than header + ARAM"),
        }
    }
}

impl std::error::Error for CompileError {}

#[derive(Debug, Clone)]
pub struct UploadChunk {
    pub address: u16,
    pub bytes: Vec<u8>,
    pub label: String,
}

#[derive(Debug, Clone, Default)]
pub struct UploadList {
    pub chunks: Vec<UploadChunk>,
}

#[derive(Debug)]
pub struct CompileOutput {
    pub upload: UploadList,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub optimize_subroutines: bool,
    pub optimizer_options: OptimizerOptions,
    pub apply_optimized_song_to_project: bool,
    pub include_engine_extensions: bool,
    pub compact_aram_layout: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            optimize_subroutines: true,
            optimizer_options: OptimizerOptions::default(),
            apply_optimized_song_to_project: false,
            include_engine_extensions: true,
            compact_aram_layout: true,
        }
    }
}

/// A free-list bump allocator over ARAM, seeded with everything the engine
/// config marks reserved plus whatever the project already reports as used,
/// used to place freshly-encoded tracks/subroutines/sequences (§4.5 step 3).
struct LayoutPlanner {
    cursor: u16,
    blocked: Vec<(u16, u16)>,
}

impl LayoutPlanner {
    fn new(engine: &EngineConfig, start: u16, existing_usage: &[(u16, u16, String)]) -> Self {
        let mut blocked: Vec<(u16, u16)> = engine.reserved.iter().map(|r| (r.from, r.to)).collect();
        blocked.extend(existing_usage.iter().map(|(from, to, _)| (*from, *to)));
        blocked.sort_unstable();
        Self { cursor: start, blocked }
    }

    fn overlaps_blocked(&self, from: u16, to: u16) -> bool {
        self.blocked.iter().any(|(b_from, b_to)| from < *b_to && to > *b_from)
    }

    /// Finds the next free span of `len` bytes at or after `self.cursor`,
    /// advancing the cursor past it.
    fn place(&mut self, len: usize) -> Result<u16, CompileError> {
        if len == 0 {
            return Ok(self.cursor);
        }
        loop {
            let start = self.cursor as u32;
            let end = start + len as u32;
            if end > ARAM_LEN as u32 {
                return Err(CompileError::LayoutExhausted);
            }
            if self.overlaps_blocked(start as u16, end as u16) {
                self.cursor = self.cursor.saturating_add(1);
                continue;
            }
            self.cursor = end as u16;
            return Ok(start as u16);
        }
    }
}

/// Encodes one owner's event stream back into raw engine bytes (§4.5 step 1,
/// grounded on `encodeEventStreamForEngine`). `subroutine_addr_by_id` must
/// already hold the placed address of every subroutine this stream calls.
pub fn encode_event_stream_for_engine(
    events: &[Entry],
    subroutine_addr_by_id: &HashMap<i32, u16>,
    warnings: &mut Vec<String>,
    engine: &EngineConfig,
) -> Result<Vec<u8>, CompileError> {
    let mut out = Vec::new();
    let remap = engine.command_map.clone().unwrap_or_default();

    for entry in events {
        match &entry.event {
            Event::Duration(d) => {
                out.push(d.ticks);
                if let (Some(q), Some(v)) = (d.quant, d.velocity) {
                    out.push(((q & 0x0F) << 4) | (v & 0x0F));
                }
            }
            Event::Note { pitch } => out.push(0x80 + pitch),
            Event::Tie => out.push(0xC8),
            Event::Rest => out.push(0xC9),
            Event::Percussion { index } => out.push(0xCA + index),
            Event::Vcmd(vcmd) => encode_vcmd(vcmd, subroutine_addr_by_id, warnings, engine, &remap, &mut out)?,
            Event::Subroutine => {
                return Err(CompileError::UnrepresentableEvent("transient Subroutine marker in owner stream".into()))
            }
            Event::End => out.push(0x00),
        }
    }

    if !matches!(events.last().map(|e| &e.event), Some(Event::End)) {
        out.push(0x00);
    }
    Ok(out)
}

fn encode_vcmd(
    vcmd: &Vcmd,
    subroutine_addr_by_id: &HashMap<i32, u16>,
    warnings: &mut Vec<String>,
    engine: &EngineConfig,
    remap: &nspc_types::VcmdRemap,
    out: &mut Vec<u8>,
) -> Result<(), CompileError> {
    if let Vcmd::Extension { id, params, param_count } = vcmd {
        out.push(engine.extension_vcmd_prefix);
        out.push(*id);
        out.extend_from_slice(&params[..*param_count as usize]);
        return Ok(());
    }

    let common_id = vcmd.default_id().expect("non-extension vcmds always have a default id");
    let raw_id = remap.to_raw(common_id);
    if remap.strict_write && raw_id == common_id && !remap.write.contains_key(&common_id) {
        warnings.push(format!("no engine write mapping for vcmd {common_id:#04x}; emitting common byte"));
    }
    out.push(raw_id);

    match vcmd {
        Vcmd::SubroutineCall { subroutine_id, count, .. } => {
            let addr = subroutine_addr_by_id
                .get(subroutine_id)
                .ok_or(CompileError::UnknownSubroutineTarget(*subroutine_id))?;
            out.extend_from_slice(&addr.to_le_bytes());
            out.push(*count);
        }
        Vcmd::Nop { nop_bytes } => {
            out.extend_from_slice(&nop_bytes.to_le_bytes());
            if *nop_bytes > 2 {
                warnings.push("re-encoded Nop filler as zero bytes; original padding content was not preserved".into());
                out.extend(std::iter::repeat(0u8).take(*nop_bytes as usize - 2));
            }
        }
        Vcmd::Inst { instrument } => out.push(*instrument),
        Vcmd::Panning { panning } => out.push(*panning),
        Vcmd::PanFade { time, target } => out.extend_from_slice(&[*time, *target]),
        Vcmd::VibratoOn { delay, rate, depth } => out.extend_from_slice(&[*delay, *rate, *depth]),
        Vcmd::VibratoOff => {}
        Vcmd::GlobalVolume { volume } => out.push(*volume),
        Vcmd::GlobalVolumeFade { time, target } => out.extend_from_slice(&[*time, *target]),
        Vcmd::Tempo { tempo } => out.push(*tempo),
        Vcmd::TempoFade { time, target } => out.extend_from_slice(&[*time, *target]),
        Vcmd::GlobalTranspose { semitones } => out.push(*semitones as u8),
        Vcmd::PerVoiceTranspose { semitones } => out.push(*semitones as u8),
        Vcmd::TremoloOn { delay, rate, depth } => out.extend_from_slice(&[*delay, *rate, *depth]),
        Vcmd::TremoloOff => {}
        Vcmd::Volume { volume } => out.push(*volume),
        Vcmd::VolumeFade { time, target } => out.extend_from_slice(&[*time, *target]),
        Vcmd::VibratoFadeIn { time } => out.push(*time),
        Vcmd::PitchEnvelopeTo { delay, length, semitone } => out.extend_from_slice(&[*delay, *length, *semitone]),
        Vcmd::PitchEnvelopeFrom { delay, length, semitone } => out.extend_from_slice(&[*delay, *length, *semitone]),
        Vcmd::PitchEnvelopeOff => {}
        Vcmd::FineTune { semitones } => out.push(*semitones as u8),
        Vcmd::EchoOn { channels, left, right } => out.extend_from_slice(&[*channels, *left, *right]),
        Vcmd::EchoOff => {}
        Vcmd::EchoParams { delay, feedback, fir_index } => out.extend_from_slice(&[*delay, *feedback, *fir_index]),
        Vcmd::EchoVolumeFade { time, left_target, right_target } => out.extend_from_slice(&[*time, *left_target, *right_target]),
        Vcmd::PitchSlideToNote { delay, length, note } => out.extend_from_slice(&[*delay, *length, *note]),
        Vcmd::PercussionBaseInstrument { index } => out.push(*index),
        Vcmd::MuteChannel | Vcmd::FastForwardOn | Vcmd::FastForwardOff => {}
        Vcmd::Extension { .. } => unreachable!("handled above"),
    }
    Ok(())
}

/// Encodes every track/subroutine in `song`, placing each with `planner` and
/// returning their placed addresses by id (§4.5 steps 1-3). Subroutines are
/// placed and encoded before tracks so `VcmdSubroutineCall` targets resolve
/// on the first pass, mirroring the original's dependency order.
fn place_and_encode_song(
    song: &Song,
    engine: &EngineConfig,
    planner: &mut LayoutPlanner,
    warnings: &mut Vec<String>,
) -> Result<(UploadList, HashMap<i32, u16>, HashMap<i32, u16>), CompileError> {
    let mut upload = UploadList::default();
    let mut subroutine_addr_by_id = HashMap::new();

    for sub in &song.subroutines {
        let bytes = encode_event_stream_for_engine(&sub.events, &subroutine_addr_by_id, warnings, engine)?;
        let addr = planner.place(bytes.len())?;
        subroutine_addr_by_id.insert(sub.id, addr);
        upload.chunks.push(UploadChunk { address: addr, bytes, label: format!("subroutine {}", sub.id) });
    }

    let mut track_addr_by_id = HashMap::new();
    for track in &song.tracks {
        let bytes = encode_event_stream_for_engine(&track.events, &subroutine_addr_by_id, warnings, engine)?;
        let addr = planner.place(bytes.len())?;
        track_addr_by_id.insert(track.id, addr);
        upload.chunks.push(UploadChunk { address: addr, bytes, label: format!("track {}", track.id) });
    }

    Ok((upload, subroutine_addr_by_id, track_addr_by_id))
}

/// Encodes a song's pattern track tables and top-level sequence, appending
/// them to `upload` (§4.5 step 2 inverse of the parser's sequence decode).
fn place_and_encode_sequence(
    song: &Song,
    planner: &mut LayoutPlanner,
    track_addr_by_id: &HashMap<i32, u16>,
    upload: &mut UploadList,
) -> Result<u16, CompileError> {
    let mut pattern_table_addr = HashMap::new();
    for pattern in &song.patterns {
        let Some(ids) = pattern.channel_track_ids else { continue };
        let mut bytes = Vec::with_capacity(16);
        for id in ids {
            let addr = if id >= 0 { *track_addr_by_id.get(&id).unwrap_or(&0) } else { 0 };
            bytes.extend_from_slice(&addr.to_le_bytes());
        }
        let addr = planner.place(bytes.len())?;
        pattern_table_addr.insert(pattern.id, addr);
        upload.chunks.push(UploadChunk { address: addr, bytes, label: format!("pattern {} track table", pattern.id) });
    }

    let mut bytes = Vec::new();
    for op in &song.sequence {
        match op {
            nspc_types::SeqOp::PlayPattern { pattern_id, .. } => {
                let addr = *pattern_table_addr.get(pattern_id).unwrap_or(&0);
                bytes.extend_from_slice(&addr.to_le_bytes());
            }
            nspc_types::SeqOp::JumpTimes { count, target } => {
                // The zero pad keeps the two-byte word at this offset below
                // 0x100 so the parser can tell it apart from a pattern
                // pointer regardless of the target's low byte.
                bytes.push(*count);
                bytes.push(0x00);
                bytes.extend_from_slice(&resolve_seq_target(target).to_le_bytes());
            }
            nspc_types::SeqOp::AlwaysJump { opcode, target } => {
                bytes.push(*opcode);
                bytes.push(0x00);
                bytes.extend_from_slice(&resolve_seq_target(target).to_le_bytes());
            }
            nspc_types::SeqOp::FastForwardOn => bytes.push(0x80),
            nspc_types::SeqOp::FastForwardOff => bytes.push(0x81),
            nspc_types::SeqOp::EndSequence => bytes.push(0x00),
        }
    }
    let addr = planner.place(bytes.len())?;
    upload.chunks.push(UploadChunk { address: addr, bytes, label: format!("song {} sequence", song.id) });
    Ok(addr)
}

fn resolve_seq_target(target: &nspc_types::SeqTarget) -> u16 {
    match target {
        nspc_types::SeqTarget::Absolute(addr) => *addr,
        // An index-based target with no resolved sequence layout falls back
        // to 0; callers that build a sequence referencing other sequence
        // slots by index are expected to resolve them before compiling.
        nspc_types::SeqTarget::Index(_) => 0,
    }
}

/// Builds the upload for a single song, writing its index-table pointer too
/// (§4.5, `buildSongScopedUpload`).
pub fn build_song_scoped_upload(project: &Project, song_index: usize, options: &BuildOptions) -> Result<CompileOutput, CompileError> {
    let song = project.songs.get(song_index).cloned().ok_or(CompileError::UnrepresentableEvent("song index out of range".into()))?;
    let song = if options.optimize_subroutines {
        optimizer::optimize_song(song, &options.optimizer_options).0
    } else {
        song
    };

    let mut warnings = Vec::new();
    let engine = &project.engine_config;
    let mut planner = LayoutPlanner::new(engine, engine.entry_point, &project.aram_usage);

    let (mut upload, _subs, track_addr_by_id) = place_and_encode_song(&song, engine, &mut planner, &mut warnings)?;
    let sequence_addr = place_and_encode_sequence(&song, &mut planner, &track_addr_by_id, &mut upload)?;

    let index_entry_addr = engine.song_index_entry_addr(song.id);
    upload.chunks.push(UploadChunk {
        address: index_entry_addr,
        bytes: sequence_addr.to_le_bytes().to_vec(),
        label: format!("song {} index pointer", song.id),
    });

    for warning in &warnings {
        log::warn!(target: "nspc_core::compiler", "{warning}");
    }
    log::info!(target: "nspc_core::compiler", "compiled song {} into {} chunk(s)", song.id, upload.chunks.len());
    Ok(CompileOutput { upload, warnings })
}

/// Builds the upload for every user-provided song in the project (§4.5,
/// `buildUserContentUpload`). When `include_engine_extensions` is set, also
/// emits each default-enabled engine extension's ARAM patches ahead of the
/// song chunks, so the extension's VCMDs are live before anything that might
/// use them runs.
pub fn build_user_content_upload(project: &Project, options: &BuildOptions) -> Result<UploadList, CompileError> {
    let mut upload = UploadList::default();
    if options.include_engine_extensions {
        for extension in project.engine_config.extensions.iter().filter(|e| e.enabled_by_default) {
            for patch in &extension.patches {
                upload.chunks.push(UploadChunk {
                    address: patch.address,
                    bytes: patch.bytes.clone(),
                    label: format!("extension {} patch: {}", extension.name, patch.name),
                });
            }
        }
    }
    for (index, song) in project.songs.iter().enumerate() {
        if !song.content_origin.is_user_provided() {
            continue;
        }
        let output = build_song_scoped_upload(project, index, options)?;
        upload.chunks.extend(output.upload.chunks);
    }
    Ok(upload)
}

/// Applies an upload list on top of a base SPC file, returning the patched
/// bytes (§4.5, `applyUploadToSpcImage`). All-or-nothing: any chunk that
/// would run past the end of ARAM fails the whole apply.
pub fn apply_upload_to_spc_image(upload: &UploadList, base_spc_file: &[u8]) -> Result<Vec<u8>, CompileError> {
    if base_spc_file.len() < SPC_HEADER_LEN + ARAM_LEN {
        return Err(CompileError::BaseImageTooShort);
    }
    for chunk in &upload.chunks {
        let end = chunk.address as usize + chunk.bytes.len();
        if end > ARAM_LEN {
            return Err(CompileError::LayoutExhausted);
        }
    }

    let mut out = base_spc_file.to_vec();
    for chunk in &upload.chunks {
        let base = SPC_HEADER_LEN + chunk.address as usize;
        out[base..base + chunk.bytes.len()].copy_from_slice(&chunk.bytes);
    }
    Ok(out)
}

/// Builds a standalone playable SPC (§4.5/§6.2): every user-provided song's
/// upload plus `song_index`'s own scoped upload, applied on top of the
/// project's base ARAM image, stamped with `warmup`'s post-warmup CPU/DSP
/// state and the chosen song's ID666 title/artist tags. Mirrors
/// `buildAutoPlaySpc`'s two-stage compile (user content, then the single
/// song to trigger) followed by its emulator-state stamping.
pub fn build_auto_play_spc(
    project: &Project,
    song_index: usize,
    options: &BuildOptions,
    warmup: &PlaybackWarmupState,
) -> Result<Vec<u8>, CompileError> {
    let song = project.songs.get(song_index).ok_or(CompileError::UnrepresentableEvent("song index out of range".into()))?;

    let mut base = vec![0u8; SPC_TOTAL_LEN];
    base[..28].copy_from_slice(b"SNES-SPC700 Sound File Data");
    base[SPC_HEADER_LEN..SPC_HEADER_LEN + ARAM_LEN].copy_from_slice(project.aram.as_slice());

    let has_user_content = project.has_user_provided_content();
    let mut patched = base;
    if has_user_content {
        let user_upload = build_user_content_upload(project, options)?;
        patched = apply_upload_to_spc_image(&user_upload, &patched)?;
    }

    let mut song_options = options.clone();
    if has_user_content {
        // The user-content upload already carries enabled extension patches.
        song_options.include_engine_extensions = false;
    }
    let song_output = build_song_scoped_upload(project, song_index, &song_options)?;
    patched = apply_upload_to_spc_image(&song_output.upload, &patched)?;

    stamp_playback_warmup_state(&mut patched, warmup);
    write_spc_text_field(&mut patched, SPC_SONG_TITLE_OFFSET, SPC_SONG_TITLE_LEN, &song.name);
    write_spc_text_field(&mut patched, SPC_ARTIST_OFFSET, SPC_ARTIST_LEN, &song.author);

    log::info!(target: "nspc_core::compiler", "built auto-play SPC for song {} ({} bytes)", song.id, patched.len());
    Ok(patched)
}

/// Exports just the user-authored content as a raw `.nspc`-style byte blob
/// (the upload list concatenated with small per-chunk headers), for transfer
/// between projects without a full SPC round trip (§4.5/§6.2).
pub fn build_user_content_nspc_export(project: &Project, options: &BuildOptions) -> Result<Vec<u8>, CompileError> {
    let upload = build_user_content_upload(project, options)?;
    let mut out = Vec::new();
    for chunk in &upload.chunks {
        if chunk.bytes.is_empty() {
            return Err(CompileError::UnrepresentableEvent(format!("zero-length chunk ({})", chunk.label)));
        }
        if chunk.bytes.len() > u16::MAX as usize {
            return Err(CompileError::UnrepresentableEvent(format!("chunk too large for u16 length ({})", chunk.label)));
        }
        out.extend_from_slice(&(chunk.bytes.len() as u16).to_le_bytes());
        out.extend_from_slice(&chunk.address.to_le_bytes());
        out.extend_from_slice(&chunk.bytes);
    }
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&project.engine_config.entry_point.to_le_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nspc_types::{Duration, EngineConfig};

    fn stub_engine() -> EngineConfig {
        EngineConfig {
            id: "test".into(),
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
            reserved: vec![nspc_types::ReservedRegion { name: "driver".into(), from: 0x0000, to: 0x0400 }],
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
    fn encodes_simple_stream() {
        let events = vec![
            Entry::new(0, Event::Duration(Duration::new(4))),
            Entry::new(1, Event::Note { pitch: 0 }),
            Entry::new(2, Event::End),
        ];
        let mut warnings = Vec::new();
        let bytes = encode_event_stream_for_engine(&events, &HashMap::new(), &mut warnings, &stub_engine()).unwrap();
        assert_eq!(bytes, vec![4, 0x80, 0x00]);
    }

    #[test]
    fn subroutine_call_needs_resolved_address() {
        let events = vec![Entry::new(
            0,
            Event::Vcmd(Vcmd::SubroutineCall { subroutine_id: 5, original_addr: 0, count: 1 }),
        )];
        let mut warnings = Vec::new();
        let err = encode_event_stream_for_engine(&events, &HashMap::new(), &mut warnings, &stub_engine()).unwrap_err();
        assert_eq!(err, CompileError::UnknownSubroutineTarget(5));
    }

    #[test]
    fn layout_planner_skips_reserved_region() {
        let engine = stub_engine();
        let mut planner = LayoutPlanner::new(&engine, 0, &[]);
        let addr = planner.place(4).unwrap();
        assert!(addr >= 0x0400);
    }

    #[test]
    fn build_song_scoped_upload_round_trips_through_apply() {
        let mut engine = stub_engine();
        engine.reserved.clear();
        let aram = Box::new([0u8; ARAM_LEN]);
        let mut project = Project::new(engine, aram);
        let mut song = Song::new_empty(0);
        song.tracks.push(nspc_types::Track {
            id: 0,
            events: vec![
                Entry::new(0, Event::Duration(Duration::new(4))),
                Entry::new(1, Event::Note { pitch: 0 }),
                Entry::new(2, Event::End),
            ],
            original_addr: 0,
        });
        song.patterns.push(nspc_types::Pattern { id: 0, channel_track_ids: Some([0, -1, -1, -1, -1, -1, -1, -1]), track_table_addr: 0 });
        song.sequence.push(nspc_types::SeqOp::PlayPattern { pattern_id: 0, track_table_addr: 0 });
        song.sequence.push(nspc_types::SeqOp::EndSequence);
        project.songs.push(song);

        let output = build_song_scoped_upload(&project, 0, &BuildOptions::default()).unwrap();
        assert!(!output.upload.chunks.is_empty());

        let base = vec![0u8; SPC_HEADER_LEN + ARAM_LEN];
        let mut base_with_header = base;
        base_with_header[..28].copy_from_slice(b"SNES-SPC700 Sound File Data");
        let patched = apply_upload_to_spc_image(&output.upload, &base_with_header).unwrap();
        assert_eq!(patched.len(), SPC_HEADER_LEN + ARAM_LEN);
    }

    #[test]
    fn jump_times_and_always_jump_round_trip_with_non_page_aligned_target() {
        let mut engine = stub_engine();
        engine.reserved.clear();
        let aram = Box::new([0u8; ARAM_LEN]);
        let mut project = Project::new(engine.clone(), aram);
        let mut song = Song::new_empty(0);
        song.tracks.push(nspc_types::Track {
            id: 0,
            events: vec![
                Entry::new(0, Event::Duration(Duration::new(4))),
                Entry::new(1, Event::Note { pitch: 0 }),
                Entry::new(2, Event::End),
            ],
            original_addr: 0,
        });
        song.patterns.push(nspc_types::Pattern { id: 0, channel_track_ids: Some([0, -1, -1, -1, -1, -1, -1, -1]), track_table_addr: 0 });
        song.sequence.push(nspc_types::SeqOp::PlayPattern { pattern_id: 0, track_table_addr: 0 });
        // 0x1234 and 0x5678 both have a non-zero low byte, the case that
        // desynced the parser before the control entries were padded.
        song.sequence.push(nspc_types::SeqOp::JumpTimes { count: 5, target: nspc_types::SeqTarget::Absolute(0x1234) });
        song.sequence.push(nspc_types::SeqOp::AlwaysJump { opcode: 0x82, target: nspc_types::SeqTarget::Absolute(0x5678) });
        song.sequence.push(nspc_types::SeqOp::EndSequence);
        project.songs.push(song);

        let output = build_song_scoped_upload(&project, 0, &BuildOptions::default()).unwrap();
        let mut base = vec![0u8; SPC_HEADER_LEN + ARAM_LEN];
        base[..28].copy_from_slice(b"SNES-SPC700 Sound File Data");
        let patched = apply_upload_to_spc_image(&output.upload, &base).unwrap();

        let reparsed = crate::parser::load(&patched, std::slice::from_ref(&engine), &[0]).unwrap();
        let reparsed_song = reparsed.songs.first().unwrap();
        assert_eq!(reparsed_song.sequence.len(), 4);
        assert!(matches!(
            reparsed_song.sequence[0],
            nspc_types::SeqOp::PlayPattern { pattern_id: 0, .. }
        ));
        assert!(matches!(
            reparsed_song.sequence[1],
            nspc_types::SeqOp::JumpTimes { count: 5, target: nspc_types::SeqTarget::Absolute(0x1234) }
        ));
        assert!(matches!(
            reparsed_song.sequence[2],
            nspc_types::SeqOp::AlwaysJump { opcode: 0x82, target: nspc_types::SeqTarget::Absolute(0x5678) }
        ));
        assert!(matches!(reparsed_song.sequence[3], nspc_types::SeqOp::EndSequence));
    }

    #[test]
    fn user_content_upload_includes_enabled_extension_patches() {
        let mut engine = stub_engine();
        engine.reserved.clear();
        engine.extensions.push(nspc_types::EngineExtension {
            name: "echo_fx".into(),
            description: "extra echo vcmds".into(),
            enabled_by_default: true,
            patches: vec![nspc_types::EnginePatchWrite { name: "enable".into(), address: 0x0420, bytes: vec![0xEA, 0xEA] }],
            vcmds: Vec::new(),
        });
        engine.extensions.push(nspc_types::EngineExtension {
            name: "disabled_fx".into(),
            description: "never on".into(),
            enabled_by_default: false,
            patches: vec![nspc_types::EnginePatchWrite { name: "enable".into(), address: 0x0430, bytes: vec![0xFF] }],
            vcmds: Vec::new(),
        });
        let aram = Box::new([0u8; ARAM_LEN]);
        let project = Project::new(engine, aram);

        let upload = build_user_content_upload(&project, &BuildOptions::default()).unwrap();
        assert!(upload.chunks.iter().any(|c| c.address == 0x0420 && c.bytes == vec![0xEA, 0xEA]));
        assert!(!upload.chunks.iter().any(|c| c.address == 0x0430));

        let mut options = BuildOptions::default();
        options.include_engine_extensions = false;
        let upload = build_user_content_upload(&project, &options).unwrap();
        assert!(upload.chunks.is_empty());
    }

    #[test]
    fn build_auto_play_spc_stamps_warmup_state_and_tags() {
        let mut engine = stub_engine();
        engine.reserved.clear();
        let aram = Box::new([0u8; ARAM_LEN]);
        let mut project = Project::new(engine, aram);
        let mut song = Song::new_empty(0);
        song.name = "Test Song".to_string();
        song.author = "Tester".to_string();
        song.tracks.push(nspc_types::Track {
            id: 0,
            events: vec![
                Entry::new(0, Event::Duration(Duration::new(4))),
                Entry::new(1, Event::Note { pitch: 0 }),
                Entry::new(2, Event::End),
            ],
            original_addr: 0,
        });
        song.patterns.push(nspc_types::Pattern { id: 0, channel_track_ids: Some([0, -1, -1, -1, -1, -1, -1, -1]), track_table_addr: 0 });
        song.sequence.push(nspc_types::SeqOp::PlayPattern { pattern_id: 0, track_table_addr: 0 });
        song.sequence.push(nspc_types::SeqOp::EndSequence);
        project.songs.push(song);

        let warmup = PlaybackWarmupState { pc: 0x1234, a: 1, x: 2, y: 3, psw: 4, sp: 5, trigger_port: 0, trigger_value: 0xAB, ..Default::default() };
        let spc = build_auto_play_spc(&project, 0, &BuildOptions::default(), &warmup).unwrap();

        assert_eq!(spc.len(), SPC_TOTAL_LEN);
        assert_eq!(u16::from_le_bytes([spc[SPC_PC_OFFSET], spc[SPC_PC_OFFSET + 1]]), 0x1234);
        assert_eq!(spc[SPC_A_OFFSET], 1);
        assert_eq!(spc[SPC_HEADER_LEN + 0xF4], 0xAB);
        let title_bytes = &spc[SPC_SONG_TITLE_OFFSET..SPC_SONG_TITLE_OFFSET + 9];
        assert_eq!(title_bytes, b"Test Song");
    }
}
