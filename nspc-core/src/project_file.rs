//! Project IR file persistence (§4.6, grounded on `NspcProjectFile.hpp`):
//! saves/loads a JSON document describing everything a project needs beyond
//! the base SPC — user songs, instruments, and samples — and can apply that
//! document as an overlay onto an already-loaded [`Project`].
//!
//! Event streams are the bulk of a song's size, so each track/subroutine's
//! `Vec<Entry>` is encoded as MessagePack (`rmp-serde`) and base64-wrapped
//! inside the JSON document (the `eventpack_v1` format) instead of being
//! spelled out as JSON arrays-of-objects. Sample PCM bytes are base64 too.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use nspc_types::{
    BrrSample, ContentOrigin, Entry, EventId, Instrument, Pattern, Project, SeqOp, Song, SongId,
    Subroutine, SubroutineId, Track, TrackId,
};

const EVENTPACK_FORMAT: &str = "eventpack_v1";

#[derive(Debug)]
pub enum ProjectFileError {
    Io(std::io::Error),
    Json(serde_json::Error),
    MsgPackEncode(rmp_serde::encode::Error),
    MsgPackDecode(rmp_serde::decode::Error),
    Base64(base64::DecodeError),
    UnsupportedEventpackFormat(String),
    UnsupportedVersion(u32),
}

impl std::fmt::Display for ProjectFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectFileError::Io(e) => write!(f, "project file I/O error: {e}"),
            ProjectFileError::Json(e) => write!(f, "project file JSON error: {e}"),
            ProjectFileError::MsgPackEncode(e) => write!(f, "event pack encode error: {e}"),
            ProjectFileError::MsgPackDecode(e) => write!(f, "event pack decode error: {e}"),
            ProjectFileError::Base64(e) => write!(f, "base64 decode error: {e}"),
            ProjectFileError::UnsupportedEventpackFormat(fmt) => write!(f, "unsupported event pack format: {fmt}"),
            ProjectFileError::UnsupportedVersion(v) => write!(f, "unsupported project file version: {v}"),
        }
    }
}

impl std::error::Error for ProjectFileError {}

impl From<std::io::Error> for ProjectFileError {
    fn from(e: std::io::Error) -> Self {
        ProjectFileError::Io(e)
    }
}
impl From<serde_json::Error> for ProjectFileError {
    fn from(e: serde_json::Error) -> Self {
        ProjectFileError::Json(e)
    }
}

/// Decoded project IR contents (§4.6), mirroring `NspcProjectIrData`.
#[derive(Debug, Clone)]
pub struct ProjectIrData {
    pub engine_name: String,
    pub base_spc_path: Option<PathBuf>,
    pub enabled_engine_extensions: Option<Vec<String>>,
    pub songs: Vec<Song>,
    pub instruments: Vec<Instrument>,
    pub samples: Vec<BrrSample>,
    pub retained_engine_song_ids: Vec<i32>,
    pub retained_engine_instrument_ids: Vec<i32>,
    pub retained_engine_sample_ids: Vec<i32>,
}

#[derive(Serialize, Deserialize)]
struct EventPack {
    format: String,
    data: String,
}

fn pack_events(events: &[Entry]) -> Result<EventPack, ProjectFileError> {
    let bytes = rmp_serde::to_vec(events).map_err(ProjectFileError::MsgPackEncode)?;
    Ok(EventPack { format: EVENTPACK_FORMAT.to_string(), data: BASE64.encode(bytes) })
}

fn unpack_events(pack: &EventPack) -> Result<Vec<Entry>, ProjectFileError> {
    if pack.format != EVENTPACK_FORMAT {
        return Err(ProjectFileError::UnsupportedEventpackFormat(pack.format.clone()));
    }
    let bytes = BASE64.decode(&pack.data).map_err(ProjectFileError::Base64)?;
    rmp_serde::from_slice(&bytes).map_err(ProjectFileError::MsgPackDecode)
}

#[derive(Serialize, Deserialize)]
struct TrackDoc {
    id: TrackId,
    original_addr: u16,
    events: EventPack,
}

#[derive(Serialize, Deserialize)]
struct SubroutineDoc {
    id: SubroutineId,
    original_addr: u16,
    events: EventPack,
}

#[derive(Serialize, Deserialize)]
struct SongDoc {
    id: SongId,
    name: String,
    author: String,
    content_origin: ContentOrigin,
    sequence: Vec<SeqOp>,
    patterns: Vec<Pattern>,
    tracks: Vec<TrackDoc>,
    subroutines: Vec<SubroutineDoc>,
    next_event_id: EventId,
}

fn song_to_doc(song: &Song) -> Result<SongDoc, ProjectFileError> {
    Ok(SongDoc {
        id: song.id,
        name: song.name.clone(),
        author: song.author.clone(),
        content_origin: song.content_origin,
        sequence: song.sequence.clone(),
        patterns: song.patterns.clone(),
        tracks: song
            .tracks
            .iter()
            .map(|t| Ok(TrackDoc { id: t.id, original_addr: t.original_addr, events: pack_events(&t.events)? }))
            .collect::<Result<_, ProjectFileError>>()?,
        subroutines: song
            .subroutines
            .iter()
            .map(|s| Ok(SubroutineDoc { id: s.id, original_addr: s.original_addr, events: pack_events(&s.events)? }))
            .collect::<Result<_, ProjectFileError>>()?,
        next_event_id: song.next_event_id,
    })
}

fn doc_to_song(doc: SongDoc) -> Result<Song, ProjectFileError> {
    Ok(Song {
        id: doc.id,
        name: doc.name,
        author: doc.author,
        content_origin: doc.content_origin,
        sequence: doc.sequence,
        patterns: doc.patterns,
        tracks: doc
            .tracks
            .into_iter()
            .map(|t| Ok(Track { id: t.id, events: unpack_events(&t.events)?, original_addr: t.original_addr }))
            .collect::<Result<_, ProjectFileError>>()?,
        subroutines: doc
            .subroutines
            .into_iter()
            .map(|s| Ok(Subroutine { id: s.id, events: unpack_events(&s.events)?, original_addr: s.original_addr }))
            .collect::<Result<_, ProjectFileError>>()?,
        next_event_id: doc.next_event_id,
    })
}

#[derive(Serialize, Deserialize)]
struct SampleDoc {
    id: i32,
    name: String,
    data_base64: String,
    original_addr: u16,
    original_loop_addr: u16,
    content_origin: ContentOrigin,
}

fn sample_to_doc(sample: &BrrSample) -> SampleDoc {
    SampleDoc {
        id: sample.id,
        name: sample.name.clone(),
        data_base64: BASE64.encode(&sample.data),
        original_addr: sample.original_addr,
        original_loop_addr: sample.original_loop_addr,
        content_origin: sample.content_origin,
    }
}

fn doc_to_sample(doc: SampleDoc) -> Result<BrrSample, ProjectFileError> {
    Ok(BrrSample {
        id: doc.id,
        name: doc.name,
        data: BASE64.decode(&doc.data_base64).map_err(ProjectFileError::Base64)?,
        original_addr: doc.original_addr,
        original_loop_addr: doc.original_loop_addr,
        content_origin: doc.content_origin,
    })
}

/// Format version this implementation writes and the only one its loader
/// accepts (§4.6, §6.4: "loaders must reject versions they do not
/// recognize").
const PROJECT_IR_VERSION: u32 = 4;

#[derive(Serialize, Deserialize)]
struct ProjectIrDoc {
    version: u32,
    engine_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_spc_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled_engine_extensions: Option<Vec<String>>,
    songs: Vec<SongDoc>,
    instruments: Vec<Instrument>,
    samples: Vec<SampleDoc>,
    #[serde(default)]
    retained_engine_song_ids: Vec<i32>,
    #[serde(default)]
    retained_engine_instrument_ids: Vec<i32>,
    #[serde(default)]
    retained_engine_sample_ids: Vec<i32>,
}

/// Writes `project`'s user-provided content as a project IR file at `path`
/// (§4.6). `base_spc_path`, if given, is recorded so a loader can re-locate
/// the base SPC the project was built against.
pub fn save_project_ir_file(project: &Project, path: &Path, base_spc_path: Option<&Path>) -> Result<(), ProjectFileError> {
    let doc = ProjectIrDoc {
        version: PROJECT_IR_VERSION,
        engine_name: project.engine_config.name.clone(),
        base_spc_path: base_spc_path.or(project.source_spc_path.as_deref()).map(|p| p.to_string_lossy().into_owned()),
        enabled_engine_extensions: None,
        songs: project
            .songs
            .iter()
            .filter(|s| s.content_origin.is_user_provided())
            .map(song_to_doc)
            .collect::<Result<_, ProjectFileError>>()?,
        instruments: project.instruments.iter().filter(|i| i.content_origin.is_user_provided()).cloned().collect(),
        samples: project
            .samples
            .iter()
            .filter(|s| s.content_origin.is_user_provided())
            .map(sample_to_doc)
            .collect(),
        retained_engine_song_ids: project
            .songs
            .iter()
            .filter(|s| !s.content_origin.is_user_provided())
            .map(|s| s.id)
            .collect(),
        retained_engine_instrument_ids: project
            .instruments
            .iter()
            .filter(|i| !i.content_origin.is_user_provided())
            .map(|i| i.id)
            .collect(),
        retained_engine_sample_ids: project
            .samples
            .iter()
            .filter(|s| !s.content_origin.is_user_provided())
            .map(|s| s.id)
            .collect(),
    };

    let json = serde_json::to_string_pretty(&doc)?;
    std::fs::write(path, json)?;
    log::info!(target: "nspc_core::project_file", "saved {} song(s) to {}", doc.songs.len(), path.display());
    Ok(())
}

/// Reads a project IR file back into memory without touching any already-open
/// project (§4.6).
pub fn load_project_ir_file(path: &Path) -> Result<ProjectIrData, ProjectFileError> {
    let contents = std::fs::read_to_string(path)?;
    let doc: ProjectIrDoc = serde_json::from_str(&contents)?;
    if doc.version != PROJECT_IR_VERSION {
        return Err(ProjectFileError::UnsupportedVersion(doc.version));
    }
    log::debug!(target: "nspc_core::project_file", "loaded {} song(s) from {}", doc.songs.len(), path.display());

    Ok(ProjectIrData {
        engine_name: doc.engine_name,
        base_spc_path: doc.base_spc_path.map(PathBuf::from),
        enabled_engine_extensions: doc.enabled_engine_extensions,
        songs: doc.songs.into_iter().map(doc_to_song).collect::<Result<_, ProjectFileError>>()?,
        instruments: doc.instruments,
        samples: doc.samples.into_iter().map(doc_to_sample).collect::<Result<_, ProjectFileError>>()?,
        retained_engine_song_ids: doc.retained_engine_song_ids,
        retained_engine_instrument_ids: doc.retained_engine_instrument_ids,
        retained_engine_sample_ids: doc.retained_engine_sample_ids,
    })
}

/// Merges an IR overlay into an already-loaded project (§4.6): user-provided
/// songs/instruments/samples from the overlay replace any existing entry
/// with the same id (or are appended), while engine-provided content from
/// the base SPC is left untouched.
pub fn apply_project_ir_overlay(project: &mut Project, overlay: &ProjectIrData) -> Result<(), ProjectFileError> {
    for song in &overlay.songs {
        match project.songs.iter_mut().find(|s| s.id == song.id) {
            Some(slot) => *slot = song.clone(),
            None => project.songs.push(song.clone()),
        }
    }
    for instrument in &overlay.instruments {
        match project.instruments.iter_mut().find(|i| i.id == instrument.id) {
            Some(slot) => *slot = instrument.clone(),
            None => project.instruments.push(instrument.clone()),
        }
    }
    for sample in &overlay.samples {
        match project.samples.iter_mut().find(|s| s.id == sample.id) {
            Some(slot) => *slot = sample.clone(),
            None => project.samples.push(sample.clone()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nspc_types::{Duration, Event, EngineConfig};

    fn stub_project() -> Project {
        let engine = EngineConfig {
            id: "t".into(),
            name: "Test".into(),
            entry_point: 0,
            sample_headers: 0,
            instrument_headers: 0,
            percussion_headers: 0,
            song_index_pointers: 0,
            instrument_entry_bytes: 6,
            echo_buffer: 0,
            echo_buffer_len: 0,
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
        };
        let mut project = Project::new(engine, Box::new([0u8; 0x10000]));
        let mut song = Song::new_empty(1);
        song.tracks.push(Track {
            id: 0,
            events: vec![Entry::new(0, Event::Duration(Duration::new(4))), Entry::new(1, Event::End)],
            original_addr: 0,
        });
        project.songs.push(song);
        project
    }

    #[test]
    fn save_then_load_round_trips_song_events() {
        let project = stub_project();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.nspcproj.json");
        save_project_ir_file(&project, &path, None).unwrap();

        let loaded = load_project_ir_file(&path).unwrap();
        assert_eq!(loaded.songs.len(), 1);
        assert_eq!(loaded.songs[0].tracks[0].events.len(), 2);
        assert!(matches!(loaded.songs[0].tracks[0].events[0].event, Event::Duration(_)));
    }

    #[test]
    fn overlay_replaces_existing_song_by_id() {
        let mut project = stub_project();
        let mut replacement = project.songs[0].clone();
        replacement.name = "Replaced".to_string();
        let overlay = ProjectIrData {
            engine_name: "Test".into(),
            base_spc_path: None,
            enabled_engine_extensions: None,
            songs: vec![replacement],
            instruments: Vec::new(),
            samples: Vec::new(),
            retained_engine_song_ids: Vec::new(),
            retained_engine_instrument_ids: Vec::new(),
            retained_engine_sample_ids: Vec::new(),
        };
        apply_project_ir_overlay(&mut project, &overlay).unwrap();
        assert_eq!(project.songs.len(), 1);
        assert_eq!(project.songs[0].name, "Replaced");
    }

    #[test]
    fn load_rejects_unrecognized_version() {
        let project = stub_project();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.nspcproj.json");
        save_project_ir_file(&project, &path, None).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let bumped = contents.replacen("\"version\": 4", "\"version\": 99", 1);
        std::fs::write(&path, bumped).unwrap();

        let err = load_project_ir_file(&path).unwrap_err();
        assert!(matches!(err, ProjectFileError::UnsupportedVersion(99)));
    }
}
