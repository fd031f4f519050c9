use serde::{Deserialize, Serialize};

use crate::engine_config::EngineConfig;
use crate::song::Song;
use crate::{InstrumentId, SampleId};

/// Whether a song/instrument/sample came from the parsed base SPC (part of
/// the engine) or was authored in the tool / imported (§3.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentOrigin {
    EngineProvided,
    UserProvided,
}

impl ContentOrigin {
    pub fn is_user_provided(self) -> bool {
        matches!(self, ContentOrigin::UserProvided)
    }
}

/// An entry in the engine's instrument table (§3.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub id: InstrumentId,
    pub sample_index: u8,
    pub adsr1: u8,
    pub adsr2: u8,
    pub gain: u8,
    pub base_pitch_mult: u8,
    pub frac_pitch_mult: u8,
    pub percussion_note: u8,
    pub name: String,
    pub original_addr: u16,
    pub content_origin: ContentOrigin,
}

/// ADPCM-encoded sample bytes, stored at `original_addr` in ARAM with a
/// directory entry at `sample_headers + id*4` (§3.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrrSample {
    pub id: SampleId,
    pub name: String,
    pub data: Vec<u8>,
    pub original_addr: u16,
    pub original_loop_addr: u16,
    pub content_origin: ContentOrigin,
}

/// The top-level in-memory document (§3.4).
#[derive(Debug, Clone)]
pub struct Project {
    pub engine_config: EngineConfig,
    pub aram: Box<[u8; 0x10000]>,
    pub songs: Vec<Song>,
    pub instruments: Vec<Instrument>,
    pub samples: Vec<BrrSample>,
    pub source_spc_data: Option<Vec<u8>>,
    pub source_spc_path: Option<std::path::PathBuf>,
    pub aram_usage: Vec<(u16, u16, String)>,
}

impl Project {
    pub fn new(engine_config: EngineConfig, aram: Box<[u8; 0x10000]>) -> Self {
        Self {
            engine_config,
            aram,
            songs: Vec::new(),
            instruments: Vec::new(),
            samples: Vec::new(),
            source_spc_data: None,
            source_spc_path: None,
            aram_usage: Vec::new(),
        }
    }

    pub fn song(&self, index: usize) -> Option<&Song> {
        self.songs.get(index)
    }

    pub fn song_mut(&mut self, index: usize) -> Option<&mut Song> {
        self.songs.get_mut(index)
    }

    pub fn instrument(&self, id: InstrumentId) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.id == id)
    }

    pub fn instrument_mut(&mut self, id: InstrumentId) -> Option<&mut Instrument> {
        self.instruments.iter_mut().find(|i| i.id == id)
    }

    pub fn sample(&self, id: SampleId) -> Option<&BrrSample> {
        self.samples.iter().find(|s| s.id == id)
    }

    pub fn sample_mut(&mut self, id: SampleId) -> Option<&mut BrrSample> {
        self.samples.iter_mut().find(|s| s.id == id)
    }

    pub fn has_user_provided_content(&self) -> bool {
        self.songs.iter().any(|s| s.content_origin.is_user_provided())
            || self.instruments.iter().any(|i| i.content_origin.is_user_provided())
            || self.samples.iter().any(|s| s.content_origin.is_user_provided())
    }
}
