use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A half-open ARAM interval the compiler's layout planner must avoid (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservedRegion {
    pub name: String,
    pub from: u16,
    pub to: u16,
}

impl ReservedRegion {
    pub fn contains(&self, addr: u16) -> bool {
        addr >= self.from && addr < self.to
    }

    pub fn overlaps(&self, from: u16, to: u16) -> bool {
        from < self.to && to > self.from
    }
}

/// Engine byte ↔ internal VCMD id remap (§3.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VcmdRemap {
    /// Raw engine byte -> internal/common VCMD byte.
    #[serde(default)]
    pub read: HashMap<u8, u8>,
    /// Internal/common VCMD byte -> raw engine byte.
    #[serde(default)]
    pub write: HashMap<u8, u8>,
    /// If true, an unmapped raw byte fails the parse with `InvalidEventData`.
    #[serde(default)]
    pub strict_read: bool,
    /// If true, an unmapped common byte is a hard compile error.
    #[serde(default)]
    pub strict_write: bool,
}

impl VcmdRemap {
    pub fn to_raw(&self, common: u8) -> u8 {
        self.write.get(&common).copied().unwrap_or(common)
    }

    pub fn to_common(&self, raw: u8) -> Option<u8> {
        match self.read.get(&raw) {
            Some(mapped) => Some(*mapped),
            None if self.strict_read => None,
            None => Some(raw),
        }
    }
}

/// One engine extension's VCMD registration, gated behind `extension_vcmd_prefix` (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineExtensionVcmd {
    pub id: u8,
    pub name: String,
    pub param_count: u8,
}

/// A write the engine config wants applied to ARAM when an extension is enabled
/// (e.g. a patch enabling the extension's code in the driver).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnginePatchWrite {
    pub name: String,
    pub address: u16,
    pub bytes: Vec<u8>,
}

/// An optional engine extension: extra VCMDs plus the ARAM patches that enable them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineExtension {
    pub name: String,
    pub description: String,
    pub enabled_by_default: bool,
    pub patches: Vec<EnginePatchWrite>,
    pub vcmds: Vec<EngineExtensionVcmd>,
}

/// An immutable description of one music engine variant (§3.1, §6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub id: String,
    pub name: String,
    pub entry_point: u16,
    pub sample_headers: u16,
    pub instrument_headers: u16,
    pub percussion_headers: u16,
    pub song_index_pointers: u16,
    pub instrument_entry_bytes: u8,
    pub echo_buffer: u16,
    pub echo_buffer_len: u16,
    pub engine_bytes: Vec<u8>,
    #[serde(default)]
    pub reserved: Vec<ReservedRegion>,
    #[serde(default)]
    pub command_map: Option<VcmdRemap>,
    #[serde(default = "default_extension_prefix")]
    pub extension_vcmd_prefix: u8,
    #[serde(default)]
    pub extensions: Vec<EngineExtension>,

    /// Default engine-owned ids, used to classify imported SPC content (§4.1).
    #[serde(default)]
    pub default_engine_provided_song_ids: Vec<i32>,
    #[serde(default)]
    pub default_engine_provided_instrument_ids: Vec<i32>,
    #[serde(default)]
    pub default_engine_provided_sample_ids: Vec<i32>,
    #[serde(default)]
    pub has_default_engine_provided_songs: bool,
    #[serde(default)]
    pub has_default_engine_provided_instruments: bool,
    #[serde(default)]
    pub has_default_engine_provided_samples: bool,
}

fn default_extension_prefix() -> u8 {
    0xFF
}

impl EngineConfig {
    pub fn is_reserved(&self, addr: u16) -> bool {
        self.reserved.iter().any(|r| r.contains(addr))
    }

    pub fn overlaps_reserved(&self, from: u16, to: u16) -> bool {
        self.reserved.iter().any(|r| r.overlaps(from, to))
    }

    pub fn find_extension_vcmd(&self, id: u8) -> Option<&EngineExtensionVcmd> {
        self.extensions
            .iter()
            .filter(|e| e.enabled_by_default)
            .find_map(|e| e.vcmds.iter().find(|v| v.id == id))
    }

    pub fn song_index_entry_addr(&self, song_id: i32) -> u16 {
        self.song_index_pointers.wrapping_add((song_id as u16).wrapping_mul(2))
    }
}
