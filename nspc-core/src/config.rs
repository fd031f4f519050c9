//! Engine configuration loading: embedded defaults merged with an optional
//! user override document (§1, §3.1, §6.3).

use std::path::PathBuf;

use serde::Deserialize;

use nspc_types::EngineConfig;

const DEFAULT_CONFIGS: &str = include_str!("../engine_configs.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    engine: Vec<EngineConfig>,
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Parse(e) => write!(f, "failed to parse embedded engine configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Loads all known engine configurations: the embedded defaults, with any
/// user override document (resolved via [`dirs::config_dir`]) merged in by
/// `id`. A malformed or unreadable override document is logged and skipped
/// rather than failing the whole load — the embedded defaults always parse.
pub fn load_engine_configs() -> Result<Vec<EngineConfig>, ConfigError> {
    let base: ConfigFile = toml::from_str(DEFAULT_CONFIGS).map_err(ConfigError::Parse)?;
    let mut configs = base.engine;

    if let Some(path) = user_config_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                    Ok(user) => merge_user_configs(&mut configs, user.engine),
                    Err(e) => {
                        log::warn!(target: "nspc_core::config", "ignoring malformed engine config {}: {}", path.display(), e)
                    }
                },
                Err(e) => {
                    log::warn!(target: "nspc_core::config", "could not read engine config {}: {}", path.display(), e)
                }
            }
        }
    }

    Ok(configs)
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("nspc").join("engines.toml"))
}

/// User entries with an `id` matching a default entry replace it in place;
/// unmatched ids are appended as additional engine variants.
fn merge_user_configs(base: &mut Vec<EngineConfig>, user: Vec<EngineConfig>) {
    for cfg in user {
        match base.iter_mut().find(|existing| existing.id == cfg.id) {
            Some(slot) => *slot = cfg,
            None => base.push(cfg),
        }
    }
}

/// Finds the engine config whose `entry_point..entry_point+engine_bytes.len()`
/// slice matches `aram` exactly (§4.1). Mirrors the engine-signature match
/// used by the binary parser to classify which driver variant produced an SPC.
pub fn match_engine_config<'a>(configs: &'a [EngineConfig], aram: &[u8; 0x10000]) -> Option<&'a EngineConfig> {
    configs.iter().find(|config| {
        let offset = config.entry_point as usize;
        let len = config.engine_bytes.len();
        offset + len <= aram.len() && aram[offset..offset + len] == config.engine_bytes[..]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_embedded_defaults() {
        let configs = load_engine_configs().expect("embedded config must parse");
        assert!(!configs.is_empty());
    }

    #[test]
    fn merge_replaces_by_id() {
        let mut base = vec![stub_config("amk", "AddMusicK")];
        let user = vec![stub_config("amk", "AddMusicK (custom)")];
        merge_user_configs(&mut base, user);
        assert_eq!(base.len(), 1);
        assert_eq!(base[0].name, "AddMusicK (custom)");
    }

    #[test]
    fn merge_appends_unknown_id() {
        let mut base = vec![stub_config("amk", "AddMusicK")];
        let user = vec![stub_config("other", "Other Engine")];
        merge_user_configs(&mut base, user);
        assert_eq!(base.len(), 2);
    }

    fn stub_config(id: &str, name: &str) -> EngineConfig {
        EngineConfig {
            id: id.to_string(),
            name: name.to_string(),
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
        }
    }
}
