//! Saved server selections, persisted as `presets.json`.
//!
//! The file maps a key (the preset name without spaces) to
//! `{"presetName": ..., "servers": [...], "clustered": bool}`.
//! Every mutation is written back immediately.

use crate::error::PickerError;
use crate::models::Preset;
use crate::utils::{read_json, write_json_atomic};
use crate::validation::{preset_key, validate_preset_name};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const PRESETS_FILE_NAME: &str = "presets.json";

/// Lenient on-disk entry: missing fields fall back to the key / empty.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoredPreset {
    #[serde(rename = "presetName")]
    preset_name: Option<String>,
    servers: Vec<String>,
    clustered: bool,
}

impl StoredPreset {
    fn into_preset(self, key: &str) -> Preset {
        Preset {
            name: self.preset_name.unwrap_or_else(|| key.to_string()),
            servers: self.servers,
            clustered: self.clustered,
        }
    }
}

/// Fields to change in [`PresetStore::update`].
#[derive(Debug, Default, Clone)]
pub struct PresetUpdate {
    pub servers: Option<Vec<String>>,
    pub new_name: Option<String>,
    pub clustered: Option<bool>,
}

pub struct PresetStore {
    path: PathBuf,
    presets: BTreeMap<String, Preset>,
}

fn preset_error(msg: impl Into<String>) -> anyhow::Error {
    PickerError::Preset(msg.into()).into()
}

/// Decode a key → entry object. Entries that are not objects, or whose
/// fields have the wrong type, are skipped.
fn decode_entries(data: Map<String, Value>) -> Vec<(String, Preset)> {
    data.into_iter()
        .filter_map(|(key, value)| {
            if !value.is_object() {
                warn!("Skipping preset '{}': not an object", key);
                return None;
            }
            match StoredPreset::deserialize(value) {
                Ok(stored) => {
                    let preset = stored.into_preset(&key);
                    Some((key, preset))
                }
                Err(e) => {
                    warn!("Skipping preset '{}': {}", key, e);
                    None
                }
            }
        })
        .collect()
}

impl PresetStore {
    /// Open (creating if needed) the store in `config_dir`.
    pub fn open(config_dir: &Path) -> Result<Self> {
        fs::create_dir_all(config_dir).with_context(|| {
            format!("Failed to create config directory: {}", config_dir.display())
        })?;
        let path = config_dir.join(PRESETS_FILE_NAME);

        let data: Option<Map<String, Value>> = read_json(&path)
            .map_err(|e| preset_error(format!("Failed to parse presets file: {:#}", e)))?;

        let store = match data {
            Some(data) => {
                let presets: BTreeMap<_, _> = decode_entries(data).into_iter().collect();
                debug!("Loaded {} preset(s) from {}", presets.len(), path.display());
                Self { path, presets }
            }
            None => {
                let store = Self {
                    path,
                    presets: BTreeMap::new(),
                };
                store.persist()?;
                store
            }
        };
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.presets)
            .map_err(|e| preset_error(format!("Failed to save presets: {:#}", e)))
    }

    pub fn add(&mut self, name: &str, servers: Vec<String>, clustered: bool) -> Result<Preset> {
        validate_preset_name(name).map_err(|e| preset_error(e.to_string()))?;
        let key = preset_key(name);
        if self.presets.contains_key(&key) {
            return Err(preset_error(format!("Preset '{}' already exists", name)));
        }
        if servers.is_empty() {
            return Err(preset_error("Preset must contain at least one server"));
        }

        let preset = Preset {
            name: name.to_string(),
            servers,
            clustered,
        };
        self.presets.insert(key, preset.clone());
        self.persist()?;
        Ok(preset)
    }

    pub fn update(&mut self, name: &str, update: PresetUpdate) -> Result<Preset> {
        let key = preset_key(name);
        let mut preset = self
            .presets
            .get(&key)
            .cloned()
            .ok_or_else(|| preset_error(format!("Preset '{}' does not exist", name)))?;

        if let Some(servers) = update.servers {
            if servers.is_empty() {
                return Err(preset_error("Preset must contain at least one server"));
            }
            preset.servers = servers;
        }
        if let Some(clustered) = update.clustered {
            preset.clustered = clustered;
        }

        let mut target_key = key.clone();
        if let Some(new_name) = update.new_name.filter(|n| n != name) {
            validate_preset_name(&new_name).map_err(|e| preset_error(e.to_string()))?;
            let new_key = preset_key(&new_name);
            if new_key != key && self.presets.contains_key(&new_key) {
                return Err(preset_error(format!("Preset '{}' already exists", new_name)));
            }
            preset.name = new_name;
            target_key = new_key;
        }

        self.presets.remove(&key);
        self.presets.insert(target_key, preset.clone());
        self.persist()?;
        Ok(preset)
    }

    /// Returns false when no preset of that name exists.
    pub fn delete(&mut self, name: &str) -> Result<bool> {
        if self.presets.remove(&preset_key(name)).is_none() {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.get(&preset_key(name))
    }

    /// All presets sorted by display name, optionally filtered by view.
    pub fn list(&self, clustered: Option<bool>) -> Vec<&Preset> {
        let mut presets: Vec<&Preset> = self
            .presets
            .values()
            .filter(|p| clustered.map_or(true, |c| p.clustered == c))
            .collect();
        presets.sort_by(|a, b| a.name.cmp(&b.name));
        presets
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn export(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, &self.presets)
            .map_err(|e| preset_error(format!("Failed to export presets: {:#}", e)))
    }

    /// Merge presets from `path`. Existing keys are kept unless
    /// `overwrite` is set. Returns how many entries were written.
    pub fn import(&mut self, path: &Path, overwrite: bool) -> Result<usize> {
        let data: Map<String, Value> = read_json(path)
            .map_err(|e| preset_error(format!("Failed to read import file: {:#}", e)))?
            .ok_or_else(|| preset_error(format!("Import file not found: {}", path.display())))?;

        let mut imported = 0;
        for (key, preset) in decode_entries(data) {
            if self.presets.contains_key(&key) && !overwrite {
                debug!("Skipping existing preset '{}'", key);
                continue;
            }
            self.presets.insert(key, preset);
            imported += 1;
        }

        self.persist()?;
        Ok(imported)
    }

    /// Remove every preset, returning how many there were.
    pub fn clear_all(&mut self) -> Result<usize> {
        let count = self.presets.len();
        self.presets.clear();
        self.persist()?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn servers(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_open_creates_empty_file() {
        let dir = TempDir::new().unwrap();
        let store = PresetStore::open(dir.path()).unwrap();
        assert!(store.is_empty());
        let raw = fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw.trim(), "{}");
    }

    #[test]
    fn test_open_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(PRESETS_FILE_NAME), "[broken").unwrap();
        let err = PresetStore::open(dir.path()).err().unwrap();
        assert!(err.to_string().contains("Preset error"));
    }

    #[test]
    fn test_add_and_persist() {
        let dir = TempDir::new().unwrap();
        let mut store = PresetStore::open(dir.path()).unwrap();
        store.add("EU Set", servers(&["sto", "fra"]), false).unwrap();

        let raw: Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["EUSet"]["presetName"], "EU Set");
        assert_eq!(raw["EUSet"]["servers"][1], "fra");
        assert_eq!(raw["EUSet"]["clustered"], false);

        let reopened = PresetStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("EU Set").unwrap().servers, servers(&["sto", "fra"]));
        assert_eq!(reopened.get("EUSet").unwrap().name, "EU Set");
    }

    #[test]
    fn test_add_validation() {
        let dir = TempDir::new().unwrap();
        let mut store = PresetStore::open(dir.path()).unwrap();
        assert!(store.add("", servers(&["sto"]), false).is_err());
        assert!(store.add("bad-name", servers(&["sto"]), false).is_err());
        assert!(store.add("empty", vec![], false).is_err());

        store.add("My Set", servers(&["sto"]), false).unwrap();
        let err = store.add("MySet", servers(&["fra"]), false).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_update_fields_and_rename() {
        let dir = TempDir::new().unwrap();
        let mut store = PresetStore::open(dir.path()).unwrap();
        store.add("one", servers(&["sto"]), false).unwrap();
        store.add("two", servers(&["fra"]), false).unwrap();

        let updated = store
            .update(
                "one",
                PresetUpdate {
                    servers: Some(servers(&["ams", "lhr"])),
                    new_name: Some("uno".into()),
                    clustered: Some(true),
                },
            )
            .unwrap();
        assert_eq!(updated.name, "uno");
        assert!(updated.clustered);
        assert!(store.get("one").is_none());
        assert_eq!(store.get("uno").unwrap().servers.len(), 2);

        let collision = store.update(
            "uno",
            PresetUpdate {
                new_name: Some("two".into()),
                ..Default::default()
            },
        );
        assert!(collision.is_err());
        assert!(store.get("uno").is_some());
    }

    #[test]
    fn test_update_errors() {
        let dir = TempDir::new().unwrap();
        let mut store = PresetStore::open(dir.path()).unwrap();
        assert!(store.update("ghost", PresetUpdate::default()).is_err());

        store.add("one", servers(&["sto"]), false).unwrap();
        let empty = PresetUpdate {
            servers: Some(vec![]),
            ..Default::default()
        };
        assert!(store.update("one", empty).is_err());
        let invalid = PresetUpdate {
            new_name: Some("no/slash".into()),
            ..Default::default()
        };
        assert!(store.update("one", invalid).is_err());
    }

    #[test]
    fn test_delete_and_clear() {
        let dir = TempDir::new().unwrap();
        let mut store = PresetStore::open(dir.path()).unwrap();
        store.add("a", servers(&["sto"]), false).unwrap();
        store.add("b", servers(&["fra"]), true).unwrap();

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert_eq!(store.clear_all().unwrap(), 1);
        assert!(PresetStore::open(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_list_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        let mut store = PresetStore::open(dir.path()).unwrap();
        store.add("zeta", servers(&["sto"]), false).unwrap();
        store.add("Alpha", servers(&["fra"]), true).unwrap();
        store.add("beta", servers(&["ams"]), false).unwrap();

        let names: Vec<_> = store.list(None).iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "beta", "zeta"]);
        assert_eq!(store.list(Some(true)).len(), 1);
        assert_eq!(store.list(Some(false)).len(), 2);
    }

    #[test]
    fn test_export_import() {
        let src_dir = TempDir::new().unwrap();
        let mut src = PresetStore::open(src_dir.path()).unwrap();
        src.add("one", servers(&["sto"]), false).unwrap();
        src.add("two", servers(&["fra"]), false).unwrap();
        let export_path = src_dir.path().join("export.json");
        src.export(&export_path).unwrap();

        let dst_dir = TempDir::new().unwrap();
        let mut dst = PresetStore::open(dst_dir.path()).unwrap();
        dst.add("one", servers(&["lhr"]), false).unwrap();

        assert_eq!(dst.import(&export_path, false).unwrap(), 1);
        assert_eq!(dst.get("one").unwrap().servers, servers(&["lhr"]));

        assert_eq!(dst.import(&export_path, true).unwrap(), 2);
        assert_eq!(dst.get("one").unwrap().servers, servers(&["sto"]));
    }

    #[test]
    fn test_import_lenient_entries() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("in.json");
        fs::write(
            &file,
            r#"{"NoName": {"servers": ["sto"]}, "junk": 5, "badtype": {"servers": 3}}"#,
        )
        .unwrap();
        let mut store = PresetStore::open(dir.path()).unwrap();
        assert_eq!(store.import(&file, false).unwrap(), 1);
        let preset = store.get("NoName").unwrap();
        assert_eq!(preset.name, "NoName");
        assert!(!preset.clustered);
    }

    #[test]
    fn test_import_missing_file() {
        let dir = TempDir::new().unwrap();
        let mut store = PresetStore::open(dir.path()).unwrap();
        let err = store.import(&dir.path().join("nope.json"), false).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
