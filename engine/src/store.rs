use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{info, warn};

// --- Persistence (JSON) ---------------------------------------------------
//
// One small file holds the playlist display order and per-playlist settings:
//
//   { "playlist_order": [...],
//     "playlist_details": { "<name>": { "song_order": [...], "default_volume": null,
//                                        "auto_advance": false, "loop": false,
//                                        "transition_mode": "fade" } } }
//
// Missing keys take their defaults once, here, at load time. A value of the
// wrong type falls back to its default without taking its neighbours with it;
// only a top level that is not an object resets the file. Every write goes
// to a sibling temp file first and is renamed over the target so a crash never
// leaves a half-written file behind.

/// How playback moves on when the operator asks for the next playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionMode {
    /// Fade the current track out, then start the next playlist.
    #[default]
    Fade,
    /// Let the current track finish, then start the next playlist.
    Complete,
    /// Let the current track finish, then stop.
    Stop,
}

impl TransitionMode {
    pub const ALL: [TransitionMode; 3] = [TransitionMode::Fade, TransitionMode::Complete, TransitionMode::Stop];

    pub fn as_str(self) -> &'static str {
        match self {
            TransitionMode::Fade => "fade",
            TransitionMode::Complete => "complete",
            TransitionMode::Stop => "stop",
        }
    }
}

impl fmt::Display for TransitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransitionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransitionMode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = TransitionMode::ALL.iter().map(|m| m.as_str()).collect();
                format!("Invalid transition mode. Must be one of: {}", valid.join(", "))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistSettings {
    #[serde(deserialize_with = "or_default")]
    pub song_order: Vec<PathBuf>,
    /// Percent, 0-100. `None` keeps whatever volume is active.
    #[serde(deserialize_with = "percent_or_none")]
    pub default_volume: Option<u8>,
    #[serde(deserialize_with = "or_default")]
    pub auto_advance: bool,
    #[serde(rename = "loop", deserialize_with = "or_default")]
    pub loop_playlist: bool,
    #[serde(deserialize_with = "or_default")]
    pub transition_mode: TransitionMode,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryData {
    #[serde(deserialize_with = "string_items")]
    pub playlist_order: Vec<String>,
    #[serde(deserialize_with = "settings_by_name")]
    pub playlist_details: BTreeMap<String, PlaylistSettings>,
}

fn or_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(de)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn percent_or_none<'de, D>(de: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(de)?;
    Ok(value.as_u64().and_then(|v| u8::try_from(v).ok()).filter(|v| *v <= 100))
}

fn string_items<'de, D>(de: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match Value::deserialize(de)? {
        Value::Array(items) => items,
        _ => return Ok(Vec::new()),
    };
    Ok(items
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        })
        .collect())
}

fn settings_by_name<'de, D>(de: D) -> Result<BTreeMap<String, PlaylistSettings>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = match Value::deserialize(de)? {
        Value::Object(entries) => entries,
        _ => return Ok(BTreeMap::new()),
    };
    Ok(entries
        .into_iter()
        .map(|(name, raw)| {
            let settings = serde_json::from_value(raw).unwrap_or_else(|e| {
                warn!("settings for '{name}' unreadable ({e}); using defaults");
                PlaylistSettings::default()
            });
            (name, settings)
        })
        .collect())
}

pub struct Store {
    path: PathBuf,
    writes: u64,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), writes: 0 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of successful writes since this store was opened.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Loads the persisted state.
    ///
    /// A missing file yields the defaults without touching disk. An unreadable
    /// file, invalid JSON or a non-object top level is replaced by the default
    /// structure. Bad values inside an object only lose themselves.
    pub fn load(&mut self) -> LibraryData {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("{} not found; it will be created on first change", self.path.display());
                return LibraryData::default();
            }
            Err(e) => {
                warn!("failed to read {}: {e}; using defaults", self.path.display());
                let data = LibraryData::default();
                self.save(&data);
                return data;
            }
        };

        let parsed = match serde_json::from_str::<Value>(&raw) {
            Ok(value @ Value::Object(_)) => serde_json::from_value::<LibraryData>(value),
            Ok(_) => Err(serde::de::Error::custom("top level is not an object")),
            Err(e) => Err(e),
        };
        match parsed {
            Ok(data) => data,
            Err(e) => {
                warn!("invalid format in {}: {e}; using defaults", self.path.display());
                let data = LibraryData::default();
                self.save(&data);
                data
            }
        }
    }

    /// Atomically rewrites the state file. Failures are logged, never returned:
    /// losing durability does not invalidate the in-memory session.
    pub fn save(&mut self, data: &LibraryData) -> bool {
        match self.write_atomic(data) {
            Ok(()) => {
                self.writes += 1;
                true
            }
            Err(e) => {
                warn!("failed to persist playlist data to {}: {e}", self.path.display());
                false
            }
        }
    }

    fn write_atomic(&self, data: &LibraryData) -> anyhow::Result<()> {
        let body = serde_json::to_vec_pretty(data)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_keys_take_defaults() {
        let raw = r#"{
            "playlist_order": ["A"],
            "playlist_details": { "A": { "song_order": ["/m/A/1.mp3"], "default_volume": 40 } }
        }"#;
        let data: LibraryData = serde_json::from_str(raw).unwrap();
        let a = &data.playlist_details["A"];
        assert_eq!(a.default_volume, Some(40));
        assert!(!a.auto_advance);
        assert!(!a.loop_playlist);
        assert_eq!(a.transition_mode, TransitionMode::Fade);

        let empty: LibraryData = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, LibraryData::default());
    }

    #[test]
    fn settings_serialize_with_wire_names() {
        let s = PlaylistSettings {
            loop_playlist: true,
            transition_mode: TransitionMode::Complete,
            ..Default::default()
        };
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["loop"], true);
        assert_eq!(v["transition_mode"], "complete");
        assert!(v["default_volume"].is_null());
    }

    #[test]
    fn transition_mode_parsing() {
        assert_eq!("stop".parse::<TransitionMode>().unwrap(), TransitionMode::Stop);
        let err = "crossfade".parse::<TransitionMode>().unwrap_err();
        assert!(err.contains("fade, complete, stop"));
    }

    #[test]
    fn load_missing_file_does_not_write() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::new(dir.path().join("state.json"));
        assert_eq!(store.load(), LibraryData::default());
        assert_eq!(store.writes(), 0);
        assert!(!store.path().exists());
    }

    #[test]
    fn corrupt_file_is_replaced_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let mut store = Store::new(&path);
        assert_eq!(store.load(), LibraryData::default());
        assert_eq!(store.writes(), 1);
        let reread: LibraryData = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reread, LibraryData::default());
    }

    #[test]
    fn one_bad_entry_keeps_the_rest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let raw = r#"{
            "playlist_order": ["A", 7, "B"],
            "playlist_details": {
                "A": { "song_order": ["/m/A/1.mp3"], "loop": true },
                "B": { "default_volume": -1, "loop": null, "auto_advance": true,
                       "transition_mode": "crossfade" },
                "C": { "default_volume": 150, "song_order": "oops" },
                "D": "not an object"
            }
        }"#;
        std::fs::write(&path, raw).unwrap();

        let mut store = Store::new(&path);
        let data = store.load();
        assert_eq!(data.playlist_order, vec!["A".to_string(), "B".to_string()]);

        let a = &data.playlist_details["A"];
        assert_eq!(a.song_order, vec![PathBuf::from("/m/A/1.mp3")]);
        assert!(a.loop_playlist);

        let b = &data.playlist_details["B"];
        assert_eq!(b.default_volume, None);
        assert!(!b.loop_playlist);
        assert!(b.auto_advance);
        assert_eq!(b.transition_mode, TransitionMode::Fade);

        let c = &data.playlist_details["C"];
        assert_eq!(c.default_volume, None);
        assert!(c.song_order.is_empty());

        assert_eq!(data.playlist_details["D"], PlaylistSettings::default());

        assert_eq!(store.writes(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), raw);
    }

    #[test]
    fn non_object_top_level_is_reset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"[["A"], {}]"#).unwrap();

        let mut store = Store::new(&path);
        assert_eq!(store.load(), LibraryData::default());
        assert_eq!(store.writes(), 1);
    }

    #[test]
    fn save_then_load_keeps_data_and_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let mut data = LibraryData::default();
        data.playlist_order = vec!["B".into(), "A".into()];
        data.playlist_details.insert("A".into(), PlaylistSettings { default_volume: Some(70), ..Default::default() });

        let mut store = Store::new(&path);
        assert!(store.save(&data));
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());

        let mut again = Store::new(&path);
        assert_eq!(again.load(), data);
    }
}
