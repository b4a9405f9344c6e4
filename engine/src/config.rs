use std::net::SocketAddr;
use std::path::PathBuf;

// Runtime configuration.
//
// Everything comes from environment variables with hard defaults so a bare
// `playdeck-engine` in a folder next to `music/` just works:
//   PLAYDECK_MUSIC_DIR   root folder; each sub-folder is a playlist
//   PLAYDECK_STATE_PATH  persisted playlist order/settings (JSON)
//   PLAYDECK_BIND        listen address
//   PLAYDECK_FFPROBE     duration probe executable
//   PLAYDECK_UI_DIR      optional static UI served at `/`

const DEFAULT_MUSIC_DIR: &str = "./music";
const DEFAULT_STATE_PATH: &str = "./playlist_data.json";
const DEFAULT_BIND: &str = "0.0.0.0:5522";
const DEFAULT_FFPROBE: &str = "ffprobe";

#[derive(Debug, Clone)]
pub struct Config {
    pub music_dir: PathBuf,
    pub state_path: PathBuf,
    pub bind: SocketAddr,
    pub ffprobe: String,
    pub ui_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_raw = get("PLAYDECK_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = bind_raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid PLAYDECK_BIND ({bind_raw}): {e}"))?;

        Ok(Self {
            music_dir: PathBuf::from(get("PLAYDECK_MUSIC_DIR").unwrap_or_else(|| DEFAULT_MUSIC_DIR.into())),
            state_path: PathBuf::from(get("PLAYDECK_STATE_PATH").unwrap_or_else(|| DEFAULT_STATE_PATH.into())),
            bind,
            ffprobe: get("PLAYDECK_FFPROBE").unwrap_or_else(|| DEFAULT_FFPROBE.into()),
            ui_dir: get("PLAYDECK_UI_DIR").map(PathBuf::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.music_dir, PathBuf::from("./music"));
        assert_eq!(cfg.state_path, PathBuf::from("./playlist_data.json"));
        assert_eq!(cfg.bind.port(), 5522);
        assert_eq!(cfg.ffprobe, "ffprobe");
        assert!(cfg.ui_dir.is_none());
    }

    #[test]
    fn overrides_and_blank_values() {
        let cfg = Config::from_lookup(lookup(&[
            ("PLAYDECK_MUSIC_DIR", "/srv/music"),
            ("PLAYDECK_BIND", "127.0.0.1:8080"),
            ("PLAYDECK_UI_DIR", "   "),
        ]))
        .unwrap();
        assert_eq!(cfg.music_dir, PathBuf::from("/srv/music"));
        assert_eq!(cfg.bind.to_string(), "127.0.0.1:8080");
        assert!(cfg.ui_dir.is_none());
    }

    #[test]
    fn rejects_bad_bind_address() {
        let err = Config::from_lookup(lookup(&[("PLAYDECK_BIND", "not-an-addr")])).unwrap_err();
        assert!(err.to_string().contains("PLAYDECK_BIND"));
    }
}
