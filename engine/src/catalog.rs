use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use tracing::{info, warn};

use crate::error::{PlayerError, Result};
use crate::store::{LibraryData, PlaylistSettings, Store, TransitionMode};

/// File extensions (lowercase) treated as playable tracks.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["mp3", "ogg", "wav", "flac"];

/// Result of renaming a playlist folder on disk.
#[derive(Debug, Clone)]
pub struct PlaylistRename {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
}

/// Result of renaming a single track file on disk.
#[derive(Debug, Clone)]
pub struct SongRename {
    pub old_path: PathBuf,
    pub old_basename: String,
    pub new_path: PathBuf,
}

/// Folder-backed playlist catalog.
///
/// Every playlist is an immediate sub-folder of `root`. Display order and
/// per-playlist settings live in the persisted [`LibraryData`]; each scan
/// reconciles that data with what is actually on disk and only writes when
/// the reconciled result differs from what was stored.
pub struct Catalog {
    root: PathBuf,
    store: Store,
    data: LibraryData,
}

impl Catalog {
    pub fn open(root: impl Into<PathBuf>, mut store: Store) -> Self {
        let root = absolutize(root.into());
        let data = store.load();
        Self { root, store, data }
    }

    pub fn data(&self) -> &LibraryData {
        &self.data
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn settings(&self, playlist: &str) -> Option<&PlaylistSettings> {
        self.data.playlist_details.get(playlist)
    }

    fn save(&mut self) {
        self.store.save(&self.data);
    }

    /// Playlists in persisted order, restricted to folders that still exist,
    /// with newly discovered folders appended in sorted order.
    pub fn list_playlists(&mut self) -> Vec<String> {
        let on_disk = match scan_playlist_dirs(&self.root) {
            Ok(found) => found,
            Err(e) => {
                warn!("cannot read music directory {}: {e}", self.root.display());
                return Vec::new();
            }
        };

        let mut seen = HashSet::with_capacity(on_disk.len());
        let mut order: Vec<String> = self
            .data
            .playlist_order
            .iter()
            .filter(|name| on_disk.contains(*name) && seen.insert((*name).clone()))
            .cloned()
            .collect();

        let mut fresh: Vec<String> = on_disk.iter().filter(|name| !seen.contains(*name)).cloned().collect();
        fresh.sort();
        if !fresh.is_empty() {
            info!("found new playlists {fresh:?}; appending to order");
        }
        order.extend(fresh);

        let mut changed = order != self.data.playlist_order;

        for name in &order {
            if !self.data.playlist_details.contains_key(name) {
                self.data.playlist_details.insert(name.clone(), PlaylistSettings::default());
                changed = true;
            }
        }
        let before = self.data.playlist_details.len();
        self.data.playlist_details.retain(|name, _| on_disk.contains(name));
        changed |= self.data.playlist_details.len() != before;

        if changed {
            self.data.playlist_order = order.clone();
            self.save();
        }
        order
    }

    /// Supported files of one playlist, saved order first, new files appended
    /// in sorted order. Persists only when the reconciled order changed.
    pub fn ordered_tracks(&mut self, playlist: &str) -> Result<Vec<PathBuf>> {
        let dir = self.existing_playlist_dir(playlist)?;
        let actual = scan_audio_files(&dir)?;

        let saved = self
            .data
            .playlist_details
            .get(playlist)
            .map(|d| d.song_order.clone())
            .unwrap_or_default();

        let mut seen = HashSet::with_capacity(actual.len());
        let mut ordered: Vec<PathBuf> = saved
            .iter()
            .filter(|p| actual.contains(*p) && seen.insert((*p).clone()))
            .cloned()
            .collect();
        let mut fresh: Vec<PathBuf> = actual.iter().filter(|p| !seen.contains(*p)).cloned().collect();
        fresh.sort();
        ordered.extend(fresh);

        if ordered != saved {
            info!("updating song order for playlist '{playlist}'");
            self.data
                .playlist_details
                .entry(playlist.to_string())
                .or_default()
                .song_order = ordered.clone();
            self.save();
        }
        Ok(ordered)
    }

    /// The playlist after `current` in catalog order, wrapping around. With a
    /// single playlist this is `current` itself.
    pub fn next_playlist_after(&mut self, current: &str) -> Result<String> {
        let all = self.list_playlists();
        if all.is_empty() {
            return Err(PlayerError::Validation("No playlists available".into()));
        }
        let idx = all
            .iter()
            .position(|name| name == current)
            .ok_or_else(|| PlayerError::NotFound(format!("Current playlist '{current}' not found in playlist list")))?;
        Ok(all[(idx + 1) % all.len()].clone())
    }

    /// Replaces the display order. Unknown names are dropped, duplicates are
    /// rejected and playlists missing from `requested` keep their relative
    /// order at the end.
    pub fn reorder_playlists(&mut self, requested: Vec<String>) -> Result<Vec<String>> {
        let current = self.list_playlists();
        let valid: Vec<String> = requested.into_iter().filter(|name| current.contains(name)).collect();

        let unique: HashSet<&String> = valid.iter().collect();
        if unique.len() != valid.len() {
            return Err(PlayerError::Validation("New order contains duplicate playlist names".into()));
        }

        let missing: Vec<String> = current.iter().filter(|name| !unique.contains(name)).cloned().collect();
        let mut order = valid;
        order.extend(missing);

        info!("reordered playlists: {order:?}");
        self.data.playlist_order = order.clone();
        self.save();
        Ok(order)
    }

    pub fn set_song_order(&mut self, playlist: &str, order: Vec<PathBuf>) -> Result<()> {
        self.ensure_known(playlist)?;
        let unique: HashSet<&PathBuf> = order.iter().collect();
        if unique.len() != order.len() {
            return Err(PlayerError::Validation("New song order contains duplicates".into()));
        }
        self.settings_mut(playlist).song_order = order;
        self.save();
        Ok(())
    }

    pub fn set_default_volume(&mut self, playlist: &str, volume: Option<i64>) -> Result<Option<u8>> {
        let volume = match volume {
            None => None,
            Some(v) if (0..=100).contains(&v) => Some(v as u8),
            Some(_) => return Err(PlayerError::Validation("Invalid volume value (must be 0-100)".into())),
        };
        self.ensure_known(playlist)?;
        info!(
            "setting default volume for '{playlist}' to {}",
            volume.map_or("unset".to_string(), |v| v.to_string())
        );
        self.settings_mut(playlist).default_volume = volume;
        self.save();
        Ok(volume)
    }

    pub fn set_auto_advance(&mut self, playlist: &str, enabled: bool) -> Result<()> {
        self.ensure_known(playlist)?;
        info!("setting auto-advance for '{playlist}' to {enabled}");
        self.settings_mut(playlist).auto_advance = enabled;
        self.save();
        Ok(())
    }

    pub fn set_loop(&mut self, playlist: &str, enabled: bool) -> Result<()> {
        self.ensure_known(playlist)?;
        info!("setting loop for '{playlist}' to {enabled}");
        self.settings_mut(playlist).loop_playlist = enabled;
        self.save();
        Ok(())
    }

    pub fn set_transition_mode(&mut self, playlist: &str, mode: &str) -> Result<TransitionMode> {
        let mode: TransitionMode = mode.parse().map_err(PlayerError::Validation)?;
        self.ensure_known(playlist)?;
        info!("setting transition mode for '{playlist}' to '{mode}'");
        self.settings_mut(playlist).transition_mode = mode;
        self.save();
        Ok(mode)
    }

    /// Renames a playlist folder and rewrites every stored reference to it.
    /// The display position of the playlist is unchanged.
    pub fn rename_playlist(&mut self, old_name: &str, new_name: &str) -> Result<PlaylistRename> {
        if !is_valid_name(new_name) {
            return Err(PlayerError::Validation("Invalid new playlist name".into()));
        }
        let old_path = self.existing_playlist_dir(old_name)?;
        let new_path = self.root.join(new_name);
        if new_path.exists() {
            return Err(PlayerError::Validation(format!("A playlist named {new_name} already exists")));
        }

        std::fs::rename(&old_path, &new_path)?;
        info!("renamed playlist folder '{old_name}' -> '{new_name}'");

        if let Some(slot) = self.data.playlist_order.iter_mut().find(|name| name.as_str() == old_name) {
            *slot = new_name.to_string();
        }
        if let Some(mut details) = self.data.playlist_details.remove(old_name) {
            for path in details.song_order.iter_mut() {
                *path = reprefix(path, &old_path, &new_path);
            }
            self.data.playlist_details.insert(new_name.to_string(), details);
        }
        self.save();

        Ok(PlaylistRename { old_path, new_path })
    }

    /// Renames one track file. `old_name` may be a bare file name (resolved
    /// inside the playlist folder) or a full path.
    pub fn rename_song(&mut self, playlist: &str, old_name: &str, new_name: &str) -> Result<SongRename> {
        if !is_valid_name(new_name) {
            return Err(PlayerError::Validation("Invalid new song name".into()));
        }
        if !is_valid_name(playlist) {
            return Err(PlayerError::NotFound(format!("Playlist folder not found: {playlist}")));
        }

        let dir = self.root.join(playlist);
        let candidate = Path::new(old_name);
        let (old_path, old_basename) = if candidate.components().count() > 1 {
            let base = candidate
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            (candidate.to_path_buf(), base)
        } else {
            (dir.join(old_name), old_name.to_string())
        };
        let new_path = dir.join(new_name);

        if !old_path.is_file() {
            return Err(PlayerError::NotFound(format!("Song file not found: {old_basename}")));
        }
        if new_path.exists() {
            return Err(PlayerError::Validation(format!(
                "A song named {new_name} already exists in this playlist"
            )));
        }

        std::fs::rename(&old_path, &new_path)?;
        info!("renamed song '{old_basename}' -> '{new_name}' in playlist '{playlist}'");

        let rename = SongRename { old_path, old_basename, new_path };
        if let Some(details) = self.data.playlist_details.get_mut(playlist) {
            if let Some(slot) = details.song_order.iter_mut().find(|p| rename.matches(p)) {
                *slot = rename.new_path.clone();
            }
        }
        self.save();
        Ok(rename)
    }

    /// Ensures the playlist has a settings entry, creating one if the folder
    /// exists on disk but has not been reconciled yet.
    fn ensure_known(&mut self, playlist: &str) -> Result<()> {
        if self.data.playlist_details.contains_key(playlist) {
            return Ok(());
        }
        if self.list_playlists().iter().any(|name| name == playlist) {
            return Ok(());
        }
        Err(PlayerError::NotFound(format!("Playlist \"{playlist}\" not found")))
    }

    fn settings_mut(&mut self, playlist: &str) -> &mut PlaylistSettings {
        self.data.playlist_details.entry(playlist.to_string()).or_default()
    }

    fn existing_playlist_dir(&self, playlist: &str) -> Result<PathBuf> {
        let dir = self.root.join(playlist);
        if !is_valid_name(playlist) || !dir.is_dir() {
            return Err(PlayerError::NotFound(format!("Playlist folder not found: {playlist}")));
        }
        Ok(dir)
    }
}

impl SongRename {
    /// True for the stored path this rename applies to: the exact old path
    /// or any path with the same file name.
    pub fn matches(&self, path: &Path) -> bool {
        path == self.old_path
            || path
                .file_name()
                .is_some_and(|name| name.to_string_lossy() == self.old_basename)
    }
}

/// Moves `path` from under `old_root` to under `new_root`; other paths are
/// returned unchanged.
pub fn reprefix(path: &Path, old_root: &Path, new_root: &Path) -> PathBuf {
    match path.strip_prefix(old_root) {
        Ok(rest) => new_root.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// A single, plain path segment: not empty, no separators, not `.`/`..`.
fn is_valid_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && matches!(Path::new(name).components().next(), Some(Component::Normal(_)))
}

fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

fn scan_playlist_dirs(root: &Path) -> std::io::Result<HashSet<String>> {
    let mut out = HashSet::new();
    for ent in std::fs::read_dir(root)? {
        let ent = ent?;
        if !ent.path().is_dir() {
            continue;
        }
        // Non UTF-8 folder names cannot round-trip through the JSON state.
        if let Some(name) = ent.file_name().to_str() {
            out.insert(name.to_string());
        }
    }
    Ok(out)
}

fn scan_audio_files(dir: &Path) -> Result<HashSet<PathBuf>> {
    let mut out = HashSet::new();
    for ent in std::fs::read_dir(dir)? {
        let path = ent?.path();
        if !path.is_file() {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let ext = ext.to_ascii_lowercase();
        if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            out.insert(path);
        }
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) struct Fixture {
        pub dir: TempDir,
    }

    impl Fixture {
        pub fn new() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::create_dir(dir.path().join("music")).unwrap();
            Self { dir }
        }

        pub fn music(&self) -> PathBuf {
            self.dir.path().join("music")
        }

        pub fn state_path(&self) -> PathBuf {
            self.dir.path().join("state.json")
        }

        pub fn add_playlist(&self, name: &str, files: &[&str]) -> Vec<PathBuf> {
            let dir = self.music().join(name);
            std::fs::create_dir_all(&dir).unwrap();
            files
                .iter()
                .map(|f| {
                    let p = dir.join(f);
                    std::fs::write(&p, b"").unwrap();
                    p
                })
                .collect()
        }

        pub fn write_state(&self, data: &LibraryData) {
            std::fs::write(self.state_path(), serde_json::to_string(data).unwrap()).unwrap();
        }

        pub fn catalog(&self) -> Catalog {
            Catalog::open(self.music(), Store::new(self.state_path()))
        }
    }

    #[test]
    fn keeps_saved_order_and_appends_new_sorted() {
        let fx = Fixture::new();
        for name in ["A", "B", "C"] {
            fx.add_playlist(name, &[]);
        }
        fx.write_state(&LibraryData { playlist_order: vec!["C".into(), "A".into()], ..Default::default() });

        let mut cat = fx.catalog();
        assert_eq!(cat.list_playlists(), vec!["C", "A", "B"]);
        assert_eq!(cat.store().writes(), 1);
        assert_eq!(cat.data().playlist_order, vec!["C", "A", "B"]);
        assert!(cat.settings("B").is_some());
    }

    #[test]
    fn playlist_reconciliation_is_idempotent() {
        let fx = Fixture::new();
        fx.add_playlist("Ceremony", &[]);
        fx.add_playlist("Dinner", &[]);

        let mut cat = fx.catalog();
        let first = cat.list_playlists();
        let writes = cat.store().writes();
        let second = cat.list_playlists();
        assert_eq!(first, second);
        assert_eq!(cat.store().writes(), writes);
    }

    #[test]
    fn orphaned_playlists_are_dropped() {
        let fx = Fixture::new();
        fx.add_playlist("A", &[]);
        let mut data = LibraryData { playlist_order: vec!["Gone".into(), "A".into()], ..Default::default() };
        data.playlist_details.insert("Gone".into(), PlaylistSettings::default());
        fx.write_state(&data);

        let mut cat = fx.catalog();
        assert_eq!(cat.list_playlists(), vec!["A"]);
        assert!(cat.settings("Gone").is_none());
        assert_eq!(cat.store().writes(), 1);
    }

    #[test]
    fn missing_music_dir_lists_nothing_and_keeps_state() {
        let fx = Fixture::new();
        fx.write_state(&LibraryData { playlist_order: vec!["A".into()], ..Default::default() });
        let mut cat = Catalog::open(fx.dir.path().join("nope"), Store::new(fx.state_path()));
        assert!(cat.list_playlists().is_empty());
        assert_eq!(cat.data().playlist_order, vec!["A"]);
        assert_eq!(cat.store().writes(), 0);
    }

    #[test]
    fn discovers_supported_tracks_sorted() {
        let fx = Fixture::new();
        let files = fx.add_playlist("Hits", &["song1.mp3", "song3.ogg", "song2.wav", "other.txt", "LOUD.FLAC"]);
        let mut cat = fx.catalog();

        let tracks = cat.ordered_tracks("Hits").unwrap();
        assert_eq!(tracks, vec![files[4].clone(), files[0].clone(), files[2].clone(), files[1].clone()]);
        assert_eq!(cat.settings("Hits").unwrap().song_order, tracks);
    }

    #[test]
    fn saved_track_order_wins_and_new_files_append() {
        let fx = Fixture::new();
        let files = fx.add_playlist("Hits", &["song1.mp3", "song2.wav", "song3.ogg"]);
        let mut data = LibraryData { playlist_order: vec!["Hits".into()], ..Default::default() };
        data.playlist_details.insert(
            "Hits".into(),
            PlaylistSettings { song_order: vec![files[2].clone(), files[0].clone()], ..Default::default() },
        );
        fx.write_state(&data);

        let mut cat = fx.catalog();
        let tracks = cat.ordered_tracks("Hits").unwrap();
        assert_eq!(tracks, vec![files[2].clone(), files[0].clone(), files[1].clone()]);

        let writes = cat.store().writes();
        assert_eq!(cat.ordered_tracks("Hits").unwrap(), tracks);
        assert_eq!(cat.store().writes(), writes);
    }

    #[test]
    fn deleted_tracks_leave_the_order() {
        let fx = Fixture::new();
        let files = fx.add_playlist("Hits", &["a.mp3", "b.mp3"]);
        let mut cat = fx.catalog();
        cat.ordered_tracks("Hits").unwrap();

        std::fs::remove_file(&files[0]).unwrap();
        assert_eq!(cat.ordered_tracks("Hits").unwrap(), vec![files[1].clone()]);
    }

    #[test]
    fn missing_or_escaping_playlist_is_not_found() {
        let fx = Fixture::new();
        let mut cat = fx.catalog();
        assert!(matches!(cat.ordered_tracks("Nope"), Err(PlayerError::NotFound(_))));
        assert!(matches!(cat.ordered_tracks(".."), Err(PlayerError::NotFound(_))));
    }

    #[test]
    fn reorder_rejects_duplicates_and_appends_missing() {
        let fx = Fixture::new();
        for name in ["A", "B", "C"] {
            fx.add_playlist(name, &[]);
        }
        let mut cat = fx.catalog();
        cat.list_playlists();

        let err = cat.reorder_playlists(vec!["B".into(), "B".into()]).unwrap_err();
        assert!(matches!(err, PlayerError::Validation(_)));

        let order = cat.reorder_playlists(vec!["C".into(), "Unknown".into(), "A".into()]).unwrap();
        assert_eq!(order, vec!["C", "A", "B"]);
        assert_eq!(cat.list_playlists(), vec!["C", "A", "B"]);
    }

    #[test]
    fn settings_for_unreconciled_playlist_are_created() {
        let fx = Fixture::new();
        fx.add_playlist("Party", &[]);
        let mut cat = fx.catalog();

        assert_eq!(cat.set_transition_mode("Party", "complete").unwrap(), TransitionMode::Complete);
        assert!(matches!(cat.set_transition_mode("Party", "warp"), Err(PlayerError::Validation(_))));
        assert!(matches!(cat.set_loop("Ghost", true), Err(PlayerError::NotFound(_))));
        assert!(matches!(cat.set_default_volume("Party", Some(101)), Err(PlayerError::Validation(_))));
        assert_eq!(cat.set_default_volume("Party", Some(35)).unwrap(), Some(35));
        assert_eq!(cat.settings("Party").unwrap().default_volume, Some(35));
    }

    #[test]
    fn rename_playlist_rewrites_paths_in_place() {
        let fx = Fixture::new();
        fx.add_playlist("A", &[]);
        fx.add_playlist("Old", &["1.mp3", "2.mp3"]);
        fx.add_playlist("Z", &[]);
        let mut cat = fx.catalog();
        cat.list_playlists();
        let before = cat.ordered_tracks("Old").unwrap();
        cat.reorder_playlists(vec!["Z".into(), "Old".into(), "A".into()]).unwrap();

        let renamed = cat.rename_playlist("Old", "New").unwrap();
        assert_eq!(renamed.new_path, fx.music().join("New"));
        assert_eq!(cat.data().playlist_order, vec!["Z", "New", "A"]);
        assert!(cat.settings("Old").is_none());

        let after = &cat.settings("New").unwrap().song_order;
        let expected: Vec<PathBuf> = before.iter().map(|p| fx.music().join("New").join(p.file_name().unwrap())).collect();
        assert_eq!(after, &expected);
        assert_eq!(cat.ordered_tracks("New").unwrap(), expected);
    }

    #[test]
    fn rename_playlist_validation() {
        let fx = Fixture::new();
        fx.add_playlist("A", &[]);
        fx.add_playlist("B", &[]);
        let mut cat = fx.catalog();
        assert!(matches!(cat.rename_playlist("A", "x/y"), Err(PlayerError::Validation(_))));
        assert!(matches!(cat.rename_playlist("A", "  "), Err(PlayerError::Validation(_))));
        assert!(matches!(cat.rename_playlist("A", "B"), Err(PlayerError::Validation(_))));
        assert!(matches!(cat.rename_playlist("Nope", "C"), Err(PlayerError::NotFound(_))));
    }

    #[test]
    fn rename_song_by_basename_keeps_position() {
        let fx = Fixture::new();
        let files = fx.add_playlist("Hits", &["a.mp3", "b.mp3", "c.mp3"]);
        let mut cat = fx.catalog();
        cat.ordered_tracks("Hits").unwrap();

        let rename = cat.rename_song("Hits", "b.mp3", "bee.mp3").unwrap();
        assert_eq!(rename.old_path, files[1]);
        let order = &cat.settings("Hits").unwrap().song_order;
        assert_eq!(order[1], fx.music().join("Hits").join("bee.mp3"));
        assert!(!files[1].exists());

        assert!(matches!(cat.rename_song("Hits", "zzz.mp3", "y.mp3"), Err(PlayerError::NotFound(_))));
        assert!(matches!(cat.rename_song("Hits", "a.mp3", "c.mp3"), Err(PlayerError::Validation(_))));
        assert!(matches!(cat.rename_song("Hits", "a.mp3", "../x.mp3"), Err(PlayerError::Validation(_))));
    }

    #[test]
    fn next_playlist_wraps_even_for_a_single_playlist() {
        let fx = Fixture::new();
        fx.add_playlist("Only", &[]);
        let mut cat = fx.catalog();
        assert_eq!(cat.next_playlist_after("Only").unwrap(), "Only");

        fx.add_playlist("Second", &[]);
        assert_eq!(cat.next_playlist_after("Only").unwrap(), "Second");
        assert_eq!(cat.next_playlist_after("Second").unwrap(), "Only");
    }

    #[test]
    fn reprefix_only_touches_paths_under_the_old_root() {
        let old = Path::new("/m/A");
        let new = Path::new("/m/B");
        assert_eq!(reprefix(Path::new("/m/A/x.mp3"), old, new), PathBuf::from("/m/B/x.mp3"));
        assert_eq!(reprefix(Path::new("/m/AB/x.mp3"), old, new), PathBuf::from("/m/AB/x.mp3"));
    }
}
