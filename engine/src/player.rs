//! Playback orchestrator.
//!
//! The [`Player`] owns the one playback [`Session`] and is the only thing that
//! drives the [`AudioEngine`]. The engine never pushes "track finished" to us:
//! natural track ends and fade completions are discovered inside
//! [`Player::poll`], so every state change that follows from "the audio ran
//! out" happens there. Clients that need tighter reaction times must poll more
//! often.
//!
//! Poll order: watchdog, engine events, natural-end detection, snapshot.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audio::{AudioEngine, EngineError, EngineEvent};
use crate::catalog::{reprefix, Catalog};
use crate::duration::{runtime_of, DurationProbe};
use crate::error::{PlayerError, Result};
use crate::store::{PlaylistSettings, TransitionMode};

/// Length of the fade used by [`TransitionMode::Fade`].
pub const FADE_DURATION: Duration = Duration::from_secs(5);
/// A gap between polls longer than this is treated as a stalled engine.
pub const WATCHDOG_STALL: Duration = Duration::from_secs(5);
/// Seeks past the end land this far before it.
const SEEK_END_MARGIN: f64 = 0.1;

/// A playlist change queued for a later poll.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PendingTransition {
    #[default]
    None,
    /// Fading out; start the target when the fade completes.
    Fade(String),
    /// Start the target when the current track ends.
    SwitchOnComplete(String),
    /// Stop when the current track ends.
    StopOnComplete,
}

impl PendingTransition {
    pub fn kind(&self) -> &'static str {
        match self {
            PendingTransition::None => "none",
            PendingTransition::Fade(_) => "fade",
            PendingTransition::SwitchOnComplete(_) => "complete",
            PendingTransition::StopOnComplete => "stop",
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            PendingTransition::Fade(t) | PendingTransition::SwitchOnComplete(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
    FadingOut,
    AwaitingCompletion,
}

/// Everything that describes "what is playing right now".
#[derive(Debug, Default)]
pub struct Session {
    playlist: Option<String>,
    tracks: Vec<PathBuf>,
    index: Option<usize>,
    paused: bool,
    pending_seek: Option<f64>,
    pending: PendingTransition,
    track_duration: f64,
}

impl Session {
    pub fn playlist(&self) -> Option<&str> {
        self.playlist.as_deref()
    }

    pub fn tracks(&self) -> &[PathBuf] {
        &self.tracks
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn current_track(&self) -> Option<&PathBuf> {
        self.index.and_then(|i| self.tracks.get(i))
    }

    pub fn pending(&self) -> &PendingTransition {
        &self.pending
    }

    pub fn pending_seek(&self) -> Option<f64> {
        self.pending_seek
    }

    fn is_live(&self, playlist: &str) -> bool {
        self.playlist.as_deref() == Some(playlist)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PauseOutcome {
    Paused,
    Resumed,
    /// Resumed by replaying from a seek stored while paused.
    ResumedAt(f64),
    /// The engine refused to resume; the track was restarted.
    Reloaded,
    /// Nothing to pause or resume.
    Idle,
}

impl PauseOutcome {
    pub fn message(&self) -> String {
        match self {
            PauseOutcome::Paused => "Playback paused".into(),
            PauseOutcome::Resumed => "Playback resumed".into(),
            PauseOutcome::ResumedAt(pos) => format!("Playback resumed at position {pos:.2}s"),
            PauseOutcome::Reloaded => "Playback resumed (reloaded track)".into(),
            PauseOutcome::Idle => "Cannot pause/resume: Music not playing or stopped.".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NextOutcome {
    NextTrack(usize),
    Looped,
    AdvancedTo(String),
    Stopped,
}

impl NextOutcome {
    pub fn message(&self) -> String {
        match self {
            NextOutcome::NextTrack(_) => "Skipped to next track".into(),
            NextOutcome::Looped => "Looped to start of playlist".into(),
            NextOutcome::AdvancedTo(name) => format!("Auto-advanced to playlist: {name}"),
            NextOutcome::Stopped => "End of playlist reached, playback stopped".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeekOutcome {
    /// Paused: applied on the next resume.
    Stored(f64),
    Applied(f64),
}

impl SeekOutcome {
    pub fn message(&self) -> String {
        match self {
            SeekOutcome::Stored(pos) => format!("Seek to {pos:.2}s stored (will apply on resume)"),
            SeekOutcome::Applied(pos) => format!("Seeked to {pos:.2}s"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Fading { target: String },
    SwitchedNow { target: String },
    AfterCurrent { target: String },
    StopAfterCurrent,
}

impl TransitionOutcome {
    pub fn target(&self) -> Option<&str> {
        match self {
            TransitionOutcome::Fading { target }
            | TransitionOutcome::SwitchedNow { target }
            | TransitionOutcome::AfterCurrent { target } => Some(target),
            TransitionOutcome::StopAfterCurrent => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            TransitionOutcome::Fading { target } => format!("Fading out to {target}"),
            TransitionOutcome::SwitchedNow { target } => format!("Transitioned to {target}"),
            TransitionOutcome::AfterCurrent { target } => format!("Will transition to {target}"),
            TransitionOutcome::StopAfterCurrent => "Will stop playback after current song completes".into(),
        }
    }
}

/// A playlist runtime to recompute. Probing runs one subprocess per track, so
/// callers measure it without holding the player.
pub struct RuntimeRefresh {
    playlist: String,
    tracks: Vec<PathBuf>,
    probe: Arc<dyn DurationProbe>,
}

impl RuntimeRefresh {
    pub fn playlist(&self) -> &str {
        &self.playlist
    }

    /// Blocking.
    pub fn measure(self) -> (String, f64) {
        let minutes = runtime_of(self.probe.as_ref(), &self.tracks);
        (self.playlist, minutes)
    }
}

// --- Status snapshot -----------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Stopped,
    Playing,
    Paused,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaylistStatus {
    #[serde(flatten)]
    pub settings: PlaylistSettings,
    pub runtime_minutes: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingStatus {
    pub kind: &'static str,
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: StatusState,
    pub current_playlist: Option<String>,
    pub current_song: Option<String>,
    pub volume: u8,
    pub playlists: Vec<String>,
    pub playlist_details: BTreeMap<String, PlaylistStatus>,
    pub current_playlist_songs: Vec<String>,
    pub current_position_sec: f64,
    pub song_duration_sec: f64,
    pub pending_transition: PendingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn percent_to_gain(percent: u8) -> f32 {
    f32::from(percent) / 100.0
}

// --- Player --------------------------------------------------------------

pub struct Player {
    engine: Box<dyn AudioEngine>,
    catalog: Catalog,
    probe: Arc<dyn DurationProbe>,
    runtimes: HashMap<String, f64>,
    session: Session,
    last_poll: Instant,
}

impl Player {
    pub fn new(
        engine: Box<dyn AudioEngine>,
        catalog: Catalog,
        probe: Arc<dyn DurationProbe>,
        runtimes: HashMap<String, f64>,
    ) -> Self {
        Self {
            engine,
            catalog,
            probe,
            runtimes,
            session: Session::default(),
            last_poll: Instant::now(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn runtime_minutes(&self, playlist: &str) -> f64 {
        self.runtimes.get(playlist).copied().unwrap_or(0.0)
    }

    pub fn volume(&self) -> u8 {
        (self.engine.volume() * 100.0).round().clamp(0.0, 100.0) as u8
    }

    pub fn state(&self) -> PlaybackState {
        if self.session.index.is_none() {
            return PlaybackState::Stopped;
        }
        if self.session.paused {
            return PlaybackState::Paused;
        }
        match self.session.pending {
            PendingTransition::None => PlaybackState::Playing,
            PendingTransition::Fade(_) => PlaybackState::FadingOut,
            PendingTransition::SwitchOnComplete(_) | PendingTransition::StopOnComplete => {
                PlaybackState::AwaitingCompletion
            }
        }
    }

    // --- internals -------------------------------------------------------

    /// Stops the engine and forgets the session, pending work included.
    fn reset_session(&mut self) {
        self.engine.stop();
        self.engine.unload();
        self.session = Session::default();
        info!("playback stopped and state reset");
    }

    fn engine_failed(&mut self, e: EngineError) -> PlayerError {
        warn!("audio engine error: {e}");
        self.reset_session();
        PlayerError::Engine(e)
    }

    fn start_track(&mut self, index: usize) -> Result<()> {
        let Some(path) = self.session.tracks.get(index).cloned() else {
            self.reset_session();
            return Err(PlayerError::Validation("Track index out of bounds".into()));
        };

        let duration = self.probe.duration_of(&path);
        let started = self.engine.load(&path).and_then(|_| self.engine.play(Duration::ZERO));
        if let Err(e) = started {
            return Err(self.engine_failed(e));
        }

        let s = &mut self.session;
        s.index = Some(index);
        s.paused = false;
        s.pending_seek = None;
        s.track_duration = duration;
        // A fresh track cancels a fade that was still running on the old one.
        if matches!(s.pending, PendingTransition::Fade(_)) {
            s.pending = PendingTransition::None;
        }
        info!("playing track {}/{}: {}", index + 1, s.tracks.len(), basename(&path));
        Ok(())
    }

    fn load_playlist(&mut self, playlist: &str) -> Result<()> {
        let tracks = self.catalog.ordered_tracks(playlist)?;
        self.reset_session();
        if tracks.is_empty() {
            return Err(PlayerError::NotFound(format!("No supported audio files found in {playlist}")));
        }
        info!("loaded {} tracks for '{playlist}'", tracks.len());

        if let Some(v) = self.catalog.settings(playlist).and_then(|s| s.default_volume) {
            self.engine.set_volume(percent_to_gain(v));
            info!("applied default volume for '{playlist}': {v}%");
        }

        self.session.playlist = Some(playlist.to_string());
        self.session.tracks = tracks;
        self.start_track(0)
    }

    /// Stops, reloads and replays the current track from `at`, keeping the
    /// output volume.
    fn replay_at(&mut self, path: &Path, at: f64, reinit: bool) -> std::result::Result<(), EngineError> {
        let volume = self.engine.volume();
        self.engine.stop();
        if reinit {
            self.engine.unload();
            self.engine.reinit()?;
        }
        self.engine.load(path)?;
        self.engine.play(Duration::from_secs_f64(at))?;
        self.engine.set_volume(volume);
        Ok(())
    }

    fn clamp_seek(&self, position: f64) -> f64 {
        let pos = if position.is_finite() { position.max(0.0) } else { 0.0 };
        let duration = self.session.track_duration;
        if duration > 0.0 && pos > duration - SEEK_END_MARGIN {
            (duration - SEEK_END_MARGIN).max(0.0)
        } else {
            pos
        }
    }

    /// Next track, or the end-of-playlist policy: loop, then auto-advance,
    /// then stop.
    fn advance(&mut self) -> Result<NextOutcome> {
        let Some(index) = self.session.index else {
            return Err(PlayerError::Validation("No playlist loaded".into()));
        };
        let next = index + 1;
        if next < self.session.tracks.len() {
            self.start_track(next)?;
            return Ok(NextOutcome::NextTrack(next));
        }

        let current = self.session.playlist.clone().unwrap_or_default();
        let settings = self.catalog.settings(&current).cloned().unwrap_or_default();
        info!("end of playlist '{current}'");

        if settings.loop_playlist {
            info!("looping playlist '{current}'");
            self.start_track(0)?;
            return Ok(NextOutcome::Looped);
        }
        if settings.auto_advance {
            let target = match self.catalog.next_playlist_after(&current) {
                Ok(target) => target,
                Err(e) => {
                    warn!("cannot auto-advance from '{current}': {e}; stopping");
                    self.reset_session();
                    return Ok(NextOutcome::Stopped);
                }
            };
            info!("auto-advancing to '{target}'");
            self.load_playlist(&target)?;
            return Ok(NextOutcome::AdvancedTo(target));
        }

        self.reset_session();
        Ok(NextOutcome::Stopped)
    }

    fn on_fade_complete(&mut self) -> Result<()> {
        match std::mem::take(&mut self.session.pending) {
            PendingTransition::Fade(target) => {
                info!("fadeout complete; loading '{target}'");
                self.load_playlist(&target)
            }
            other => {
                debug!("fadeout completion with no fade pending; ignored");
                self.session.pending = other;
                Ok(())
            }
        }
    }

    fn on_track_end(&mut self) -> Result<()> {
        match std::mem::take(&mut self.session.pending) {
            PendingTransition::StopOnComplete => {
                info!("stopping after completed song");
                self.reset_session();
                Ok(())
            }
            PendingTransition::SwitchOnComplete(target) | PendingTransition::Fade(target) => {
                info!("song complete; transitioning to '{target}'");
                self.load_playlist(&target)
            }
            PendingTransition::None => self.advance().map(|_| ()),
        }
    }

    fn recover_stalled_engine(&mut self) {
        warn!("no status poll for over {}s; reinitializing audio engine", WATCHDOG_STALL.as_secs());
        if let Err(e) = self.engine.reinit() {
            warn!("audio engine reinit failed: {e}");
            return;
        }

        if let PendingTransition::Fade(target) = &self.session.pending {
            let target = target.clone();
            if let Err(e) = self.load_playlist(&target) {
                warn!("could not start '{target}' after stalled fade: {e}");
            }
            return;
        }

        let Some(path) = self.session.current_track().cloned() else {
            return;
        };
        let paused = self.session.paused;
        let resumed = self.engine.load(&path).and_then(|_| {
            if paused {
                Ok(())
            } else {
                self.engine.play(Duration::ZERO)
            }
        });
        match resumed {
            Ok(()) => info!("recovered playback of {}", basename(&path)),
            Err(e) => {
                warn!("could not recover {}: {e}", basename(&path));
                self.reset_session();
            }
        }
    }

    fn dispatch(&mut self) -> Result<()> {
        for event in self.engine.drain_events() {
            match event {
                EngineEvent::FadeoutComplete => self.on_fade_complete()?,
            }
        }

        if self.session.index.is_some() && !self.session.paused {
            let busy = match self.engine.is_busy() {
                Ok(busy) => busy,
                Err(e) => return Err(self.engine_failed(e)),
            };
            if !busy {
                self.on_track_end()?;
            }
        }
        Ok(())
    }

    fn snapshot(&mut self, error: Option<String>) -> StatusSnapshot {
        let playlists = self.catalog.list_playlists();
        let playlist_details = self
            .catalog
            .data()
            .playlist_details
            .iter()
            .map(|(name, settings)| {
                let status = PlaylistStatus {
                    settings: settings.clone(),
                    runtime_minutes: self.runtime_minutes(name),
                };
                (name.clone(), status)
            })
            .collect();

        let state = match (&error, self.state()) {
            (Some(_), _) => StatusState::Error,
            (None, PlaybackState::Stopped) => StatusState::Stopped,
            (None, PlaybackState::Paused) => StatusState::Paused,
            (None, _) => StatusState::Playing,
        };
        let position = match state {
            StatusState::Playing | StatusState::Paused => self.engine.position().as_secs_f64(),
            _ => 0.0,
        };
        let volume = if error.is_some() { 0 } else { self.volume() };

        let s = &self.session;
        StatusSnapshot {
            state,
            current_playlist: s.playlist.clone(),
            current_song: s.current_track().map(|p| basename(p)),
            volume,
            playlists,
            playlist_details,
            current_playlist_songs: s.tracks.iter().map(|p| basename(p)).collect(),
            current_position_sec: position,
            song_duration_sec: s.track_duration,
            pending_transition: PendingStatus {
                kind: s.pending.kind(),
                target: s.pending.target().map(str::to_string),
            },
            error_message: error,
        }
    }

    // --- commands --------------------------------------------------------

    /// Loads `playlist` and starts its first track. Anything pending is
    /// discarded.
    pub fn play(&mut self, playlist: &str) -> Result<()> {
        info!("loading playlist '{playlist}'");
        self.load_playlist(playlist)
    }

    pub fn stop(&mut self) {
        self.reset_session();
    }

    pub fn pause(&mut self) -> Result<PauseOutcome> {
        if self.session.index.is_none() || self.session.paused {
            return Ok(PauseOutcome::Idle);
        }
        match self.engine.is_busy() {
            Ok(true) => {}
            Ok(false) => return Ok(PauseOutcome::Idle),
            Err(e) => return Err(self.engine_failed(e)),
        }
        self.engine.pause();
        self.session.paused = true;
        info!("playback paused");
        Ok(PauseOutcome::Paused)
    }

    /// Resumes a paused session. A seek stored while paused is applied here,
    /// in the same step, by replaying the track from that offset.
    pub fn resume(&mut self) -> Result<PauseOutcome> {
        if !self.session.paused {
            return Ok(PauseOutcome::Idle);
        }
        let (Some(index), Some(path)) = (self.session.index, self.session.current_track().cloned()) else {
            self.session.paused = false;
            return Ok(PauseOutcome::Idle);
        };

        if let Some(pos) = self.session.pending_seek.take() {
            let pos = self.clamp_seek(pos);
            match self.replay_at(&path, pos, false) {
                Ok(()) => {
                    self.session.paused = false;
                    info!("playback resumed at {pos:.2}s");
                    return Ok(PauseOutcome::ResumedAt(pos));
                }
                Err(e) => warn!("applying stored seek failed: {e}; resuming in place"),
            }
        }

        match self.engine.resume() {
            Ok(()) => {
                self.session.paused = false;
                info!("playback resumed");
                Ok(PauseOutcome::Resumed)
            }
            Err(e) => {
                warn!("resume failed: {e}; reloading track");
                self.start_track(index)?;
                Ok(PauseOutcome::Reloaded)
            }
        }
    }

    pub fn toggle_pause(&mut self) -> Result<PauseOutcome> {
        if self.session.paused {
            self.resume()
        } else {
            self.pause()
        }
    }

    pub fn next(&mut self) -> Result<NextOutcome> {
        if self.session.index.is_none() || self.session.tracks.is_empty() {
            return Err(PlayerError::Validation("No playlist loaded".into()));
        }
        self.advance()
    }

    /// Seeks within the current track.
    ///
    /// The position is clamped into the track. While paused it is only
    /// stored. While playing, the engine is reinitialized and the track is
    /// replayed from the offset; if that fails the track is restarted from
    /// the top once before giving up.
    pub fn seek(&mut self, position: f64) -> Result<SeekOutcome> {
        let Some(path) = self.session.current_track().cloned() else {
            return Err(PlayerError::Validation("No track loaded".into()));
        };
        let pos = self.clamp_seek(position);

        if self.session.paused {
            info!("playback paused; storing seek to {pos:.2}s");
            self.session.pending_seek = Some(pos);
            return Ok(SeekOutcome::Stored(pos));
        }

        info!("seeking to {pos:.2}s");
        let result = self.replay_at(&path, pos, true);
        self.last_poll = Instant::now();
        match result {
            Ok(()) => {
                self.session.pending_seek = None;
                Ok(SeekOutcome::Applied(pos))
            }
            Err(e) => {
                warn!("seek failed: {e}; restarting track from the beginning");
                match self.replay_at(&path, 0.0, true) {
                    Ok(()) => Err(PlayerError::Engine(e)),
                    Err(again) => Err(self.engine_failed(again)),
                }
            }
        }
    }

    /// Sets the output volume in percent, clamped to 0-100.
    pub fn set_volume(&mut self, percent: i64) -> u8 {
        let v = percent.clamp(0, 100) as u8;
        self.engine.set_volume(percent_to_gain(v));
        info!("volume set to {v}%");
        v
    }

    /// Moves toward the next playlist according to the current playlist's
    /// transition mode. Refused while another transition is pending.
    pub fn request_playlist_transition(&mut self) -> Result<TransitionOutcome> {
        let Some(current) = self.session.playlist.clone() else {
            return Err(PlayerError::Validation("No playlist is currently active".into()));
        };

        match &self.session.pending {
            PendingTransition::None => {}
            PendingTransition::Fade(t) => {
                return Err(PlayerError::TransitionPending(format!("Already fading out to {t}. Wait.")));
            }
            PendingTransition::SwitchOnComplete(t) => {
                return Err(PlayerError::TransitionPending(format!(
                    "Waiting for the current song to finish before switching to {t}."
                )));
            }
            PendingTransition::StopOnComplete => {
                return Err(PlayerError::TransitionPending(
                    "Already set to stop after the current song.".into(),
                ));
            }
        }

        let mode = self.catalog.settings(&current).map(|s| s.transition_mode).unwrap_or_default();
        let target = self.catalog.next_playlist_after(&current)?;

        match mode {
            TransitionMode::Fade => {
                let busy = match self.engine.is_busy() {
                    Ok(busy) => busy,
                    Err(e) => return Err(self.engine_failed(e)),
                };
                if busy && !self.session.paused {
                    info!("fading out ({}s) to '{target}'", FADE_DURATION.as_secs());
                    self.engine.fadeout(FADE_DURATION);
                    self.session.pending = PendingTransition::Fade(target.clone());
                    Ok(TransitionOutcome::Fading { target })
                } else {
                    info!("not playing; switching directly to '{target}'");
                    self.load_playlist(&target)?;
                    Ok(TransitionOutcome::SwitchedNow { target })
                }
            }
            TransitionMode::Complete => {
                info!("will transition to '{target}' after current song");
                self.session.pending = PendingTransition::SwitchOnComplete(target.clone());
                Ok(TransitionOutcome::AfterCurrent { target })
            }
            TransitionMode::Stop => {
                info!("will stop after current song");
                self.session.pending = PendingTransition::StopOnComplete;
                Ok(TransitionOutcome::StopAfterCurrent)
            }
        }
    }

    // --- catalog commands with live-session effects ------------------------

    pub fn reorder_playlists(&mut self, order: Vec<String>) -> Result<Vec<String>> {
        self.catalog.reorder_playlists(order)
    }

    /// Replaces a playlist's stored song order. When that playlist is live
    /// the session follows the new order; if the playing file is not in it,
    /// playback restarts from the top.
    pub fn reorder_songs(&mut self, playlist: &str, order: Vec<PathBuf>) -> Result<()> {
        self.catalog.set_song_order(playlist, order.clone())?;
        info!("song order updated for '{playlist}'");
        if !self.session.is_live(playlist) {
            return Ok(());
        }

        let current = self.session.current_track().cloned();
        self.session.tracks = order;
        match current.and_then(|c| self.session.tracks.iter().position(|p| *p == c)) {
            Some(i) => {
                self.session.index = Some(i);
                Ok(())
            }
            None if self.session.tracks.is_empty() => {
                info!("playlist empty after reorder; stopping");
                self.reset_session();
                Ok(())
            }
            None => {
                info!("current song left the order; restarting '{playlist}'");
                self.start_track(0)
            }
        }
    }

    pub fn set_playlist_volume(&mut self, playlist: &str, volume: Option<i64>) -> Result<Option<u8>> {
        let volume = self.catalog.set_default_volume(playlist, volume)?;
        if let Some(v) = volume.filter(|_| self.session.is_live(playlist)) {
            self.engine.set_volume(percent_to_gain(v));
            info!("applied volume {v}% to current playback");
        }
        Ok(volume)
    }

    pub fn set_playlist_auto_advance(&mut self, playlist: &str, enabled: bool) -> Result<()> {
        self.catalog.set_auto_advance(playlist, enabled)
    }

    pub fn set_playlist_loop(&mut self, playlist: &str, enabled: bool) -> Result<()> {
        self.catalog.set_loop(playlist, enabled)
    }

    pub fn set_playlist_transition_mode(&mut self, playlist: &str, mode: &str) -> Result<TransitionMode> {
        self.catalog.set_transition_mode(playlist, mode)
    }

    pub fn rename_playlist(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        let renamed = self.catalog.rename_playlist(old_name, new_name)?;
        if let Some(minutes) = self.runtimes.remove(old_name) {
            self.runtimes.insert(new_name.to_string(), minutes);
        }
        if self.session.is_live(old_name) {
            self.session.playlist = Some(new_name.to_string());
            for path in self.session.tracks.iter_mut() {
                *path = reprefix(path, &renamed.old_path, &renamed.new_path);
            }
        }
        Ok(())
    }

    /// Renames a track file. The playlist's runtime is stale until the
    /// returned [`RuntimeRefresh`] is measured and handed to
    /// [`Player::record_runtime`].
    pub fn rename_song(&mut self, playlist: &str, old_name: &str, new_name: &str) -> Result<RuntimeRefresh> {
        let renamed = self.catalog.rename_song(playlist, old_name, new_name)?;
        if self.session.is_live(playlist) {
            if let Some(slot) = self.session.tracks.iter_mut().find(|p| renamed.matches(p)) {
                *slot = renamed.new_path.clone();
            }
        }

        let tracks = self.catalog.ordered_tracks(playlist).unwrap_or_else(|e| {
            warn!("runtime for '{playlist}' unavailable after rename: {e}");
            Vec::new()
        });
        Ok(RuntimeRefresh {
            playlist: playlist.to_string(),
            tracks,
            probe: Arc::clone(&self.probe),
        })
    }

    pub fn record_runtime(&mut self, playlist: String, minutes: f64) {
        info!("recalculated runtime for '{playlist}': {minutes:.1} min");
        self.runtimes.insert(playlist, minutes);
    }

    // --- poll ----------------------------------------------------------------

    pub fn poll(&mut self) -> StatusSnapshot {
        self.poll_at(Instant::now())
    }

    /// Runs the watchdog, acts on engine events and natural track ends, then
    /// reports the resulting state. Safe to call at any rate.
    pub fn poll_at(&mut self, now: Instant) -> StatusSnapshot {
        if now.saturating_duration_since(self.last_poll) > WATCHDOG_STALL {
            self.recover_stalled_engine();
        }
        self.last_poll = now;

        match self.dispatch() {
            Ok(()) => self.snapshot(None),
            Err(PlayerError::Engine(e)) => {
                // dispatch has already reset the session.
                self.snapshot(Some(e.to_string()))
            }
            Err(e) => {
                warn!("status poll could not continue playback: {e}");
                self.reset_session();
                self.snapshot(None)
            }
        }
    }
}
