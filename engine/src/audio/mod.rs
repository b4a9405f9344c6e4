//! Audio output seam.
//!
//! The orchestrator never talks to a sound device directly. It drives an
//! [`AudioEngine`], polls it for "busy" and drains [`EngineEvent`]s from it.
//! The engine owns its own playback thread; nothing here calls back into the
//! player.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

mod rodio_engine;

#[cfg(test)]
pub(crate) mod fake;

pub use rodio_engine::RodioEngine;

/// Notifications the engine queues for the next poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// A fadeout armed with [`AudioEngine::fadeout`] reached silence, or the
    /// track ran out while fading.
    FadeoutComplete,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("audio output unavailable: {0}")]
    Output(String),

    #[error("cannot decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("no track loaded")]
    NothingLoaded,

    #[error("audio i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// A single-channel music player.
///
/// One track is loaded at a time. `play` always starts the loaded track
/// afresh at the given offset; engines of this kind cannot seek in place.
pub trait AudioEngine: Send {
    fn load(&mut self, path: &Path) -> Result<(), EngineError>;
    fn play(&mut self, start: Duration) -> Result<(), EngineError>;
    fn pause(&mut self);
    fn resume(&mut self) -> Result<(), EngineError>;
    fn stop(&mut self);
    fn unload(&mut self);

    /// Linear gain, clamped to `0.0..=1.0`.
    fn set_volume(&mut self, volume: f32);
    fn volume(&self) -> f32;

    /// True while the engine still holds audio for the loaded track,
    /// including while paused.
    fn is_busy(&self) -> Result<bool, EngineError>;

    /// Elapsed position within the loaded track.
    fn position(&self) -> Duration;

    /// Ramps the current track down to silence over `over`, then queues
    /// [`EngineEvent::FadeoutComplete`].
    fn fadeout(&mut self, over: Duration);

    fn drain_events(&mut self) -> Vec<EngineEvent>;

    /// Tears down and reopens the output device. The loaded path survives but
    /// nothing is playing afterwards.
    fn reinit(&mut self) -> Result<(), EngineError>;
}
