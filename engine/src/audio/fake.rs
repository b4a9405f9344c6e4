use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{AudioEngine, EngineError, EngineEvent};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Load(PathBuf),
    Play(Duration),
    Pause,
    Resume,
    Stop,
    Unload,
    Fadeout(Duration),
    Reinit,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<Call>,
    loaded: Option<PathBuf>,
    busy: bool,
    volume: f32,
    position: Duration,
    events: Vec<EngineEvent>,
    failing_plays: usize,
    failing_resumes: usize,
    busy_error: bool,
}

/// Scripted engine. Clones share state so a test can keep a handle after
/// boxing one into the player.
#[derive(Debug, Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<State>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.state().volume = 1.0;
        fake
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn loaded(&self) -> Option<PathBuf> {
        self.state().loaded.clone()
    }

    pub fn busy(&self) -> bool {
        self.state().busy
    }

    /// The current track runs out.
    pub fn finish_track(&self) {
        self.state().busy = false;
    }

    /// A previously armed fadeout reaches silence.
    pub fn complete_fade(&self) {
        let mut st = self.state();
        st.busy = false;
        st.events.push(EngineEvent::FadeoutComplete);
    }

    pub fn set_position(&self, pos: Duration) {
        self.state().position = pos;
    }

    pub fn fail_next_plays(&self, n: usize) {
        self.state().failing_plays = n;
    }

    pub fn fail_next_resumes(&self, n: usize) {
        self.state().failing_resumes = n;
    }

    pub fn fail_busy_check(&self, fail: bool) {
        self.state().busy_error = fail;
    }
}

impl AudioEngine for FakeEngine {
    fn load(&mut self, path: &Path) -> Result<(), EngineError> {
        let mut st = self.state();
        st.calls.push(Call::Load(path.to_path_buf()));
        if !path.exists() {
            return Err(EngineError::Decode { path: path.to_path_buf(), reason: "missing".into() });
        }
        st.loaded = Some(path.to_path_buf());
        st.busy = false;
        Ok(())
    }

    fn play(&mut self, start: Duration) -> Result<(), EngineError> {
        let mut st = self.state();
        st.calls.push(Call::Play(start));
        if st.loaded.is_none() {
            return Err(EngineError::NothingLoaded);
        }
        if st.failing_plays > 0 {
            st.failing_plays -= 1;
            return Err(EngineError::Output("scripted play failure".into()));
        }
        st.busy = true;
        st.position = start;
        Ok(())
    }

    fn pause(&mut self) {
        self.state().calls.push(Call::Pause);
    }

    fn resume(&mut self) -> Result<(), EngineError> {
        let mut st = self.state();
        st.calls.push(Call::Resume);
        if st.failing_resumes > 0 {
            st.failing_resumes -= 1;
            return Err(EngineError::Output("scripted resume failure".into()));
        }
        if st.loaded.is_some() {
            st.busy = true;
        }
        Ok(())
    }

    fn stop(&mut self) {
        let mut st = self.state();
        st.calls.push(Call::Stop);
        st.busy = false;
        st.position = Duration::ZERO;
    }

    fn unload(&mut self) {
        let mut st = self.state();
        st.calls.push(Call::Unload);
        st.busy = false;
        st.loaded = None;
    }

    fn set_volume(&mut self, volume: f32) {
        self.state().volume = volume.clamp(0.0, 1.0);
    }

    fn volume(&self) -> f32 {
        self.state().volume
    }

    fn is_busy(&self) -> Result<bool, EngineError> {
        let st = self.state();
        if st.busy_error {
            return Err(EngineError::Output("scripted device failure".into()));
        }
        Ok(st.busy)
    }

    fn position(&self) -> Duration {
        self.state().position
    }

    fn fadeout(&mut self, over: Duration) {
        self.state().calls.push(Call::Fadeout(over));
    }

    fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.state().events)
    }

    fn reinit(&mut self) -> Result<(), EngineError> {
        let mut st = self.state();
        st.calls.push(Call::Reinit);
        st.busy = false;
        Ok(())
    }
}
