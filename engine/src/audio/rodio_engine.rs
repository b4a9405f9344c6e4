use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use tracing::{debug, info, warn};

use super::{AudioEngine, EngineError, EngineEvent};

// --- Output thread -------------------------------------------------------
//
// `rodio::OutputStream` is not `Send`, but the player lives behind a tokio
// mutex and must be. The stream is therefore parked on its own thread for as
// long as the engine wants a device; we only keep the (Send) handle.

struct OutputThread {
    handle: OutputStreamHandle,
    shutdown: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl OutputThread {
    fn open() -> Result<Self, EngineError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<OutputStreamHandle, String>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => {
                    let _ = ready_tx.send(Ok(handle));
                    // Blocks until the engine drops its sender.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                }
            })?;

        let handle = ready_rx
            .recv()
            .map_err(|_| EngineError::Output("audio output thread exited before start".into()))?
            .map_err(EngineError::Output)?;

        Ok(Self { handle, shutdown: shutdown_tx, join: Some(join) })
    }
}

impl Drop for OutputThread {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

// --- Play clock ----------------------------------------------------------

/// Elapsed position of the current track: start offset plus unpaused time.
#[derive(Debug, Default)]
struct PlayClock {
    offset: Duration,
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl PlayClock {
    fn start(&mut self, offset: Duration) {
        self.offset = offset;
        self.accumulated = Duration::ZERO;
        self.running_since = Some(Instant::now());
    }

    fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn elapsed(&self) -> Duration {
        self.offset + self.accumulated + self.running_since.map_or(Duration::ZERO, |s| s.elapsed())
    }
}

// --- Fade wrapper --------------------------------------------------------

/// Samples between checks of the shared fade request.
const FADE_CHECK_INTERVAL: usize = 512;

/// Passes samples through until a fade is requested, then ramps the gain
/// linearly to zero and ends the source. The completion event is sent once.
pub(crate) struct Fader<S> {
    inner: S,
    /// Requested fade length in milliseconds; 0 means no fade.
    request: Arc<AtomicU64>,
    events: Sender<EngineEvent>,
    ramp: Option<(u64, u64)>,
    countdown: usize,
    done: bool,
}

impl<S> Fader<S>
where
    S: Source<Item = f32>,
{
    pub(crate) fn new(inner: S, request: Arc<AtomicU64>, events: Sender<EngineEvent>) -> Self {
        Self { inner, request, events, ramp: None, countdown: 0, done: false }
    }

    fn arm_if_requested(&mut self) {
        let ms = self.request.load(Ordering::Relaxed);
        if ms == 0 {
            return;
        }
        let per_sec = u64::from(self.inner.sample_rate()) * u64::from(self.inner.channels());
        let total = (per_sec * ms / 1000).max(1);
        self.ramp = Some((0, total));
    }

    fn finish(&mut self) -> Option<f32> {
        if !self.done {
            self.done = true;
            if self.ramp.is_some() {
                let _ = self.events.send(EngineEvent::FadeoutComplete);
            }
        }
        None
    }
}

impl<S> Iterator for Fader<S>
where
    S: Source<Item = f32>,
{
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.done {
            return None;
        }
        if self.ramp.is_none() {
            if self.countdown == 0 {
                self.arm_if_requested();
                self.countdown = FADE_CHECK_INTERVAL;
            }
            self.countdown -= 1;
        }

        let Some(sample) = self.inner.next() else {
            return self.finish();
        };

        match self.ramp {
            None => Some(sample),
            Some((pos, total)) if pos >= total => self.finish(),
            Some((pos, total)) => {
                self.ramp = Some((pos + 1, total));
                let gain = 1.0 - pos as f32 / total as f32;
                Some(sample * gain)
            }
        }
    }
}

impl<S> Source for Fader<S>
where
    S: Source<Item = f32>,
{
    fn current_frame_len(&self) -> Option<usize> {
        self.inner.current_frame_len()
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }
}

// --- Engine --------------------------------------------------------------

/// rodio-backed [`AudioEngine`] with a single sink.
pub struct RodioEngine {
    output: Option<OutputThread>,
    sink: Option<Sink>,
    loaded: Option<PathBuf>,
    volume: f32,
    clock: PlayClock,
    fade_request: Arc<AtomicU64>,
    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
}

impl RodioEngine {
    /// Opens the default output device.
    pub fn open() -> Result<Self, EngineError> {
        let output = OutputThread::open()?;
        let (events_tx, events_rx) = mpsc::channel();
        info!("audio output opened");
        Ok(Self {
            output: Some(output),
            sink: None,
            loaded: None,
            volume: 1.0,
            clock: PlayClock::default(),
            fade_request: Arc::new(AtomicU64::new(0)),
            events_tx,
            events_rx,
        })
    }

    fn decode(path: &Path) -> Result<Decoder<BufReader<File>>, EngineError> {
        let file = File::open(path)?;
        Decoder::new(BufReader::new(file)).map_err(|e| EngineError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn output(&mut self) -> Result<&OutputThread, EngineError> {
        if self.output.is_none() {
            self.output = Some(OutputThread::open()?);
        }
        self.output
            .as_ref()
            .ok_or_else(|| EngineError::Output("audio output not open".into()))
    }

    fn drop_sink(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.clock.reset();
    }
}

impl AudioEngine for RodioEngine {
    fn load(&mut self, path: &Path) -> Result<(), EngineError> {
        self.drop_sink();
        // Decode once up front so a bad file fails here rather than on play.
        Self::decode(path)?;
        debug!("loaded {}", path.display());
        self.loaded = Some(path.to_path_buf());
        Ok(())
    }

    fn play(&mut self, start: Duration) -> Result<(), EngineError> {
        let path = self.loaded.clone().ok_or(EngineError::NothingLoaded)?;
        self.drop_sink();

        let decoder = Self::decode(&path)?;
        self.fade_request = Arc::new(AtomicU64::new(0));
        let source = Fader::new(
            decoder.convert_samples::<f32>().skip_duration(start),
            Arc::clone(&self.fade_request),
            self.events_tx.clone(),
        );

        let volume = self.volume;
        let sink = Sink::try_new(&self.output()?.handle).map_err(|e| EngineError::Output(e.to_string()))?;
        sink.set_volume(volume);
        sink.append(source);
        self.sink = Some(sink);
        self.clock.start(start);
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
            self.clock.pause();
        }
    }

    fn resume(&mut self) -> Result<(), EngineError> {
        match &self.sink {
            Some(sink) => {
                sink.play();
                self.clock.resume();
                Ok(())
            }
            None => self.play(Duration::ZERO),
        }
    }

    fn stop(&mut self) {
        self.drop_sink();
    }

    fn unload(&mut self) {
        self.drop_sink();
        self.loaded = None;
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(sink) = &self.sink {
            sink.set_volume(self.volume);
        }
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn is_busy(&self) -> Result<bool, EngineError> {
        Ok(self.sink.as_ref().is_some_and(|s| !s.empty()))
    }

    fn position(&self) -> Duration {
        if self.sink.is_some() {
            self.clock.elapsed()
        } else {
            Duration::ZERO
        }
    }

    fn fadeout(&mut self, over: Duration) {
        let active = self.sink.as_ref().is_some_and(|s| !s.empty());
        if !active {
            let _ = self.events_tx.send(EngineEvent::FadeoutComplete);
            return;
        }
        let ms = u64::try_from(over.as_millis()).unwrap_or(u64::MAX).max(1);
        self.fade_request.store(ms, Ordering::Relaxed);
    }

    fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.events_rx.try_iter().collect()
    }

    fn reinit(&mut self) -> Result<(), EngineError> {
        warn!("reinitializing audio output");
        self.drop_sink();
        self.output = None;
        self.output = Some(OutputThread::open()?);
        Ok(())
    }
}
