use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;

/// Per-file duration lookup. Never fails: unknown lengths are `0.0`.
pub trait DurationProbe: Send + Sync {
    fn duration_of(&self, path: &Path) -> f64;
}

/// `ffprobe` first, then the container header via symphonia.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    ffprobe: String,
}

impl FfprobeProbe {
    pub fn new(ffprobe: impl Into<String>) -> Self {
        Self { ffprobe: ffprobe.into() }
    }

    fn probe_external(&self, path: &Path) -> Option<f64> {
        let out = Command::new(&self.ffprobe)
            .arg("-v").arg("error")
            .arg("-show_entries").arg("format=duration")
            .arg("-of").arg("default=noprint_wrappers=1:nokey=1")
            .arg(path)
            .output()
            .ok()?;

        if !out.status.success() {
            return None;
        }
        parse_ffprobe_output(&String::from_utf8_lossy(&out.stdout))
    }
}

impl DurationProbe for FfprobeProbe {
    fn duration_of(&self, path: &Path) -> f64 {
        if let Some(secs) = self.probe_external(path) {
            debug!("ffprobe: {} is {secs:.3}s", path.display());
            return secs;
        }
        if let Some(secs) = decoder_duration(path) {
            debug!("decoder: {} is {secs:.3}s", path.display());
            return secs;
        }
        warn!("could not determine duration of {}", path.display());
        0.0
    }
}

/// Accepts both `123.456` and `duration=123.456`.
pub fn parse_ffprobe_output(raw: &str) -> Option<f64> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let value = line.strip_prefix("duration=").unwrap_or(line);
    let secs: f64 = value.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then_some(secs)
}

/// Frame count over sample rate, read from the container without decoding.
fn decoder_duration(path: &Path) -> Option<f64> {
    let file = std::fs::File::open(path).ok()?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .ok()?;
    let track = probed.format.default_track()?;
    let frames = track.codec_params.n_frames?;
    let rate = track.codec_params.sample_rate?;
    if rate == 0 {
        return None;
    }
    Some(frames as f64 / f64::from(rate))
}

/// Seconds to minutes, rounded half away from zero to one decimal.
pub fn round_minutes(total_secs: f64) -> f64 {
    (total_secs / 60.0 * 10.0).round() / 10.0
}

/// Total length of `tracks` in minutes. Unreadable files count as zero.
pub fn runtime_of(probe: &dyn DurationProbe, tracks: &[PathBuf]) -> f64 {
    let total: f64 = tracks.iter().map(|t| probe.duration_of(t)).sum();
    round_minutes(total)
}

/// Runtime in minutes for every playlist in the catalog.
pub fn runtime_table(catalog: &mut Catalog, probe: &dyn DurationProbe) -> HashMap<String, f64> {
    let mut table = HashMap::new();
    for name in catalog.list_playlists() {
        let minutes = match catalog.ordered_tracks(&name) {
            Ok(tracks) => runtime_of(probe, &tracks),
            Err(e) => {
                warn!("runtime for '{name}' unavailable: {e}");
                0.0
            }
        };
        info!("playlist '{name}' runtime: {minutes:.1} min");
        table.insert(name, minutes);
    }
    table
}
