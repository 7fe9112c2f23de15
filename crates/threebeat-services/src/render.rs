//! Offline rendering of a pattern to a WAV file

use std::path::Path;

use fastrand::Rng;
use hound::{SampleFormat, WavSpec, WavWriter};
use thiserror::Error;
use threebeat_core::SequencerState;
use tracing::info;

use crate::host::HostError;
use crate::scheduler::{SequencerEngine, LOOKAHEAD_SECS};
use crate::software_host::SoftwareHost;

/// Frames rendered between scheduler pumps: half the scheduler lookahead,
/// so every tick is collected before the clock reaches it
fn block_frames(sample_rate: u32) -> usize {
    ((LOOKAHEAD_SECS / 2.0 * sample_rate as f64).round() as usize).max(1)
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Playback could not start: {0}")]
    Host(#[from] HostError),
    #[error("WAV write failed: {0}")]
    Wav(#[from] hound::Error),
    #[error("Invalid render length: {0}s")]
    InvalidLength(f64),
}

/// Play `state` from the top for `seconds` against a render-driven clock.
/// Returns mono samples.
pub async fn render_pattern(
    state: &SequencerState,
    seconds: f64,
    sample_rate: u32,
    seed: u64,
) -> Result<Vec<f32>, RenderError> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(RenderError::InvalidLength(seconds));
    }
    let total = (seconds * sample_rate as f64).round() as usize;
    let mut engine = SequencerEngine::new(SoftwareHost::new(sample_rate), state).with_rng(Rng::with_seed(seed));
    engine.start_playback(state).await?;

    let block = block_frames(sample_rate);
    let mut samples = Vec::with_capacity(total);
    while samples.len() < total {
        engine.pump();
        let frames = block.min(total - samples.len());
        samples.extend(engine.host_mut().render(frames));
    }
    engine.shutdown();
    Ok(samples)
}

pub fn write_wav(samples: &[f32], sample_rate: u32, path: &Path) -> Result<(), RenderError> {
    let spec = WavSpec { channels: 1, sample_rate, bits_per_sample: 16, sample_format: SampleFormat::Int };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

pub async fn render_to_wav(
    state: &SequencerState,
    seconds: f64,
    sample_rate: u32,
    seed: u64,
    path: &Path,
) -> Result<(), RenderError> {
    let samples = render_pattern(state, seconds, sample_rate, seed).await?;
    write_wav(&samples, sample_rate, path)?;
    info!(path = %path.display(), seconds, sample_rate, "Pattern rendered");
    Ok(())
}
