//! Sample clock, voice gains and time-stamped note events
//!
//! The mixer is the single place sources are rendered. The offline host owns
//! one directly; the realtime host moves one into the output callback and
//! feeds it [`MixerCommand`]s over a channel.

use std::collections::BTreeMap;

use threebeat_core::Sound;
use tracing::trace;

use crate::host::{SourceHandle, Trigger};
use crate::synth::Source;

/// Headroom for three voices at full gain
const MASTER_GAIN: f32 = 0.5;

#[derive(Debug, Clone)]
pub enum MixerCommand {
    Configure { handle: SourceHandle, voice_index: usize, sound: Sound },
    Trigger { handle: SourceHandle, trigger: Trigger },
    Dispose(SourceHandle),
    SetGain { voice_index: usize, gain: f32 },
}

#[derive(Debug, Clone)]
struct ScheduledNote {
    handle: SourceHandle,
    on_frame: u64,
    off_frame: u64,
    pitch_hz: Option<f64>,
    velocity: f32,
    sounding: bool,
}

pub struct VoiceMixer {
    sample_rate: u32,
    frame: u64,
    sources: BTreeMap<SourceHandle, Source>,
    gains: Vec<f32>,
    notes: Vec<ScheduledNote>,
}

impl VoiceMixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frame: 0,
            sources: BTreeMap::new(),
            gains: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frame
    }

    /// Seconds of audio rendered so far
    pub fn now(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }

    pub fn has_source(&self, handle: SourceHandle) -> bool {
        self.sources.contains_key(&handle)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn gain(&self, voice_index: usize) -> f32 {
        self.gains.get(voice_index).copied().unwrap_or(1.0)
    }

    fn to_frame(&self, secs: f64) -> u64 {
        (secs.max(0.0) * self.sample_rate as f64).round() as u64
    }

    pub fn apply(&mut self, command: MixerCommand) {
        match command {
            MixerCommand::Configure { handle, voice_index, sound } => {
                let source = Source::new(sound, voice_index, self.sample_rate as f32, handle.0);
                self.sources.insert(handle, source);
            }
            MixerCommand::Trigger { handle, trigger } => {
                let on_frame = self.to_frame(trigger.start).max(self.frame);
                let off_frame = self.to_frame(trigger.start + trigger.duration).max(on_frame + 1);
                trace!(?handle, on_frame, off_frame, "Note scheduled");
                self.notes.push(ScheduledNote {
                    handle,
                    on_frame,
                    off_frame,
                    pitch_hz: trigger.pitch_hz,
                    velocity: trigger.velocity as f32,
                    sounding: false,
                });
            }
            MixerCommand::Dispose(handle) => {
                self.sources.remove(&handle);
                self.notes.retain(|n| n.handle != handle);
            }
            MixerCommand::SetGain { voice_index, gain } => {
                if self.gains.len() <= voice_index {
                    self.gains.resize(voice_index + 1, 1.0);
                }
                self.gains[voice_index] = gain.clamp(0.0, 1.0);
            }
        }
    }

    fn run_note_edges(&mut self) {
        let frame = self.frame;
        let sources = &mut self.sources;
        self.notes.retain_mut(|note| {
            let Some(source) = sources.get_mut(&note.handle) else {
                return false;
            };
            if !note.sounding && note.on_frame <= frame {
                source.note_on(note.pitch_hz, note.velocity);
                note.sounding = true;
            }
            if note.sounding && note.off_frame <= frame {
                source.note_off();
                return false;
            }
            true
        });
    }

    /// Render mono samples into `out`, advancing the clock by its length
    pub fn render(&mut self, out: &mut [f32]) {
        let sample_rate = self.sample_rate as f32;
        for sample in out.iter_mut() {
            self.run_note_edges();
            let mut mix = 0.0;
            for source in self.sources.values_mut() {
                let gain = self.gains.get(source.voice_index()).copied().unwrap_or(1.0);
                mix += source.tick(sample_rate) * gain;
            }
            *sample = mix * MASTER_GAIN;
            self.frame += 1;
        }
    }
}
