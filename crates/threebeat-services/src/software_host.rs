//! Voice host backed by an in-process mixer with a render-driven clock

use threebeat_core::Sound;
use tracing::debug;

use crate::host::{ClockState, HostError, SourceHandle, Trigger, VoiceHost};
use crate::mixer::{MixerCommand, VoiceMixer};

/// The clock only moves when [`SoftwareHost::render`] is called, which makes
/// playback fully deterministic.
pub struct SoftwareHost {
    mixer: VoiceMixer,
    state: ClockState,
    next_handle: u64,
}

impl SoftwareHost {
    pub fn new(sample_rate: u32) -> Self {
        Self { mixer: VoiceMixer::new(sample_rate), state: ClockState::Suspended, next_handle: 1 }
    }

    pub fn sample_rate(&self) -> u32 {
        self.mixer.sample_rate()
    }

    pub fn mixer(&self) -> &VoiceMixer {
        &self.mixer
    }

    /// Render `frames` mono samples, advancing the clock
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        if self.state == ClockState::Running {
            self.mixer.render(&mut out);
        }
        out
    }

    pub fn close(&mut self) {
        self.state = ClockState::Closed;
    }
}

impl VoiceHost for SoftwareHost {
    fn clock_state(&self) -> ClockState {
        self.state
    }

    async fn resume(&mut self) -> Result<(), HostError> {
        match self.state {
            ClockState::Closed => Err(HostError::Closed),
            _ => {
                self.state = ClockState::Running;
                debug!("Software clock running");
                Ok(())
            }
        }
    }

    fn now(&self) -> f64 {
        self.mixer.now()
    }

    fn configure(&mut self, voice_index: usize, sound: Sound) -> Result<SourceHandle, HostError> {
        if self.state == ClockState::Closed {
            return Err(HostError::Closed);
        }
        let handle = SourceHandle(self.next_handle);
        self.next_handle += 1;
        self.mixer.apply(MixerCommand::Configure { handle, voice_index, sound });
        Ok(handle)
    }

    fn trigger(&mut self, handle: SourceHandle, trigger: Trigger) -> Result<(), HostError> {
        if !self.mixer.has_source(handle) {
            return Err(HostError::UnknownSource(handle));
        }
        self.mixer.apply(MixerCommand::Trigger { handle, trigger });
        Ok(())
    }

    fn dispose(&mut self, handle: SourceHandle) {
        self.mixer.apply(MixerCommand::Dispose(handle));
    }

    fn set_volume(&mut self, voice_index: usize, gain: f32) {
        self.mixer.apply(MixerCommand::SetGain { voice_index, gain });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threebeat_core::OscillatorType;

    #[test]
    fn test_starts_suspended_and_resumes() {
        let mut host = SoftwareHost::new(8000);
        assert_eq!(host.clock_state(), ClockState::Suspended);
        tokio_test::block_on(host.resume()).unwrap();
        assert_eq!(host.clock_state(), ClockState::Running);
    }

    #[test]
    fn test_suspended_clock_does_not_advance() {
        let mut host = SoftwareHost::new(8000);
        host.render(800);
        assert_eq!(host.now(), 0.0);
        tokio_test::block_on(host.resume()).unwrap();
        host.render(800);
        assert!((host.now() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_trigger_on_disposed_source_fails() {
        let mut host = SoftwareHost::new(8000);
        let handle = host.configure(0, Sound::Oscillator(OscillatorType::Sine)).unwrap();
        host.dispose(handle);
        let trigger = Trigger { start: 0.0, duration: 0.1, velocity: 0.7, pitch_hz: Some(261.6) };
        assert!(matches!(host.trigger(handle, trigger), Err(HostError::UnknownSource(_))));
    }

    #[test]
    fn test_closed_host_rejects_resume() {
        let mut host = SoftwareHost::new(8000);
        host.close();
        assert!(tokio_test::block_on(host.resume()).is_err());
    }
}
