//! Realtime voice host on the default cpal output device

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{unbounded, Receiver, Sender};
use thiserror::Error;
use threebeat_core::Sound;
use tracing::{error, info, warn};

use crate::host::{ClockState, HostError, SourceHandle, Trigger, VoiceHost};
use crate::mixer::{MixerCommand, VoiceMixer};

#[derive(Debug, Error)]
pub enum AudioOutputError {
    #[error("No audio output devices found")]
    NoDevices,
    #[error("Failed to get default output config: {0}")]
    ConfigError(String),
    #[error("Failed to build output stream: {0}")]
    StreamError(String),
}

/// Set by the output callback the first time it runs
#[derive(Default)]
struct FirstCallback {
    fired: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

impl FirstCallback {
    fn notify(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut waker) = self.waker.lock() {
            if let Some(waker) = waker.take() {
                waker.wake();
            }
        }
    }
}

/// Completes once audio is flowing
struct AudioFlowing(Arc<FirstCallback>);

impl Future for AudioFlowing {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let signal = &self.0;
        if signal.fired.load(Ordering::SeqCst) {
            return Poll::Ready(());
        }
        if let Ok(mut waker) = signal.waker.lock() {
            *waker = Some(cx.waker().clone());
        }
        // the callback may have fired between the check and storing the waker
        if signal.fired.load(Ordering::SeqCst) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Voice host whose mixer runs inside the output stream callback. The
/// stream is built paused; [`VoiceHost::resume`] starts it.
pub struct RealtimeHost {
    stream: cpal::Stream,
    commands: Sender<MixerCommand>,
    frames: Arc<AtomicU64>,
    started: Arc<FirstCallback>,
    sample_rate: u32,
    state: ClockState,
    next_handle: u64,
}

impl RealtimeHost {
    pub fn open() -> Result<Self, AudioOutputError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioOutputError::NoDevices)?;

        let supported_config = device
            .default_output_config()
            .map_err(|e| AudioOutputError::ConfigError(e.to_string()))?;
        let sample_rate = supported_config.sample_rate().0;
        let channels = supported_config.channels() as usize;

        info!(
            device = %device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "Opening audio output"
        );

        let (commands, command_rx): (Sender<MixerCommand>, Receiver<MixerCommand>) = unbounded();
        let frames = Arc::new(AtomicU64::new(0));
        let started = Arc::new(FirstCallback::default());

        let mut mixer = VoiceMixer::new(sample_rate);
        let mut mono: Vec<f32> = Vec::new();
        let frames_clone = frames.clone();
        let started_clone = started.clone();
        let config: StreamConfig = supported_config.into();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for command in command_rx.try_iter() {
                        mixer.apply(command);
                    }
                    let frame_count = data.len() / channels.max(1);
                    mono.resize(frame_count, 0.0);
                    mixer.render(&mut mono);
                    for (frame, &sample) in data.chunks_mut(channels.max(1)).zip(mono.iter()) {
                        frame.fill(sample);
                    }
                    frames_clone.store(mixer.frames_rendered(), Ordering::SeqCst);
                    started_clone.notify();
                },
                move |err| error!("Playback stream error: {}", err),
                None,
            )
            .map_err(|e| AudioOutputError::StreamError(e.to_string()))?;

        // some backends start streams on creation
        if let Err(e) = stream.pause() {
            warn!(error = %e, "Could not pause new output stream");
        }

        Ok(Self {
            stream,
            commands,
            frames,
            started,
            sample_rate,
            state: ClockState::Suspended,
            next_handle: 1,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn send(&self, command: MixerCommand) -> Result<(), HostError> {
        self.commands.send(command).map_err(|_| HostError::Closed)
    }
}

impl VoiceHost for RealtimeHost {
    fn clock_state(&self) -> ClockState {
        self.state
    }

    async fn resume(&mut self) -> Result<(), HostError> {
        if self.state == ClockState::Closed {
            return Err(HostError::Closed);
        }
        self.stream.play().map_err(|e| HostError::Resume(e.to_string()))?;
        AudioFlowing(self.started.clone()).await;
        self.state = ClockState::Running;
        info!(sample_rate = self.sample_rate, "Audio clock running");
        Ok(())
    }

    fn now(&self) -> f64 {
        self.frames.load(Ordering::SeqCst) as f64 / self.sample_rate as f64
    }

    fn configure(&mut self, voice_index: usize, sound: Sound) -> Result<SourceHandle, HostError> {
        let handle = SourceHandle(self.next_handle);
        self.next_handle += 1;
        self.send(MixerCommand::Configure { handle, voice_index, sound })?;
        Ok(handle)
    }

    fn trigger(&mut self, handle: SourceHandle, trigger: Trigger) -> Result<(), HostError> {
        self.send(MixerCommand::Trigger { handle, trigger })
    }

    fn dispose(&mut self, handle: SourceHandle) {
        if self.send(MixerCommand::Dispose(handle)).is_err() {
            warn!(?handle, "Output stream gone before dispose");
        }
    }

    fn set_volume(&mut self, voice_index: usize, gain: f32) {
        if self.send(MixerCommand::SetGain { voice_index, gain }).is_err() {
            warn!(voice = voice_index, "Output stream gone before volume change");
        }
    }
}

impl Drop for RealtimeHost {
    fn drop(&mut self) {
        self.state = ClockState::Closed;
        if let Err(e) = self.stream.pause() {
            warn!(error = %e, "Could not pause output stream");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_audio_flowing_completes_after_notify_from_another_thread() {
        let signal = Arc::new(FirstCallback::default());
        let notifier = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            notifier.notify();
        });
        tokio_test::block_on(AudioFlowing(signal.clone()));
        assert!(signal.fired.load(Ordering::SeqCst));
        handle.join().unwrap();
    }

    #[test]
    fn test_audio_flowing_ready_when_already_fired() {
        let signal = Arc::new(FirstCallback::default());
        signal.notify();
        tokio_test::block_on(AudioFlowing(signal));
    }
}
