//! Keeps one repeating schedule per voice in step with the pattern model
//!
//! The engine listens to model change events, rebuilds only what a change
//! touches, and turns due transport ticks into host triggers. It is driven
//! cooperatively: [`SequencerEngine::sync`] applies queued model changes and
//! [`SequencerEngine::pump`] fires everything due inside the lookahead window.

use crossbeam_channel::{unbounded, Receiver, Sender};
use fastrand::Rng;
use threebeat_core::pitch::{midi_to_hz, note_to_midi};
use threebeat_core::timing::{self, MIN_STEP_SECS};
use threebeat_core::{EventKind, ModelEvent, PatternModel, SequencerState, Sound, SubscriptionId, Voice};
use tracing::{debug, error, info, trace, warn};

use crate::host::{ClockState, HostError, SourceHandle, Trigger, VoiceHost};
use crate::transport::{DueTick, ScheduleId, Transport};

/// How far ahead of the host clock ticks are handed to the host
pub const LOOKAHEAD_SECS: f64 = 0.03;

/// Visualization refresh, one sixteenth note
const FRAME_INTERVAL_BEATS: f64 = 0.25;

/// What a bar multiplier change does to running voice schedules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BarMultiplierPolicy {
    /// Rebuild every voice schedule so the repeated pattern matches the new
    /// length
    #[default]
    Rebuild,
    /// Only patch interval and length of the running schedules
    PatchInPlace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoicePhase {
    Uninitialized,
    Configured,
    Scheduled,
    Reconfiguring,
    Disposed,
}

/// Receives playback position updates, typically a step display
pub trait StepObserver {
    /// A voice reached `step` (0..divisions) at host time `time`
    fn on_step(&mut self, voice_index: usize, step: usize, time: f64);

    /// Sixteenth-note refresh with the transport position in seconds
    fn on_frame(&mut self, _transport_secs: f64) {}

    /// Playback stopped
    fn on_reset(&mut self) {}
}

/// Global values read on every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackParams {
    pub bpm: i32,
    pub bar_multiplier: i32,
    pub velocity_randomization: i32,
    pub note_duration: i32,
}

impl PlaybackParams {
    pub fn from_state(state: &SequencerState) -> Self {
        Self {
            bpm: state.bpm,
            bar_multiplier: state.bar_multiplier,
            velocity_randomization: state.velocity_randomization,
            note_duration: state.note_duration,
        }
    }

    pub fn effective_bpm(&self) -> f64 {
        timing::effective_bpm(self.bpm, self.bar_multiplier)
    }

    pub fn step_interval(&self, divisions: u8) -> f64 {
        timing::live_step_interval(self.bpm, self.bar_multiplier, divisions)
    }
}

/// Playback resources of one voice
#[derive(Debug, Clone)]
pub struct VoiceRuntime {
    config: Voice,
    source: Option<(SourceHandle, Sound)>,
    schedule: Option<ScheduleId>,
    /// Schedule length (divisions times bar multiplier) as of the last build
    step_count: usize,
    phase: VoicePhase,
}

impl VoiceRuntime {
    fn new(config: Voice) -> Self {
        Self { config, source: None, schedule: None, step_count: 0, phase: VoicePhase::Uninitialized }
    }

    pub fn config(&self) -> &Voice {
        &self.config
    }

    pub fn source(&self) -> Option<SourceHandle> {
        self.source.map(|(handle, _)| handle)
    }

    pub fn schedule(&self) -> Option<ScheduleId> {
        self.schedule
    }

    pub fn phase(&self) -> VoicePhase {
        self.phase
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Steps past the base pattern wrap around it
    pub fn is_step_active(&self, step: usize) -> bool {
        timing::step_active(&self.config.pattern, step)
    }

    /// Sources and schedules are only built once playback has started;
    /// before that a change just updates the configuration
    fn is_built(&self) -> bool {
        matches!(self.phase, VoicePhase::Configured | VoicePhase::Scheduled | VoicePhase::Reconfiguring)
    }
}

pub struct SequencerEngine<H: VoiceHost> {
    host: H,
    transport: Transport,
    voices: Vec<VoiceRuntime>,
    params: PlaybackParams,
    playing: bool,
    frame_schedule: Option<ScheduleId>,
    observer: Option<Box<dyn StepObserver>>,
    events_tx: Sender<ModelEvent>,
    events_rx: Receiver<ModelEvent>,
    rng: Rng,
    policy: BarMultiplierPolicy,
    lookahead: f64,
}

impl<H: VoiceHost> SequencerEngine<H> {
    /// Set up voice gains and the transport tempo from `state`. No sources
    /// are built until playback starts.
    pub fn new(mut host: H, state: &SequencerState) -> Self {
        for (index, voice) in state.voices.iter().enumerate() {
            host.set_volume(index, gain_of(voice.volume));
        }
        let params = PlaybackParams::from_state(state);
        let (events_tx, events_rx) = unbounded();
        info!(voices = state.voices.len(), bpm = params.effective_bpm(), "Sequencer engine ready");
        Self {
            host,
            transport: Transport::new(params.effective_bpm()),
            voices: state.voices.iter().cloned().map(VoiceRuntime::new).collect(),
            params,
            playing: false,
            frame_schedule: None,
            observer: None,
            events_tx,
            events_rx,
            rng: Rng::new(),
            policy: BarMultiplierPolicy::default(),
            lookahead: LOOKAHEAD_SECS,
        }
    }

    pub fn with_rng(mut self, rng: Rng) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_policy(mut self, policy: BarMultiplierPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_lookahead(mut self, secs: f64) -> Self {
        self.lookahead = secs.max(0.0);
        self
    }

    pub fn set_observer(&mut self, observer: Box<dyn StepObserver>) {
        self.observer = Some(observer);
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn voices(&self) -> &[VoiceRuntime] {
        &self.voices
    }

    pub fn params(&self) -> PlaybackParams {
        self.params
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Forward every model change into this engine's queue
    pub fn attach(&self, model: &mut PatternModel) -> Vec<SubscriptionId> {
        EventKind::ALL
            .iter()
            .map(|&kind| {
                let tx = self.events_tx.clone();
                model.subscribe(
                    kind,
                    Box::new(move |event: &ModelEvent| {
                        if tx.send(event.clone()).is_err() {
                            trace!("Engine gone, dropping model event");
                        }
                    }),
                )
            })
            .collect()
    }

    /// Number of model events waiting for [`SequencerEngine::sync`]
    pub fn pending_events(&self) -> usize {
        self.events_rx.len()
    }

    /// Apply queued model changes in arrival order. `snapshot` is the model's
    /// current state, used wherever a change needs more than its payload.
    pub async fn sync(&mut self, snapshot: &SequencerState) {
        let events: Vec<ModelEvent> = self.events_rx.try_iter().collect();
        if events.is_empty() {
            return;
        }
        self.reconcile_voices(snapshot);
        for event in events {
            self.apply_event(event, snapshot).await;
        }
    }

    async fn apply_event(&mut self, event: ModelEvent, snapshot: &SequencerState) {
        debug!(event = event.kind().name(), "Applying model change");
        match event {
            ModelEvent::IsPlayingChange(true) => {
                if let Err(e) = self.start_playback(snapshot).await {
                    error!(error = %e, "Playback could not start");
                }
            }
            ModelEvent::IsPlayingChange(false) => self.stop_playback(),
            ModelEvent::BpmChange(bpm) => self.set_tempo(bpm),
            ModelEvent::BarMultiplierChange(multiplier) => self.set_bar_multiplier(multiplier),
            ModelEvent::VelocityRandomizationChange(value) => self.params.velocity_randomization = value,
            ModelEvent::NoteDurationChange(value) => self.params.note_duration = value,
            ModelEvent::SequencerPatternChange { voice_index, pattern } => {
                let Some(voice) = self.voice_mut(voice_index) else { return };
                voice.config.pattern = pattern;
                self.rebuild_voice(voice_index);
            }
            ModelEvent::SequencerDivisionsChange { voice_index, divisions, pattern } => {
                let Some(voice) = self.voice_mut(voice_index) else { return };
                voice.config.divisions = divisions;
                voice.config.pattern = pattern;
                self.rebuild_voice(voice_index);
            }
            ModelEvent::SequencerSoundChange { voice_index, sound } => {
                let Some(voice) = self.voice_mut(voice_index) else { return };
                voice.config.sound = sound;
                self.replace_source(voice_index);
            }
            ModelEvent::SequencerNoteChange { voice_index, note } => {
                if let Some(voice) = self.voice_mut(voice_index) {
                    voice.config.note = note;
                }
            }
            ModelEvent::SequencerVolumeChange { voice_index, volume } => {
                let Some(voice) = self.voice_mut(voice_index) else { return };
                voice.config.volume = volume;
                self.host.set_volume(voice_index, gain_of(volume));
            }
        }
    }

    fn voice_mut(&mut self, index: usize) -> Option<&mut VoiceRuntime> {
        let voice = self.voices.get_mut(index);
        if voice.is_none() {
            warn!(voice = index, "Change for unknown voice ignored");
        }
        voice
    }

    /// Grow or shrink the runtime list to the snapshot's voice count
    fn reconcile_voices(&mut self, snapshot: &SequencerState) {
        while self.voices.len() > snapshot.voices.len() {
            let index = self.voices.len() - 1;
            self.clear_schedule(index);
            self.release_source(index);
            self.voices.pop();
        }
        for (index, voice) in snapshot.voices.iter().enumerate().skip(self.voices.len()) {
            self.host.set_volume(index, gain_of(voice.volume));
            self.voices.push(VoiceRuntime::new(voice.clone()));
        }
    }

    /// Rebuild every voice from `snapshot` and start the transport. Resumes
    /// a suspended host clock first; that is the only step that waits.
    pub async fn start_playback(&mut self, snapshot: &SequencerState) -> Result<(), HostError> {
        match self.host.clock_state() {
            ClockState::Suspended => self.host.resume().await?,
            ClockState::Running => {}
            ClockState::Closed => return Err(HostError::Closed),
        }

        self.dispose_all();

        self.params = PlaybackParams::from_state(snapshot);
        let now = self.host.now();
        self.transport.set_bpm(self.params.effective_bpm(), now);
        self.voices = snapshot.voices.iter().cloned().map(VoiceRuntime::new).collect();
        for (index, voice) in snapshot.voices.iter().enumerate() {
            self.host.set_volume(index, gain_of(voice.volume));
        }
        for index in 0..self.voices.len() {
            self.ensure_source(index);
            self.build_schedule(index);
        }

        self.transport.start(now);
        for index in 0..self.voices.len() {
            self.start_schedule(index);
        }

        let frame = self.transport.schedule_repeat_beats(FRAME_INTERVAL_BEATS, None);
        self.transport.start_schedule(frame, 0.0, now);
        self.frame_schedule = Some(frame);

        self.playing = true;
        info!(voices = self.voices.len(), bpm = self.params.effective_bpm(), "Playback started");
        Ok(())
    }

    /// Pause the transport. Sources and schedules are kept for the next start.
    pub fn stop_playback(&mut self) {
        let now = self.host.now();
        self.transport.pause(now);
        if let Some(frame) = self.frame_schedule.take() {
            self.transport.clear(frame);
        }
        if let Some(observer) = self.observer.as_mut() {
            observer.on_reset();
        }
        self.playing = false;
        info!("Playback stopped");
    }

    fn set_tempo(&mut self, bpm: i32) {
        self.params.bpm = bpm;
        let now = self.host.now();
        self.transport.set_bpm(self.params.effective_bpm(), now);
        debug!(bpm, effective = self.params.effective_bpm(), "Tempo updated");
    }

    fn set_bar_multiplier(&mut self, multiplier: i32) {
        self.params.bar_multiplier = multiplier;
        let now = self.host.now();
        self.transport.set_bpm(self.params.effective_bpm(), now);

        match self.policy {
            BarMultiplierPolicy::Rebuild => {
                for index in 0..self.voices.len() {
                    self.rebuild_voice(index);
                }
            }
            BarMultiplierPolicy::PatchInPlace => {
                for voice in &self.voices {
                    let Some(id) = voice.schedule else { continue };
                    let divisions = voice.config.divisions;
                    self.transport.set_schedule_interval(id, self.params.step_interval(divisions));
                    self.transport
                        .set_schedule_length(id, timing::extended_step_count(divisions, multiplier));
                }
            }
        }
        debug!(multiplier, policy = ?self.policy, "Bar multiplier updated");
    }

    /// Replace one voice's schedule, keeping its source when the sound still
    /// matches
    fn rebuild_voice(&mut self, index: usize) {
        if !self.voices[index].is_built() {
            return;
        }
        self.clear_schedule(index);
        self.ensure_source(index);
        self.build_schedule(index);
        if self.transport.is_started() {
            self.start_schedule(index);
        }
    }

    /// Swap the source for a new sound. The schedule keeps running and picks
    /// up the new source on its next tick.
    fn replace_source(&mut self, index: usize) {
        if !self.voices[index].is_built() {
            return;
        }
        self.release_source(index);
        self.ensure_source(index);
    }

    fn ensure_source(&mut self, index: usize) {
        let voice = &mut self.voices[index];
        let wanted = voice.config.sound;
        match voice.source {
            Some((_, sound)) if sound == wanted => return,
            Some((handle, sound)) => {
                debug!(voice = index, from = sound.as_str(), to = wanted.as_str(), "Source no longer matches");
                self.host.dispose(handle);
                voice.source = None;
            }
            None => {}
        }
        match self.host.configure(index, wanted) {
            Ok(handle) => {
                voice.source = Some((handle, wanted));
                if matches!(voice.phase, VoicePhase::Uninitialized | VoicePhase::Disposed) {
                    voice.phase = VoicePhase::Configured;
                }
            }
            Err(e) => warn!(voice = index, sound = wanted.as_str(), error = %e, "Source could not be built"),
        }
    }

    fn release_source(&mut self, index: usize) {
        if let Some((handle, _)) = self.voices[index].source.take() {
            self.host.dispose(handle);
        }
    }

    fn build_schedule(&mut self, index: usize) {
        let params = self.params;
        let voice = &mut self.voices[index];
        let divisions = voice.config.divisions;
        let length = timing::extended_step_count(divisions, params.bar_multiplier);
        voice.step_count = length;
        let id = self.transport.schedule_repeat(params.step_interval(divisions), Some(length));
        voice.schedule = Some(id);
        voice.phase = VoicePhase::Scheduled;
    }

    fn start_schedule(&mut self, index: usize) {
        if let Some(id) = self.voices[index].schedule {
            let now = self.host.now();
            self.transport.start_schedule(id, 0.0, now);
        }
    }

    fn clear_schedule(&mut self, index: usize) {
        let voice = &mut self.voices[index];
        if let Some(id) = voice.schedule.take() {
            self.transport.clear(id);
            voice.phase = VoicePhase::Reconfiguring;
        }
    }

    /// Schedules first, then sources
    fn dispose_all(&mut self) {
        if let Some(frame) = self.frame_schedule.take() {
            self.transport.clear(frame);
        }
        for voice in &mut self.voices {
            if let Some(id) = voice.schedule.take() {
                self.transport.clear(id);
            }
        }
        for voice in &mut self.voices {
            if let Some((handle, _)) = voice.source.take() {
                self.host.dispose(handle);
            }
            voice.phase = VoicePhase::Disposed;
        }
    }

    /// Fire every tick due within the lookahead window. Returns the number
    /// of voice ticks handled.
    pub fn pump(&mut self) -> usize {
        let now = self.host.now();
        let due = self.transport.collect_due(now, self.lookahead);
        let mut handled = 0;
        for tick in due {
            if Some(tick.schedule) == self.frame_schedule {
                let secs = self.transport.seconds_at(tick.time);
                if let Some(observer) = self.observer.as_mut() {
                    observer.on_frame(secs);
                }
                continue;
            }
            if let Some(index) = self.voices.iter().position(|v| v.schedule == Some(tick.schedule)) {
                self.run_voice_tick(index, tick);
                handled += 1;
            }
        }
        handled
    }

    fn run_voice_tick(&mut self, index: usize, tick: DueTick) {
        if tick.time < 0.0 {
            return;
        }
        let voice = &self.voices[index];
        let divisions = voice.config.divisions.max(1);
        if let Some(observer) = self.observer.as_mut() {
            observer.on_step(index, tick.step % divisions as usize, tick.time);
        }
        if !voice.is_step_active(tick.step) {
            return;
        }
        let Some((handle, sound)) = voice.source else {
            debug!(voice = index, "Active step without a source");
            return;
        };

        let velocity = timing::live_velocity(&mut self.rng, self.params.velocity_randomization);
        let step_secs = self.params.step_interval(divisions);
        let duration = timing::effective_duration(step_secs, self.params.note_duration, MIN_STEP_SECS);
        let now = self.host.now();
        let start = tick.time.max(now);

        let trigger = if sound.is_noise() {
            let stop = (tick.time + duration).max(now + MIN_STEP_SECS);
            Trigger { start, duration: stop - start, velocity: 1.0, pitch_hz: None }
        } else {
            let pitch = midi_to_hz(note_to_midi(Some(&voice.config.note)));
            Trigger { start, duration, velocity, pitch_hz: Some(pitch) }
        };

        trace!(voice = index, step = tick.step, start, duration = trigger.duration, "Trigger");
        if let Err(e) = self.host.trigger(handle, trigger) {
            warn!(voice = index, error = %e, "Error playing sound");
        }
    }

    /// Release every schedule and source
    pub fn shutdown(&mut self) {
        let now = self.host.now();
        self.transport.pause(now);
        self.dispose_all();
        self.playing = false;
        info!("Sequencer engine shut down");
    }
}

fn gain_of(volume: i32) -> f32 {
    volume.clamp(0, 100) as f32 / 100.0
}
