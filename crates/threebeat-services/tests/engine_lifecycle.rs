//! Playback lifecycle against a host that records every call

use std::collections::HashSet;

use fastrand::Rng;
use threebeat_core::timing::{effective_duration, MIN_STEP_SECS};
use threebeat_core::{Action, NoiseColor, OscillatorType, PatternModel, SequencerState, Sound};
use threebeat_services::{
    ClockState, HostError, SequencerEngine, SourceHandle, Trigger, VoiceHost, VoicePhase,
};

#[derive(Default)]
struct RecordingHost {
    now: f64,
    state: Option<ClockState>,
    resumes: usize,
    next_handle: u64,
    live: HashSet<SourceHandle>,
    configured: Vec<(SourceHandle, usize, Sound)>,
    disposed: Vec<SourceHandle>,
    triggers: Vec<(SourceHandle, Trigger)>,
    volumes: Vec<(usize, f32)>,
    fail_triggers: bool,
}

impl RecordingHost {
    fn triggers_for(&self, handle: Option<SourceHandle>) -> Vec<Trigger> {
        self.triggers.iter().filter(|(h, _)| Some(*h) == handle).map(|(_, t)| *t).collect()
    }
}

impl VoiceHost for RecordingHost {
    fn clock_state(&self) -> ClockState {
        self.state.unwrap_or(ClockState::Suspended)
    }

    async fn resume(&mut self) -> Result<(), HostError> {
        self.resumes += 1;
        self.state = Some(ClockState::Running);
        Ok(())
    }

    fn now(&self) -> f64 {
        self.now
    }

    fn configure(&mut self, voice_index: usize, sound: Sound) -> Result<SourceHandle, HostError> {
        self.next_handle += 1;
        let handle = SourceHandle(self.next_handle);
        self.live.insert(handle);
        self.configured.push((handle, voice_index, sound));
        Ok(handle)
    }

    fn trigger(&mut self, handle: SourceHandle, trigger: Trigger) -> Result<(), HostError> {
        if self.fail_triggers {
            return Err(HostError::Rejected("test failure".into()));
        }
        if !self.live.contains(&handle) {
            return Err(HostError::UnknownSource(handle));
        }
        self.triggers.push((handle, trigger));
        Ok(())
    }

    fn dispose(&mut self, handle: SourceHandle) {
        self.live.remove(&handle);
        self.disposed.push(handle);
    }

    fn set_volume(&mut self, voice_index: usize, gain: f32) {
        self.volumes.push((voice_index, gain));
    }
}

fn setup() -> (PatternModel, SequencerEngine<RecordingHost>) {
    let mut model = PatternModel::new(SequencerState::default());
    let engine = SequencerEngine::new(RecordingHost::default(), model.state()).with_rng(Rng::with_seed(17));
    engine.attach(&mut model);
    (model, engine)
}

fn sync(model: &PatternModel, engine: &mut SequencerEngine<RecordingHost>) {
    tokio_test::block_on(engine.sync(model.state()));
}

fn play(model: &mut PatternModel, engine: &mut SequencerEngine<RecordingHost>) {
    model.set_playing(true);
    sync(model, engine);
}

/// Advance the clock in 10ms hops, pumping after each
fn run_until(engine: &mut SequencerEngine<RecordingHost>, until: f64) {
    let mut t = engine.host().now;
    while t <= until + 1e-9 {
        engine.host_mut().now = t;
        engine.pump();
        t += 0.01;
    }
}

#[test]
fn test_start_resumes_suspended_clock_once() {
    let (mut model, mut engine) = setup();
    play(&mut model, &mut engine);
    assert_eq!(engine.host().resumes, 1);
    assert_eq!(engine.host().configured.len(), 3);

    model.set_playing(false);
    sync(&model, &mut engine);
    play(&mut model, &mut engine);
    assert_eq!(engine.host().resumes, 1);
}

#[test]
fn test_stop_keeps_handles_and_restart_replaces_them() {
    let (mut model, mut engine) = setup();
    play(&mut model, &mut engine);
    let sources: Vec<_> = engine.voices().iter().map(|v| v.source()).collect();
    let schedules: Vec<_> = engine.voices().iter().map(|v| v.schedule()).collect();

    model.set_playing(false);
    sync(&model, &mut engine);
    assert!(engine.host().disposed.is_empty());
    let after_stop: Vec<_> = engine.voices().iter().map(|v| v.source()).collect();
    assert_eq!(sources, after_stop);

    play(&mut model, &mut engine);
    let disposed: HashSet<_> = engine.host().disposed.iter().copied().map(Some).collect();
    assert!(sources.iter().all(|s| disposed.contains(s)));
    for old in schedules.into_iter().flatten() {
        assert!(!engine.transport().contains(old));
    }
    assert_eq!(engine.host().live.len(), 3);
}

#[test]
fn test_pattern_change_rebuilds_schedule_but_keeps_source() {
    let (mut model, mut engine) = setup();
    play(&mut model, &mut engine);
    let source = engine.voices()[0].source();
    let schedule = engine.voices()[0].schedule();

    model.toggle_step("sequencer1", 2);
    sync(&model, &mut engine);

    let voice = &engine.voices()[0];
    assert_eq!(voice.source(), source);
    assert_ne!(voice.schedule(), schedule);
    assert_eq!(voice.phase(), VoicePhase::Scheduled);
    assert!(voice.is_step_active(2));
    assert!(engine.host().disposed.is_empty());
    // untouched voices keep their schedules
    assert_eq!(engine.transport().schedule_count(), 4);
}

#[test]
fn test_sound_change_replaces_source_but_keeps_schedule() {
    let (mut model, mut engine) = setup();
    play(&mut model, &mut engine);
    let source = engine.voices()[1].source();
    let schedule = engine.voices()[1].schedule();

    let brown = Sound::Noise(NoiseColor::Brown);
    model.set_sound("sequencer2", brown);
    sync(&model, &mut engine);

    let voice = &engine.voices()[1];
    assert_eq!(voice.schedule(), schedule);
    assert_ne!(voice.source(), source);
    assert_eq!(engine.host().disposed, vec![source.unwrap()]);
    let (handle, index, sound) = *engine.host().configured.last().unwrap();
    assert_eq!((Some(handle), index, sound), (voice.source(), 1, brown));
}

#[test]
fn test_divisions_change_resizes_steps() {
    let (mut model, mut engine) = setup();
    play(&mut model, &mut engine);
    model.set_divisions("sequencer3", 7);
    sync(&model, &mut engine);
    assert_eq!(engine.voices()[2].step_count(), 7);
    assert_eq!(engine.voices()[2].config().divisions, 7);
}

#[test]
fn test_bar_multiplier_rebuilds_every_schedule_and_slows_transport() {
    let (mut model, mut engine) = setup();
    play(&mut model, &mut engine);
    let sources: Vec<_> = engine.voices().iter().map(|v| v.source()).collect();
    let schedules: Vec<_> = engine.voices().iter().map(|v| v.schedule()).collect();

    model.set_bar_multiplier(3);
    sync(&model, &mut engine);

    assert_eq!(engine.transport().bpm(), 60.0);
    for (i, voice) in engine.voices().iter().enumerate() {
        assert_eq!(voice.source(), sources[i]);
        assert_ne!(voice.schedule(), schedules[i]);
        assert_eq!(voice.step_count(), voice.config().divisions as usize * 3);
    }
}

#[test]
fn test_tempo_change_updates_transport_in_place() {
    let (mut model, mut engine) = setup();
    play(&mut model, &mut engine);
    let schedules: Vec<_> = engine.voices().iter().map(|v| v.schedule()).collect();
    model.set_tempo(90);
    sync(&model, &mut engine);
    assert_eq!(engine.transport().bpm(), 90.0);
    let after: Vec<_> = engine.voices().iter().map(|v| v.schedule()).collect();
    assert_eq!(schedules, after);
}

#[test]
fn test_volume_change_reaches_host() {
    let (mut model, mut engine) = setup();
    model.set_volume("sequencer2", 40);
    sync(&model, &mut engine);
    assert_eq!(engine.host().volumes.last(), Some(&(1, 0.4)));
}

#[test]
fn test_active_steps_trigger_on_the_grid() {
    let (mut model, mut engine) = setup();
    model.dispatch(Action::SetVelocityRandomization(0));
    for step in 0..4 {
        model.toggle_step("sequencer1", step);
    }
    play(&mut model, &mut engine);
    run_until(&mut engine, 0.4);

    let note_duration = model.state().note_duration;
    let triggers = engine.host().triggers_for(engine.voices()[0].source());
    let starts: Vec<f64> = triggers.iter().map(|t| t.start).collect();
    // 120 bpm, 4 divisions: a step every 125ms
    assert!(starts.len() >= 4);
    for (i, start) in starts.iter().take(4).enumerate() {
        assert!((start - i as f64 * 0.125).abs() < 1e-9, "step {} at {}", i, start);
    }
    for trigger in &triggers {
        assert_eq!(trigger.velocity, 0.7);
        assert!((trigger.duration - effective_duration(0.125, note_duration, MIN_STEP_SECS)).abs() < 1e-9);
        // C3
        let pitch = trigger.pitch_hz.unwrap();
        assert!((pitch - 130.8128).abs() < 1e-3);
    }
}

#[test]
fn test_inactive_steps_never_trigger() {
    let (mut model, mut engine) = setup();
    play(&mut model, &mut engine);
    run_until(&mut engine, 1.0);
    assert!(engine.host().triggers.is_empty());
}

#[test]
fn test_noise_trigger_is_unpitched_with_minimum_length() {
    let (mut model, mut engine) = setup();
    model.set_sound("sequencer1", Sound::Noise(NoiseColor::Violet));
    model.toggle_step("sequencer1", 0);
    model.set_note_duration(0);
    model.set_tempo(240);
    play(&mut model, &mut engine);
    engine.pump();

    let triggers = engine.host().triggers_for(engine.voices()[0].source());
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].pitch_hz, None);
    assert!(triggers[0].duration >= MIN_STEP_SECS - 1e-12);
}

#[test]
fn test_late_ticks_are_triggered_no_earlier_than_now() {
    let (mut model, mut engine) = setup();
    model.set_sound("sequencer3", Sound::Oscillator(OscillatorType::FatSawtooth));
    for step in 0..5 {
        model.toggle_step("sequencer3", step);
    }
    play(&mut model, &mut engine);

    // stall: the clock jumps past several steps before the next pump
    engine.host_mut().now = 0.3;
    engine.pump();

    let triggers = engine.host().triggers_for(engine.voices()[2].source());
    assert!(triggers.len() > 1);
    assert!(triggers.iter().all(|t| t.start >= 0.3));
}

#[test]
fn test_trigger_failures_do_not_stop_playback() {
    let (mut model, mut engine) = setup();
    model.toggle_step("sequencer1", 0);
    model.toggle_step("sequencer2", 0);
    play(&mut model, &mut engine);
    engine.host_mut().fail_triggers = true;

    let handled = engine.pump();
    assert_eq!(handled, 3);
    assert!(engine.is_playing());

    engine.host_mut().fail_triggers = false;
    run_until(&mut engine, 1.0);
    assert!(!engine.host().triggers.is_empty());
}

#[test]
fn test_changes_while_stopped_apply_on_next_start() {
    let (mut model, mut engine) = setup();
    model.set_tempo(100);
    model.set_bar_multiplier(2);
    model.toggle_step("sequencer2", 1);
    sync(&model, &mut engine);
    assert!(engine.host().configured.is_empty());

    play(&mut model, &mut engine);
    let voice = &engine.voices()[1];
    assert_eq!(voice.step_count(), 6);
    let steps: Vec<bool> = (0..voice.step_count()).map(|step| voice.is_step_active(step)).collect();
    assert_eq!(steps, vec![false, true, false, false, true, false]);
    assert!((engine.transport().bpm() - 100.0 / 1.5).abs() < 1e-9);
}

#[test]
fn test_huge_bar_multiplier_plays_without_materializing_steps() {
    let (mut model, mut engine) = setup();
    model.set_divisions("sequencer1", 16);
    model.toggle_step("sequencer1", 0);
    model.set_bar_multiplier(i32::MAX);
    assert_eq!(model.state().bar_multiplier, i32::MAX);
    play(&mut model, &mut engine);

    assert!(engine.is_playing());
    let voice = &engine.voices()[0];
    assert_eq!(voice.step_count(), 16 * i32::MAX as usize);
    assert!(voice.is_step_active(16 * 5));
    assert!(!voice.is_step_active(16 * 5 + 1));

    engine.pump();
    let triggers = engine.host().triggers_for(engine.voices()[0].source());
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].start, 0.0);
}

#[test]
fn test_shutdown_disposes_all_sources() {
    let (mut model, mut engine) = setup();
    play(&mut model, &mut engine);
    engine.shutdown();
    assert!(engine.host().live.is_empty());
    assert_eq!(engine.host().disposed.len(), 3);
    assert_eq!(engine.transport().schedule_count(), 0);
}
