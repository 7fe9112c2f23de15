//! Shared musical clock and repeating schedules
//!
//! The transport runs in beats anchored to the host audio clock. Schedules
//! fire on multiples of their interval from a start beat. Nothing here runs
//! on its own; the owner calls [`Transport::collect_due`] regularly and acts on
//! the returned ticks.

use std::collections::BTreeMap;

use tracing::{debug, warn};

/// Upper bound on ticks one schedule may return per collection. Anything
/// beyond it means the caller stalled, and the missed ticks are dropped.
const MAX_TICKS_PER_COLLECT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Started,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleId(u64);

/// A schedule firing that falls inside the lookahead window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DueTick {
    pub schedule: ScheduleId,
    /// Host clock seconds
    pub time: f64,
    /// Transport position in beats
    pub beat: f64,
    /// Step within the schedule's length, or the raw iteration count
    /// for schedules without a length
    pub step: usize,
}

#[derive(Debug, Clone)]
struct Schedule {
    interval_beats: f64,
    length: Option<usize>,
    /// Beat of iteration zero, None until started
    origin: Option<f64>,
    next_iteration: u64,
}

impl Schedule {
    fn beat_of(&self, origin: f64, iteration: u64) -> f64 {
        origin + iteration as f64 * self.interval_beats
    }
}

#[derive(Debug)]
pub struct Transport {
    state: TransportState,
    bpm: f64,
    /// Position at `anchor_time`
    anchor_beats: f64,
    anchor_time: f64,
    schedules: BTreeMap<ScheduleId, Schedule>,
    next_id: u64,
}

impl Transport {
    pub fn new(bpm: f64) -> Self {
        Self {
            state: TransportState::Stopped,
            bpm: bpm.max(1.0),
            anchor_beats: 0.0,
            anchor_time: 0.0,
            schedules: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn is_started(&self) -> bool {
        self.state == TransportState::Started
    }

    /// Position in beats at host time `now`
    pub fn position_at(&self, now: f64) -> f64 {
        match self.state {
            TransportState::Started => self.anchor_beats + (now - self.anchor_time) * self.bpm / 60.0,
            _ => self.anchor_beats,
        }
    }

    /// Position in seconds at the current tempo
    pub fn seconds_at(&self, now: f64) -> f64 {
        self.position_at(now) * 60.0 / self.bpm
    }

    /// Host time at which the transport reaches `beat`
    fn time_of(&self, beat: f64) -> f64 {
        self.anchor_time + (beat - self.anchor_beats) * 60.0 / self.bpm
    }

    pub fn start(&mut self, now: f64) {
        if self.state == TransportState::Started {
            return;
        }
        self.anchor_time = now;
        self.state = TransportState::Started;
        debug!(position = self.anchor_beats, "Transport started");
    }

    /// Freeze the position. Schedules stay registered.
    pub fn pause(&mut self, now: f64) {
        if self.state != TransportState::Started {
            return;
        }
        self.anchor_beats = self.position_at(now);
        self.anchor_time = now;
        self.state = TransportState::Paused;
        debug!(position = self.anchor_beats, "Transport paused");
    }

    /// Rewind to zero. Started schedules restart from their origin.
    pub fn stop(&mut self) {
        self.state = TransportState::Stopped;
        self.anchor_beats = 0.0;
        for schedule in self.schedules.values_mut() {
            schedule.next_iteration = 0;
        }
    }

    /// Change tempo without moving the current position
    pub fn set_bpm(&mut self, bpm: f64, now: f64) {
        let bpm = bpm.max(1.0);
        if self.state == TransportState::Started {
            self.anchor_beats = self.position_at(now);
            self.anchor_time = now;
        }
        self.bpm = bpm;
    }

    fn secs_to_beats(&self, secs: f64) -> f64 {
        secs * self.bpm / 60.0
    }

    /// Register a repeat every `interval_secs` (measured at the current
    /// tempo). It stays silent until [`Transport::start_schedule`].
    pub fn schedule_repeat(&mut self, interval_secs: f64, length: Option<usize>) -> ScheduleId {
        let beats = self.secs_to_beats(interval_secs);
        self.schedule_repeat_beats(beats, length)
    }

    pub fn schedule_repeat_beats(&mut self, interval_beats: f64, length: Option<usize>) -> ScheduleId {
        let id = ScheduleId(self.next_id);
        self.next_id += 1;
        self.schedules.insert(
            id,
            Schedule {
                interval_beats: interval_beats.max(f64::EPSILON),
                length: length.filter(|&l| l > 0),
                origin: None,
                next_iteration: 0,
            },
        );
        id
    }

    /// Start firing from `at_beats`. Iterations already behind the current
    /// position are skipped.
    pub fn start_schedule(&mut self, id: ScheduleId, at_beats: f64, now: f64) -> bool {
        let position = self.position_at(now);
        let Some(schedule) = self.schedules.get_mut(&id) else {
            return false;
        };
        let behind = ((position - at_beats) / schedule.interval_beats).ceil();
        schedule.origin = Some(at_beats);
        schedule.next_iteration = if behind > 0.0 { behind as u64 } else { 0 };
        true
    }

    /// Returns false if the schedule was already gone
    pub fn clear(&mut self, id: ScheduleId) -> bool {
        self.schedules.remove(&id).is_some()
    }

    pub fn contains(&self, id: ScheduleId) -> bool {
        self.schedules.contains_key(&id)
    }

    pub fn schedule_count(&self) -> usize {
        self.schedules.len()
    }

    /// Change a schedule's interval. The next pending firing keeps its beat;
    /// later ones follow the new spacing.
    pub fn set_schedule_interval(&mut self, id: ScheduleId, interval_secs: f64) -> bool {
        let beats = self.secs_to_beats(interval_secs).max(f64::EPSILON);
        let Some(schedule) = self.schedules.get_mut(&id) else {
            return false;
        };
        if let Some(origin) = schedule.origin {
            let pending = schedule.beat_of(origin, schedule.next_iteration);
            let step_offset = schedule.next_iteration;
            schedule.interval_beats = beats;
            schedule.origin = Some(pending - step_offset as f64 * beats);
        } else {
            schedule.interval_beats = beats;
        }
        true
    }

    pub fn set_schedule_length(&mut self, id: ScheduleId, length: usize) -> bool {
        let Some(schedule) = self.schedules.get_mut(&id) else {
            return false;
        };
        schedule.length = Some(length).filter(|&l| l > 0);
        true
    }

    /// Every firing with a host time before `now + lookahead`, ordered by
    /// time. Ties keep schedule creation order.
    pub fn collect_due(&mut self, now: f64, lookahead: f64) -> Vec<DueTick> {
        if self.state != TransportState::Started {
            return Vec::new();
        }
        let horizon = self.position_at(now + lookahead);
        let mut due = Vec::new();

        let ids: Vec<ScheduleId> = self.schedules.keys().copied().collect();
        for id in ids {
            let Some(schedule) = self.schedules.get(&id) else { continue };
            let Some(origin) = schedule.origin else { continue };

            let mut iteration = schedule.next_iteration;
            let mut fired = 0;
            let mut ticks = Vec::new();
            while schedule.beat_of(origin, iteration) < horizon {
                if fired == MAX_TICKS_PER_COLLECT {
                    let skip_to = ((horizon - origin) / schedule.interval_beats).ceil() as u64;
                    warn!(?id, dropped = skip_to.saturating_sub(iteration), "Clock stalled, dropping missed ticks");
                    iteration = skip_to;
                    break;
                }
                let beat = schedule.beat_of(origin, iteration);
                let step = match schedule.length {
                    Some(length) => (iteration % length as u64) as usize,
                    None => iteration as usize,
                };
                ticks.push(DueTick { schedule: id, time: self.time_of(beat), beat, step });
                iteration += 1;
                fired += 1;
            }

            if let Some(schedule) = self.schedules.get_mut(&id) {
                schedule.next_iteration = iteration;
            }
            due.extend(ticks);
        }

        due.sort_by(|a, b| a.time.total_cmp(&b.time));
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(ticks: &[DueTick]) -> Vec<usize> {
        ticks.iter().map(|t| t.step).collect()
    }

    #[test]
    fn test_nothing_due_until_started() {
        let mut transport = Transport::new(120.0);
        let id = transport.schedule_repeat(0.5, Some(4));
        transport.start_schedule(id, 0.0, 0.0);
        assert!(transport.collect_due(0.0, 10.0).is_empty());
    }

    #[test]
    fn test_repeat_wraps_at_length() {
        let mut transport = Transport::new(120.0);
        // 0.125s at 120 bpm is a quarter beat
        let id = transport.schedule_repeat(0.125, Some(3));
        transport.start(1.0);
        transport.start_schedule(id, 0.0, 1.0);

        let ticks = transport.collect_due(1.0, 0.6);
        assert_eq!(steps(&ticks), vec![0, 1, 2, 0, 1]);
        assert!((ticks[0].time - 1.0).abs() < 1e-9);
        assert!((ticks[4].time - 1.5).abs() < 1e-9);

        // already collected ticks are not returned again
        let next = transport.collect_due(1.3, 0.4);
        assert_eq!(steps(&next), vec![2]);
    }

    #[test]
    fn test_ticks_are_time_ordered_across_schedules() {
        let mut transport = Transport::new(60.0);
        let a = transport.schedule_repeat(0.5, Some(2));
        let b = transport.schedule_repeat(0.3, Some(3));
        transport.start(0.0);
        transport.start_schedule(a, 0.0, 0.0);
        transport.start_schedule(b, 0.0, 0.0);

        let ticks = transport.collect_due(0.0, 1.0);
        let times: Vec<f64> = ticks.iter().map(|t| t.time).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(ticks[0].schedule, a);
        assert_eq!(ticks[1].schedule, b);
    }

    #[test]
    fn test_tempo_change_rescales_pending_ticks() {
        let mut transport = Transport::new(60.0);
        let id = transport.schedule_repeat(1.0, None);
        transport.start(0.0);
        transport.start_schedule(id, 0.0, 0.0);
        assert_eq!(transport.collect_due(0.0, 0.01).len(), 1);

        transport.set_bpm(120.0, 0.0);
        let ticks = transport.collect_due(0.0, 0.6);
        assert_eq!(ticks.len(), 1);
        assert!((ticks[0].time - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_pause_keeps_position() {
        let mut transport = Transport::new(60.0);
        transport.start(0.0);
        transport.pause(2.0);
        assert_eq!(transport.state(), TransportState::Paused);
        assert!((transport.position_at(10.0) - 2.0).abs() < 1e-9);
        transport.start(10.0);
        assert!((transport.position_at(11.0) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_schedule_started_late_skips_past_iterations() {
        let mut transport = Transport::new(60.0);
        let id = transport.schedule_repeat(1.0, Some(4));
        transport.start(0.0);
        transport.start_schedule(id, 0.0, 2.5);
        let ticks = transport.collect_due(2.5, 0.6);
        assert_eq!(steps(&ticks), vec![3]);
        assert!((ticks[0].time - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_cleared_schedule_never_fires() {
        let mut transport = Transport::new(60.0);
        let id = transport.schedule_repeat(0.1, Some(4));
        transport.start(0.0);
        transport.start_schedule(id, 0.0, 0.0);
        assert!(transport.clear(id));
        assert!(!transport.clear(id));
        assert!(transport.collect_due(0.0, 1.0).is_empty());
    }

    #[test]
    fn test_patch_interval_and_length() {
        let mut transport = Transport::new(60.0);
        let id = transport.schedule_repeat(1.0, Some(2));
        transport.start(0.0);
        transport.start_schedule(id, 0.0, 0.0);
        assert_eq!(transport.collect_due(0.0, 0.5).len(), 1);

        transport.set_schedule_interval(id, 0.5);
        transport.set_schedule_length(id, 3);
        let ticks = transport.collect_due(0.5, 1.0);
        // pending firing stays at 1.0, then every 0.5s
        let times: Vec<f64> = ticks.iter().map(|t| t.time).collect();
        assert_eq!(times, vec![1.0]);
        let ticks = transport.collect_due(1.0, 0.6);
        assert_eq!(steps(&ticks), vec![2]);
    }

    #[test]
    fn test_stalled_clock_drops_missed_ticks() {
        let mut transport = Transport::new(60.0);
        let id = transport.schedule_repeat(0.01, None);
        transport.start(0.0);
        transport.start_schedule(id, 0.0, 0.0);
        let ticks = transport.collect_due(5.0, 0.0);
        assert_eq!(ticks.len(), MAX_TICKS_PER_COLLECT);
        assert!(transport.collect_due(5.0, 0.0).is_empty());
    }
}
