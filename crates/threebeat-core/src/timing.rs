//! Clock and humanization math shared by live playback and export
//!
//! Everything here is a pure function of its inputs. Random draws come from a
//! caller-supplied [`fastrand::Rng`] so both sinks can be seeded.

use fastrand::Rng;

/// Smallest scheduling interval / note length in seconds
pub const MIN_STEP_SECS: f64 = 0.01;

/// Base velocity for live triggers (0-1 scale)
pub const LIVE_BASE_VELOCITY: f64 = 0.7;

/// Slow-down factor a bar multiplier applies to the clock
pub fn bar_stretch(bar_multiplier: i32) -> f64 {
    1.0 + (bar_multiplier as f64 - 1.0) * 0.5
}

/// Tempo the transport actually runs at
pub fn effective_bpm(bpm: i32, bar_multiplier: i32) -> f64 {
    (bpm as f64 / bar_stretch(bar_multiplier)).max(1.0)
}

/// Length of one step in seconds
pub fn step_duration(effective_bpm: f64, divisions: u8) -> f64 {
    (60.0 / (effective_bpm * divisions as f64)).max(MIN_STEP_SECS)
}

/// Interval between live steps. The live engine stretches each step by the
/// bar factor on top of the slowed transport.
pub fn live_step_interval(bpm: i32, bar_multiplier: i32, divisions: u8) -> f64 {
    let step = step_duration(effective_bpm(bpm, bar_multiplier), divisions);
    (step * bar_stretch(bar_multiplier)).max(MIN_STEP_SECS)
}

/// Number of steps one pass over the repeated pattern takes
pub fn extended_step_count(divisions: u8, bar_multiplier: i32) -> usize {
    (divisions as usize).saturating_mul(bar_multiplier.max(1) as usize)
}

/// Whether `step` of the repeated pattern is active. Steps wrap modulo the
/// base pattern length, so nothing is materialized per bar.
pub fn step_active(pattern: &[bool], step: usize) -> bool {
    if pattern.is_empty() {
        return false;
    }
    pattern[step % pattern.len()]
}

/// Base pattern repeated across `divisions * bar_multiplier` steps, yielded
/// lazily; the multiplier is unbounded above
pub fn extended_pattern(pattern: &[bool], bar_multiplier: i32) -> impl Iterator<Item = bool> + '_ {
    let len = pattern.len().saturating_mul(bar_multiplier.max(1) as usize);
    (0..len).map(move |i| step_active(pattern, i))
}

/// Map the 0-100 note duration slider to a fraction of a step (0.1-1.0)
pub fn duration_factor(note_duration: i32) -> f64 {
    0.1 + (note_duration as f64 / 100.0) * 0.9
}

/// Sounding length of a note in seconds
pub fn effective_duration(step_secs: f64, note_duration: i32, lower_bound: f64) -> f64 {
    (step_secs * duration_factor(note_duration)).max(lower_bound)
}

/// Symmetric jitter in [-amount, amount)
fn jitter(rng: &mut Rng, randomization: i32, base: f64) -> f64 {
    (rng.f64() * 2.0 - 1.0) * (randomization as f64 / 100.0) * base
}

/// Live trigger velocity on a 0-1 scale around a fixed 0.7 base
pub fn live_velocity(rng: &mut Rng, randomization: i32) -> f64 {
    let base = LIVE_BASE_VELOCITY;
    (base + jitter(rng, randomization, base)).clamp(0.0, 1.0)
}

/// Export velocity on a 0-127 scale around a random 70-99 base.
///
/// Always takes two draws (base, then jitter) so seeded output does not
/// depend on the randomization amount.
pub fn export_velocity(rng: &mut Rng, randomization: i32) -> u8 {
    let base = (70.0 + rng.f64() * 30.0).floor();
    let randomized = (base + jitter(rng, randomization, base)).clamp(0.0, 127.0);
    randomized.floor() as u8
}

/// Note length in export ticks, never shorter than one tick
pub fn export_duration_ticks(ticks_per_division: u32, note_duration: i32) -> u32 {
    ((ticks_per_division as f64 * duration_factor(note_duration)).floor() as u32).max(1)
}
