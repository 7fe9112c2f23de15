//! Software sound sources for the three voice families
//!
//! One monophonic source per voice. Oscillators follow a classic ADSR;
//! noise is gated with a short fade so note edges do not click.

use std::f64::consts::TAU;

use fastrand::Rng;
use threebeat_core::{NoiseColor, NoiseFilter, OscillatorType, Sound};

const SYNTH_ATTACK: f32 = 0.005;
const SYNTH_DECAY: f32 = 0.1;
const SYNTH_SUSTAIN: f32 = 0.3;
const SYNTH_RELEASE: f32 = 1.0;

const NOISE_FADE: f32 = 0.002;

/// Detune of the outer copies of a "fat" oscillator
const FAT_SPREAD_CENTS: f64 = 20.0;
const AM_HARMONICITY: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Linear ADSR, times in seconds
#[derive(Debug, Clone)]
pub struct Envelope {
    stage: Stage,
    level: f32,
    attack: f32,
    decay: f32,
    sustain: f32,
    release: f32,
}

impl Envelope {
    pub fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self { stage: Stage::Idle, level: 0.0, attack, decay, sustain, release }
    }

    /// Restart the attack from the current level
    pub fn gate_on(&mut self) {
        self.stage = Stage::Attack;
    }

    pub fn gate_off(&mut self) {
        if self.stage != Stage::Idle {
            self.stage = Stage::Release;
        }
    }

    pub fn is_idle(&self) -> bool {
        self.stage == Stage::Idle
    }

    pub fn tick(&mut self, sample_rate: f32) -> f32 {
        match self.stage {
            Stage::Idle | Stage::Sustain => {}
            Stage::Attack => {
                self.level += 1.0 / (self.attack * sample_rate).max(1.0);
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = Stage::Decay;
                }
            }
            Stage::Decay => {
                self.level -= (1.0 - self.sustain) / (self.decay * sample_rate).max(1.0);
                if self.level <= self.sustain {
                    self.level = self.sustain;
                    self.stage = Stage::Sustain;
                }
            }
            Stage::Release => {
                self.level -= 1.0 / (self.release * sample_rate).max(1.0);
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.stage = Stage::Idle;
                }
            }
        }
        self.level
    }
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Sine,
    Triangle,
    Square,
    Sawtooth,
}

impl Shape {
    /// `phase` in cycles, [0, 1)
    fn sample(self, phase: f64) -> f64 {
        match self {
            Self::Sine => (phase * TAU).sin(),
            Self::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
            Self::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Self::Sawtooth => 2.0 * phase - 1.0,
        }
    }
}

fn advance(phase: &mut f64, freq: f64, sample_rate: f32) {
    *phase += freq / sample_rate as f64;
    *phase -= phase.floor();
}

#[derive(Debug, Clone)]
struct OscillatorVoice {
    kind: OscillatorType,
    freq: f64,
    /// Main phase plus the two detuned copies used by fat shapes
    phases: [f64; 3],
    mod_phase: f64,
}

impl OscillatorVoice {
    fn new(kind: OscillatorType) -> Self {
        Self { kind, freq: 0.0, phases: [0.0; 3], mod_phase: 0.0 }
    }

    fn single(&mut self, shape: Shape, sample_rate: f32) -> f64 {
        let out = shape.sample(self.phases[0]);
        advance(&mut self.phases[0], self.freq, sample_rate);
        out
    }

    fn fat(&mut self, shape: Shape, sample_rate: f32) -> f64 {
        let ratio = 2f64.powf(FAT_SPREAD_CENTS / 1200.0);
        let freqs = [self.freq / ratio, self.freq, self.freq * ratio];
        let mut sum = 0.0;
        for (phase, freq) in self.phases.iter_mut().zip(freqs) {
            sum += shape.sample(*phase);
            advance(phase, freq, sample_rate);
        }
        sum / 3.0
    }

    fn tick(&mut self, sample_rate: f32) -> f64 {
        match self.kind {
            OscillatorType::Sine => self.single(Shape::Sine, sample_rate),
            OscillatorType::Triangle => self.single(Shape::Triangle, sample_rate),
            OscillatorType::Square => self.single(Shape::Square, sample_rate),
            OscillatorType::Sawtooth => self.single(Shape::Sawtooth, sample_rate),
            OscillatorType::FatSine => self.fat(Shape::Sine, sample_rate),
            OscillatorType::FatTriangle => self.fat(Shape::Triangle, sample_rate),
            OscillatorType::FatSquare => self.fat(Shape::Square, sample_rate),
            OscillatorType::FatSawtooth => self.fat(Shape::Sawtooth, sample_rate),
            OscillatorType::AmSine => {
                let modulator = 0.5 + 0.5 * Shape::Sine.sample(self.mod_phase);
                advance(&mut self.mod_phase, self.freq * AM_HARMONICITY, sample_rate);
                self.single(Shape::Sine, sample_rate) * modulator
            }
        }
    }
}

/// Two-pole state variable filter (12 dB/oct)
#[derive(Debug, Clone)]
struct StateVariableFilter {
    mode: NoiseFilter,
    f: f32,
    damping: f32,
    low: f32,
    band: f32,
}

impl StateVariableFilter {
    fn new(mode: NoiseFilter, sample_rate: f32) -> Self {
        let cutoff = match mode {
            NoiseFilter::Highpass { cutoff_hz } | NoiseFilter::Lowpass { cutoff_hz } => cutoff_hz,
            NoiseFilter::Bandpass { center_hz } => center_hz,
        };
        // keep the Chamberlin structure stable near Nyquist
        let cutoff = cutoff.min(sample_rate / 6.0);
        let f = 2.0 * (std::f32::consts::PI * cutoff / sample_rate).sin();
        Self { mode, f, damping: std::f32::consts::SQRT_2, low: 0.0, band: 0.0 }
    }

    fn process(&mut self, input: f32) -> f32 {
        self.low += self.f * self.band;
        let high = input - self.low - self.damping * self.band;
        self.band += self.f * high;
        match self.mode {
            NoiseFilter::Highpass { .. } => high,
            NoiseFilter::Lowpass { .. } => self.low,
            NoiseFilter::Bandpass { .. } => self.band,
        }
    }
}

#[derive(Debug, Clone)]
struct NoiseVoice {
    color: NoiseColor,
    rng: Rng,
    pink: [f32; 7],
    brown: f32,
    filter: Option<StateVariableFilter>,
}

impl NoiseVoice {
    fn new(color: NoiseColor, sample_rate: f32, seed: u64) -> Self {
        Self {
            color,
            rng: Rng::with_seed(seed),
            pink: [0.0; 7],
            brown: 0.0,
            filter: color.filter().map(|mode| StateVariableFilter::new(mode, sample_rate)),
        }
    }

    fn tick(&mut self) -> f32 {
        let white = self.rng.f32() * 2.0 - 1.0;
        match self.color {
            NoiseColor::White => white,
            NoiseColor::Pink => {
                // Paul Kellet's refined pink filter
                let b = &mut self.pink;
                b[0] = 0.99886 * b[0] + white * 0.0555179;
                b[1] = 0.99332 * b[1] + white * 0.0750759;
                b[2] = 0.96900 * b[2] + white * 0.1538520;
                b[3] = 0.86650 * b[3] + white * 0.3104856;
                b[4] = 0.55000 * b[4] + white * 0.5329522;
                b[5] = -0.7616 * b[5] - white * 0.0168980;
                let out = b[0] + b[1] + b[2] + b[3] + b[4] + b[5] + b[6] + white * 0.5362;
                b[6] = white * 0.115926;
                out * 0.11
            }
            NoiseColor::Brown => {
                self.brown = (self.brown + 0.02 * white) / 1.02;
                self.brown * 3.5
            }
            _ => match self.filter.as_mut() {
                Some(filter) => filter.process(white),
                None => white,
            },
        }
    }
}

#[derive(Debug, Clone)]
enum Generator {
    Oscillator(OscillatorVoice),
    Noise(NoiseVoice),
}

/// One voice's sound source
#[derive(Debug, Clone)]
pub struct Source {
    sound: Sound,
    voice_index: usize,
    generator: Generator,
    envelope: Envelope,
    velocity: f32,
}

impl Source {
    /// `seed` feeds the noise generator so offline renders are repeatable
    pub fn new(sound: Sound, voice_index: usize, sample_rate: f32, seed: u64) -> Self {
        let (generator, envelope) = match sound {
            Sound::Oscillator(kind) => (
                Generator::Oscillator(OscillatorVoice::new(kind)),
                Envelope::new(SYNTH_ATTACK, SYNTH_DECAY, SYNTH_SUSTAIN, SYNTH_RELEASE),
            ),
            Sound::Noise(color) => (
                Generator::Noise(NoiseVoice::new(color, sample_rate, seed)),
                Envelope::new(NOISE_FADE, NOISE_FADE, 1.0, NOISE_FADE),
            ),
        };
        Self { sound, voice_index, generator, envelope, velocity: 1.0 }
    }

    pub fn sound(&self) -> Sound {
        self.sound
    }

    pub fn voice_index(&self) -> usize {
        self.voice_index
    }

    pub fn note_on(&mut self, pitch_hz: Option<f64>, velocity: f32) {
        if let (Generator::Oscillator(osc), Some(freq)) = (&mut self.generator, pitch_hz) {
            osc.freq = freq;
        }
        self.velocity = velocity.clamp(0.0, 1.0);
        self.envelope.gate_on();
    }

    pub fn note_off(&mut self) {
        self.envelope.gate_off();
    }

    pub fn is_silent(&self) -> bool {
        self.envelope.is_idle()
    }

    pub fn tick(&mut self, sample_rate: f32) -> f32 {
        if self.envelope.is_idle() {
            return 0.0;
        }
        let raw = match &mut self.generator {
            Generator::Oscillator(osc) => osc.tick(sample_rate) as f32,
            Generator::Noise(noise) => noise.tick(),
        };
        raw * self.envelope.tick(sample_rate) * self.velocity
    }
}
