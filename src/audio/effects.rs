// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The mastering chain every pad plays through:
//! `filter[0] -> ... -> filter[5] -> master gain -> balance -> analyser -> output`.
//!
//! The chain is wired once when it is created. Only its parameters change
//! afterwards, and they are shared with the DSP through atomics.

use std::{
    f32::consts::PI,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use realfft::RealFftPlanner;
use tracing::debug;

use super::{Backend, InputTap, OUTPUT_CHANNELS};
use crate::error::IndexError;

/// Center frequencies of the peaking filters, in Hz.
pub const FILTER_FREQUENCIES: [f32; 6] = [60.0, 170.0, 350.0, 1000.0, 3500.0, 10000.0];
pub const FILTER_Q: f32 = 1.0;
pub const MIN_FILTER_GAIN_DB: f32 = -30.0;
pub const MAX_FILTER_GAIN_DB: f32 = 30.0;
pub const ANALYSER_FFT_SIZE: usize = 512;
/// Decibel range mapped onto 0..=255 by [`EffectsChain::byte_spectrum`].
pub const ANALYSER_MIN_DB: f32 = -100.0;
pub const ANALYSER_MAX_DB: f32 = -30.0;

const BANDS: usize = FILTER_FREQUENCIES.len();

/// A node of the chain, in signal order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Node {
    Filter(f32),
    MasterGain,
    Balance,
    Analyser,
    Output,
}

#[derive(Debug)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(value: f32) -> AtomicF32 {
        AtomicF32(AtomicU32::new(value.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// The most recent mono samples seen by the analyser.
struct AnalyserRing {
    samples: Vec<f32>,
    write: usize,
}

impl AnalyserRing {
    fn push(&mut self, sample: f32) {
        self.samples[self.write] = sample;
        self.write = (self.write + 1) % self.samples.len();
    }

    /// Oldest first.
    fn ordered(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.samples.len());
        out.extend_from_slice(&self.samples[self.write..]);
        out.extend_from_slice(&self.samples[..self.write]);
        out
    }
}

struct ChainParams {
    filter_gains: [AtomicF32; BANDS],
    master_gain: AtomicF32,
    balance: AtomicF32,
    analyser: Mutex<AnalyserRing>,
}

/// Handle to the chain owned by the engine.
pub struct EffectsChain {
    params: Arc<ChainParams>,
    input: InputTap,
}

impl EffectsChain {
    /// Builds the chain for the backend and attaches its processing to the backend's output.
    pub fn new(backend: &dyn Backend) -> EffectsChain {
        let params = Arc::new(ChainParams {
            filter_gains: std::array::from_fn(|_| AtomicF32::new(0.0)),
            master_gain: AtomicF32::new(1.0),
            balance: AtomicF32::new(0.0),
            analyser: Mutex::new(AnalyserRing {
                samples: vec![0.0; ANALYSER_FFT_SIZE],
                write: 0,
            }),
        });

        let sink = backend.output_sink();
        sink.attach(ChainDsp::new(params.clone(), backend.sample_rate()));
        debug!(backend = backend.to_string(), "Effects chain attached.");

        EffectsChain {
            params,
            input: sink.input_tap(),
        }
    }

    /// The tap playback nodes connect to: the first filter.
    pub fn input(&self) -> InputTap {
        self.input.clone()
    }

    /// The fixed node order.
    pub fn topology(&self) -> Vec<Node> {
        FILTER_FREQUENCIES
            .iter()
            .map(|frequency| Node::Filter(*frequency))
            .chain([Node::MasterGain, Node::Balance, Node::Analyser, Node::Output])
            .collect()
    }

    /// Sets a band's gain in dB, clamped to the supported range.
    pub fn set_filter_gain(&self, band: usize, gain_db: f32) -> Result<(), IndexError> {
        let gain = self.params.filter_gains.get(band).ok_or(IndexError {
            index: band,
            len: BANDS,
        })?;
        gain.store(clamp_finite(
            gain_db,
            MIN_FILTER_GAIN_DB,
            MAX_FILTER_GAIN_DB,
            0.0,
        ));
        Ok(())
    }

    pub fn filter_gain(&self, band: usize) -> Result<f32, IndexError> {
        self.params
            .filter_gains
            .get(band)
            .map(AtomicF32::load)
            .ok_or(IndexError {
                index: band,
                len: BANDS,
            })
    }

    /// Linear gain, never negative.
    pub fn set_master_gain(&self, gain: f32) {
        self.params
            .master_gain
            .store(clamp_finite(gain, 0.0, f32::MAX, 1.0));
    }

    pub fn master_gain(&self) -> f32 {
        self.params.master_gain.load()
    }

    /// -1 is hard left, 1 is hard right.
    pub fn set_balance(&self, balance: f32) {
        self.params
            .balance
            .store(clamp_finite(balance, -1.0, 1.0, 0.0));
    }

    pub fn balance(&self) -> f32 {
        self.params.balance.load()
    }

    /// Magnitude spectrum of the latest analyser window in dB, one value per bin
    /// (`ANALYSER_FFT_SIZE / 2` bins).
    pub fn spectrum(&self) -> Vec<f32> {
        let mut frame = self.params.analyser.lock().ordered();
        let n = frame.len();
        for (i, sample) in frame.iter_mut().enumerate() {
            *sample *= blackman(i, n);
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        let mut spectrum = fft.make_output_vec();
        if fft.process(&mut frame, &mut spectrum).is_err() {
            return vec![ANALYSER_MIN_DB; n / 2];
        }

        spectrum
            .iter()
            .take(n / 2)
            .map(|bin| {
                let magnitude = bin.norm() / n as f32;
                if magnitude > 0.0 {
                    20.0 * magnitude.log10()
                } else {
                    f32::NEG_INFINITY
                }
            })
            .collect()
    }

    /// The spectrum scaled to bytes, `ANALYSER_MIN_DB` maps to 0 and `ANALYSER_MAX_DB` to 255.
    pub fn byte_spectrum(&self) -> Vec<u8> {
        self.spectrum().into_iter().map(db_to_byte).collect()
    }
}

fn clamp_finite(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

fn blackman(i: usize, n: usize) -> f32 {
    let a = 0.16;
    let x = i as f32 / n as f32;
    let a0 = 0.5 * (1.0 - a);
    let a1 = 0.5;
    let a2 = 0.5 * a;
    a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
}

fn db_to_byte(db: f32) -> u8 {
    let scaled = 255.0 * (db - ANALYSER_MIN_DB) / (ANALYSER_MAX_DB - ANALYSER_MIN_DB);
    if scaled.is_nan() {
        return 0;
    }
    scaled.clamp(0.0, 255.0) as u8
}

/// Gains applied to the left and right outputs of a stereo panner.
/// Returns `(left_from_left, left_from_right, right_from_left, right_from_right)`.
fn pan_gains(pan: f32) -> (f32, f32, f32, f32) {
    if pan <= 0.0 {
        let x = (pan + 1.0) * PI / 2.0;
        (1.0, x.cos(), 0.0, x.sin())
    } else {
        let x = pan * PI / 2.0;
        (x.cos(), 0.0, x.sin(), 1.0)
    }
}

#[derive(Clone, Copy, Default)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

/// A peaking filter with per-channel state.
struct Peaking {
    frequency: f32,
    gain_db: f32,
    b: [f32; 3],
    a: [f32; 2],
    state: [BiquadState; OUTPUT_CHANNELS as usize],
}

impl Peaking {
    fn new(frequency: f32) -> Peaking {
        Peaking {
            frequency,
            gain_db: 0.0,
            b: [1.0, 0.0, 0.0],
            a: [0.0, 0.0],
            state: Default::default(),
        }
    }

    fn set_gain(&mut self, gain_db: f32, sample_rate: u32) {
        if gain_db == self.gain_db {
            return;
        }
        self.gain_db = gain_db;
        if gain_db == 0.0 {
            self.state = Default::default();
            return;
        }

        let amplitude = 10f32.powf(gain_db / 40.0);
        let nyquist = sample_rate as f32 / 2.0;
        let w0 = 2.0 * PI * self.frequency.min(nyquist * 0.999) / sample_rate as f32;
        let alpha = w0.sin() / (2.0 * FILTER_Q);
        let cos_w0 = w0.cos();

        let a0 = 1.0 + alpha / amplitude;
        self.b = [
            (1.0 + alpha * amplitude) / a0,
            (-2.0 * cos_w0) / a0,
            (1.0 - alpha * amplitude) / a0,
        ];
        self.a = [(-2.0 * cos_w0) / a0, (1.0 - alpha / amplitude) / a0];
    }

    #[inline]
    fn process(&mut self, channel: usize, x: f32) -> f32 {
        if self.gain_db == 0.0 {
            return x;
        }
        let s = &mut self.state[channel];
        let y = self.b[0] * x + self.b[1] * s.x1 + self.b[2] * s.x2 - self.a[0] * s.y1
            - self.a[1] * s.y2;
        s.x2 = s.x1;
        s.x1 = x;
        s.y2 = s.y1;
        s.y1 = y;
        y
    }
}

/// The processing half of the chain. Runs on the mixer's thread.
pub struct ChainDsp {
    params: Arc<ChainParams>,
    filters: Vec<Peaking>,
    sample_rate: u32,
}

impl ChainDsp {
    fn new(params: Arc<ChainParams>, sample_rate: u32) -> ChainDsp {
        ChainDsp {
            params,
            filters: FILTER_FREQUENCIES.iter().map(|f| Peaking::new(*f)).collect(),
            sample_rate,
        }
    }

    /// Processes an interleaved stereo block in place.
    pub(crate) fn process(&mut self, block: &mut [f32]) {
        for (band, filter) in self.filters.iter_mut().enumerate() {
            filter.set_gain(self.params.filter_gains[band].load(), self.sample_rate);
        }
        let gain = self.params.master_gain.load();
        let (ll, lr, rl, rr) = pan_gains(self.params.balance.load());

        // The analyser never blocks the audio path.
        let mut analyser = self.params.analyser.try_lock();

        for frame in block.chunks_exact_mut(OUTPUT_CHANNELS as usize) {
            let mut left = frame[0];
            let mut right = frame[1];
            for filter in self.filters.iter_mut() {
                left = filter.process(0, left);
                right = filter.process(1, right);
            }
            left *= gain;
            right *= gain;

            let out_left = left * ll + right * lr;
            let out_right = left * rl + right * rr;
            frame[0] = out_left;
            frame[1] = out_right;

            if let Some(analyser) = analyser.as_mut() {
                analyser.push((out_left + out_right) / 2.0);
            }
        }
    }
}
