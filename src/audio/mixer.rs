// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
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
// Voice mixing shared by the live and headless backends.
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tracing::warn;

use super::{effects::ChainDsp, DecodedAudio, OUTPUT_CHANNELS};

/// How many played regions a mixer with history keeps. Older ones are dropped.
pub const HISTORY_LIMIT: usize = 1024;

/// A buffer region being played.
pub struct Voice {
    buffer: DecodedAudio,
    position: usize,
    end: usize,
    stopped: Arc<AtomicBool>,
}

impl Voice {
    pub(crate) fn new(
        buffer: DecodedAudio,
        start: usize,
        end: usize,
        stopped: Arc<AtomicBool>,
    ) -> Voice {
        Voice {
            buffer,
            position: start,
            end,
            stopped,
        }
    }

    fn is_finished(&self) -> bool {
        self.position >= self.end || self.stopped.load(Ordering::Relaxed)
    }

    /// Adds this voice into the stereo block. Returns false once finished.
    fn mix_into(&mut self, output: &mut [f32]) -> bool {
        let channels = self.buffer.channels() as usize;
        let samples = self.buffer.samples();
        for frame in output.chunks_exact_mut(OUTPUT_CHANNELS as usize) {
            if self.is_finished() {
                return false;
            }
            let base = self.position * channels;
            let left = samples[base];
            let right = if channels > 1 { samples[base + 1] } else { left };
            frame[0] += left;
            frame[1] += right;
            self.position += 1;
        }
        !self.is_finished()
    }
}

/// Where and how long a voice was asked to play, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayedRegion {
    pub offset: f64,
    pub duration: f64,
}

/// Mixes incoming voices into an interleaved stereo bus and runs the effects chain over it.
pub struct Mixer {
    sample_rate: u32,
    voice_tx: crossbeam_channel::Sender<Voice>,
    voice_rx: crossbeam_channel::Receiver<Voice>,
    active: Mutex<Vec<Voice>>,
    chain: Mutex<Option<ChainDsp>>,
    history: Option<Mutex<VecDeque<PlayedRegion>>>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Mixer {
        let (voice_tx, voice_rx) = crossbeam_channel::unbounded();
        Mixer {
            sample_rate,
            voice_tx,
            voice_rx,
            active: Mutex::new(Vec::new()),
            chain: Mutex::new(None),
            history: None,
        }
    }

    /// A mixer that remembers the last [HISTORY_LIMIT] regions it was asked to play.
    pub fn with_history(sample_rate: u32) -> Mixer {
        Mixer {
            history: Some(Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT))),
            ..Mixer::new(sample_rate)
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub(crate) fn voice_sender(&self) -> crossbeam_channel::Sender<Voice> {
        self.voice_tx.clone()
    }

    pub(crate) fn attach(&self, dsp: ChainDsp) {
        let mut chain = self.chain.lock();
        if chain.is_some() {
            warn!("Replacing the effects chain attached to the output.");
        }
        *chain = Some(dsp);
    }

    /// Moves newly started voices into the active set.
    fn accept_voices(&self, active: &mut Vec<Voice>) {
        while let Ok(voice) = self.voice_rx.try_recv() {
            if let Some(history) = &self.history {
                let rate = voice.buffer.sample_rate() as f64;
                let mut history = history.lock();
                if history.len() == HISTORY_LIMIT {
                    history.pop_front();
                }
                history.push_back(PlayedRegion {
                    offset: voice.position as f64 / rate,
                    duration: (voice.end - voice.position) as f64 / rate,
                });
            }
            active.push(voice);
        }
    }

    /// Mixes `frames` stereo frames into `output`, then applies the effects chain.
    pub fn process_into_output(&self, output: &mut [f32], frames: usize) {
        let len = (frames * OUTPUT_CHANNELS as usize).min(output.len());
        let output = &mut output[..len];
        output.fill(0.0);

        {
            let mut active = self.active.lock();
            self.accept_voices(&mut active);
            active.retain_mut(|voice| voice.mix_into(output));
        }

        if let Some(dsp) = self.chain.lock().as_mut() {
            dsp.process(output);
        }
    }

    /// Drops every pending and active voice.
    pub fn stop_all(&self) {
        let mut active = self.active.lock();
        while self.voice_rx.try_recv().is_ok() {}
        for voice in active.iter() {
            voice.stopped.store(true, Ordering::Relaxed);
        }
        active.clear();
    }

    pub fn active_voices(&self) -> usize {
        let mut active = self.active.lock();
        self.accept_voices(&mut active);
        active.retain(|voice| !voice.is_finished());
        active.len()
    }

    pub fn played(&self) -> Vec<PlayedRegion> {
        self.history
            .as_ref()
            .map(|history| history.lock().iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{atomic::AtomicBool, Arc};

    use super::*;

    fn voice(samples: Vec<f32>, channels: u16, start: usize, end: usize) -> Voice {
        Voice::new(
            DecodedAudio::new(samples, channels, 44100, 1),
            start,
            end,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_mono_voice_fills_both_channels() {
        let mixer = Mixer::new(44100);
        mixer
            .voice_sender()
            .send(voice(vec![0.5, 0.8], 1, 0, 2))
            .expect("send");

        let mut output = vec![0.0; 6];
        mixer.process_into_output(&mut output, 3);
        assert_eq!(output, vec![0.5, 0.5, 0.8, 0.8, 0.0, 0.0]);
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_multiple_voice_mixing() {
        let mixer = Mixer::new(44100);
        let tx = mixer.voice_sender();
        tx.send(voice(vec![0.5, 0.3], 2, 0, 1)).expect("send");
        tx.send(voice(vec![0.2, 0.1], 2, 0, 1)).expect("send");

        let mut output = vec![0.0; 2];
        mixer.process_into_output(&mut output, 1);
        assert!((output[0] - 0.7).abs() < 1e-6);
        assert!((output[1] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_voice_respects_region() {
        let mixer = Mixer::with_history(44100);
        let samples = vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.4, 0.4];
        mixer
            .voice_sender()
            .send(voice(samples, 2, 1, 3))
            .expect("send");

        let mut output = vec![0.0; 8];
        mixer.process_into_output(&mut output, 4);
        assert_eq!(output, vec![0.2, 0.2, 0.3, 0.3, 0.0, 0.0, 0.0, 0.0]);

        let played = mixer.played();
        assert_eq!(played.len(), 1);
        assert!((played[0].offset - 1.0 / 44100.0).abs() < 1e-12);
    }

    #[test]
    fn test_history_keeps_latest_regions() {
        let mixer = Mixer::with_history(44100);
        let tx = mixer.voice_sender();
        for start in 0..HISTORY_LIMIT + 10 {
            tx.send(voice(vec![0.0; HISTORY_LIMIT + 11], 1, start, start + 1))
                .expect("send");
        }
        mixer.active_voices();

        let played = mixer.played();
        assert_eq!(played.len(), HISTORY_LIMIT);
        assert!((played[0].offset - 10.0 / 44100.0).abs() < 1e-12);
        assert!(
            (played[HISTORY_LIMIT - 1].offset - (HISTORY_LIMIT + 9) as f64 / 44100.0).abs()
                < 1e-12
        );
    }

    #[test]
    fn test_stop_all() {
        let mixer = Mixer::new(44100);
        mixer
            .voice_sender()
            .send(voice(vec![0.5; 200], 2, 0, 100))
            .expect("send");
        assert_eq!(mixer.active_voices(), 1);
        mixer.stop_all();
        assert_eq!(mixer.active_voices(), 0);

        let mut output = vec![1.0; 4];
        mixer.process_into_output(&mut output, 2);
        assert_eq!(output, vec![0.0; 4]);
    }
}
