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
use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use crate::config;
use crate::error::{DecodeError, PlaybackError};

use self::effects::ChainDsp;
use self::mixer::{Mixer, Voice};

pub mod cpal;
pub mod decode;
pub mod effects;
pub mod headless;
pub mod input;
pub mod mixer;

/// All backends render interleaved stereo.
pub const OUTPUT_CHANNELS: u16 = 2;

static BACKEND_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocates a process unique backend identifier.
pub(crate) fn next_backend_id() -> u64 {
    BACKEND_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// The capability surface the engine needs from an audio runtime.
pub trait Backend: fmt::Display + Send + Sync {
    /// Identifies this backend instance. Buffers and nodes carry it so they can't cross backends.
    fn id(&self) -> u64;

    /// The rate every decoded buffer is converted to.
    fn sample_rate(&self) -> u32;

    /// Activates the runtime if it is suspended. Idempotent. May block while a device
    /// starts, so async callers go through the engine.
    fn ensure_running(&self) -> Result<(), PlaybackError>;

    /// Converts an encoded payload into a buffer owned by this backend.
    fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio, DecodeError>;

    /// Returns a fresh single-use playback node.
    fn create_playback_node(&self) -> PlaybackNode {
        PlaybackNode::new(self.id())
    }

    /// Returns the terminal node reaching the output.
    fn output_sink(&self) -> OutputSink;
}

/// Decodes the payload on the blocking pool so the caller only suspends.
pub async fn decode_async(
    backend: Arc<dyn Backend>,
    bytes: Vec<u8>,
) -> Result<DecodedAudio, DecodeError> {
    let payload_len = bytes.len();
    tokio::task::spawn_blocking(move || backend.decode(&bytes))
        .await
        .map_err(|e| DecodeError::new(payload_len, format!("decode task failed: {}", e)))?
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<cpal::DeviceInfo>, Box<dyn Error>> {
    cpal::list()
}

/// Gets a backend for the given configuration. Devices named "mock..." or
/// "headless..." get the headless backend.
pub fn get_backend(config: &config::Audio) -> Result<Arc<dyn Backend>, Box<dyn Error>> {
    let device = config.device();
    if device.starts_with("mock") || device.starts_with("headless") {
        return Ok(Arc::new(headless::Backend::new(device, config.sample_rate())));
    };

    Ok(Arc::new(cpal::Backend::get(config)?))
}

/// Decoded interleaved audio, already converted to its backend's sample rate.
#[derive(Clone)]
pub struct DecodedAudio {
    data: Arc<Vec<f32>>,
    channels: u16,
    sample_rate: u32,
    backend_id: u64,
}

impl DecodedAudio {
    pub(crate) fn new(
        data: Vec<f32>,
        channels: u16,
        sample_rate: u32,
        backend_id: u64,
    ) -> DecodedAudio {
        DecodedAudio {
            data: Arc::new(data),
            channels: channels.max(1),
            sample_rate,
            backend_id,
        }
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn frames(&self) -> usize {
        self.data.len() / self.channels as usize
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn backend_id(&self) -> u64 {
        self.backend_id
    }

    /// The interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.data
    }

    /// De-interleaves one channel, e.g. for waveform drawing.
    pub fn channel_data(&self, channel: u16) -> Option<Vec<f32>> {
        if channel >= self.channels {
            return None;
        }
        Some(
            self.data
                .iter()
                .skip(channel as usize)
                .step_by(self.channels as usize)
                .copied()
                .collect(),
        )
    }

    /// Converts seconds into a frame position clamped to the buffer.
    pub(crate) fn frame_at(&self, seconds: f64) -> usize {
        if !seconds.is_finite() || seconds <= 0.0 {
            return 0;
        }
        ((seconds * self.sample_rate as f64).round() as usize).min(self.frames())
    }
}

impl fmt::Debug for DecodedAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedAudio")
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames())
            .field("backend_id", &self.backend_id)
            .finish()
    }
}

/// The entry point of the effects chain that playback nodes connect to.
#[derive(Clone)]
pub struct InputTap {
    backend_id: u64,
    voices: crossbeam_channel::Sender<Voice>,
}

/// The terminal node of a backend. Owns the mixer that every voice ends up in.
#[derive(Clone)]
pub struct OutputSink {
    backend_id: u64,
    mixer: Arc<Mixer>,
}

impl OutputSink {
    pub(crate) fn new(backend_id: u64, mixer: Arc<Mixer>) -> OutputSink {
        OutputSink { backend_id, mixer }
    }

    pub fn backend_id(&self) -> u64 {
        self.backend_id
    }

    /// Installs the effects processing that runs on the mixed bus.
    pub(crate) fn attach(&self, dsp: ChainDsp) {
        self.mixer.attach(dsp);
    }

    /// Only the effects chain hands this out, so voices always pass through it.
    pub(crate) fn input_tap(&self) -> InputTap {
        InputTap {
            backend_id: self.backend_id,
            voices: self.mixer.voice_sender(),
        }
    }

    /// Silences every voice.
    pub fn stop_all(&self) {
        self.mixer.stop_all();
    }

    /// Number of voices still sounding.
    pub fn active_voices(&self) -> usize {
        self.mixer.active_voices()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Created,
    Started,
    Stopped,
}

/// A one-shot playback node. Connect, start once, optionally stop. Never reused.
pub struct PlaybackNode {
    backend_id: u64,
    state: NodeState,
    tap: Option<InputTap>,
    stopped: Arc<AtomicBool>,
}

impl PlaybackNode {
    pub(crate) fn new(backend_id: u64) -> PlaybackNode {
        PlaybackNode {
            backend_id,
            state: NodeState::Created,
            tap: None,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connects the node to the effects chain input.
    pub fn connect(&mut self, tap: &InputTap) -> Result<(), PlaybackError> {
        if tap.backend_id != self.backend_id {
            return Err(PlaybackError::ForeignSink);
        }
        self.tap = Some(tap.clone());
        Ok(())
    }

    /// Plays `duration` seconds of the buffer starting at `offset` seconds.
    pub fn start(
        &mut self,
        buffer: &DecodedAudio,
        offset: f64,
        duration: f64,
    ) -> Result<(), PlaybackError> {
        if self.state != NodeState::Created {
            return Err(PlaybackError::AlreadyStarted);
        }
        let tap = self.tap.as_ref().ok_or(PlaybackError::NotConnected)?;
        if buffer.backend_id() != self.backend_id {
            return Err(PlaybackError::ForeignBuffer);
        }

        let start = buffer.frame_at(offset);
        let end = buffer.frame_at(offset + duration.max(0.0)).max(start);
        tap.voices
            .send(Voice::new(buffer.clone(), start, end, self.stopped.clone()))
            .map_err(|_| PlaybackError::Device("output sink is closed".into()))?;

        self.state = NodeState::Started;
        Ok(())
    }

    /// Stops playback. A node that was never started can no longer be started.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::Relaxed);
        self.state = NodeState::Stopped;
    }
}
