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
use std::{fmt, sync::Arc};

use tracing::{debug, info, span, Level};

use super::{
    decode,
    mixer::{Mixer, PlayedRegion},
    DecodedAudio, OutputSink, OUTPUT_CHANNELS,
};
use crate::error::{DecodeError, PlaybackError};

/// Rate used when the configuration doesn't ask for one.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Bytes per frame assumed when sizing a payload that can't be decoded (16 bit stereo).
const ASSUMED_BYTES_PER_FRAME: usize = 4;

/// A backend without an audio device. Nothing is heard; audio is rendered on request.
pub struct Backend {
    name: String,
    id: u64,
    sample_rate: u32,
    mixer: Arc<Mixer>,
}

impl Backend {
    /// Gets the given headless backend.
    pub fn new(name: &str, sample_rate: u32) -> Backend {
        let sample_rate = if sample_rate == 0 {
            DEFAULT_SAMPLE_RATE
        } else {
            sample_rate
        };
        info!(backend = name, sample_rate, "Using headless audio backend.");
        Backend {
            name: name.to_string(),
            id: super::next_backend_id(),
            sample_rate,
            mixer: Arc::new(Mixer::with_history(sample_rate)),
        }
    }

    /// Renders the next `frames` stereo frames through the effects chain.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut output = vec![0.0; frames * OUTPUT_CHANNELS as usize];
        self.mixer.process_into_output(&mut output, frames);
        output
    }

    /// Every region that has been handed to the output so far.
    pub fn played(&self) -> Vec<PlayedRegion> {
        // Pull in anything started since the last render.
        self.mixer.active_voices();
        self.mixer.played()
    }
}

impl super::Backend for Backend {
    fn id(&self) -> u64 {
        self.id
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn ensure_running(&self) -> Result<(), PlaybackError> {
        Ok(())
    }

    /// Tries a real decode first. Payloads that aren't audio still produce a
    /// silent buffer whose length follows from the payload size.
    fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio, DecodeError> {
        let span = span!(Level::DEBUG, "decode (headless)");
        let _enter = span.enter();

        if bytes.is_empty() {
            return Err(DecodeError::new(0, "empty payload"));
        }

        match decode::decode_bytes(bytes, self.sample_rate) {
            Ok(pcm) => Ok(DecodedAudio::new(
                pcm.samples,
                pcm.channels,
                pcm.sample_rate,
                self.id,
            )),
            Err(e) => {
                debug!(err = e.to_string(), "Falling back to a silent buffer.");
                let frames = (bytes.len() / ASSUMED_BYTES_PER_FRAME).max(1);
                Ok(DecodedAudio::new(
                    vec![0.0; frames * OUTPUT_CHANNELS as usize],
                    OUTPUT_CHANNELS,
                    self.sample_rate,
                    self.id,
                ))
            }
        }
    }

    fn output_sink(&self) -> OutputSink {
        OutputSink::new(self.id, self.mixer.clone())
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Headless)", self.name)
    }
}

#[cfg(test)]
mod test {
    use crate::{audio::Backend as _, testutil::wav_bytes};

    use super::Backend;

    #[test]
    fn test_decode_real_audio() {
        let backend = Backend::new("mock", 44100);
        let audio = backend.decode(&wav_bytes(2, 44100, 22050)).expect("decode");
        assert!((audio.duration() - 0.5).abs() < 1e-6);
        assert_eq!(audio.backend_id(), backend.id());
    }

    #[test]
    fn test_decode_duration_from_payload_size() {
        let backend = Backend::new("mock", 44100);
        let audio = backend.decode(&vec![7u8; 176400]).expect("decode");
        assert!((audio.duration() - 1.0).abs() < 1e-6);
        assert!(backend.decode(&[]).is_err());
    }

    #[test]
    fn test_ensure_running_is_idempotent() {
        let backend = Backend::new("mock", 0);
        assert_eq!(backend.sample_rate(), super::DEFAULT_SAMPLE_RATE);
        assert!(backend.ensure_running().is_ok());
        assert!(backend.ensure_running().is_ok());
        assert_eq!(backend.to_string(), "mock (Headless)");
    }
}
