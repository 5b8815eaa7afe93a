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
use std::{io::Cursor, mem, sync::Arc};

use tracing::{debug, info};

use crate::{
    audio::{
        input::{Capture, InputStream},
        DecodedAudio,
    },
    error::RecorderError,
};

/// A decoded take waiting to be placed on a pad, along with its encoded form for uploading.
#[derive(Clone)]
pub struct Take {
    pub buffer: DecodedAudio,
    pub payload: Arc<Vec<u8>>,
}

/// A finished capture, encoded and tagged so its decode can be matched back up.
pub struct Finished {
    pub id: u64,
    pub payload: Vec<u8>,
}

enum State {
    Idle,
    Armed(Box<dyn InputStream>),
    Recording(Box<dyn InputStream>),
}

/// Microphone recorder: idle, armed (stream held open), recording, then idle again.
pub struct Recorder {
    state: State,
    pending: Option<Take>,
    // Bumped on every start so decodes of older takes are ignored.
    take_id: u64,
}

impl Default for Recorder {
    fn default() -> Self {
        Recorder::new()
    }
}

impl Recorder {
    pub fn new() -> Recorder {
        Recorder {
            state: State::Idle,
            pending: None,
            take_id: 0,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, State::Armed(_))
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, State::Recording(_))
    }

    /// Holds the stream open. Re-arming while armed swaps in the new stream; arming
    /// during a recording is ignored.
    pub fn arm(&mut self, stream: Box<dyn InputStream>) {
        if self.is_recording() {
            debug!("Already recording, ignoring arm.");
            return;
        }
        self.state = State::Armed(stream);
    }

    /// Releases the stream without recording.
    pub fn disarm(&mut self) {
        if let State::Armed(_) = self.state {
            self.state = State::Idle;
        }
    }

    /// Begins capturing. Returns false if a recording is already running.
    pub fn start(&mut self) -> Result<bool, RecorderError> {
        match mem::replace(&mut self.state, State::Idle) {
            State::Idle => Err(RecorderError::NotArmed),
            State::Recording(stream) => {
                self.state = State::Recording(stream);
                Ok(false)
            }
            State::Armed(mut stream) => {
                stream.start();
                self.pending = None;
                self.take_id += 1;
                self.state = State::Recording(stream);
                info!(take = self.take_id, "Recording started.");
                Ok(true)
            }
        }
    }

    /// Ends capturing and releases the microphone. Returns the encoded take, or
    /// `None` when nothing was recording.
    pub fn stop(&mut self) -> Option<Finished> {
        match mem::replace(&mut self.state, State::Idle) {
            State::Recording(mut stream) => {
                let capture = stream.stop();
                info!(
                    take = self.take_id,
                    samples = capture.samples.len(),
                    "Recording stopped."
                );
                Some(Finished {
                    id: self.take_id,
                    payload: encode_wav(&capture),
                })
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Stores a decoded take, unless a newer recording has started since it was captured.
    pub fn set_pending(&mut self, id: u64, take: Take) -> bool {
        if id != self.take_id || self.is_recording() {
            debug!(take = id, "Discarding stale take.");
            return false;
        }
        self.pending = Some(take);
        true
    }

    pub fn pending(&self) -> Option<&Take> {
        self.pending.as_ref()
    }

    /// Hands over the pending take. It can only be taken once.
    pub fn take_pending(&mut self) -> Option<Take> {
        self.pending.take()
    }
}

/// Encodes a capture as a 32 bit float WAV file.
pub fn encode_wav(capture: &Capture) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: capture.channels.max(1),
        sample_rate: capture.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut cursor = Cursor::new(Vec::new());
    let written = hound::WavWriter::new(&mut cursor, spec).and_then(|mut writer| {
        for sample in &capture.samples {
            writer.write_sample(*sample)?;
        }
        writer.finalize()
    });
    match written {
        Ok(()) => cursor.into_inner(),
        // Writing into memory only fails on absurd sizes. An empty payload fails to decode later.
        Err(_) => Vec::new(),
    }
}
