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
use std::io;

/// Failures while opening or streaming a remote or local payload.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request for {url} failed with HTTP status {status}")]
    Http { url: String, status: u16 },

    #[error("response for {0} has no body")]
    MissingBody(String),

    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("I/O error reading {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: io::Error,
    },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// The payload could not be turned into audio. Carries the payload length for diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unable to decode {payload_len} byte payload: {reason}")]
pub struct DecodeError {
    pub payload_len: usize,
    pub reason: String,
}

impl DecodeError {
    pub fn new(payload_len: usize, reason: impl Into<String>) -> DecodeError {
        DecodeError {
            payload_len,
            reason: reason.into(),
        }
    }
}

/// Access to an input device was refused.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PermissionError {
    #[error("microphone access denied: {0}")]
    Microphone(String),

    #[error("MIDI access denied: {0}")]
    Midi(String),
}

/// A slot or band index outside of the fixed range. Indicates a caller defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("index {index} is out of range (length {len})")]
pub struct IndexError {
    pub index: usize,
    pub len: usize,
}

/// Misuse of a playback node or a failing output device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("playback node has already been started")]
    AlreadyStarted,

    #[error("playback node is not connected")]
    NotConnected,

    #[error("buffer was decoded by a different backend")]
    ForeignBuffer,

    #[error("input tap belongs to a different backend")]
    ForeignSink,

    #[error("audio device error: {0}")]
    Device(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecorderError {
    #[error("recorder is not armed")]
    NotArmed,
}

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error("invalid trim region {start}..{end}")]
    InvalidTrim { start: f64, end: f64 },

    #[error("there is no pending recorded take")]
    NoPendingTake,

    #[error("a kit name is required to save a new kit")]
    KitNameRequired,

    #[error("no preset named {0}")]
    UnknownPreset(String),

    #[error("no preset store is configured")]
    NoPresetStore,
}
