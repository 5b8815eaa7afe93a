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

//! Notifications raised by the engine. Every hook defaults to doing nothing.

use std::{fmt, sync::Arc};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::{loader::Progress, sample::Sample};

/// Stage of a sample load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Decoding,
    Ready,
    Error,
    /// The sample left its pad before the load finished. The buffer was dropped.
    Abandoned,
}

impl Phase {
    /// Ready, Error and Abandoned end a load.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Ready | Phase::Error | Phase::Abandoned)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub phase: Phase,
    pub message: String,
}

impl Status {
    pub fn new(phase: Phase, message: impl Into<String>) -> Status {
        Status {
            phase,
            message: message.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.phase, self.message)
    }
}

pub trait Observer: Send + Sync {
    /// A sample on `slot` received its buffer.
    fn on_sample_ready(&self, _slot: usize, _sample: &Arc<Sample>) {}

    fn on_progress(&self, _sample: &Arc<Sample>, _progress: Progress) {}

    fn on_status(&self, _sample: &Arc<Sample>, _status: &Status) {}

    fn on_error(&self, _sample: &Arc<Sample>, _message: &str) {}

    fn on_recording_start(&self) {}

    fn on_recording_stop(&self) {}

    /// The last take decoded and is waiting to be placed on a pad.
    fn on_take_ready(&self, _duration: f64) {}

    /// The last take could not be captured or decoded and was discarded.
    fn on_recording_error(&self, _message: &str) {}

    fn on_selection_changed(&self, _slot: Option<usize>, _sample: Option<&Arc<Sample>>) {}
}

/// Ignores everything.
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Owned form of every notification.
#[derive(Debug, Clone)]
pub enum Event {
    SampleReady {
        slot: usize,
        sample: Arc<Sample>,
    },
    Progress {
        sample: Arc<Sample>,
        progress: Progress,
    },
    Status {
        sample: Arc<Sample>,
        status: Status,
    },
    Error {
        sample: Arc<Sample>,
        message: String,
    },
    RecordingStart,
    RecordingStop,
    TakeReady {
        duration: f64,
    },
    RecordingError {
        message: String,
    },
    SelectionChanged {
        slot: Option<usize>,
        sample: Option<Arc<Sample>>,
    },
}

/// Forwards notifications into a channel, e.g. for a UI task.
pub struct ChannelObserver {
    sender: UnboundedSender<Event>,
}

impl ChannelObserver {
    pub fn new(sender: UnboundedSender<Event>) -> ChannelObserver {
        ChannelObserver { sender }
    }

    fn send(&self, event: Event) {
        // A closed receiver just means nobody is listening anymore.
        let _ = self.sender.send(event);
    }
}

impl Observer for ChannelObserver {
    fn on_sample_ready(&self, slot: usize, sample: &Arc<Sample>) {
        self.send(Event::SampleReady {
            slot,
            sample: sample.clone(),
        });
    }

    fn on_progress(&self, sample: &Arc<Sample>, progress: Progress) {
        self.send(Event::Progress {
            sample: sample.clone(),
            progress,
        });
    }

    fn on_status(&self, sample: &Arc<Sample>, status: &Status) {
        self.send(Event::Status {
            sample: sample.clone(),
            status: status.clone(),
        });
    }

    fn on_error(&self, sample: &Arc<Sample>, message: &str) {
        self.send(Event::Error {
            sample: sample.clone(),
            message: message.to_string(),
        });
    }

    fn on_recording_start(&self) {
        self.send(Event::RecordingStart);
    }

    fn on_recording_stop(&self) {
        self.send(Event::RecordingStop);
    }

    fn on_take_ready(&self, duration: f64) {
        self.send(Event::TakeReady { duration });
    }

    fn on_recording_error(&self, message: &str) {
        self.send(Event::RecordingError {
            message: message.to_string(),
        });
    }

    fn on_selection_changed(&self, slot: Option<usize>, sample: Option<&Arc<Sample>>) {
        self.send(Event::SelectionChanged {
            slot,
            sample: sample.cloned(),
        });
    }
}

/// Logs forwarded notifications until every sender is gone. Returns how many were seen.
pub async fn report(mut events: UnboundedReceiver<Event>) -> usize {
    let mut seen = 0;
    while let Some(event) = events.recv().await {
        seen += 1;
        match event {
            Event::SampleReady { slot, sample } => {
                info!(slot, sample = sample.name(), "Pad ready.")
            }
            Event::Progress { sample, progress } => {
                debug!(
                    sample = sample.name(),
                    percent = progress.percent(),
                    "Loading."
                )
            }
            Event::Status { sample, status } => {
                debug!(sample = sample.name(), status = status.to_string(), "Load status.")
            }
            Event::Error { sample, message } => {
                warn!(sample = sample.name(), err = message, "Sample failed to load.")
            }
            Event::RecordingStart => info!("Recording."),
            Event::RecordingStop => info!("Recording stopped."),
            Event::TakeReady { duration } => info!(duration, "Take ready."),
            Event::RecordingError { message } => warn!(err = message, "Recording failed."),
            Event::SelectionChanged { slot, sample } => info!(
                slot,
                sample = sample.map(|sample| sample.name()),
                "Selection changed."
            ),
        }
    }
    seen
}
