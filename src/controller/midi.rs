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
use std::{io, sync::Arc};

use tokio::{
    sync::mpsc::{self, Sender},
    task::JoinHandle,
};
use tracing::{error, info, span, Level};

use super::Event;
use crate::{midi::Device, router::InputEvent};

/// A controller that plays pads from a MIDI device. Messages are forwarded untouched;
/// the engine's router decides which of them hit a pad.
pub struct Driver {
    /// The MIDI device.
    midi_device: Arc<dyn Device>,
}

impl Driver {
    pub fn new(midi_device: Arc<dyn Device>) -> Arc<Self> {
        Arc::new(Driver { midi_device })
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        let (midi_events_tx, mut midi_events_rx) = mpsc::channel::<Vec<u8>>(10);
        let device = self.midi_device.clone();

        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "MIDI driver");
            let _enter = span.enter();

            info!(device = device.name(), "MIDI driver started.");

            if let Err(e) = device
                .watch_events(midi_events_tx)
                .map_err(|e| io::Error::other(e.to_string()))
            {
                error!(err = e.to_string(), "Error watching MIDI events");
            }
        });

        let device = self.midi_device.clone();
        tokio::spawn(async move {
            loop {
                let raw_event = match midi_events_rx.recv().await {
                    Some(raw_event) => raw_event,
                    None => {
                        info!("MIDI watcher closed.");
                        device.stop_watch_events();
                        return Ok(());
                    }
                };

                if events_tx
                    .send(Event::Input(InputEvent::Midi(raw_event)))
                    .await
                    .is_err()
                {
                    info!("Controller went away, stopping MIDI watch.");
                    device.stop_watch_events();
                    return Ok(());
                }
            }
        })
    }
}
