// Copyright (C) 2024 Michael Wilson <mike@mdwn.dev>
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
use std::error::Error;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{error, info, span, Instrument, Level};

use crate::{config, engine::Engine, error::EngineError, router::InputEvent};

pub mod keyboard;
pub mod midi;
pub mod multi;

/// Controller events that will trigger behavior in the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Something that may land on a pad: a key, a MIDI message or a pointer hit.
    Input(InputEvent),

    /// Opens the microphone so that recording starts without delay.
    Arm,

    /// Starts recording. The recorder must be armed.
    Record,

    /// Stops recording and keeps the take pending.
    StopRecording,

    /// Puts the pending take on a pad under the given name.
    AddRecording(String),

    /// Plays the pending take.
    PreviewTake,

    /// Silences every playing voice.
    StopAll,

    /// Sets the master gain.
    MasterGain(f32),

    /// Sets the stereo balance.
    Balance(f32),

    /// Loads a preset kit by name.
    LoadPreset(String),

    /// Saves the kit. A name is needed unless the kit already has one.
    SaveKit(Option<String>),
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// Builds the driver for the configured controller kind.
pub fn driver(
    kind: config::Controller,
    midi_device: Option<Arc<dyn crate::midi::Device>>,
) -> Result<Arc<dyn Driver>, Box<dyn Error>> {
    let require_midi = || -> Result<Arc<dyn crate::midi::Device>, Box<dyn Error>> {
        midi_device
            .clone()
            .ok_or_else(|| "No MIDI device to use for MIDI configuration".into())
    };

    let driver: Arc<dyn Driver> = match kind {
        config::Controller::Keyboard => Arc::new(keyboard::Driver::new()),
        config::Controller::Midi => midi::Driver::new(require_midi()?),
        config::Controller::Multi => Arc::new(multi::Driver::new(vec![
            multi::SubDriver::Keyboard(Arc::new(keyboard::Driver::new())),
            multi::SubDriver::Midi(midi::Driver::new(require_midi()?)),
        ])),
    };
    Ok(driver)
}

/// Feeds driver events into an engine.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given driver.
    pub fn new(engine: Arc<Engine>, driver: Arc<dyn Driver>) -> Result<Controller, Box<dyn Error>> {
        let span = span!(Level::INFO, "controller");
        Ok(Controller {
            handle: tokio::spawn(Controller::trigger_events(engine, driver).instrument(span)),
        })
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// Triggers engine operations by watching the driver and getting events from it.
    async fn trigger_events(engine: Arc<Engine>, driver: Arc<dyn Driver>) {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let join_handle = driver.monitor_events(events_tx);

        info!(kit = engine.describe_kit(), "Controller started.");

        loop {
            if let Some(event) = events_rx.recv().await {
                info!(event = format!("{:?}", event), "Received event.");

                if let Err(e) = Controller::apply(&engine, event).await {
                    error!(err = e.to_string(), "Error talking to engine: {}", e);
                }
            } else {
                info!("Controller closing.");
                engine.stop_all();
                match join_handle.await {
                    Ok(Err(e)) => error!(err = e.to_string(), "Event monitor failed."),
                    Err(e) => error!("Error waiting for event monitor to stop: {}", e),
                    Ok(Ok(())) => {}
                }
                return;
            }
        }
    }

    async fn apply(engine: &Engine, event: Event) -> Result<(), EngineError> {
        match event {
            Event::Input(input) => {
                engine.ensure_running().await;
                engine.handle_input(&input)?;
            }
            Event::Arm => engine.arm_recorder().await?,
            Event::Record => {
                engine.start_recording()?;
            }
            Event::StopRecording => {
                if let Some(duration) = engine.stop_recording().await? {
                    info!(duration, "Take is pending.");
                }
            }
            Event::AddRecording(name) => {
                let slot = engine.add_recorded_sample(&name)?;
                info!(sample = name, slot, "Recording added to the kit.");
            }
            Event::PreviewTake => {
                engine.ensure_running().await;
                engine.play_pending_take()?;
            }
            Event::StopAll => engine.stop_all(),
            Event::MasterGain(gain) => engine.effects().set_master_gain(gain),
            Event::Balance(balance) => engine.effects().set_balance(balance),
            Event::LoadPreset(name) => {
                engine.load_preset(&name).await?;
            }
            Event::SaveKit(name) => {
                let saved = engine.save_kit(name.as_deref()).await?;
                info!(kit = saved, "Kit saved.");
            }
        }
        Ok(())
    }
}
