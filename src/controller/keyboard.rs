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
use std::io;

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use super::Event;
use crate::router::{key_code_for_char, InputEvent, KeyEvent, KeyTarget};

const ARM: &str = "arm";
const RECORD: &str = "rec";
const STOP_RECORDING: &str = "stop";
const ADD: &str = "add";
const PREVIEW: &str = "take";
const SILENCE: &str = "silence";
const GAIN: &str = "gain";
const BALANCE: &str = "balance";
const KIT: &str = "kit";
const SAVE: &str = "save";

/// A controller that plays pads from the terminal. Each line is either a command or
/// a run of keys, e.g. "zxcv" plays the four bottom pads.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    /// Reads one line and sends its events. Returns false once the input is exhausted.
    fn monitor_io<R, W>(
        events_tx: &Sender<Event>,
        mut reader: R,
        mut writer: W,
    ) -> Result<bool, io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(
            writer,
            "Keys or command ({}, {}, {}, {} <name>, {}, {}, {} <n>, {} <n>, {} <name>, {} [name]): ",
            ARM, RECORD, STOP_RECORDING, ADD, PREVIEW, SILENCE, GAIN, BALANCE, KIT, SAVE,
        )?;
        writer.flush()?;
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            return Ok(false);
        }

        for event in Self::parse_line(&input) {
            events_tx.blocking_send(event).map_err(io::Error::other)?;
        }
        Ok(true)
    }

    fn parse_line(input: &str) -> Vec<Event> {
        let input = input.trim();
        let (command, argument) = match input.split_once(char::is_whitespace) {
            Some((command, argument)) => (command, Some(argument.trim())),
            None => (input, None),
        };

        let event = match (command.to_lowercase().as_str(), argument) {
            ("", None) => return Vec::new(),
            (ARM, None) => Event::Arm,
            (RECORD, None) => Event::Record,
            (STOP_RECORDING, None) => Event::StopRecording,
            (PREVIEW, None) => Event::PreviewTake,
            (SILENCE, None) => Event::StopAll,
            (ADD, Some(name)) => Event::AddRecording(name.to_string()),
            (KIT, Some(name)) => Event::LoadPreset(name.to_string()),
            (SAVE, name) => Event::SaveKit(name.map(str::to_string)),
            (GAIN, Some(value)) | (BALANCE, Some(value)) => match value.parse::<f32>() {
                Ok(value) if command.eq_ignore_ascii_case(GAIN) => Event::MasterGain(value),
                Ok(value) => Event::Balance(value),
                Err(_) => {
                    warn!(input, "Unrecognized value");
                    return Vec::new();
                }
            },
            (_, None) => return Self::keys(input),
            _ => {
                warn!(input, "Unrecognized input");
                return Vec::new();
            }
        };
        vec![event]
    }

    fn keys(input: &str) -> Vec<Event> {
        let events = input
            .chars()
            .filter_map(key_code_for_char)
            .map(|code| Event::Input(InputEvent::Key(KeyEvent::new(&code, KeyTarget::Surface))))
            .collect::<Vec<_>>();
        if events.is_empty() {
            warn!(input, "Unrecognized input");
        }
        events
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            while Self::monitor_io(&events_tx, io::stdin().lock(), io::stdout())? {}

            info!("Keyboard input closed.");
            Ok(())
        })
    }
}
