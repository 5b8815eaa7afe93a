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
use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::mpsc::Sender;
use tracing::info;

use crate::error::PermissionError;

/// A mock device. Events are injected with [`Device::mock_event`].
#[derive(Clone)]
pub struct Device {
    name: String,
    sender: Arc<Mutex<Option<Sender<Vec<u8>>>>>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            sender: Arc::new(Mutex::new(None)),
        }
    }

    /// Sends the mock event through to the watcher. Returns false if nobody is watching.
    pub fn mock_event(&self, event: &[u8]) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.try_send(event.to_vec()).is_ok(),
            None => false,
        }
    }

    /// Whether events are being watched.
    pub fn is_watching(&self) -> bool {
        self.sender.lock().is_some()
    }
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    /// Watches MIDI input for events and sends them to the given sender.
    fn watch_events(&self, sender: Sender<Vec<u8>>) -> Result<(), PermissionError> {
        let mut current = self.sender.lock();
        if current.is_some() {
            return Err(PermissionError::Midi("already watching events".into()));
        }
        info!(device = self.name, "Watching mock MIDI events.");
        *current = Some(sender);
        Ok(())
    }

    /// Stops watching events. Dropping the sender closes the watcher's channel.
    fn stop_watch_events(&self) {
        self.sender.lock().take();
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name,)
    }
}
