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
use std::{error::Error, fmt, sync::Arc};

use tokio::sync::mpsc::Sender;

use crate::{config, error::PermissionError};

mod midir;
mod mock;

pub use self::mock::Device as MockDevice;

/// A MIDI input that pads can be played from.
pub trait Device: fmt::Display + std::marker::Send + std::marker::Sync {
    /// Returns the name of the device.
    fn name(&self) -> String;

    /// Watches MIDI input for events and sends them to the given sender.
    fn watch_events(&self, sender: Sender<Vec<u8>>) -> Result<(), PermissionError>;

    /// Stops watching events.
    fn stop_watch_events(&self);
}

/// Lists devices known to midir.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    midir::list()
}

/// Gets the device for the given configuration. Devices named "mock..." get a mock device.
pub fn get_device(config: &config::Midi) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    let name = config.device();
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name)));
    };

    Ok(Arc::new(midir::get(name)?))
}

#[cfg(test)]
mod test {
    use crate::config;

    #[test]
    fn test_get_mock_device() {
        let device = super::get_device(&config::Midi::new("mock-pads", None)).expect("device");
        assert_eq!(device.name(), "mock-pads");
        assert_eq!(device.to_string(), "mock-pads (Mock)");
    }
}
