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
use serde::Deserialize;

const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// A YAML representation of the audio output configuration.
#[derive(Deserialize, Clone)]
pub struct Audio {
    /// The audio device. "default" picks the host's default output.
    device: String,

    /// Target sample rate in Hz (default: 44100)
    sample_rate: Option<u32>,
}

impl Audio {
    /// New will create a new Audio configuration.
    pub fn new(device: &str) -> Audio {
        Audio {
            device: device.to_string(),
            sample_rate: None,
        }
    }

    /// Sets the sample rate.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Audio {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Returns the target sample rate (default: 44100)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    /// Returns the sample rate only if one was configured. The device's own rate is used otherwise.
    pub fn configured_sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }
}

/// The microphone used for recording.
#[derive(Deserialize, Clone)]
pub struct Input {
    device: String,
}

impl Input {
    pub fn new(device: &str) -> Input {
        Input {
            device: device.to_string(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}
