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
use std::time::Duration;

use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where kits come from and where custom kits are saved.
#[derive(Deserialize, Clone)]
pub struct Presets {
    /// Lists presets, creates kits (POST) and updates them (PATCH <api_url>/<name>).
    api_url: String,

    /// Relative sample URLs are resolved against this.
    audio_base_path: String,

    /// Recordings are uploaded to <upload_url>/<kit name>.
    upload_url: String,

    /// Request timeout (default: 10s)
    timeout: Option<String>,
}

impl Presets {
    pub fn new(api_url: &str, audio_base_path: &str, upload_url: &str) -> Presets {
        Presets {
            api_url: api_url.to_string(),
            audio_base_path: audio_base_path.to_string(),
            upload_url: upload_url.to_string(),
            timeout: None,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn audio_base_path(&self) -> &str {
        &self.audio_base_path
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    /// Returns the request timeout. Unparseable values are rejected when the file is loaded.
    pub fn timeout(&self) -> Duration {
        self.parse_timeout().unwrap_or(DEFAULT_TIMEOUT)
    }

    pub(super) fn parse_timeout(&self) -> Result<Duration, ConfigError> {
        match &self.timeout {
            Some(timeout) => Ok(DurationString::from_string(timeout.clone())
                .map_err(|e| ConfigError::Invalid(format!("presets timeout: {}", e)))?
                .into()),
            None => Ok(DEFAULT_TIMEOUT),
        }
    }
}
