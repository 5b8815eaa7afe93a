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
use std::{error::Error, path::Path, sync::Arc};

use config::{Config, File};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::info;

use crate::{
    engine::Engine,
    events::{self, ChannelObserver},
};

pub use self::audio::{Audio, Input};
pub use self::controller::Controller;
pub use self::error::ConfigError;
pub use self::midi::Midi;
pub use self::presets::Presets;

mod audio;
mod controller;
mod error;
mod midi;
mod presets;

/// The beatpad configuration file.
#[derive(Deserialize, Clone)]
pub struct Beatpad {
    /// The audio output.
    audio: Audio,

    /// The microphone used for recording.
    input: Option<Input>,

    /// The MIDI input pads are played from.
    midi: Option<Midi>,

    /// The preset API.
    presets: Option<Presets>,

    /// How pads are played (default: keyboard).
    controller: Option<Controller>,
}

impl Beatpad {
    pub fn new(audio: Audio) -> Beatpad {
        Beatpad {
            audio,
            input: None,
            midi: None,
            presets: None,
            controller: None,
        }
    }

    /// Parse the configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Beatpad, ConfigError> {
        let beatpad = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Beatpad>()?;
        beatpad.validate()?;
        Ok(beatpad)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(presets) = &self.presets {
            presets.parse_timeout()?;
        }
        if self.controller() != Controller::Keyboard && self.midi.is_none() {
            return Err(ConfigError::Invalid(
                "a MIDI controller needs a midi device".to_string(),
            ));
        }
        Ok(())
    }

    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    pub fn input(&self) -> Option<&Input> {
        self.input.as_ref()
    }

    pub fn midi(&self) -> Option<&Midi> {
        self.midi.as_ref()
    }

    pub fn presets(&self) -> Option<&Presets> {
        self.presets.as_ref()
    }

    pub fn controller(&self) -> Controller {
        self.controller.unwrap_or_default()
    }
}

/// Initializes the engine and controller from the given config file and returns the controller.
/// When a kit is named it is fetched from the preset API and loaded first. Engine notifications
/// are logged. The controller owns the engine and can be waited on until its inputs close.
pub async fn init_engine_and_controller(
    path: &Path,
    kit: Option<&str>,
) -> Result<crate::controller::Controller, Box<dyn Error>> {
    let config = Beatpad::deserialize(path)?;
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(events::report(events_rx));
    let engine = Arc::new(
        Engine::from_config(&config)?.with_observer(Arc::new(ChannelObserver::new(events_tx))),
    );
    if let Some(kit) = kit {
        let count = engine.fetch_presets().await?;
        info!(presets = count, kit, "Loading kit.");
        engine.load_preset(kit).await?;
    }
    let midi_device = config
        .midi()
        .map(crate::midi::get_device)
        .map_or(Ok(None), |result| result.map(Some))?;
    let driver = crate::controller::driver(config.controller(), midi_device)?;
    crate::controller::Controller::new(engine, driver)
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use super::{Beatpad, ConfigError, Controller};

    fn write_config(yaml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .expect("tempfile");
        file.write_all(yaml.as_bytes()).expect("write");
        file
    }

    #[test]
    fn test_full_config() {
        let file = write_config(
            r#"
            audio:
              device: mock-out
              sample_rate: 48000
            input:
              device: mock-mic
            midi:
              device: mock-midi
              base_note: 48
            presets:
              api_url: http://localhost:3000/api/presets
              audio_base_path: http://localhost:3000/presets/
              upload_url: http://localhost:3000/api/upload
              timeout: 3s
            controller: multi
            "#,
        );
        let config = Beatpad::deserialize(file.path()).expect("valid config");

        assert_eq!(config.audio().device(), "mock-out");
        assert_eq!(config.audio().sample_rate(), 48000);
        assert_eq!(config.input().map(|i| i.device()), Some("mock-mic"));
        assert_eq!(config.midi().map(|m| m.base_note()), Some(48));
        let presets = config.presets().expect("presets");
        assert_eq!(presets.audio_base_path(), "http://localhost:3000/presets/");
        assert_eq!(presets.timeout(), Duration::from_secs(3));
        assert_eq!(config.controller(), Controller::Multi);
    }

    #[test]
    fn test_defaults() {
        let file = write_config(
            r#"
            audio:
              device: default
            midi:
              device: Launchpad
            "#,
        );
        let config = Beatpad::deserialize(file.path()).expect("valid config");
        assert_eq!(config.audio().sample_rate(), 44100);
        assert_eq!(config.audio().configured_sample_rate(), None);
        assert_eq!(config.midi().map(|m| m.base_note()), Some(36));
        assert!(config.presets().is_none());
        assert_eq!(config.controller(), Controller::Keyboard);
    }

    #[test]
    fn test_invalid_configs() {
        let file = write_config(
            r#"
            audio:
              device: mock
            controller: midi
            "#,
        );
        assert!(matches!(
            Beatpad::deserialize(file.path()),
            Err(ConfigError::Invalid(_))
        ));

        let file = write_config(
            r#"
            audio:
              device: mock
            presets:
              api_url: a
              audio_base_path: b
              upload_url: c
              timeout: soon
            "#,
        );
        assert!(matches!(
            Beatpad::deserialize(file.path()),
            Err(ConfigError::Invalid(_))
        ));

        assert!(matches!(
            Beatpad::deserialize(std::path::Path::new("/does/not/exist.yaml")),
            Err(ConfigError::Load(_))
        ));
    }
}
