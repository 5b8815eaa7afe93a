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
use std::error::Error;
use std::path::PathBuf;

use beatpad::config::{self, init_engine_and_controller};
use beatpad::presets::{HttpPresetStore, PresetStore};
use beatpad::{audio, midi};
use clap::{crate_version, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A sample pad instrument."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the available MIDI input devices.
    MidiDevices {},
    /// Lists the kits offered by the configured preset API.
    Presets {
        /// The path to the beatpad config.
        config_path: String,
    },
    /// Start will start the beatpad.
    Start {
        /// The path to the beatpad config.
        config_path: String,
        /// The preset kit to load before taking input.
        #[arg(short, long)]
        kit: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::MidiDevices {} => {
            let devices = midi::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Presets { config_path } => {
            let config = config::Beatpad::deserialize(&PathBuf::from(&config_path))?;
            let Some(presets) = config.presets() else {
                return Err(format!("{} has no presets section", config_path).into());
            };

            let presets = HttpPresetStore::new(presets).list().await?;
            if presets.is_empty() {
                println!("No presets found.");
                return Ok(());
            }

            println!("Presets (count: {}):", presets.len());
            for preset in presets {
                println!(
                    "- {} [{}] ({} samples)",
                    preset.name,
                    preset.kind,
                    preset.samples.len()
                );
            }
        }
        Commands::Start { config_path, kit } => {
            init_engine_and_controller(&PathBuf::from(config_path), kit.as_deref())
                .await?
                .join()
                .await?;
        }
    }

    Ok(())
}
