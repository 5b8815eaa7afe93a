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

use tokio::{sync::mpsc::Sender, task::JoinHandle};

use super::Event;
use crate::controller;

pub enum SubDriver {
    Keyboard(Arc<controller::keyboard::Driver>),
    Midi(Arc<controller::midi::Driver>),
}

/// A controller that plays pads from several other drivers at once.
pub struct Driver {
    /// The drivers whose events are merged.
    sub_drivers: Vec<SubDriver>,
}

impl Driver {
    pub fn new(sub_drivers: Vec<SubDriver>) -> Driver {
        Driver { sub_drivers }
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        let join_handles = self
            .sub_drivers
            .iter()
            .map(|driver| match driver {
                SubDriver::Midi(arc) => arc.as_ref().monitor_events(events_tx.clone()),
                SubDriver::Keyboard(arc) => arc.as_ref().monitor_events(events_tx.clone()),
            })
            .collect::<Vec<_>>();

        tokio::spawn(async move {
            let results = futures::future::join_all(join_handles).await;
            for result in results {
                result.map_err(io::Error::other)??;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, sync::Arc};

    use crate::{
        audio::headless,
        controller::{self, multi::SubDriver, Controller},
        engine::Engine,
        midi::{Device as _, MockDevice},
        presets::PresetSample,
        testutil::{eventually, wav_bytes, MockFetcher},
    };

    #[tokio::test(flavor = "multi_thread")]
    async fn test_multi_controller() -> Result<(), Box<dyn Error>> {
        let backend = Arc::new(headless::Backend::new("mock", 44100));
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.serve("http://host/Kick.wav", wav_bytes(1, 44100, 4410));
        let engine = Arc::new(Engine::new(backend.clone()).with_fetcher(fetcher));
        engine
            .load_kit(&[PresetSample {
                name: "Kick".to_string(),
                url: "http://host/Kick.wav".to_string(),
            }])
            .await;

        let pads = Arc::new(MockDevice::get("mock-pads"));
        let keys = Arc::new(MockDevice::get("mock-keys"));
        let driver = Arc::new(controller::multi::Driver::new(vec![
            SubDriver::Midi(controller::midi::Driver::new(pads.clone())),
            SubDriver::Midi(controller::midi::Driver::new(keys.clone())),
        ]));
        let mut controller = Controller::new(engine.clone(), driver)?;

        eventually(
            || pads.is_watching() && keys.is_watching(),
            "MIDI devices never watched",
        );

        let base = engine.router().base_note();
        assert!(pads.mock_event(&[0x90, base, 100]));
        eventually(|| backend.played().len() == 1, "Pads never played");
        assert!(keys.mock_event(&[0x99, base, 20]));
        eventually(|| backend.played().len() == 2, "Keys never played");

        // The controller keeps going until every sub driver is done.
        pads.stop_watch_events();
        assert!(keys.mock_event(&[0x90, base, 100]));
        eventually(|| backend.played().len() == 3, "Keys stopped with the pads");

        keys.stop_watch_events();
        assert!(controller.join().await.is_ok(), "Error waiting for controller");
        Ok(())
    }
}
