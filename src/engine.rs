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
use std::{error::Error, sync::Arc, time::Duration};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{
    audio::{
        self,
        effects::EffectsChain,
        input::{self, Microphone},
        Backend, DecodedAudio,
    },
    config,
    error::{EngineError, IndexError, PermissionError, PlaybackError},
    events::{NoopObserver, Observer},
    kit::{Kit, KitInfo},
    loader::{DefaultFetcher, Fetch, Loader},
    presets::{self, KitDocument, Preset, PresetSample, PresetStore},
    recorder::{Recorder, Take},
    router::{InputEvent, InputRouter, DEFAULT_BASE_NOTE},
    sample::{Sample, TrimRegion},
};

/// Connect timeout used when nothing is configured.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Something dropped onto a pad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropPayload {
    /// The pending recorded take.
    InternalRecording { name: String },
    /// A sound found somewhere else, e.g. a search result.
    Remote { name: String, url: String },
}

struct State {
    kit: Kit,
    current: Option<Arc<Sample>>,
    /// Trim region being dragged for the current sample, not committed yet.
    staged: Option<TrimRegion>,
}

impl State {
    fn commit_staged(&mut self) {
        if let (Some(region), Some(current)) = (self.staged.take(), self.current.as_ref()) {
            if let Err(e) = current.set_trim(region.start, region.end) {
                debug!(err = e.to_string(), "Dropping staged trim region.");
            }
        }
    }

    /// Forgets the selection if its sample left the kit.
    fn drop_stale_selection(&mut self) -> bool {
        match &self.current {
            Some(current) if !self.kit.contains(current) => {
                self.current = None;
                self.staged = None;
                true
            }
            _ => false,
        }
    }
}

/// The sample engine. Owns the backend, the effects chain, the kit and the recorder.
///
/// Locks are only ever held between suspension points, so concurrent loads, triggers
/// and edits interleave freely.
pub struct Engine {
    backend: Arc<dyn Backend>,
    effects: EffectsChain,
    fetcher: Arc<dyn Fetch>,
    observer: Arc<dyn Observer>,
    microphone: Arc<dyn Microphone>,
    store: Option<Arc<dyn PresetStore>>,
    base_path: String,
    router: InputRouter,
    state: Mutex<State>,
    recorder: Mutex<Recorder>,
    presets: RwLock<Vec<Preset>>,
}

impl Engine {
    /// Creates an engine on the given backend with a custom, empty kit.
    pub fn new(backend: Arc<dyn Backend>) -> Engine {
        let effects = EffectsChain::new(backend.as_ref());
        Engine {
            backend,
            effects,
            fetcher: Arc::new(DefaultFetcher::new(DEFAULT_TIMEOUT)),
            observer: Arc::new(NoopObserver),
            microphone: input::get_microphone(None),
            store: None,
            base_path: String::new(),
            router: InputRouter::default(),
            state: Mutex::new(State {
                kit: Kit::custom(),
                current: None,
                staged: None,
            }),
            recorder: Mutex::new(Recorder::new()),
            presets: RwLock::new(Vec::new()),
        }
    }

    /// Builds the engine described by the configuration.
    pub fn from_config(config: &config::Beatpad) -> Result<Engine, Box<dyn Error>> {
        let backend = audio::get_backend(config.audio())?;
        let mut engine = Engine::new(backend)
            .with_microphone(input::get_microphone(config.input()))
            .with_router(InputRouter::new(
                config
                    .midi()
                    .map(|midi| midi.base_note())
                    .unwrap_or(DEFAULT_BASE_NOTE),
            ));
        if let Some(presets) = config.presets() {
            engine = engine
                .with_fetcher(Arc::new(DefaultFetcher::new(presets.timeout())))
                .with_store(Arc::new(presets::HttpPresetStore::new(presets)))
                .with_base_path(presets.audio_base_path());
        }
        Ok(engine)
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetch>) -> Engine {
        self.fetcher = fetcher;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Engine {
        self.observer = observer;
        self
    }

    pub fn with_microphone(mut self, microphone: Arc<dyn Microphone>) -> Engine {
        self.microphone = microphone;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn PresetStore>) -> Engine {
        self.store = Some(store);
        self
    }

    /// Base that relative preset URLs are resolved against.
    pub fn with_base_path(mut self, base_path: &str) -> Engine {
        self.base_path = base_path.to_string();
        self
    }

    pub fn with_router(mut self, router: InputRouter) -> Engine {
        self.router = router;
        self
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    pub fn effects(&self) -> &EffectsChain {
        &self.effects
    }

    pub fn router(&self) -> InputRouter {
        self.router
    }

    fn loader(&self) -> Loader {
        Loader::new(
            self.backend.clone(),
            self.fetcher.clone(),
            self.observer.clone(),
        )
    }

    /// Activates the audio runtime. Starting a live device can block for a while, so it
    /// happens on the blocking pool. Failures are logged and retried on the next gesture.
    pub async fn ensure_running(&self) -> bool {
        let backend = self.backend.clone();
        match tokio::task::spawn_blocking(move || backend.ensure_running()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(err = e.to_string(), "Audio output is not running yet.");
                false
            }
            Err(e) => {
                warn!(err = e.to_string(), "Starting the audio output panicked.");
                false
            }
        }
    }

    // Kit management.

    /// The sample on a pad.
    pub fn sample(&self, index: usize) -> Result<Option<Arc<Sample>>, IndexError> {
        Ok(self.state.lock().kit.get(index)?.cloned())
    }

    /// Occupied pads in slot order.
    pub fn samples(&self) -> Vec<(usize, Arc<Sample>)> {
        self.state
            .lock()
            .kit
            .samples()
            .map(|(index, sample)| (index, sample.clone()))
            .collect()
    }

    pub fn kit_info(&self) -> Option<KitInfo> {
        self.state.lock().kit.info().cloned()
    }

    /// A description of the kit for display.
    pub fn describe_kit(&self) -> String {
        self.state.lock().kit.to_string()
    }

    pub fn current_sample(&self) -> Option<Arc<Sample>> {
        self.state.lock().current.clone()
    }

    fn install_kit(&self, samples: Vec<Arc<Sample>>, info: Option<KitInfo>) {
        let cleared = {
            let mut state = self.state.lock();
            state.commit_staged();
            state.kit = Kit::from_samples(samples, info);
            state.current.take().is_some()
        };
        if cleared {
            self.observer.on_selection_changed(None, None);
        }
    }

    /// Replaces the kit with samples built from preset entries, then loads them all.
    pub async fn load_kit(&self, entries: &[PresetSample]) -> Vec<Arc<Sample>> {
        self.load_kit_as(entries, None).await
    }

    async fn load_kit_as(&self, entries: &[PresetSample], info: Option<KitInfo>) -> Vec<Arc<Sample>> {
        let samples: Vec<Arc<Sample>> = entries
            .iter()
            .map(|entry| {
                Sample::new(
                    &entry.name,
                    Some(presets::resolve_url(&self.base_path, &entry.url)),
                )
            })
            .collect();
        info!(samples = samples.len(), base = self.base_path, "Loading kit.");
        self.install_kit(samples.clone(), info);
        self.load_all(&samples).await;
        samples
    }

    /// Loads every sample that has a source, concurrently. Once all have settled the
    /// first playable pad is selected if nothing is selected.
    pub async fn load_all(&self, samples: &[Arc<Sample>]) {
        join_all(samples.iter().map(|sample| self.load_sample(sample))).await;

        let first = {
            let state = self.state.lock();
            if state.current.is_some() {
                return;
            }
            let first = state
                .kit
                .samples()
                .find(|(_, sample)| sample.is_playable())
                .map(|(_, sample)| sample.clone());
            first
        };
        if let Some(first) = first {
            self.select_sample(&first);
        }
    }

    /// Loads one sample. The buffer is only installed if the sample is still on a pad
    /// when the load finishes. Returns whether it was installed.
    pub async fn load_sample(&self, sample: &Arc<Sample>) -> bool {
        let Some(url) = sample.source_url() else {
            return false;
        };
        sample.set_loading();
        let loader = self.loader();
        let buffer = match loader.fetch_decoded(&url, sample).await {
            Ok(buffer) => buffer,
            Err(e) => {
                sample.mark_failed(&e.to_string());
                return false;
            }
        };

        let slot = {
            let state = self.state.lock();
            let slot = state.kit.position_of(sample);
            match slot {
                Some(_) => sample.set_buffer(buffer),
                None => sample.mark_abandoned(),
            }
            slot
        };
        match slot {
            Some(slot) => {
                loader.ready(sample);
                self.observer.on_sample_ready(slot, sample);
                true
            }
            None => {
                debug!(sample = sample.name(), "Sample left the kit while loading, discarding.");
                loader.abandon(sample);
                false
            }
        }
    }

    /// Clears every pad and the kit name for a new custom kit.
    pub fn start_custom_kit(&self) {
        info!("Starting a custom kit.");
        let cleared = {
            let mut state = self.state.lock();
            state.kit = Kit::custom();
            state.staged = None;
            state.current.take().is_some()
        };
        if cleared {
            self.observer.on_selection_changed(None, None);
        }
    }

    /// Puts `sample` on pad `index`, whatever was there. Returns the previous occupant.
    pub fn assign_slot(
        &self,
        index: usize,
        sample: Arc<Sample>,
    ) -> Result<Option<Arc<Sample>>, IndexError> {
        let (previous, deselected) = {
            let mut state = self.state.lock();
            let previous = state.kit.assign(index, sample)?;
            (previous, state.drop_stale_selection())
        };
        if deselected {
            self.observer.on_selection_changed(None, None);
        }
        Ok(previous)
    }

    /// Commits the pending take to a pad chosen by the kit's recording policy and selects it.
    pub fn add_recorded_sample(&self, name: &str) -> Result<usize, EngineError> {
        let take = self
            .recorder
            .lock()
            .take_pending()
            .ok_or(EngineError::NoPendingTake)?;
        let sample = Sample::recorded(name, take.buffer, take.payload);

        let slot = {
            let mut state = self.state.lock();
            let current = state.current.clone();
            state.kit.place_recorded(sample.clone(), current.as_ref())
        };
        info!(sample = name, slot, "Recorded sample added.");
        self.observer.on_sample_ready(slot, &sample);
        self.select_sample(&sample);
        Ok(slot)
    }

    /// Makes `sample` current. Any trim drag on the previous sample is committed first.
    /// Returns false if it already was current.
    pub fn select_sample(&self, sample: &Arc<Sample>) -> bool {
        let slot = {
            let mut state = self.state.lock();
            if state
                .current
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, sample))
            {
                return false;
            }
            state.commit_staged();
            state.current = Some(sample.clone());
            state.kit.position_of(sample)
        };
        debug!(sample = sample.name(), slot, "Selected sample.");
        self.observer.on_selection_changed(slot, Some(sample));
        true
    }

    // Playback.

    /// Plays a pad. Empty and unplayable pads do nothing. Returns whether something played.
    pub fn trigger_pad(&self, index: usize) -> Result<bool, EngineError> {
        let Some(sample) = self.sample(index)? else {
            return Ok(false);
        };
        if !sample.is_playable() {
            debug!(slot = index, "Pad is not ready.");
            return Ok(false);
        }
        self.select_sample(&sample);
        Ok(self.play_sample(&sample)?)
    }

    /// Routes an input event to its pad and triggers it.
    pub fn handle_input(&self, event: &InputEvent) -> Result<bool, EngineError> {
        match self.router.route(event) {
            Some(pad) => self.trigger_pad(pad),
            None => Ok(false),
        }
    }

    /// Plays the trimmed region of a sample through the effects chain. Voices queue up
    /// until the output is running.
    pub fn play_sample(&self, sample: &Arc<Sample>) -> Result<bool, PlaybackError> {
        let Some(buffer) = sample.buffer() else {
            return Ok(false);
        };
        let trim = sample.trim();
        self.play_buffer(&buffer, trim.start, trim.duration())?;
        Ok(true)
    }

    fn play_buffer(
        &self,
        buffer: &DecodedAudio,
        offset: f64,
        duration: f64,
    ) -> Result<(), PlaybackError> {
        let mut node = self.backend.create_playback_node();
        node.connect(&self.effects.input())?;
        node.start(buffer, offset, duration)
    }

    /// Silences everything that is playing.
    pub fn stop_all(&self) {
        self.backend.output_sink().stop_all();
    }

    // Trim editing.

    /// Sets the current sample's trim region right away.
    pub fn set_trim(&self, start: f64, end: f64) -> Result<TrimRegion, EngineError> {
        let mut state = self.state.lock();
        let current = state
            .current
            .clone()
            .ok_or(EngineError::InvalidTrim { start, end })?;
        state.staged = None;
        current.set_trim(start, end)
    }

    /// Stages a trim region for the current sample while it is being dragged.
    pub fn drag_trim(&self, start: f64, end: f64) -> Result<TrimRegion, EngineError> {
        let mut state = self.state.lock();
        let current = state
            .current
            .clone()
            .ok_or(EngineError::InvalidTrim { start, end })?;
        let region = current.clamp_trim(start, end)?;
        state.staged = Some(region);
        Ok(region)
    }

    /// Commits the dragged region and previews the sample with it.
    pub fn release_trim(&self) -> Result<Option<TrimRegion>, EngineError> {
        let (current, region) = {
            let mut state = self.state.lock();
            let Some(region) = state.staged.take() else {
                return Ok(None);
            };
            let Some(current) = state.current.clone() else {
                return Ok(None);
            };
            (current.clone(), current.set_trim(region.start, region.end)?)
        };
        self.play_sample(&current)?;
        Ok(Some(region))
    }

    // Recording.

    /// Opens the microphone. On refusal the recorder stays idle.
    pub async fn arm_recorder(&self) -> Result<(), EngineError> {
        let microphone = self.microphone.clone();
        let opened = tokio::task::spawn_blocking(move || microphone.open())
            .await
            .map_err(|e| PermissionError::Microphone(e.to_string()))
            .and_then(|opened| opened);

        match opened {
            Ok(stream) => {
                info!(microphone = self.microphone.to_string(), "Recorder armed.");
                self.recorder.lock().arm(stream);
                Ok(())
            }
            Err(e) => {
                warn!(err = e.to_string(), "Microphone unavailable.");
                self.recorder.lock().disarm();
                self.observer.on_recording_error(&e.to_string());
                Err(e.into())
            }
        }
    }

    /// Starts capturing. Does nothing if already recording.
    pub fn start_recording(&self) -> Result<bool, EngineError> {
        let started = self.recorder.lock().start()?;
        if started {
            self.observer.on_recording_start();
        }
        Ok(started)
    }

    /// Stops capturing and decodes the take. Returns the take's duration once it is
    /// pending, or `None` if nothing was recording. A take that fails to decode is
    /// discarded and reported.
    pub async fn stop_recording(&self) -> Result<Option<f64>, EngineError> {
        let Some(finished) = self.recorder.lock().stop() else {
            return Ok(None);
        };
        self.observer.on_recording_stop();

        let payload = Arc::new(finished.payload);
        match audio::decode_async(self.backend.clone(), payload.to_vec()).await {
            Ok(buffer) => {
                let duration = buffer.duration();
                let kept = self
                    .recorder
                    .lock()
                    .set_pending(finished.id, Take { buffer, payload });
                if kept {
                    info!(duration, "Recorded take ready.");
                    self.observer.on_take_ready(duration);
                }
                Ok(kept.then_some(duration))
            }
            Err(e) => {
                warn!(err = e.to_string(), "Recorded take could not be decoded.");
                self.observer.on_recording_error(&e.to_string());
                Err(e.into())
            }
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.lock().is_recording()
    }

    /// Duration of the take waiting to be placed, if any.
    pub fn pending_take(&self) -> Option<f64> {
        self.recorder
            .lock()
            .pending()
            .map(|take| take.buffer.duration())
    }

    /// Plays the pending take without consuming it.
    pub fn play_pending_take(&self) -> Result<(), EngineError> {
        let buffer = self
            .recorder
            .lock()
            .pending()
            .map(|take| take.buffer.clone())
            .ok_or(EngineError::NoPendingTake)?;
        let duration = buffer.duration();
        Ok(self.play_buffer(&buffer, 0.0, duration)?)
    }

    // Drag and drop.

    /// Handles something dropped onto pad `index`. Returns whether the pad ended up playable.
    pub async fn drop_on_pad(
        &self,
        index: usize,
        payload: DropPayload,
    ) -> Result<bool, EngineError> {
        // Bad indices must not consume the take.
        self.sample(index)?;

        match payload {
            DropPayload::InternalRecording { name } => {
                let take = self
                    .recorder
                    .lock()
                    .take_pending()
                    .ok_or(EngineError::NoPendingTake)?;
                let sample = Sample::recorded(&name, take.buffer, take.payload);
                self.assign_slot(index, sample.clone())?;
                info!(sample = name, slot = index, "Recording dropped on pad.");
                self.observer.on_sample_ready(index, &sample);
                self.select_sample(&sample);
                Ok(true)
            }
            DropPayload::Remote { name, url } => {
                let sample = Sample::new(&name, Some(url));
                self.assign_slot(index, sample.clone())?;
                let loaded = self.load_sample(&sample).await;
                if loaded {
                    self.select_sample(&sample);
                }
                Ok(loaded)
            }
        }
    }

    // Presets.

    fn store(&self) -> Result<Arc<dyn PresetStore>, EngineError> {
        self.store.clone().ok_or(EngineError::NoPresetStore)
    }

    /// Refreshes the preset cache. On failure the cache is left as it was.
    pub async fn fetch_presets(&self) -> Result<usize, EngineError> {
        let presets = self.store()?.list().await?;
        let count = presets.len();
        *self.presets.write() = presets;
        info!(presets = count, "Presets fetched.");
        Ok(count)
    }

    /// Snapshot of the preset cache.
    pub fn presets(&self) -> Vec<Preset> {
        self.presets.read().clone()
    }

    /// Loads a cached preset by name.
    pub async fn load_preset(&self, name: &str) -> Result<Vec<Arc<Sample>>, EngineError> {
        let preset = self
            .presets
            .read()
            .iter()
            .find(|preset| preset.name == name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownPreset(name.to_string()))?;

        info!(preset = preset.name, custom = preset.is_custom(), "Loading preset.");
        let info = KitInfo {
            name: preset.name.clone(),
            custom: preset.is_custom(),
        };
        Ok(self.load_kit_as(&preset.samples, Some(info)).await)
    }

    /// Saves the kit. An already named kit is updated in place; otherwise `new_name`
    /// creates it. Recordings are uploaded first. Nothing in memory changes unless
    /// every request succeeds. Returns the name the kit was saved under.
    pub async fn save_kit(&self, new_name: Option<&str>) -> Result<String, EngineError> {
        let store = self.store()?;
        let (existing, samples) = {
            let state = self.state.lock();
            (
                state.kit.info().map(|info| info.name.clone()),
                state
                    .kit
                    .samples()
                    .map(|(_, sample)| sample.clone())
                    .collect::<Vec<_>>(),
            )
        };
        let kit_name = match (&existing, new_name.map(str::trim)) {
            (Some(existing), _) => existing.clone(),
            (None, Some(name)) if !name.is_empty() => name.to_string(),
            _ => return Err(EngineError::KitNameRequired),
        };

        let mut uploaded = Vec::new();
        let mut entries = Vec::new();
        for sample in &samples {
            let name = sample.name();
            let url = match (sample.source_url(), sample.recording()) {
                (Some(url), _) => url,
                (None, Some(payload)) => {
                    let url = store
                        .upload(&kit_name, &presets::upload_file_name(&name), payload)
                        .await?;
                    uploaded.push((sample.clone(), url.clone()));
                    url
                }
                (None, None) => {
                    warn!(sample = name, "Sample has no source, leaving it out.");
                    continue;
                }
            };
            entries.push(PresetSample { name, url });
        }

        let document = KitDocument::custom(&kit_name, entries);
        let saved_name = match &existing {
            Some(existing) => store.update(existing, &document).await?,
            None => store.create(&document).await?,
        };

        for (sample, url) in &uploaded {
            sample.set_source_url(url);
        }
        self.state.lock().kit.set_info(Some(KitInfo {
            name: saved_name.clone(),
            custom: true,
        }));
        info!(kit = saved_name, "Kit saved.");

        if let Err(e) = self.fetch_presets().await {
            warn!(err = e.to_string(), "Unable to refresh presets after saving.");
        }
        Ok(saved_name)
    }
}
