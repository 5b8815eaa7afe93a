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
use std::{
    collections::HashMap,
    f32::consts::PI,
    io::Cursor,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, SystemTime},
};

use futures::future::BoxFuture;
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::{
    audio::{headless, Backend, DecodedAudio, OutputSink},
    error::{DecodeError, FetchError, PlaybackError},
    events::{Event, Observer, Phase, Status},
    loader::{Body, Fetch, Progress},
    presets::{KitDocument, Preset, PresetSample, PresetStore},
    sample::Sample,
};

/// Wait for the given predicate to return true or fail.
#[inline]
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = SystemTime::now();
    let tick = Duration::from_millis(10);
    let timeout = Duration::from_secs(3);

    loop {
        let elapsed = start.elapsed();
        if elapsed.is_err() {
            panic!("System time error");
        }
        let elapsed = elapsed.unwrap();

        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }
        thread::sleep(tick);
    }
}

/// Wait for the given async predicate to return true or fail.
#[inline]
pub async fn eventually_async<F, Fut>(mut predicate: F, error_msg: &str)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = SystemTime::now();
    let tick = Duration::from_millis(10);
    let timeout = Duration::from_secs(3);

    loop {
        let elapsed = start.elapsed();
        if elapsed.is_err() {
            panic!("System time error");
        }
        let elapsed = elapsed.unwrap();

        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate().await {
            return;
        }
        tokio::time::sleep(tick).await;
    }
}

/// A 440Hz float WAV file held in memory.
pub fn wav_bytes(channels: u16, sample_rate: u32, frames: usize) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(
            &mut cursor,
            WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            },
        )
        .unwrap();
        for frame in 0..frames {
            let value = (2.0 * PI * 440.0 * frame as f32 / sample_rate as f32).sin() * 0.5;
            for _ in 0..channels {
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// A headless backend whose decoder can be switched to refuse every payload.
pub struct RefusingBackend {
    inner: headless::Backend,
    refusing: AtomicBool,
}

impl RefusingBackend {
    pub fn new(refusing: bool) -> RefusingBackend {
        RefusingBackend {
            inner: headless::Backend::new("refusing", 44100),
            refusing: AtomicBool::new(refusing),
        }
    }

    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    pub fn headless(&self) -> &headless::Backend {
        &self.inner
    }
}

impl Backend for RefusingBackend {
    fn id(&self) -> u64 {
        self.inner.id()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn ensure_running(&self) -> Result<(), PlaybackError> {
        self.inner.ensure_running()
    }

    fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio, DecodeError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(DecodeError::new(bytes.len(), "decoder refused the payload"));
        }
        self.inner.decode(bytes)
    }

    fn output_sink(&self) -> OutputSink {
        self.inner.output_sink()
    }
}

impl std::fmt::Display for RefusingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "refusing (Headless)")
    }
}

/// A headless backend whose output takes a while to start, like a live device does.
pub struct SlowStartBackend {
    inner: headless::Backend,
    delay: Duration,
    starts: AtomicUsize,
}

impl SlowStartBackend {
    pub fn new(delay: Duration) -> SlowStartBackend {
        SlowStartBackend {
            inner: headless::Backend::new("slow", 44100),
            delay,
            starts: AtomicUsize::new(0),
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl Backend for SlowStartBackend {
    fn id(&self) -> u64 {
        self.inner.id()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn ensure_running(&self) -> Result<(), PlaybackError> {
        thread::sleep(self.delay);
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.inner.ensure_running()
    }

    fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio, DecodeError> {
        self.inner.decode(bytes)
    }

    fn output_sink(&self) -> OutputSink {
        self.inner.output_sink()
    }
}

impl std::fmt::Display for SlowStartBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slow (Headless)")
    }
}

enum Route {
    Serve {
        bytes: Vec<u8>,
        chunk: usize,
        total: Option<u64>,
        gate: Option<Arc<Notify>>,
    },
    Status(u16),
}

/// A scripted fetcher. Unknown URLs answer 404.
#[derive(Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, Route>>,
    opened: Mutex<Vec<String>>,
}

impl MockFetcher {
    /// Serves `bytes` in chunks, optionally advertising the length.
    pub fn serve_chunked(&self, url: &str, bytes: Vec<u8>, chunk: usize, advertise: bool) {
        let total = advertise.then_some(bytes.len() as u64);
        self.routes.lock().insert(
            url.to_string(),
            Route::Serve {
                bytes,
                chunk: chunk.max(1),
                total,
                gate: None,
            },
        );
    }

    /// Serves `bytes` while advertising a length that has nothing to do with them.
    pub fn serve_claiming(&self, url: &str, bytes: Vec<u8>, total: u64) {
        self.routes.lock().insert(
            url.to_string(),
            Route::Serve {
                bytes,
                chunk: 8192,
                total: Some(total),
                gate: None,
            },
        );
    }

    pub fn serve(&self, url: &str, bytes: Vec<u8>) {
        self.serve_chunked(url, bytes, 8192, true);
    }

    /// Serves `bytes` only once the returned gate is notified.
    pub fn serve_gated(&self, url: &str, bytes: Vec<u8>) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        let total = Some(bytes.len() as u64);
        self.routes.lock().insert(
            url.to_string(),
            Route::Serve {
                bytes,
                chunk: 8192,
                total,
                gate: Some(gate.clone()),
            },
        );
        gate
    }

    pub fn fail_with_status(&self, url: &str, status: u16) {
        self.routes
            .lock()
            .insert(url.to_string(), Route::Status(status));
    }

    /// URLs opened so far, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

impl Fetch for MockFetcher {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<Body, FetchError>> {
        self.opened.lock().push(url.to_string());
        let url = url.to_string();
        let routes = self.routes.lock();
        let result = match routes.get(&url) {
            None => Err(FetchError::Http { url, status: 404 }),
            Some(Route::Status(status)) => Err(FetchError::Http {
                url,
                status: *status,
            }),
            Some(Route::Serve {
                bytes,
                chunk,
                total,
                gate,
            }) => {
                let (tx, rx) = mpsc::channel(4);
                let total = *total;
                let bytes = bytes.clone();
                let chunk = *chunk;
                let gate = gate.clone();
                tokio::spawn(async move {
                    if let Some(gate) = gate {
                        gate.notified().await;
                    }
                    for piece in bytes.chunks(chunk) {
                        if tx.send(Ok(piece.to_vec())).await.is_err() {
                            return;
                        }
                        tokio::task::yield_now().await;
                    }
                });
                Ok(Body {
                    total,
                    chunks: rx,
                })
            }
        };
        Box::pin(async move { result })
    }
}

/// Records every notification.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn progress_for(&self, sample: &Arc<Sample>) -> Vec<Progress> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Progress { sample: s, progress } if Arc::ptr_eq(s, sample) => {
                    Some(*progress)
                }
                _ => None,
            })
            .collect()
    }

    pub fn phases_for(&self, sample: &Arc<Sample>) -> Vec<Phase> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Status { sample: s, status } if Arc::ptr_eq(s, sample) => {
                    Some(status.phase)
                }
                _ => None,
            })
            .collect()
    }

    pub fn errors_for(&self, sample: &Arc<Sample>) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Error { sample: s, message } if Arc::ptr_eq(s, sample) => {
                    Some(message.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// No progress for the sample arrives after its terminal status.
    pub fn last_progress_before_terminal(&self, sample: &Arc<Sample>) -> bool {
        let events = self.events.lock();
        let terminal = events.iter().position(|event| {
            matches!(event, Event::Status { sample: s, status }
                if Arc::ptr_eq(s, sample) && status.phase.is_terminal())
        });
        let last_progress = events.iter().rposition(|event| {
            matches!(event, Event::Progress { sample: s, .. } if Arc::ptr_eq(s, sample))
        });
        match (terminal, last_progress) {
            (Some(terminal), Some(progress)) => progress < terminal,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub fn ready_slots(&self) -> Vec<usize> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::SampleReady { slot, .. } => Some(*slot),
                _ => None,
            })
            .collect()
    }

    pub fn selections(&self) -> Vec<Option<usize>> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::SelectionChanged { slot, .. } => Some(*slot),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }
}

impl Observer for EventLog {
    fn on_sample_ready(&self, slot: usize, sample: &Arc<Sample>) {
        self.events.lock().push(Event::SampleReady {
            slot,
            sample: sample.clone(),
        });
    }

    fn on_progress(&self, sample: &Arc<Sample>, progress: Progress) {
        self.events.lock().push(Event::Progress {
            sample: sample.clone(),
            progress,
        });
    }

    fn on_status(&self, sample: &Arc<Sample>, status: &Status) {
        self.events.lock().push(Event::Status {
            sample: sample.clone(),
            status: status.clone(),
        });
    }

    fn on_error(&self, sample: &Arc<Sample>, message: &str) {
        self.events.lock().push(Event::Error {
            sample: sample.clone(),
            message: message.to_string(),
        });
    }

    fn on_recording_start(&self) {
        self.events.lock().push(Event::RecordingStart);
    }

    fn on_recording_stop(&self) {
        self.events.lock().push(Event::RecordingStop);
    }

    fn on_take_ready(&self, duration: f64) {
        self.events.lock().push(Event::TakeReady { duration });
    }

    fn on_recording_error(&self, message: &str) {
        self.events.lock().push(Event::RecordingError {
            message: message.to_string(),
        });
    }

    fn on_selection_changed(&self, slot: Option<usize>, sample: Option<&Arc<Sample>>) {
        self.events.lock().push(Event::SelectionChanged {
            slot,
            sample: sample.cloned(),
        });
    }
}

/// In-memory preset storage.
#[derive(Default)]
pub struct MockPresetStore {
    presets: Mutex<Vec<Preset>>,
    failing: AtomicBool,
    uploads: Mutex<Vec<(String, String, usize)>>,
    created: Mutex<Vec<KitDocument>>,
    updated: Mutex<Vec<(String, KitDocument)>>,
}

impl MockPresetStore {
    pub fn with_presets(presets: Vec<Preset>) -> MockPresetStore {
        let store = MockPresetStore::default();
        *store.presets.lock() = presets;
        store
    }

    /// Makes every call fail with a 500.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn uploads(&self) -> Vec<(String, String, usize)> {
        self.uploads.lock().clone()
    }

    pub fn created(&self) -> Vec<KitDocument> {
        self.created.lock().clone()
    }

    pub fn updated(&self) -> Vec<(String, KitDocument)> {
        self.updated.lock().clone()
    }

    fn check(&self, url: &str) -> Result<(), FetchError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: 500,
            });
        }
        Ok(())
    }

    fn store(&self, existing: Option<&str>, kit: &KitDocument) {
        let preset = Preset {
            name: kit.name.clone(),
            kind: kit.kind.clone(),
            samples: kit
                .samples
                .iter()
                .map(|s| PresetSample {
                    name: s.name.clone(),
                    url: s.url.clone(),
                })
                .collect(),
        };
        let mut presets = self.presets.lock();
        let name = existing.unwrap_or(&kit.name);
        presets.retain(|p| p.name != name);
        presets.push(preset);
    }
}

impl PresetStore for MockPresetStore {
    fn list(&self) -> BoxFuture<'static, Result<Vec<Preset>, FetchError>> {
        let result = self.check("mock://presets").map(|_| self.presets.lock().clone());
        Box::pin(async move { result })
    }

    fn upload(
        &self,
        folder: &str,
        file_name: &str,
        payload: Arc<Vec<u8>>,
    ) -> BoxFuture<'static, Result<String, FetchError>> {
        let result = self.check("mock://upload").map(|_| {
            self.uploads
                .lock()
                .push((folder.to_string(), file_name.to_string(), payload.len()));
            format!("/uploads/{}/{}", folder, file_name)
        });
        Box::pin(async move { result })
    }

    fn create(&self, kit: &KitDocument) -> BoxFuture<'static, Result<String, FetchError>> {
        let result = self.check("mock://presets").map(|_| {
            self.created.lock().push(kit.clone());
            self.store(None, kit);
            kit.name.clone()
        });
        Box::pin(async move { result })
    }

    fn update(
        &self,
        existing: &str,
        kit: &KitDocument,
    ) -> BoxFuture<'static, Result<String, FetchError>> {
        let result = self.check("mock://presets").map(|_| {
            self.updated
                .lock()
                .push((existing.to_string(), kit.clone()));
            self.store(Some(existing), kit);
            kit.name.clone()
        });
        Box::pin(async move { result })
    }
}
