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

//! Streaming sample loading.
//!
//! A payload is read chunk by chunk with progress after every chunk, then
//! decoded by the backend. Failures are reported on the sample and turned into
//! `None` so one bad sample never stops a kit from loading.

use std::{io::Read, path::PathBuf, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use tokio::{
    io::AsyncReadExt,
    sync::{mpsc, oneshot},
};
use tracing::{debug, info, warn};

use crate::{
    audio::{self, Backend, DecodedAudio},
    error::{EngineError, FetchError},
    events::{Observer, Phase, Status},
    sample::Sample,
};

/// Size of the chunks read from a body.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Chunks buffered between the reader and the loader.
const CHUNK_QUEUE: usize = 16;

/// Most that is reserved up front on the strength of an advertised length.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Largest payload accepted for a single sample.
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Bytes received so far and the advertised length, if there was one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub received: u64,
    pub total: Option<u64>,
}

impl Progress {
    /// Percentage for display. Never reaches 100 while a load is in flight.
    ///
    /// Without an advertised length this is a slow logarithmic creep that stays
    /// between 1 and 95.
    pub fn percent(&self) -> u8 {
        match self.total {
            Some(total) if total > 0 => {
                ((self.received.saturating_mul(100) / total).min(99)) as u8
            }
            _ => {
                let creep = ((self.received as f64) * 25.0).log10().floor();
                if creep.is_finite() {
                    creep.clamp(1.0, 95.0) as u8
                } else {
                    1
                }
            }
        }
    }
}

/// An open response body delivered in chunks.
pub struct Body {
    pub total: Option<u64>,
    pub chunks: mpsc::Receiver<Result<Vec<u8>, FetchError>>,
}

/// Opens streaming reads.
pub trait Fetch: Send + Sync {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<Body, FetchError>>;
}

/// Fetches over HTTP with ureq on the blocking pool.
#[derive(Clone)]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    /// The timeout bounds connecting and every read, so a stalled server fails the load
    /// instead of holding it open. Slow but steady downloads still finish.
    pub fn new(timeout: Duration) -> HttpFetcher {
        HttpFetcher {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(timeout)
                .timeout_read(timeout)
                .build(),
        }
    }
}

fn stream_http(
    agent: ureq::Agent,
    url: String,
    head: oneshot::Sender<Result<Option<u64>, FetchError>>,
    chunks: mpsc::Sender<Result<Vec<u8>, FetchError>>,
) {
    let response = match agent.get(&url).call() {
        Ok(response) => response,
        Err(ureq::Error::Status(status, _)) => {
            let _ = head.send(Err(FetchError::Http { url, status }));
            return;
        }
        Err(e) => {
            let _ = head.send(Err(FetchError::Transport {
                url,
                message: e.to_string(),
            }));
            return;
        }
    };
    if response.status() == 204 {
        let _ = head.send(Err(FetchError::MissingBody(url)));
        return;
    }

    let total = response
        .header("Content-Length")
        .and_then(|length| length.parse().ok());
    if head.send(Ok(total)).is_err() {
        return;
    }

    let mut reader = response.into_reader();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => return,
            Ok(read) => {
                if chunks.blocking_send(Ok(buffer[..read].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = chunks.blocking_send(Err(FetchError::Io { url, source: e }));
                return;
            }
        }
    }
}

impl Fetch for HttpFetcher {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<Body, FetchError>> {
        let agent = self.agent.clone();
        let url = url.to_string();
        Box::pin(async move {
            let (head_tx, head_rx) = oneshot::channel();
            let (chunks_tx, chunks_rx) = mpsc::channel(CHUNK_QUEUE);
            debug!(url, "Opening HTTP stream.");
            tokio::task::spawn_blocking(move || stream_http(agent, url, head_tx, chunks_tx));

            let total = head_rx
                .await
                .map_err(|_| FetchError::Malformed("HTTP reader stopped early".into()))??;
            Ok(Body {
                total,
                chunks: chunks_rx,
            })
        })
    }
}

/// Reads `file://` URLs and plain paths.
#[derive(Clone, Default)]
pub struct FileFetcher;

fn file_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
}

impl Fetch for FileFetcher {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<Body, FetchError>> {
        let url = url.to_string();
        Box::pin(async move {
            let path = file_path(&url);
            let io_error = |source| FetchError::Io {
                url: url.clone(),
                source,
            };
            let mut file = tokio::fs::File::open(&path).await.map_err(io_error)?;
            let total = file.metadata().await.map_err(io_error)?.len();

            let (chunks_tx, chunks_rx) = mpsc::channel(CHUNK_QUEUE);
            tokio::spawn(async move {
                let mut buffer = vec![0u8; CHUNK_SIZE];
                loop {
                    match file.read(&mut buffer).await {
                        Ok(0) => return,
                        Ok(read) => {
                            if chunks_tx.send(Ok(buffer[..read].to_vec())).await.is_err() {
                                return;
                            }
                        }
                        Err(source) => {
                            let _ = chunks_tx.send(Err(FetchError::Io { url, source })).await;
                            return;
                        }
                    }
                }
            });

            Ok(Body {
                total: Some(total),
                chunks: chunks_rx,
            })
        })
    }
}

/// Chooses HTTP or file access by the URL's scheme.
#[derive(Clone)]
pub struct DefaultFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl DefaultFetcher {
    pub fn new(timeout: Duration) -> DefaultFetcher {
        DefaultFetcher {
            http: HttpFetcher::new(timeout),
            file: FileFetcher,
        }
    }
}

impl Fetch for DefaultFetcher {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<Body, FetchError>> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.http.open(url)
        } else {
            self.file.open(url)
        }
    }
}

/// Streams payloads and decodes them with the backend.
#[derive(Clone)]
pub struct Loader {
    backend: Arc<dyn Backend>,
    fetcher: Arc<dyn Fetch>,
    observer: Arc<dyn Observer>,
}

impl Loader {
    pub fn new(
        backend: Arc<dyn Backend>,
        fetcher: Arc<dyn Fetch>,
        observer: Arc<dyn Observer>,
    ) -> Loader {
        Loader {
            backend,
            fetcher,
            observer,
        }
    }

    /// Loads `url` on behalf of `sample`. The sample itself is not modified; the
    /// decoded buffer is returned so the caller can check the sample is still wanted.
    /// Failures have already been reported when this returns `None`.
    pub async fn load(&self, url: &str, sample: &Arc<Sample>) -> Option<DecodedAudio> {
        self.try_load(url, sample).await.ok()
    }

    /// Like [`Loader::load`], but hands back the failure as well.
    pub async fn try_load(
        &self,
        url: &str,
        sample: &Arc<Sample>,
    ) -> Result<DecodedAudio, EngineError> {
        let buffer = self.fetch_decoded(url, sample).await?;
        self.ready(sample);
        Ok(buffer)
    }

    /// Fetches and decodes without ending the load. The caller settles it with
    /// [`Loader::ready`] or [`Loader::abandon`]; failures are already reported.
    pub async fn fetch_decoded(
        &self,
        url: &str,
        sample: &Arc<Sample>,
    ) -> Result<DecodedAudio, EngineError> {
        self.status(sample, Phase::Connect, format!("Connecting to {}", url));

        let payload = match self.read(url, sample).await {
            Ok(payload) => payload,
            Err(e) => {
                self.fail(sample, &e.to_string());
                return Err(e.into());
            }
        };

        self.status(
            sample,
            Phase::Decoding,
            format!("Decoding {} bytes", payload.len()),
        );
        match audio::decode_async(self.backend.clone(), payload).await {
            Ok(buffer) => {
                info!(
                    sample = sample.name(),
                    url,
                    duration = buffer.duration(),
                    "Sample decoded."
                );
                Ok(buffer)
            }
            Err(e) => {
                self.fail(sample, &e.to_string());
                Err(e.into())
            }
        }
    }

    pub fn ready(&self, sample: &Arc<Sample>) {
        self.status(sample, Phase::Ready, "Ready");
    }

    /// Ends a load whose result nobody wants any more.
    pub fn abandon(&self, sample: &Arc<Sample>) {
        debug!(sample = sample.name(), "Load abandoned.");
        self.status(
            sample,
            Phase::Abandoned,
            "Replaced before it finished loading",
        );
    }

    async fn read(&self, url: &str, sample: &Arc<Sample>) -> Result<Vec<u8>, FetchError> {
        let mut body = self.fetcher.open(url).await?;
        let reserve = body.total.unwrap_or(0).min(MAX_PREALLOC) as usize;
        let mut payload = Vec::with_capacity(reserve);

        while let Some(chunk) = body.chunks.recv().await {
            let chunk = chunk?;
            if payload.len() + chunk.len() > MAX_PAYLOAD_BYTES {
                return Err(FetchError::Malformed(format!(
                    "{} is larger than {} bytes",
                    url, MAX_PAYLOAD_BYTES
                )));
            }
            payload.extend_from_slice(&chunk);
            self.observer.on_progress(
                sample,
                Progress {
                    received: payload.len() as u64,
                    total: body.total,
                },
            );
        }

        if payload.is_empty() {
            return Err(FetchError::MissingBody(url.to_string()));
        }
        Ok(payload)
    }

    fn status(&self, sample: &Arc<Sample>, phase: Phase, message: impl Into<String>) {
        self.observer.on_status(sample, &Status::new(phase, message));
    }

    fn fail(&self, sample: &Arc<Sample>, message: &str) {
        warn!(sample = sample.name(), err = message, "Sample failed to load.");
        self.observer.on_error(sample, message);
        self.status(sample, Phase::Error, message);
    }
}

#[cfg(test)]
mod test {
    use std::{
        io::Write,
        net::TcpListener,
        sync::Arc,
        thread,
        time::{Duration, Instant},
    };

    use crate::{
        audio::{headless, Backend},
        events::Phase,
        sample::Sample,
        testutil::{wav_bytes, EventLog, MockFetcher, RefusingBackend},
    };

    use super::{Fetch, FileFetcher, HttpFetcher, Loader, Progress};

    fn loader(fetcher: Arc<MockFetcher>) -> (Loader, Arc<EventLog>, Arc<headless::Backend>) {
        let backend = Arc::new(headless::Backend::new("mock", 44100));
        let log = Arc::new(EventLog::default());
        (
            Loader::new(backend.clone(), fetcher, log.clone()),
            log,
            backend,
        )
    }

    #[tokio::test]
    async fn test_stalled_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}/a.wav", listener.local_addr().expect("addr"));
        // Accepts the request and never answers it.
        thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                thread::sleep(Duration::from_secs(5));
                drop(stream);
            }
        });

        let fetcher = HttpFetcher::new(Duration::from_millis(200));
        let started = Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(10), fetcher.open(&url))
            .await
            .expect("open never returned");
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_percent() {
        let known = Progress {
            received: 50,
            total: Some(200),
        };
        assert_eq!(known.percent(), 25);
        let done = Progress {
            received: 200,
            total: Some(200),
        };
        assert_eq!(done.percent(), 99);

        let mut last = 0;
        for received in [0u64, 1, 10, 1_000, 100_000, 10_000_000, u64::MAX / 32] {
            let percent = Progress {
                received,
                total: None,
            }
            .percent();
            assert!((1..=95).contains(&percent));
            assert!(percent >= last);
            last = percent;
        }
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_once() {
        let fetcher = Arc::new(MockFetcher::default());
        let bytes = wav_bytes(1, 44100, 20000);
        fetcher.serve_chunked("http://host/kick.wav", bytes.clone(), 4096, true);
        let (loader, log, backend) = loader(fetcher);
        let sample = Sample::new("Kick", Some("http://host/kick.wav".into()));

        let buffer = loader
            .load("http://host/kick.wav", &sample)
            .await
            .expect("loaded");
        assert_eq!(buffer.backend_id(), backend.id());

        let progress = log.progress_for(&sample);
        assert!(progress.len() > 1);
        assert!(progress
            .windows(2)
            .all(|pair| pair[0].received <= pair[1].received));
        assert_eq!(
            progress.last().map(|p| p.received),
            Some(bytes.len() as u64)
        );
        assert!(progress.iter().all(|p| p.total == Some(bytes.len() as u64)));

        let phases = log.phases_for(&sample);
        assert_eq!(phases.iter().filter(|p| p.is_terminal()).count(), 1);
        assert_eq!(phases.last(), Some(&Phase::Ready));
        assert!(log.last_progress_before_terminal(&sample));
    }

    #[tokio::test]
    async fn test_unknown_length() {
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.serve_chunked("http://host/a.wav", wav_bytes(2, 44100, 500), 100, false);
        let (loader, log, _) = loader(fetcher);
        let sample = Sample::new("A", Some("http://host/a.wav".into()));

        assert!(loader.load("http://host/a.wav", &sample).await.is_some());
        let progress = log.progress_for(&sample);
        assert!(progress.iter().all(|p| p.total.is_none() && p.percent() < 100));
    }

    #[tokio::test]
    async fn test_http_failure_is_contained() {
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.fail_with_status("http://host/missing.wav", 404);
        let (loader, log, _) = loader(fetcher);
        let sample = Sample::new("Missing", Some("http://host/missing.wav".into()));

        assert!(loader.load("http://host/missing.wav", &sample).await.is_none());
        assert_eq!(log.errors_for(&sample).len(), 1);
        assert_eq!(log.phases_for(&sample).last(), Some(&Phase::Error));
        assert!(log.progress_for(&sample).is_empty());
    }

    #[tokio::test]
    async fn test_advertised_length_is_not_trusted() {
        let fetcher = Arc::new(MockFetcher::default());
        let bytes = wav_bytes(1, 44100, 4410);
        fetcher.serve_claiming("http://host/liar.wav", bytes.clone(), u64::MAX);
        let (loader, log, _) = loader(fetcher);
        let sample = Sample::new("Liar", Some("http://host/liar.wav".into()));

        assert!(loader.load("http://host/liar.wav", &sample).await.is_some());
        let progress = log.progress_for(&sample);
        assert_eq!(
            progress.last().map(|p| p.received),
            Some(bytes.len() as u64)
        );
        assert!(progress.iter().all(|p| p.total == Some(u64::MAX)));
        assert_eq!(log.phases_for(&sample).last(), Some(&Phase::Ready));
    }

    #[tokio::test]
    async fn test_decode_failure_is_reported_once() {
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.serve("http://host/broken.wav", wav_bytes(1, 44100, 4410));
        let log = Arc::new(EventLog::default());
        let loader = Loader::new(Arc::new(RefusingBackend::new(true)), fetcher, log.clone());
        let sample = Sample::new("Broken", Some("http://host/broken.wav".into()));

        assert!(loader.load("http://host/broken.wav", &sample).await.is_none());
        assert_eq!(log.errors_for(&sample).len(), 1);
        let phases = log.phases_for(&sample);
        assert!(phases.contains(&Phase::Decoding));
        assert_eq!(phases.iter().filter(|p| p.is_terminal()).count(), 1);
        assert_eq!(phases.last(), Some(&Phase::Error));
    }

    #[tokio::test]
    async fn test_empty_body_fails() {
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.serve_chunked("http://host/empty.wav", Vec::new(), 10, true);
        let (loader, log, _) = loader(fetcher);
        let sample = Sample::new("Empty", Some("http://host/empty.wav".into()));

        assert!(loader.load("http://host/empty.wav", &sample).await.is_none());
        assert_eq!(log.phases_for(&sample).last(), Some(&Phase::Error));
    }

    #[tokio::test]
    async fn test_file_fetcher() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        let bytes = wav_bytes(1, 44100, 40000);
        file.write_all(&bytes).expect("write");

        let url = format!("file://{}", file.path().display());
        let mut body = FileFetcher.open(&url).await.expect("open");
        assert_eq!(body.total, Some(bytes.len() as u64));

        let mut received = Vec::new();
        while let Some(chunk) = body.chunks.recv().await {
            received.extend(chunk.expect("chunk"));
        }
        assert_eq!(received, bytes);

        assert!(FileFetcher.open("/does/not/exist.wav").await.is_err());
    }
}
