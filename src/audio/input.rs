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

//! Microphone access for recording takes.

use std::{
    fmt, mem,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::{error, info, span, Level};

use crate::{config, error::PermissionError};

/// Raw interleaved audio captured between `start` and `stop`.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl Capture {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// An open input stream. Dropping it releases the device.
pub trait InputStream: Send {
    /// Begins capturing, discarding anything captured before.
    fn start(&mut self);

    /// Ends capturing and hands over what was captured.
    fn stop(&mut self) -> Capture;
}

/// Source of input streams.
pub trait Microphone: fmt::Display + Send + Sync {
    /// Requests access and opens a stream. Blocks until the device answers.
    fn open(&self) -> Result<Box<dyn InputStream>, PermissionError>;
}

/// Gets the microphone for the given configuration. Devices named "mock..." get a mock microphone.
pub fn get_microphone(config: Option<&config::Input>) -> Arc<dyn Microphone> {
    let device = config.map(|config| config.device()).unwrap_or("default");
    if device.starts_with("mock") {
        return Arc::new(MockMicrophone::new(device, vec![0.25; 4410], 1, 44100));
    }
    Arc::new(CpalMicrophone {
        name: device.to_string(),
    })
}

/// A cpal input device, looked up by name when opened.
pub struct CpalMicrophone {
    name: String,
}

impl fmt::Display for CpalMicrophone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Input)", self.name)
    }
}

#[allow(deprecated)]
fn find_input_device(name: &str) -> Option<cpal::Device> {
    let host = cpal::default_host();
    if name == "default" {
        return host.default_input_device();
    }
    host.input_devices()
        .ok()?
        .find(|device| device.name().map(|n| n.trim() == name).unwrap_or(false))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    capturing: Arc<AtomicBool>,
    buffer: Arc<Mutex<Vec<f32>>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if capturing.load(Ordering::Relaxed) {
                buffer
                    .lock()
                    .extend(data.iter().map(|s| <f32 as cpal::Sample>::from_sample(*s)));
            }
        },
        |err| error!("CPAL input stream error: {}", err),
        None,
    )
}

impl Microphone for CpalMicrophone {
    fn open(&self) -> Result<Box<dyn InputStream>, PermissionError> {
        let name = self.name.clone();
        let capturing = Arc::new(AtomicBool::new(false));
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (close_tx, close_rx) = crossbeam_channel::bounded::<()>(1);

        let thread = {
            let capturing = capturing.clone();
            let buffer = buffer.clone();
            // The stream can't leave the thread that built it, so it lives here until closed.
            thread::spawn(move || {
                let span = span!(Level::INFO, "microphone (cpal)");
                let _enter = span.enter();

                let opened = (|| {
                    let device = find_input_device(&name)
                        .ok_or_else(|| format!("no input device named {}", name))?;
                    let supported = device.default_input_config().map_err(|e| e.to_string())?;
                    let format = supported.sample_format();
                    let config: cpal::StreamConfig = supported.into();
                    let stream = match format {
                        cpal::SampleFormat::F32 => {
                            build_input::<f32>(&device, &config, capturing, buffer)
                        }
                        cpal::SampleFormat::I16 => {
                            build_input::<i16>(&device, &config, capturing, buffer)
                        }
                        cpal::SampleFormat::I32 => {
                            build_input::<i32>(&device, &config, capturing, buffer)
                        }
                        other => return Err(format!("unsupported input format {:?}", other)),
                    }
                    .map_err(|e| e.to_string())?;
                    stream.play().map_err(|e| e.to_string())?;
                    Ok::<_, String>((stream, config.channels, config.sample_rate))
                })();

                match opened {
                    Ok((stream, channels, sample_rate)) => {
                        info!(channels, sample_rate, "Microphone open.");
                        let _ = ready_tx.send(Ok((channels, sample_rate)));
                        // Hold the stream until the handle is closed.
                        let _ = close_rx.recv();
                        mem::drop(stream);
                        info!("Microphone released.");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
        };

        match ready_rx.recv() {
            Ok(Ok((channels, sample_rate))) => Ok(Box::new(CpalInputStream {
                capturing,
                buffer,
                channels,
                sample_rate,
                close: Some(close_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(PermissionError::Microphone(e))
            }
            Err(_) => Err(PermissionError::Microphone(
                "microphone thread exited".into(),
            )),
        }
    }
}

struct CpalInputStream {
    capturing: Arc<AtomicBool>,
    buffer: Arc<Mutex<Vec<f32>>>,
    channels: u16,
    sample_rate: u32,
    close: Option<crossbeam_channel::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl InputStream for CpalInputStream {
    fn start(&mut self) {
        self.buffer.lock().clear();
        self.capturing.store(true, Ordering::Relaxed);
    }

    fn stop(&mut self) -> Capture {
        self.capturing.store(false, Ordering::Relaxed);
        Capture {
            samples: mem::take(&mut *self.buffer.lock()),
            channels: self.channels,
            sample_rate: self.sample_rate,
        }
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        self.capturing.store(false, Ordering::Relaxed);
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// A microphone that hands out a fixed capture, or refuses access.
#[derive(Clone)]
pub struct MockMicrophone {
    name: String,
    deny: Arc<AtomicBool>,
    capture: Capture,
    open_streams: Arc<AtomicUsize>,
}

impl MockMicrophone {
    pub fn new(name: &str, samples: Vec<f32>, channels: u16, sample_rate: u32) -> MockMicrophone {
        MockMicrophone {
            name: name.to_string(),
            deny: Arc::new(AtomicBool::new(false)),
            capture: Capture {
                samples,
                channels,
                sample_rate,
            },
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes subsequent opens fail as if the user refused access.
    pub fn set_denied(&self, deny: bool) {
        self.deny.store(deny, Ordering::Relaxed);
    }

    /// Number of streams currently holding the device.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::Relaxed)
    }
}

impl fmt::Display for MockMicrophone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

impl Microphone for MockMicrophone {
    fn open(&self) -> Result<Box<dyn InputStream>, PermissionError> {
        if self.deny.load(Ordering::Relaxed) {
            return Err(PermissionError::Microphone("access refused".into()));
        }
        self.open_streams.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockInputStream {
            capture: self.capture.clone(),
            capturing: false,
            open_streams: self.open_streams.clone(),
        }))
    }
}

struct MockInputStream {
    capture: Capture,
    capturing: bool,
    open_streams: Arc<AtomicUsize>,
}

impl InputStream for MockInputStream {
    fn start(&mut self) {
        self.capturing = true;
    }

    fn stop(&mut self) -> Capture {
        if !mem::replace(&mut self.capturing, false) {
            return Capture {
                channels: self.capture.channels,
                sample_rate: self.capture.sample_rate,
                ..Default::default()
            };
        }
        self.capture.clone()
    }
}

impl Drop for MockInputStream {
    fn drop(&mut self) {
        self.open_streams.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mock_microphone() {
        let microphone = MockMicrophone::new("mock", vec![0.1, 0.2], 1, 8000);
        let mut stream = microphone.open().expect("open");
        assert_eq!(microphone.open_streams(), 1);
        assert!(stream.stop().is_empty());

        stream.start();
        let capture = stream.stop();
        assert_eq!(capture.samples, vec![0.1, 0.2]);
        assert_eq!(capture.sample_rate, 8000);

        drop(stream);
        assert_eq!(microphone.open_streams(), 0);

        microphone.set_denied(true);
        assert!(matches!(
            microphone.open(),
            Err(PermissionError::Microphone(_))
        ));
    }

    #[test]
    fn test_get_mock_microphone() {
        let config = config::Input::new("mock-mic");
        let microphone = get_microphone(Some(&config));
        assert_eq!(microphone.to_string(), "mock-mic (Mock)");
    }
}
