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
use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::{error, info, span, warn, Level};

use super::{decode, mixer::Mixer, DecodedAudio, OutputSink, OUTPUT_CHANNELS};
use crate::{
    config,
    error::{DecodeError, PlaybackError},
};

/// Frames mixed per block by the producer thread.
const BLOCK_FRAMES: usize = 256;

/// How long `ensure_running` waits for the output thread to answer.
const RESUME_TIMEOUT: Duration = Duration::from_secs(2);

/// An output device as reported by cpal.
pub struct DeviceInfo {
    pub name: String,
    pub host: String,
    pub max_channels: u16,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name, self.max_channels, self.host
        )
    }
}

/// Commands understood by the thread that owns the cpal stream.
enum StreamCommand {
    Resume(crossbeam_channel::Sender<Result<(), String>>),
    Shutdown,
}

/// A live backend on a cpal output device.
///
/// The stream is created paused. It starts on the first `ensure_running`, so a
/// refused start is simply retried by the next call.
pub struct Backend {
    name: String,
    host_id: cpal::HostId,
    id: u64,
    sample_rate: u32,
    mixer: Arc<Mixer>,
    running: AtomicBool,
    shutdown: Arc<AtomicBool>,
    commands: crossbeam_channel::Sender<StreamCommand>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.host_id.name())
    }
}

#[allow(deprecated)]
fn device_name(device: &cpal::Device) -> Option<String> {
    device.name().ok()
}

/// Lists cpal output devices.
pub fn list() -> Result<Vec<DeviceInfo>, Box<dyn Error>> {
    Ok(list_cpal_devices()?
        .into_iter()
        .map(|(info, _, _)| info)
        .collect())
}

fn list_cpal_devices() -> Result<Vec<(DeviceInfo, cpal::HostId, cpal::Device)>, Box<dyn Error>> {
    // Suppress noisy output here.
    let _shh_stdout = shh::stdout()?;
    let _shh_stderr = shh::stderr()?;

    let mut devices = Vec::new();
    for host_id in cpal::available_hosts() {
        let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
            Ok(host_devices) => host_devices,
            Err(e) => {
                error!(
                    err = e.to_string(),
                    host = host_id.name(),
                    "Unable to list devices for host"
                );
                continue;
            }
        };

        for device in host_devices {
            let max_channels = match device.supported_output_configs() {
                Ok(configs) => configs.map(|config| config.channels()).max().unwrap_or(0),
                Err(_) => continue,
            };
            if max_channels == 0 {
                continue;
            }
            let Some(name) = device_name(&device) else {
                continue;
            };

            devices.push((
                DeviceInfo {
                    name,
                    host: host_id.name().to_string(),
                    max_channels,
                },
                host_id,
                device,
            ));
        }
    }

    devices.sort_by(|a, b| a.0.name.cmp(&b.0.name));
    Ok(devices)
}

impl Backend {
    /// Opens the configured device. "default" picks the host's default output.
    pub fn get(config: &config::Audio) -> Result<Backend, Box<dyn Error>> {
        let name = config.device();
        let (host_id, device) = if name == "default" {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or("no default output device")?;
            (host.id(), device)
        } else {
            let (_, host_id, device) = list_cpal_devices()?
                .into_iter()
                .find(|(info, _, _)| info.name.trim() == name)
                .ok_or_else(|| format!("no device found with name {}", name))?;
            (host_id, device)
        };

        let supported = device.default_output_config()?;
        let sample_format = supported.sample_format();
        let mut stream_config: cpal::StreamConfig = supported.into();
        stream_config.channels = OUTPUT_CHANNELS;
        if let Some(sample_rate) = config.configured_sample_rate() {
            stream_config.sample_rate = sample_rate;
        }
        let sample_rate = stream_config.sample_rate;

        let mixer = Arc::new(Mixer::new(sample_rate));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();

        // ~100ms of audio between the mixer and the device callback.
        let capacity = (sample_rate as usize * OUTPUT_CHANNELS as usize / 10).max(4096);
        let (producer, consumer) = rtrb::RingBuffer::<f32>::new(capacity);

        let producer_thread = spawn_producer(mixer.clone(), producer, shutdown.clone());
        let output_thread = spawn_output(
            device,
            stream_config,
            sample_format,
            consumer,
            commands_rx,
        );

        info!(
            device = name,
            host = host_id.name(),
            sample_rate,
            "Opened audio output."
        );

        Ok(Backend {
            name: name.to_string(),
            host_id,
            id: super::next_backend_id(),
            sample_rate,
            mixer,
            running: AtomicBool::new(false),
            shutdown,
            commands: commands_tx,
            threads: Mutex::new(vec![producer_thread, output_thread]),
        })
    }
}

/// Mixes blocks into the ring whenever there is room for one.
fn spawn_producer(
    mixer: Arc<Mixer>,
    mut producer: rtrb::Producer<f32>,
    shutdown: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let span = span!(Level::INFO, "mixer (cpal)");
        let _enter = span.enter();

        let block_samples = BLOCK_FRAMES * OUTPUT_CHANNELS as usize;
        let mut scratch = vec![0.0f32; block_samples];
        while !shutdown.load(Ordering::Relaxed) {
            if producer.slots() >= block_samples {
                mixer.process_into_output(&mut scratch, BLOCK_FRAMES);
                for sample in scratch.iter() {
                    if producer.push(*sample).is_err() {
                        break;
                    }
                }
            } else {
                thread::sleep(Duration::from_micros(500));
            }
        }
    })
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: rtrb::Consumer<f32>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for sample in data.iter_mut() {
                *sample = T::from_sample(consumer.pop().unwrap_or(0.0));
            }
        },
        |err| error!("CPAL output stream error: {}", err),
        None,
    )
}

/// Owns the cpal stream, which can't leave the thread that created it.
fn spawn_output(
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    consumer: rtrb::Consumer<f32>,
    commands: crossbeam_channel::Receiver<StreamCommand>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let span = span!(Level::INFO, "output (cpal)");
        let _enter = span.enter();

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, consumer),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, consumer),
            cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, consumer),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, consumer),
            other => {
                error!(format = ?other, "Unsupported output sample format.");
                drain_with_error(commands, format!("unsupported sample format {:?}", other));
                return;
            }
        };
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                error!(err = e.to_string(), "Failed to create CPAL stream.");
                drain_with_error(commands, e.to_string());
                return;
            }
        };
        if let Err(e) = stream.pause() {
            warn!(err = e.to_string(), "Unable to pause new stream.");
        }

        while let Ok(command) = commands.recv() {
            match command {
                StreamCommand::Resume(reply) => {
                    let result = stream.play().map_err(|e| e.to_string());
                    if result.is_ok() {
                        info!("CPAL output stream running.");
                    }
                    let _ = reply.send(result);
                }
                StreamCommand::Shutdown => break,
            }
        }
    })
}

/// Answers every resume request with the error that kept the stream from being built.
fn drain_with_error(commands: crossbeam_channel::Receiver<StreamCommand>, message: String) {
    while let Ok(command) = commands.recv() {
        match command {
            StreamCommand::Resume(reply) => {
                let _ = reply.send(Err(message.clone()));
            }
            StreamCommand::Shutdown => return,
        }
    }
}

impl super::Backend for Backend {
    fn id(&self) -> u64 {
        self.id
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn ensure_running(&self) -> Result<(), PlaybackError> {
        if self.running.load(Ordering::Acquire) {
            return Ok(());
        }

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.commands
            .send(StreamCommand::Resume(reply_tx))
            .map_err(|_| PlaybackError::Device("output thread has stopped".into()))?;
        match reply_rx.recv_timeout(RESUME_TIMEOUT) {
            Ok(Ok(())) => {
                self.running.store(true, Ordering::Release);
                Ok(())
            }
            Ok(Err(e)) => Err(PlaybackError::Device(e)),
            Err(_) => Err(PlaybackError::Device(
                "timed out starting the output stream".into(),
            )),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio, DecodeError> {
        let pcm = decode::decode_bytes(bytes, self.sample_rate)?;
        Ok(DecodedAudio::new(
            pcm.samples,
            pcm.channels,
            pcm.sample_rate,
            self.id,
        ))
    }

    fn output_sink(&self) -> OutputSink {
        OutputSink::new(self.id, self.mixer.clone())
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.mixer.stop_all();
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.commands.send(StreamCommand::Shutdown);
        for thread in self.threads.lock().drain(..) {
            let _ = thread.join();
        }
    }
}
