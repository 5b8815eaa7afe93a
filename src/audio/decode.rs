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

//! Decoding of encoded payloads held in memory.
//!
//! Samples arrive as complete byte payloads (downloads or recorded takes), so
//! everything is decoded up front into interleaved f32 at the output rate.

use std::io::{Cursor, ErrorKind};

use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error as SymphoniaError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::{debug, warn};

use crate::error::DecodeError;

/// Frames handed to the resampler per call.
const INPUT_BLOCK_SIZE: usize = 1024;

/// Source rates outside this range are refused rather than expanded.
const MIN_SOURCE_RATE: u32 = 8_000;
const MAX_SOURCE_RATE: u32 = 384_000;

/// Longest payload that is decoded, in seconds of audio.
const MAX_DURATION_SECS: u64 = 600;

/// Interleaved samples at a known rate.
pub struct Pcm {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

/// Decodes the payload and converts it to `target_rate`.
pub fn decode_bytes(bytes: &[u8], target_rate: u32) -> Result<Pcm, DecodeError> {
    let payload_len = bytes.len();
    if bytes.is_empty() {
        return Err(DecodeError::new(0, "empty payload"));
    }

    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::new(payload_len, e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| DecodeError::new(payload_len, "no audio track"))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track
        .codec_params
        .channels
        .map(|channels| channels.count() as u16);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::new(payload_len, e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::new(payload_len, e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
                sample_rate = Some(spec.rate);
                channels = Some(spec.channels.count() as u16);
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(err = e, "Skipping undecodable packet.");
            }
            Err(e) => return Err(DecodeError::new(payload_len, e.to_string())),
        }
    }

    let channels = channels
        .filter(|channels| *channels > 0)
        .ok_or_else(|| DecodeError::new(payload_len, "unknown channel count"))?;
    let sample_rate =
        sample_rate.ok_or_else(|| DecodeError::new(payload_len, "unknown sample rate"))?;
    if samples.len() < channels as usize {
        return Err(DecodeError::new(payload_len, "payload contains no audio frames"));
    }

    if !(MIN_SOURCE_RATE..=MAX_SOURCE_RATE).contains(&sample_rate) {
        return Err(DecodeError::new(
            payload_len,
            format!("unsupported sample rate {} Hz", sample_rate),
        ));
    }
    let frames = samples.len() / channels as usize;
    if frames as u64 > MAX_DURATION_SECS * sample_rate as u64 {
        return Err(DecodeError::new(
            payload_len,
            format!("longer than {} seconds", MAX_DURATION_SECS),
        ));
    }

    let samples = if sample_rate != target_rate {
        debug!(
            source_rate = sample_rate,
            target_rate, "Resampling decoded payload."
        );
        resample(&samples, channels, sample_rate, target_rate)
            .map_err(|e| DecodeError::new(payload_len, e))?
    } else {
        samples
    };

    Ok(Pcm {
        samples,
        channels,
        sample_rate: target_rate,
    })
}

/// Converts interleaved samples between rates with rubato's sinc resampler. The
/// result has exactly `ceil(frames * ratio)` frames with the filter delay removed.
pub fn resample(
    samples: &[f32],
    channel_count: u16,
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f32>, String> {
    let channels = channel_count as usize;
    if channels == 0 {
        return Err("no channels".to_string());
    }
    let frames = samples.len() / channels;
    let ratio = target_rate as f64 / source_rate as f64;
    let expected = (frames as f64 * ratio).ceil() as usize;

    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (channel, sample) in planar.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }

    let sinc_params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 1.0, sinc_params, INPUT_BLOCK_SIZE, channels)
            .map_err(|e| format!("unable to resample {} -> {}: {}", source_rate, target_rate, e))?;
    let delay = resampler.output_delay();
    let mut scratch = resampler.output_buffer_allocate(true);
    let mut output = vec![Vec::with_capacity(expected + delay); channels];
    let failed = |e: rubato::ResampleError| format!("resampling failed: {}", e);

    let mut position = 0;
    while position < frames {
        let needed = resampler.input_frames_next();
        let (consumed, produced) = if position + needed <= frames {
            let block: Vec<&[f32]> = planar
                .iter()
                .map(|channel| &channel[position..position + needed])
                .collect();
            resampler
                .process_into_buffer(&block, &mut scratch, None)
                .map_err(failed)?
        } else {
            let block: Vec<&[f32]> = planar.iter().map(|channel| &channel[position..]).collect();
            let (_, produced) = resampler
                .process_partial_into_buffer(Some(block.as_slice()), &mut scratch, None)
                .map_err(failed)?;
            (frames - position, produced)
        };
        position += consumed;
        for (channel, out) in output.iter_mut().zip(&scratch) {
            channel.extend_from_slice(&out[..produced]);
        }
    }

    // Flush the filter tail. Each empty call yields at least one block.
    while output[0].len() < expected + delay {
        let (_, produced) = resampler
            .process_partial_into_buffer(None::<&[Vec<f32>]>, &mut scratch, None)
            .map_err(failed)?;
        if produced == 0 {
            break;
        }
        for (channel, out) in output.iter_mut().zip(&scratch) {
            channel.extend_from_slice(&out[..produced]);
        }
    }

    let mut interleaved = Vec::with_capacity(expected * channels);
    for frame in delay..delay + expected {
        for channel in &output {
            interleaved.push(channel.get(frame).copied().unwrap_or(0.0));
        }
    }
    Ok(interleaved)
}

#[cfg(test)]
mod tests {
    use crate::testutil::wav_bytes;

    use super::*;

    #[test]
    fn test_decode_wav() {
        let bytes = wav_bytes(2, 44100, 4410);
        let pcm = decode_bytes(&bytes, 44100).expect("decode");
        assert_eq!(pcm.channels, 2);
        assert_eq!(pcm.sample_rate, 44100);
        assert_eq!(pcm.samples.len(), 4410 * 2);
    }

    #[test]
    fn test_decode_resamples() {
        let bytes = wav_bytes(1, 22050, 2205);
        let pcm = decode_bytes(&bytes, 44100).expect("decode");
        assert_eq!(pcm.channels, 1);
        assert_eq!(pcm.sample_rate, 44100);
        assert_eq!(pcm.samples.len(), 4410);
    }

    #[test]
    fn test_decode_garbage() {
        let err = decode_bytes(b"definitely not audio", 44100)
            .err()
            .expect("garbage should not decode");
        assert_eq!(err.payload_len, 20);

        let err = decode_bytes(&[], 44100).err().expect("empty");
        assert_eq!(err.payload_len, 0);
    }

    #[test]
    fn test_decode_rejects_absurd_rates() {
        let bytes = wav_bytes(2, 1, 100);
        let err = decode_bytes(&bytes, 44100)
            .err()
            .expect("a 1 Hz payload should be refused");
        assert_eq!(err.payload_len, bytes.len());

        let bytes = wav_bytes(1, 768_000, 100);
        assert!(decode_bytes(&bytes, 44100).is_err());
    }

    #[test]
    fn test_resample() {
        let source: Vec<f32> = (0..4410)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin())
            .collect();
        let result = resample(&source, 1, 44100, 48000).expect("resample");
        assert_eq!(result.len(), (4410.0_f64 * 48000.0 / 44100.0).ceil() as usize);

        // The middle of the tone keeps its amplitude.
        let peak = result[1000..4000]
            .iter()
            .fold(0.0f32, |peak, sample| peak.max(sample.abs()));
        assert!((peak - 1.0).abs() < 0.05, "peak was {}", peak);

        let stereo: Vec<f32> = (0..2048).flat_map(|_| [0.5f32, -0.5]).collect();
        let result = resample(&stereo, 2, 44100, 22050).expect("resample");
        assert_eq!(result.len(), 1024 * 2);
        // Channels stay apart.
        assert!((result[1000] - 0.5).abs() < 0.05);
        assert!((result[1001] + 0.5).abs() < 0.05);
    }
}
