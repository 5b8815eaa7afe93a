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
use std::{fmt, sync::Arc};

use parking_lot::RwLock;

use crate::{audio::DecodedAudio, error::EngineError};

/// The part of a buffer played on trigger, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrimRegion {
    pub start: f64,
    pub end: f64,
}

impl TrimRegion {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Where a sample is in its loading lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Pending,
    Loading,
    Ready,
    Failed(String),
    /// Replaced on its pad while loading; never got a buffer.
    Abandoned,
}

struct Inner {
    name: String,
    source_url: Option<String>,
    buffer: Option<DecodedAudio>,
    trim: TrimRegion,
    status: LoadStatus,
    recording: Option<Arc<Vec<u8>>>,
}

/// A named sound that may sit on a pad.
///
/// Samples are shared as `Arc<Sample>` and compared by identity, so a late load
/// can tell whether the slot it was started for still holds the same sample.
pub struct Sample {
    inner: RwLock<Inner>,
}

impl Sample {
    /// A sample that still has to be fetched from `source_url`.
    pub fn new(name: &str, source_url: Option<String>) -> Arc<Sample> {
        Arc::new(Sample {
            inner: RwLock::new(Inner {
                name: name.to_string(),
                source_url,
                buffer: None,
                trim: TrimRegion::default(),
                status: LoadStatus::Pending,
                recording: None,
            }),
        })
    }

    /// A sample made from a recorded take. It has no source until it is uploaded.
    pub fn recorded(name: &str, buffer: DecodedAudio, payload: Arc<Vec<u8>>) -> Arc<Sample> {
        let sample = Sample::new(name, None);
        sample.inner.write().recording = Some(payload);
        sample.set_buffer(buffer);
        sample
    }

    pub fn name(&self) -> String {
        self.inner.read().name.clone()
    }

    pub fn source_url(&self) -> Option<String> {
        self.inner.read().source_url.clone()
    }

    pub fn set_source_url(&self, url: &str) {
        self.inner.write().source_url = Some(url.to_string());
    }

    /// The encoded take for samples that were recorded and not uploaded yet.
    pub fn recording(&self) -> Option<Arc<Vec<u8>>> {
        self.inner.read().recording.clone()
    }

    pub fn buffer(&self) -> Option<DecodedAudio> {
        self.inner.read().buffer.clone()
    }

    pub fn duration(&self) -> Option<f64> {
        self.inner.read().buffer.as_ref().map(DecodedAudio::duration)
    }

    pub fn trim(&self) -> TrimRegion {
        self.inner.read().trim
    }

    pub fn status(&self) -> LoadStatus {
        self.inner.read().status.clone()
    }

    /// Playable once a buffer is set.
    pub fn is_playable(&self) -> bool {
        self.inner.read().buffer.is_some()
    }

    pub(crate) fn set_loading(&self) {
        let mut inner = self.inner.write();
        inner.buffer = None;
        inner.status = LoadStatus::Loading;
    }

    /// Installs the decoded buffer and resets the trim region to all of it.
    pub fn set_buffer(&self, buffer: DecodedAudio) {
        let mut inner = self.inner.write();
        inner.trim = TrimRegion {
            start: 0.0,
            end: buffer.duration(),
        };
        inner.buffer = Some(buffer);
        inner.status = LoadStatus::Ready;
    }

    pub(crate) fn mark_failed(&self, reason: &str) {
        let mut inner = self.inner.write();
        inner.buffer = None;
        inner.status = LoadStatus::Failed(reason.to_string());
    }

    pub(crate) fn mark_abandoned(&self) {
        let mut inner = self.inner.write();
        inner.buffer = None;
        inner.status = LoadStatus::Abandoned;
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.inner.read().status, LoadStatus::Failed(_))
    }

    /// The region `set_trim` would store, without storing it.
    pub fn clamp_trim(&self, start: f64, end: f64) -> Result<TrimRegion, EngineError> {
        let duration = self.duration().ok_or(EngineError::InvalidTrim { start, end })?;
        clamp_region(duration, start, end).ok_or(EngineError::InvalidTrim { start, end })
    }

    /// Sets the trim region, clamped to the buffer. Regions that end up empty are rejected.
    pub fn set_trim(&self, start: f64, end: f64) -> Result<TrimRegion, EngineError> {
        let mut inner = self.inner.write();
        let clamped = inner
            .buffer
            .as_ref()
            .and_then(|buffer| clamp_region(buffer.duration(), start, end))
            .ok_or(EngineError::InvalidTrim { start, end })?;
        inner.trim = clamped;
        Ok(clamped)
    }
}

fn clamp_region(duration: f64, start: f64, end: f64) -> Option<TrimRegion> {
    let clamped = TrimRegion {
        start: start.clamp(0.0, duration),
        end: end.clamp(0.0, duration),
    };
    // NaN compares false here as well.
    if !(clamped.start < clamped.end) {
        return None;
    }
    Some(clamped)
}

impl fmt::Debug for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Sample")
            .field("name", &inner.name)
            .field("source_url", &inner.source_url)
            .field("status", &inner.status)
            .field("trim", &inner.trim)
            .finish()
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.read().name)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::{audio::DecodedAudio, error::EngineError};

    use super::{LoadStatus, Sample, TrimRegion};

    fn one_second() -> DecodedAudio {
        DecodedAudio::new(vec![0.0; 44100], 1, 44100, 1)
    }

    #[test]
    fn test_set_buffer_resets_trim() {
        let sample = Sample::new("Kick", Some("http://host/kick.wav".into()));
        assert!(!sample.is_playable());
        assert_eq!(sample.status(), LoadStatus::Pending);

        sample.set_buffer(one_second());
        assert!(sample.is_playable());
        assert_eq!(sample.status(), LoadStatus::Ready);
        assert_eq!(
            sample.trim(),
            TrimRegion {
                start: 0.0,
                end: 1.0
            }
        );
    }

    #[test]
    fn test_set_trim_clamps_and_rejects() {
        let sample = Sample::new("Snare", None);
        assert!(matches!(
            sample.set_trim(0.0, 0.5),
            Err(EngineError::InvalidTrim { .. })
        ));

        sample.set_buffer(one_second());
        let trim = sample.set_trim(-1.0, 4.0).expect("clamped");
        assert_eq!(trim, TrimRegion { start: 0.0, end: 1.0 });

        let trim = sample.set_trim(0.25, 0.75).expect("valid");
        assert_eq!(trim.duration(), 0.5);

        assert!(sample.set_trim(0.5, 0.5).is_err());
        assert!(sample.set_trim(0.8, 0.2).is_err());
        assert!(sample.set_trim(f64::NAN, 0.2).is_err());
        assert_eq!(sample.trim(), TrimRegion { start: 0.25, end: 0.75 });
    }

    #[test]
    fn test_recorded_sample() {
        let sample = Sample::recorded("Tom", one_second(), Arc::new(vec![1, 2, 3]));
        assert!(sample.source_url().is_none());
        assert!(sample.is_playable());
        assert_eq!(sample.recording().map(|r| r.len()), Some(3));

        sample.mark_failed("gone");
        assert!(sample.is_failed());
        assert!(!sample.is_playable());
    }
}
