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

use tracing::warn;

use crate::{error::IndexError, sample::Sample};

/// Number of pads, and the maximum number of samples in a kit.
pub const PAD_COUNT: usize = 16;

/// Name and origin of the loaded kit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KitInfo {
    pub name: String,
    /// User-authored kits are custom, factory presets are not.
    pub custom: bool,
}

/// The pad slots. The index is the pad's identity.
#[derive(Default)]
pub struct Kit {
    slots: Vec<Option<Arc<Sample>>>,
    info: Option<KitInfo>,
}

impl Kit {
    /// A kit holding the given samples in order. Anything past the last pad is dropped.
    pub fn from_samples(samples: Vec<Arc<Sample>>, info: Option<KitInfo>) -> Kit {
        if samples.len() > PAD_COUNT {
            warn!(
                samples = samples.len(),
                pads = PAD_COUNT,
                "Kit has more samples than pads, ignoring the rest."
            );
        }
        Kit {
            slots: samples.into_iter().take(PAD_COUNT).map(Some).collect(),
            info,
        }
    }

    /// A custom kit: every pad empty, no name.
    pub fn custom() -> Kit {
        Kit {
            slots: vec![None; PAD_COUNT],
            info: None,
        }
    }

    pub fn info(&self) -> Option<&KitInfo> {
        self.info.as_ref()
    }

    pub fn set_info(&mut self, info: Option<KitInfo>) {
        self.info = info;
    }

    /// Number of slots in use, including empty ones.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    fn check(index: usize) -> Result<(), IndexError> {
        if index >= PAD_COUNT {
            return Err(IndexError {
                index,
                len: PAD_COUNT,
            });
        }
        Ok(())
    }

    /// The sample on a pad. Pads past the end of a short kit are empty.
    pub fn get(&self, index: usize) -> Result<Option<&Arc<Sample>>, IndexError> {
        Kit::check(index)?;
        Ok(self.slots.get(index).and_then(Option::as_ref))
    }

    /// Overwrites a pad. If the sample already sits on another pad, that pad is cleared.
    /// Returns the previous occupant.
    pub fn assign(
        &mut self,
        index: usize,
        sample: Arc<Sample>,
    ) -> Result<Option<Arc<Sample>>, IndexError> {
        Kit::check(index)?;
        if let Some(existing) = self.position_of(&sample) {
            if existing != index {
                self.slots[existing] = None;
            }
        }
        if self.slots.len() <= index {
            self.slots.resize(index + 1, None);
        }
        Ok(self.slots[index].replace(sample))
    }

    pub fn position_of(&self, sample: &Arc<Sample>) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|occupant| Arc::ptr_eq(occupant, sample))
        })
    }

    pub fn contains(&self, sample: &Arc<Sample>) -> bool {
        self.position_of(sample).is_some()
    }

    /// Occupied pads in slot order.
    pub fn samples(&self) -> impl Iterator<Item = (usize, &Arc<Sample>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|sample| (index, sample)))
    }

    /// Picks the pad a fresh recording goes to:
    /// the first empty pad (unassigned or failed to load), else a new pad if the
    /// kit is short, else the selected pad, else the last pad.
    pub fn recording_slot(&self, current: Option<&Arc<Sample>>) -> usize {
        let empty = self.slots.iter().position(|slot| match slot {
            None => true,
            Some(sample) => sample.is_failed(),
        });
        if let Some(index) = empty {
            return index;
        }
        if self.slots.len() < PAD_COUNT {
            return self.slots.len();
        }
        current
            .and_then(|current| self.position_of(current))
            .unwrap_or(PAD_COUNT - 1)
    }

    /// Places a recorded sample according to [`Kit::recording_slot`].
    pub fn place_recorded(&mut self, sample: Arc<Sample>, current: Option<&Arc<Sample>>) -> usize {
        let index = self.recording_slot(current);
        self.slots
            .resize(self.slots.len().max(index + 1), None);
        self.slots[index] = Some(sample);
        index
    }
}

impl fmt::Display for Kit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.info {
            Some(info) if info.custom => write!(f, "{} (custom)", info.name)?,
            Some(info) => write!(f, "{}", info.name)?,
            None => write!(f, "(unsaved)")?,
        }
        for (index, sample) in self.samples() {
            write!(f, "\n  {:>2}: {}", index, sample)?;
        }
        Ok(())
    }
}
