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

//! beatpad: a 16 pad sample instrument.
//!
//! The [`engine::Engine`] ties together an audio [`audio::Backend`], a shared
//! mastering [`audio::effects::EffectsChain`], a 16 slot [`kit::Kit`], a
//! streaming [`loader::Loader`] and a microphone [`recorder::Recorder`].
//! Pads are triggered through the [`router::InputRouter`] from pointer,
//! keyboard and MIDI sources.

pub mod audio;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod kit;
pub mod loader;
pub mod midi;
pub mod presets;
pub mod recorder;
pub mod router;
pub mod sample;

#[cfg(test)]
pub(crate) mod testutil;
