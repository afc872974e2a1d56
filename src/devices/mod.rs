//! Concrete media devices.
//!
//! [`audio`] talks to the sound card through cpal. [`file`] drives a session
//! from WAV and image files instead, for scripted runs and machines without
//! audio hardware.

mod audio;
mod file;

pub use audio::{CpalMediaDevices, CpalMicrophone, CpalSink};
pub use file::{FileMediaDevices, ImageFileCamera, WavFileSink, WavMicrophone};
