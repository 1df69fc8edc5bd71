//! Timelapse - batch conversion of videos into timelapses
//!
//! Probes a selection of video files, time-remaps each valid one with ffmpeg
//! at a chosen speed multiplier and reports per-file and batch progress.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod invoker;
pub mod job;
pub mod media;
pub mod output;
pub mod view;
pub mod workflow;

#[cfg(test)]
mod testing;
