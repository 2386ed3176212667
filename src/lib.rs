//! Voice DJ: a Discord music bot built around one playback session per guild.

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod sources;
pub mod storage;
pub mod ui;
