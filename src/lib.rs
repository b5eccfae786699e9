//! # Guild Jukebox
//!
//! Playback core for Discord music bots: queues tracks per guild, streams
//! pre-encoded DCA audio to a voice transport in real time and reports the
//! playback position while it goes.
//!
//! ## Modules
//!
//! - [`audio`]: frame decoder, playlist, playback controller, guild player and registry
//! - [`sources`]: resolve track file references into byte streams
//! - [`storage`]: per-guild state that survives restarts
//! - [`ui`]: now-playing status messages
//! - [`config`]: environment configuration
//! - [`error`]: error types

pub mod audio;
pub mod config;
pub mod error;
pub mod sources;
pub mod storage;
pub mod ui;

#[cfg(test)]
mod test_support;

pub use audio::{GuildPlayer, GuildRegistry, PlayerState};
pub use config::{Config, PlayerSettings};
pub use error::{PlayerError, PlayerResult};
