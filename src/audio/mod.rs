//! # Audio Module
//!
//! Per-guild playback core.
//!
//! ## Architecture
//!
//! ### [`dca`] - Frame Decoder
//! - Reads the DCA container: magic header, JSON metadata, length-prefixed Opus frames
//!
//! ### [`queue`] - Playlist
//! - Track model and the thread-safe FIFO of pending tracks
//!
//! ### [`controller`] - Playback Controller
//! - `Idle / Playing / Paused` state machine
//! - One streaming task per track: frames to the transport, position to the notifier
//!
//! ### [`player`] - Guild Player
//! - Serializes every control operation of a guild through one event loop
//! - Crash recovery of the interrupted track
//!
//! ### [`registry`] - Guild Registry
//! - Creates players on demand and tears them down
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use guild_jukebox::audio::{
//!     queue::{Requester, SourcePlatform, Track},
//!     registry::GuildRegistry,
//! };
//! use serenity::all::{ChannelId, GuildId, UserId};
//!
//! # async fn example(registry: GuildRegistry) -> anyhow::Result<()> {
//! let player = registry.get_or_create(GuildId::new(123456789)).await?;
//!
//! let track = Track::new("Intro", "intro.dca", SourcePlatform::Local);
//! let requester = Requester::new(UserId::new(1), "dj");
//! player
//!     .add_song(track, requester, Some(ChannelId::new(2)), Some(ChannelId::new(3)))
//!     .await?;
//!
//! player.pause().await?;
//! player.resume().await?;
//! player.skip_song().await?;
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod dca;
pub mod events;
pub mod player;
pub mod queue;
pub mod registry;
pub mod transport;

pub use controller::{PlaybackController, PlaybackFailure, PlayerServices, PlayerState};
pub use player::GuildPlayer;
pub use registry::{GuildRegistry, RegistryServices};
