//! Now-playing status rendering and delivery.

pub mod embeds;
pub mod status;

pub use status::{DiscordStatusNotifier, LogStatusNotifier, StatusNotifier};
