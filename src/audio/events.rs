use serenity::model::id::ChannelId;
use tokio::sync::oneshot;

use crate::error::PlayerResult;

/// Reply slot for control events whose outcome the caller waits for.
pub type Reply = oneshot::Sender<PlayerResult<()>>;

/// Everything that can change what a guild is playing.
///
/// Consumed in submission order by the guild's event loop.
#[derive(Debug)]
pub enum PlayerEvent {
    /// Start consuming the playlist if idle; channels are persisted when given
    Play {
        text_channel: Option<ChannelId>,
        voice_channel: Option<ChannelId>,
    },
    Pause { reply: Reply },
    Resume { reply: Reply },
    /// Clear the playlist and stop the current track
    Stop { reply: Reply },
    /// Stop the current track; the next one starts
    Skip { reply: Reply },
}

impl PlayerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PlayerEvent::Play { .. } => "play",
            PlayerEvent::Pause { .. } => "pause",
            PlayerEvent::Resume { .. } => "resume",
            PlayerEvent::Stop { .. } => "stop",
            PlayerEvent::Skip { .. } => "skip",
        }
    }
}
