use anyhow::{Context, Result};
use async_trait::async_trait;
use serenity::{
    all::{ChannelId, MessageId},
    builder::{CreateMessage, EditMessage},
    http::Http,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::embeds::{now_playing_embed, status_line};
use crate::audio::queue::PlayedTrack;

/// Delivers the "now playing" message and its periodic position updates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusNotifier: Send + Sync {
    /// Posts the initial status and returns the message to edit later.
    async fn send_playing_status(&self, channel: ChannelId, track: &PlayedTrack) -> Result<MessageId>;

    async fn update_playing_status(
        &self,
        channel: ChannelId,
        message: MessageId,
        track: &PlayedTrack,
    ) -> Result<()>;
}

/// Posts and edits an embed in the guild's text channel.
pub struct DiscordStatusNotifier {
    http: Arc<Http>,
}

impl DiscordStatusNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    pub fn from_token(token: &str) -> Self {
        Self::new(Arc::new(Http::new(token)))
    }
}

#[async_trait]
impl StatusNotifier for DiscordStatusNotifier {
    async fn send_playing_status(&self, channel: ChannelId, track: &PlayedTrack) -> Result<MessageId> {
        let message = channel
            .send_message(&self.http, CreateMessage::new().embed(now_playing_embed(track)))
            .await
            .context("Error al enviar mensaje now playing")?;
        Ok(message.id)
    }

    async fn update_playing_status(
        &self,
        channel: ChannelId,
        message: MessageId,
        track: &PlayedTrack,
    ) -> Result<()> {
        channel
            .edit_message(&self.http, message, EditMessage::new().embed(now_playing_embed(track)))
            .await
            .context("Error al actualizar mensaje now playing")?;
        Ok(())
    }
}

/// Writes status lines to the log instead of a chat channel.
#[derive(Debug, Default)]
pub struct LogStatusNotifier {
    next_message: AtomicU64,
}

impl LogStatusNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusNotifier for LogStatusNotifier {
    async fn send_playing_status(&self, channel: ChannelId, track: &PlayedTrack) -> Result<MessageId> {
        let id = self.next_message.fetch_add(1, Ordering::Relaxed) + 1;
        info!("🎵 [#{}] Reproduciendo: {}", channel, status_line(track));
        Ok(MessageId::new(id))
    }

    async fn update_playing_status(
        &self,
        channel: ChannelId,
        message: MessageId,
        track: &PlayedTrack,
    ) -> Result<()> {
        debug!("⏱️ [#{} / {}] {}", channel, message, status_line(track));
        Ok(())
    }
}
