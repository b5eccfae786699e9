//! Voice transport contract.
//!
//! The transport owns the actual voice connection of one guild. The playback
//! core only joins, leaves, pushes Opus frames and toggles pause.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::TransportError;

#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn join_channel(&self, channel: ChannelId) -> Result<(), TransportError>;

    async fn leave_channel(&self) -> Result<(), TransportError>;

    /// Sends one Opus frame; may block for backpressure and may return
    /// [`TransportError::Cancelled`] when the send is aborted.
    async fn send_audio(&self, frame: Bytes) -> Result<(), TransportError>;

    async fn pause(&self);

    async fn resume(&self);
}

/// Builds one transport per guild.
pub trait TransportFactory: Send + Sync {
    fn create(&self, guild_id: GuildId) -> Arc<dyn VoiceTransport>;
}

impl<F> TransportFactory for F
where
    F: Fn(GuildId) -> Arc<dyn VoiceTransport> + Send + Sync,
{
    fn create(&self, guild_id: GuildId) -> Arc<dyn VoiceTransport> {
        self(guild_id)
    }
}

#[derive(Debug, Default)]
struct PacedState {
    channel: Option<ChannelId>,
    frames_sent: u64,
    bytes_sent: u64,
}

/// Local transport that consumes frames at real-time pace without a network.
///
/// Used for dry runs of the playback core.
#[derive(Debug)]
pub struct PacedTransport {
    guild_id: GuildId,
    frame_pacing: Duration,
    state: Mutex<PacedState>,
}

impl PacedTransport {
    pub fn new(guild_id: GuildId, frame_pacing: Duration) -> Self {
        Self {
            guild_id,
            frame_pacing,
            state: Mutex::new(PacedState::default()),
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.state.lock().frames_sent
    }

    pub fn channel(&self) -> Option<ChannelId> {
        self.state.lock().channel
    }
}

#[async_trait]
impl VoiceTransport for PacedTransport {
    async fn join_channel(&self, channel: ChannelId) -> Result<(), TransportError> {
        self.state.lock().channel = Some(channel);
        info!("🔗 Conectado al canal {} en guild {}", channel, self.guild_id);
        Ok(())
    }

    async fn leave_channel(&self) -> Result<(), TransportError> {
        let (previous, frames, bytes) = {
            let mut state = self.state.lock();
            (state.channel.take(), state.frames_sent, state.bytes_sent)
        };
        match previous {
            Some(channel) => {
                info!(
                    "👋 Desconectado del canal {} en guild {} ({} frames, {} bytes)",
                    channel, self.guild_id, frames, bytes
                );
                Ok(())
            }
            None => Err(TransportError::NotConnected),
        }
    }

    async fn send_audio(&self, frame: Bytes) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock();
            if state.channel.is_none() {
                return Err(TransportError::NotConnected);
            }
            state.frames_sent += 1;
            state.bytes_sent += frame.len() as u64;
        }
        if !self.frame_pacing.is_zero() {
            tokio::time::sleep(self.frame_pacing).await;
        }
        Ok(())
    }

    async fn pause(&self) {
        debug!("⏸️ Transporte pausado en guild {}", self.guild_id);
    }

    async fn resume(&self) {
        debug!("▶️ Transporte reanudado en guild {}", self.guild_id);
    }
}
