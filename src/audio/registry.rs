use anyhow::Result;
use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    audio::{
        controller::PlayerServices,
        player::GuildPlayer,
        transport::TransportFactory,
    },
    config::PlayerSettings,
    error::PlayerError,
    sources::AudioSource,
    storage::StorageProvider,
    ui::StatusNotifier,
};

/// Collaborators shared by every guild.
#[derive(Clone)]
pub struct RegistryServices {
    pub transports: Arc<dyn TransportFactory>,
    pub source: Arc<dyn AudioSource>,
    pub notifier: Arc<dyn StatusNotifier>,
    pub storage: Arc<dyn StorageProvider>,
}

/// Guild id -> running [`GuildPlayer`].
pub struct GuildRegistry {
    players: DashMap<GuildId, Arc<GuildPlayer>>,
    services: RegistryServices,
    settings: PlayerSettings,
    shutdown: CancellationToken,
}

impl GuildRegistry {
    pub fn new(services: RegistryServices, settings: PlayerSettings) -> Self {
        Self {
            players: DashMap::new(),
            services,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer>> {
        self.players.get(&guild_id).map(|entry| entry.value().clone())
    }

    /// Returns the guild's player, creating it and starting its event loop on
    /// first use. Concurrent callers for one guild always get the same player.
    pub async fn get_or_create(&self, guild_id: GuildId) -> Result<Arc<GuildPlayer>> {
        if let Some(player) = self.get(guild_id) {
            return Ok(player);
        }

        // Built outside the map lock; a losing racer's player never runs.
        let storage = self.services.storage.for_guild(guild_id).await?;
        let services = PlayerServices {
            transport: self.services.transports.create(guild_id),
            source: self.services.source.clone(),
            notifier: self.services.notifier.clone(),
            storage,
        };
        let candidate = Arc::new(GuildPlayer::new(guild_id, services, self.settings.clone()));

        let player = match self.players.entry(guild_id) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                entry.insert(candidate.clone());
                self.spawn_run(candidate.clone());
                info!("🆕 Player creado para guild {}", guild_id);
                candidate
            }
        };
        Ok(player)
    }

    fn spawn_run(&self, player: Arc<GuildPlayer>) {
        let parent = self.shutdown.child_token();
        tokio::spawn(async move {
            let guild_id = player.guild_id();
            match player.run(parent).await {
                Ok(()) => debug!("Event loop de guild {} finalizado", guild_id),
                Err(PlayerError::Cancelled) => debug!("Event loop de guild {} cancelado", guild_id),
                Err(e) => error!("❌ Event loop de guild {} falló: {}", guild_id, e),
            }
        });
    }

    /// Closes and forgets the guild's player. Returns whether one existed.
    pub async fn remove(&self, guild_id: GuildId) -> bool {
        match self.players.remove(&guild_id) {
            Some((_, player)) => {
                player.close().await;
                info!("🗑️ Player eliminado para guild {}", guild_id);
                true
            }
            None => false,
        }
    }

    pub fn guild_ids(&self) -> Vec<GuildId> {
        self.players.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Closes every player and cancels their event loops.
    pub async fn shutdown(&self) {
        let players: Vec<Arc<GuildPlayer>> = self
            .players
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.players.clear();

        info!("🛑 Cerrando {} players", players.len());
        futures::future::join_all(players.iter().map(|player| player.close())).await;
        self.shutdown.cancel();
    }
}
