use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serenity::model::id::{ChannelId, GuildId};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audio::queue::PlayedTrack;

/// Playback state of one guild that must survive a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildState {
    pub guild_id: Option<GuildId>,
    pub current_track: Option<PlayedTrack>,
    pub voice_channel: Option<ChannelId>,
    pub text_channel: Option<ChannelId>,
}

/// Per-guild status storage used by the player and the controller.
#[async_trait]
pub trait StateStorage: Send + Sync {
    async fn current_track(&self) -> Result<Option<PlayedTrack>>;

    async fn set_current_track(&self, track: Option<&PlayedTrack>) -> Result<()>;

    async fn voice_channel(&self) -> Result<Option<ChannelId>>;

    async fn set_voice_channel(&self, channel: ChannelId) -> Result<()>;

    async fn text_channel(&self) -> Result<Option<ChannelId>>;

    async fn set_text_channel(&self, channel: ChannelId) -> Result<()>;
}

/// Hands out the storage of each guild.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn for_guild(&self, guild_id: GuildId) -> Result<Arc<dyn StateStorage>>;
}

/// Guild state kept only in memory.
#[derive(Debug, Default)]
pub struct MemoryStateStorage {
    state: parking_lot::Mutex<GuildState>,
}

impl MemoryStateStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: GuildState) -> Self {
        Self {
            state: parking_lot::Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> GuildState {
        self.state.lock().clone()
    }
}

#[async_trait]
impl StateStorage for MemoryStateStorage {
    async fn current_track(&self) -> Result<Option<PlayedTrack>> {
        Ok(self.state.lock().current_track.clone())
    }

    async fn set_current_track(&self, track: Option<&PlayedTrack>) -> Result<()> {
        self.state.lock().current_track = track.cloned();
        Ok(())
    }

    async fn voice_channel(&self) -> Result<Option<ChannelId>> {
        Ok(self.state.lock().voice_channel)
    }

    async fn set_voice_channel(&self, channel: ChannelId) -> Result<()> {
        self.state.lock().voice_channel = Some(channel);
        Ok(())
    }

    async fn text_channel(&self) -> Result<Option<ChannelId>> {
        Ok(self.state.lock().text_channel)
    }

    async fn set_text_channel(&self, channel: ChannelId) -> Result<()> {
        self.state.lock().text_channel = Some(channel);
        Ok(())
    }
}

/// In-memory storage for every guild; state is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStorageProvider;

#[async_trait]
impl StorageProvider for MemoryStorageProvider {
    async fn for_guild(&self, _guild_id: GuildId) -> Result<Arc<dyn StateStorage>> {
        Ok(Arc::new(MemoryStateStorage::new()))
    }
}

/// Guild state persisted as `servers/guild_<id>.json` under the data directory.
///
/// The file is read once and cached; every write rewrites it through a
/// temporary file and a rename.
pub struct JsonStateStorage {
    file_path: PathBuf,
    state: Mutex<GuildState>,
    writes: AtomicU64,
}

impl JsonStateStorage {
    pub async fn open(data_dir: PathBuf, guild_id: GuildId) -> Result<Self> {
        let servers_dir = data_dir.join("servers");
        fs::create_dir_all(&servers_dir)
            .await
            .with_context(|| format!("No se pudo crear {}", servers_dir.display()))?;

        let file_path = servers_dir.join(format!("guild_{}.json", guild_id));
        let state = match fs::read_to_string(&file_path).await {
            Ok(content) => match serde_json::from_str::<GuildState>(&content) {
                Ok(state) => {
                    debug!("📂 Estado cargado para guild {}", guild_id);
                    state
                }
                Err(e) => {
                    warn!("Estado corrupto para guild {}, se descarta: {}", guild_id, e);
                    GuildState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => GuildState::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("No se pudo leer {}", file_path.display()))
            }
        };

        Ok(Self {
            file_path,
            state: Mutex::new(GuildState {
                guild_id: Some(guild_id),
                ..state
            }),
            writes: AtomicU64::new(0),
        })
    }

    pub fn file_path(&self) -> &PathBuf {
        &self.file_path
    }

    /// Applies `change` and persists it. The cache only takes the new state
    /// once the file has been replaced.
    async fn update(&self, change: impl FnOnce(&mut GuildState)) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        change(&mut next);

        let content = serde_json::to_string_pretty(&next)?;
        // A write abandoned by a dropped caller may still finish in the
        // background; it must never land on another write's temporary file.
        let write_id = self.writes.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self.file_path.with_extension(format!("json.{}.tmp", write_id));
        let written = match fs::write(&tmp_path, content).await {
            Ok(()) => fs::rename(&tmp_path, &self.file_path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e).with_context(|| format!("No se pudo escribir {}", self.file_path.display()));
        }

        *state = next;
        Ok(())
    }
}

#[async_trait]
impl StateStorage for JsonStateStorage {
    async fn current_track(&self) -> Result<Option<PlayedTrack>> {
        Ok(self.state.lock().await.current_track.clone())
    }

    async fn set_current_track(&self, track: Option<&PlayedTrack>) -> Result<()> {
        let track = track.cloned();
        self.update(|state| state.current_track = track).await
    }

    async fn voice_channel(&self) -> Result<Option<ChannelId>> {
        Ok(self.state.lock().await.voice_channel)
    }

    async fn set_voice_channel(&self, channel: ChannelId) -> Result<()> {
        self.update(|state| state.voice_channel = Some(channel)).await
    }

    async fn text_channel(&self) -> Result<Option<ChannelId>> {
        Ok(self.state.lock().await.text_channel)
    }

    async fn set_text_channel(&self, channel: ChannelId) -> Result<()> {
        self.update(|state| state.text_channel = Some(channel)).await
    }
}

/// Opens [`JsonStateStorage`] files under one data directory.
#[derive(Debug, Clone)]
pub struct JsonStorageProvider {
    data_dir: PathBuf,
}

impl JsonStorageProvider {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(data_dir.join("servers")).await?;
        info!("📁 Storage inicializado en: {}", data_dir.display());
        Ok(Self { data_dir })
    }
}

#[async_trait]
impl StorageProvider for JsonStorageProvider {
    async fn for_guild(&self, guild_id: GuildId) -> Result<Arc<dyn StateStorage>> {
        let storage = JsonStateStorage::open(self.data_dir.clone(), guild_id).await?;
        Ok(Arc::new(storage))
    }
}
