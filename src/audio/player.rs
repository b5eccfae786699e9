use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        controller::{PlaybackController, PlaybackFailure, PlayerServices, PlayerState},
        events::{PlayerEvent, Reply},
        queue::{PlayedTrack, Playlist, Requester, Track},
    },
    config::PlayerSettings,
    error::{PlayerError, PlayerResult, PlaylistError},
};

/// Single entry point for one guild's playback.
///
/// Reads go straight to the playlist or the controller. Anything that changes
/// what is playing is queued as a [`PlayerEvent`] and applied by [`run`](Self::run)
/// in submission order.
pub struct GuildPlayer {
    guild_id: GuildId,
    playlist: Playlist,
    controller: PlaybackController,
    services: PlayerServices,
    events_tx: mpsc::Sender<PlayerEvent>,
    events_rx: tokio::sync::Mutex<mpsc::Receiver<PlayerEvent>>,
    joined: Mutex<Option<ChannelId>>,
    shutdown: CancellationToken,
}

impl GuildPlayer {
    pub fn new(guild_id: GuildId, services: PlayerServices, settings: PlayerSettings) -> Self {
        let (events_tx, events_rx) = mpsc::channel(settings.event_queue_size.max(1));
        Self {
            guild_id,
            playlist: Playlist::new(),
            controller: PlaybackController::new(guild_id, services.clone(), settings),
            services,
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            joined: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Appends a track and asks the event loop to start playing if idle.
    ///
    /// The playlist is updated before this returns.
    pub async fn add_song(
        &self,
        track: Track,
        requester: Requester,
        text_channel: Option<ChannelId>,
        voice_channel: Option<ChannelId>,
    ) -> PlayerResult<PlayedTrack> {
        if self.shutdown.is_cancelled() {
            return Err(PlayerError::Closed);
        }

        let added = self.playlist.append(PlayedTrack::new(track, requester));
        let kick = PlayerEvent::Play {
            text_channel,
            voice_channel,
        };
        if let Err(e) = self.send(kick).await {
            if let Some(id) = added.track.id.as_deref() {
                self.playlist.remove_by_id(id);
            }
            return Err(e);
        }

        info!(
            "➕ Agregado a la cola en guild {}: {} (pedido por {})",
            self.guild_id,
            added.title(),
            added.requester.name
        );
        Ok(added)
    }

    pub async fn skip_song(&self) -> PlayerResult<()> {
        self.request(|reply| PlayerEvent::Skip { reply }).await
    }

    pub async fn pause(&self) -> PlayerResult<()> {
        self.request(|reply| PlayerEvent::Pause { reply }).await
    }

    pub async fn resume(&self) -> PlayerResult<()> {
        self.request(|reply| PlayerEvent::Resume { reply }).await
    }

    /// Clears the playlist and stops the current track.
    pub async fn stop(&self) -> PlayerResult<()> {
        self.request(|reply| PlayerEvent::Stop { reply }).await
    }

    /// Removes the track at a 1-based playlist position.
    pub fn remove_song(&self, position: usize) -> PlayerResult<PlayedTrack> {
        let removed = self.playlist.remove_at(position)?;
        info!(
            "🗑️ Eliminado de la cola en guild {}: {} (posición {})",
            self.guild_id,
            removed.title(),
            position
        );
        Ok(removed)
    }

    pub fn get_playlist(&self) -> Vec<PlayedTrack> {
        self.playlist.get_all()
    }

    pub fn get_played_track(&self) -> Option<PlayedTrack> {
        self.controller.current_track()
    }

    pub fn state(&self) -> PlayerState {
        self.controller.current_state()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerState> {
        self.controller.subscribe()
    }

    /// Playback failures of this guild, for the interaction layer.
    pub fn failures(&self) -> broadcast::Receiver<PlaybackFailure> {
        self.controller.subscribe_failures()
    }

    /// Persists `channel` and connects the transport to it.
    pub async fn join_voice_channel(&self, channel: ChannelId) -> PlayerResult<()> {
        self.services
            .storage
            .set_voice_channel(channel)
            .await
            .map_err(PlayerError::Storage)?;
        self.join(channel).await
    }

    pub fn is_running(&self) -> bool {
        self.events_rx.try_lock().is_err()
    }

    /// Processes events until [`close`](Self::close) (`Ok`) or until `parent`
    /// is cancelled (`Err(Cancelled)`).
    ///
    /// A track left in storage by a previous run is put back at the head of
    /// the playlist first.
    pub async fn run(&self, parent: CancellationToken) -> PlayerResult<()> {
        let mut events = self
            .events_rx
            .try_lock()
            .map_err(|_| PlayerError::AlreadyRunning)?;
        if self.shutdown.is_cancelled() {
            return Err(PlayerError::Closed);
        }

        if let Some(restored) = self.restore_current_track().await {
            info!(
                "♻️ Track restaurado en guild {}: {} desde {}",
                self.guild_id,
                restored.title(),
                humantime::format_duration(restored.start_offset())
            );
        }

        info!("🎧 Event loop iniciado para guild {}", self.guild_id);
        let mut state_rx = self.controller.subscribe();
        let mut driving = false;

        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Ok(()),
                _ = parent.cancelled() => break Err(PlayerError::Cancelled),
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event, &mut driving).await,
                    None => break Ok(()),
                },
                _ = wait_idle(&mut state_rx), if driving => {
                    driving = self.play_next().await;
                }
            }
        };

        // Pending replies are dropped, their callers see `Closed`.
        events.close();
        while events.try_recv().is_ok() {}

        match &outcome {
            Ok(()) => info!("🛑 Event loop detenido para guild {}", self.guild_id),
            Err(e) => warn!("Event loop de guild {} terminado: {}", self.guild_id, e),
        }
        outcome
    }

    /// Best-effort teardown: stops the event loop, clears the playlist, stops
    /// playback and leaves the voice channel.
    pub async fn close(&self) {
        self.shutdown.cancel();
        {
            let mut events = self.events_rx.lock().await;
            events.close();
            while events.try_recv().is_ok() {}
        }

        let cleared = self.playlist.clear();
        self.controller.stop().await;

        let was_joined = self.joined.lock().take().is_some();
        if was_joined {
            if let Err(e) = self.services.transport.leave_channel().await {
                warn!("No se pudo salir del canal de voz en guild {}: {}", self.guild_id, e);
            }
        }
        info!(
            "👋 Player cerrado para guild {} ({} tracks descartados)",
            self.guild_id, cleared
        );
    }

    async fn send(&self, event: PlayerEvent) -> PlayerResult<()> {
        let kind = event.kind();
        self.events_tx
            .send(event)
            .await
            .map_err(|_| PlayerError::Closed)?;
        debug!("Evento {} encolado en guild {}", kind, self.guild_id);
        Ok(())
    }

    async fn request(&self, make: impl FnOnce(Reply) -> PlayerEvent) -> PlayerResult<()> {
        let (reply, outcome) = oneshot::channel();
        self.send(make(reply)).await?;
        outcome.await.map_err(|_| PlayerError::Closed)?
    }

    async fn handle_event(&self, event: PlayerEvent, driving: &mut bool) {
        debug!("Procesando evento {} en guild {}", event.kind(), self.guild_id);
        match event {
            PlayerEvent::Play {
                text_channel,
                voice_channel,
            } => {
                *driving = self.handle_play(text_channel, voice_channel).await || *driving;
            }
            PlayerEvent::Pause { reply } => {
                let _ = reply.send(self.controller.pause().await);
            }
            PlayerEvent::Resume { reply } => {
                let _ = reply.send(self.controller.resume().await);
            }
            PlayerEvent::Stop { reply } => {
                *driving = false;
                let cleared = self.playlist.clear();
                self.controller.stop().await;
                info!(
                    "⏹️ Cola vaciada en guild {} ({} tracks)",
                    self.guild_id, cleared
                );
                let _ = reply.send(Ok(()));
            }
            PlayerEvent::Skip { reply } => {
                let outcome = if self.controller.current_state() == PlayerState::Idle {
                    Err(PlayerError::NotPlaying)
                } else {
                    info!("⏭️ Saltando track en guild {}", self.guild_id);
                    self.controller.stop().await;
                    Ok(())
                };
                let _ = reply.send(outcome);
            }
        }
    }

    /// Persists the channels, joins voice and starts the next track if idle.
    ///
    /// Returns whether the loop should keep consuming the playlist.
    async fn handle_play(
        &self,
        text_channel: Option<ChannelId>,
        voice_channel: Option<ChannelId>,
    ) -> bool {
        let storage = &self.services.storage;
        if let Some(channel) = text_channel {
            if let Err(e) = storage.set_text_channel(channel).await {
                warn!("No se pudo guardar el canal de texto en guild {}: {:?}", self.guild_id, e);
            }
        }
        if let Some(channel) = voice_channel {
            if let Err(e) = storage.set_voice_channel(channel).await {
                warn!("No se pudo guardar el canal de voz en guild {}: {:?}", self.guild_id, e);
            }
        }

        let channel = match voice_channel {
            Some(channel) => Some(channel),
            None => storage.voice_channel().await.unwrap_or_else(|e| {
                warn!("No se pudo leer el canal de voz en guild {}: {:?}", self.guild_id, e);
                None
            }),
        };
        let Some(channel) = channel else {
            warn!("Sin canal de voz para reproducir en guild {}", self.guild_id);
            return false;
        };
        if let Err(e) = self.join(channel).await {
            error!("❌ No se pudo unir al canal {} en guild {}: {}", channel, self.guild_id, e);
            return false;
        }

        if self.controller.current_state() == PlayerState::Idle {
            return self.play_next().await;
        }
        true
    }

    /// Pops the next track into the controller. Returns `false` once the
    /// playlist is empty.
    async fn play_next(&self) -> bool {
        let track = match self.playlist.pop_front() {
            Ok(track) => track,
            Err(PlaylistError::Empty) => {
                info!("📭 Cola vacía en guild {}", self.guild_id);
                return false;
            }
            Err(e) => {
                error!("❌ Error leyendo la cola de guild {}: {}", self.guild_id, e);
                return false;
            }
        };

        let text_channel = self.services.storage.text_channel().await.unwrap_or_else(|e| {
            warn!("No se pudo leer el canal de texto en guild {}: {:?}", self.guild_id, e);
            None
        });

        match self.controller.play(track.clone(), text_channel).await {
            Ok(()) => true,
            Err(PlayerError::AlreadyPlaying) => {
                // Raced with a session that is still winding down.
                self.playlist.prepend(track);
                true
            }
            Err(e) => {
                error!(
                    "❌ No se pudo iniciar {} en guild {}: {}",
                    track.title(),
                    self.guild_id,
                    e
                );
                self.controller.report_failure(track, e.to_string());
                true
            }
        }
    }

    async fn join(&self, channel: ChannelId) -> PlayerResult<()> {
        if *self.joined.lock() == Some(channel) {
            return Ok(());
        }
        self.services.transport.join_channel(channel).await?;
        *self.joined.lock() = Some(channel);
        info!("🔊 Unido al canal {} en guild {}", channel, self.guild_id);
        Ok(())
    }

    /// Puts a track interrupted by a previous run back at the head of the
    /// playlist, advanced by its last known position.
    async fn restore_current_track(&self) -> Option<PlayedTrack> {
        let storage = &self.services.storage;
        let mut track = match storage.current_track().await {
            Ok(Some(track)) => track,
            Ok(None) => return None,
            Err(e) => {
                warn!("No se pudo leer el track actual de guild {}: {:?}", self.guild_id, e);
                return None;
            }
        };

        track.resume_from_position();
        let restored = self.playlist.prepend(track);
        if let Err(e) = storage.set_current_track(None).await {
            warn!("No se pudo limpiar el track restaurado en guild {}: {:?}", self.guild_id, e);
        }

        match storage.voice_channel().await {
            Ok(Some(channel)) => {
                let kick = PlayerEvent::Play {
                    text_channel: None,
                    voice_channel: Some(channel),
                };
                if self.events_tx.try_send(kick).is_err() {
                    warn!("Cola de eventos llena en guild {}, sin reanudar", self.guild_id);
                }
            }
            Ok(None) => debug!("Sin canal de voz guardado en guild {}", self.guild_id),
            Err(e) => warn!("No se pudo leer el canal de voz de guild {}: {:?}", self.guild_id, e),
        }

        Some(restored)
    }
}

async fn wait_idle(state: &mut watch::Receiver<PlayerState>) {
    if state.wait_for(|s| *s == PlayerState::Idle).await.is_err() {
        std::future::pending::<()>().await;
    }
}
