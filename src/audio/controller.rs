//! Per-guild playback state machine.
//!
//! `Idle -> Playing -> (Paused <-> Playing) -> Idle`
//!
//! A successful [`PlaybackController::play`] spawns exactly one streaming task
//! that resolves the audio, announces the track, pumps DCA frames to the voice
//! transport and reports the position on a fixed tick. The task always ends by
//! clearing the current track and returning to `Idle`, unless a newer session
//! already replaced it.
//!
//! Ownership of the current-track slot: it is written when entering `Playing`
//! (by `play`), by the position ticker of the live session, and cleared by
//! `stop` or by the session's own cleanup. All of these writers hold the
//! transition lock and check the session generation.

use anyhow::Context as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serenity::model::id::{ChannelId, GuildId, MessageId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncRead;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        dca::{DcaDecoder, DEFAULT_FRAME_DURATION},
        queue::PlayedTrack,
        transport::VoiceTransport,
    },
    config::PlayerSettings,
    error::{PlayerError, PlayerResult},
    sources::AudioSource,
    storage::StateStorage,
    ui::StatusNotifier,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerState {
    Idle,
    Playing,
    Paused,
}

/// Reported when a streaming task ends on an error instead of the track end.
#[derive(Debug, Clone)]
pub struct PlaybackFailure {
    pub guild_id: GuildId,
    pub track: PlayedTrack,
    pub reason: String,
}

/// Collaborators of one guild's playback.
#[derive(Clone)]
pub struct PlayerServices {
    pub transport: Arc<dyn VoiceTransport>,
    pub source: Arc<dyn AudioSource>,
    pub notifier: Arc<dyn StatusNotifier>,
    pub storage: Arc<dyn StateStorage>,
}

/// Wall clock of one session, excluding paused intervals.
#[derive(Debug)]
struct PlaybackClock {
    started: Instant,
    paused_at: Option<Instant>,
    total_paused: Duration,
}

impl PlaybackClock {
    fn start(now: Instant) -> Self {
        Self {
            started: now,
            paused_at: None,
            total_paused: Duration::ZERO,
        }
    }

    fn pause(&mut self, now: Instant) {
        self.paused_at.get_or_insert(now);
    }

    fn resume(&mut self, now: Instant) {
        if let Some(paused_at) = self.paused_at.take() {
            self.total_paused += now.saturating_duration_since(paused_at);
        }
    }

    /// `now - started - total_paused`, frozen while paused.
    fn elapsed(&self, now: Instant) -> Duration {
        let end = self.paused_at.unwrap_or(now);
        end.saturating_duration_since(self.started)
            .saturating_sub(self.total_paused)
    }
}

struct ActiveSession {
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
    clock: Arc<Mutex<PlaybackClock>>,
}

#[derive(Default)]
struct Transition {
    generation: u64,
    session: Option<ActiveSession>,
}

struct Shared {
    guild_id: GuildId,
    services: PlayerServices,
    settings: PlayerSettings,
    state: watch::Sender<PlayerState>,
    current: Mutex<Option<PlayedTrack>>,
    transition: tokio::sync::Mutex<Transition>,
    failures: broadcast::Sender<PlaybackFailure>,
}

impl Shared {
    fn set_state(&self, next: PlayerState) -> PlayerState {
        self.state.send_replace(next)
    }

    fn set_idle(&self) {
        self.state.send_if_modified(|state| {
            let changed = *state != PlayerState::Idle;
            *state = PlayerState::Idle;
            changed
        });
    }
}

pub struct PlaybackController {
    shared: Arc<Shared>,
}

impl PlaybackController {
    pub fn new(guild_id: GuildId, services: PlayerServices, settings: PlayerSettings) -> Self {
        let (state, _) = watch::channel(PlayerState::Idle);
        let (failures, _) = broadcast::channel(16);
        Self {
            shared: Arc::new(Shared {
                guild_id,
                services,
                settings,
                state,
                current: Mutex::new(None),
                transition: tokio::sync::Mutex::new(Transition::default()),
                failures,
            }),
        }
    }

    pub fn current_state(&self) -> PlayerState {
        *self.shared.state.borrow()
    }

    pub fn current_track(&self) -> Option<PlayedTrack> {
        self.shared.current.lock().clone()
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<PlayerState> {
        self.shared.state.subscribe()
    }

    pub fn subscribe_failures(&self) -> broadcast::Receiver<PlaybackFailure> {
        self.shared.failures.subscribe()
    }

    /// Publishes a failure that happened before a session could start.
    pub(crate) fn report_failure(&self, track: PlayedTrack, reason: String) {
        let _ = self.shared.failures.send(PlaybackFailure {
            guild_id: self.shared.guild_id,
            track,
            reason,
        });
    }

    /// Starts streaming `track`. Only valid from `Idle`.
    ///
    /// The track is persisted as current before this returns; the audio
    /// itself is resolved by the spawned streaming task.
    pub async fn play(&self, track: PlayedTrack, text_channel: Option<ChannelId>) -> PlayerResult<()> {
        let mut transition = self.shared.transition.lock().await;
        if self.current_state() != PlayerState::Idle {
            return Err(PlayerError::AlreadyPlaying);
        }

        self.shared
            .services
            .storage
            .set_current_track(Some(&track))
            .await
            .map_err(PlayerError::Storage)?;

        transition.generation += 1;
        let generation = transition.generation;
        let cancel = CancellationToken::new();
        let (paused_tx, paused_rx) = watch::channel(false);
        let clock = Arc::new(Mutex::new(PlaybackClock::start(Instant::now())));

        transition.session = Some(ActiveSession {
            cancel: cancel.clone(),
            paused: paused_tx,
            clock: clock.clone(),
        });
        *self.shared.current.lock() = Some(track.clone());
        self.shared.set_state(PlayerState::Playing);

        info!(
            "🎵 Reproduciendo en guild {}: {} (desde {})",
            self.shared.guild_id,
            track.title(),
            humantime::format_duration(track.start_offset())
        );

        let task = StreamingTask {
            shared: self.shared.clone(),
            generation,
            track,
            text_channel,
            cancel,
            paused: paused_rx,
            clock,
        };
        tokio::spawn(task.run());

        Ok(())
    }

    pub async fn pause(&self) -> PlayerResult<()> {
        let transition = self.shared.transition.lock().await;
        if self.current_state() != PlayerState::Playing {
            return Err(PlayerError::NotPlaying);
        }
        let session = transition.session.as_ref().ok_or(PlayerError::NotPlaying)?;

        session.paused.send_replace(true);
        session.clock.lock().pause(Instant::now());
        self.shared.services.transport.pause().await;
        self.shared.set_state(PlayerState::Paused);

        info!("⏸️ Reproducción pausada en guild {}", self.shared.guild_id);
        Ok(())
    }

    pub async fn resume(&self) -> PlayerResult<()> {
        let transition = self.shared.transition.lock().await;
        if self.current_state() != PlayerState::Paused {
            return Err(PlayerError::NotPaused);
        }
        let session = transition.session.as_ref().ok_or(PlayerError::NotPaused)?;

        session.clock.lock().resume(Instant::now());
        session.paused.send_replace(false);
        self.shared.services.transport.resume().await;
        self.shared.set_state(PlayerState::Playing);

        info!("▶️ Reproducción reanudada en guild {}", self.shared.guild_id);
        Ok(())
    }

    /// Cancels the active session, if any, and forces `Idle`. Idempotent.
    pub async fn stop(&self) {
        let mut transition = self.shared.transition.lock().await;
        let previous = self.current_state();

        let Some(session) = transition.session.take() else {
            self.shared.current.lock().take();
            self.shared.set_idle();
            return;
        };

        session.cancel.cancel();
        let stopped = self.shared.current.lock().take();
        if let Err(e) = self.shared.services.storage.set_current_track(None).await {
            warn!(
                "No se pudo limpiar el track actual en guild {}: {:?}",
                self.shared.guild_id, e
            );
        }
        self.shared.set_idle();

        if previous == PlayerState::Paused {
            self.shared.services.transport.resume().await;
        }

        info!(
            "⏹️ Reproducción detenida en guild {}: {}",
            self.shared.guild_id,
            stopped.as_ref().map(|t| t.title()).unwrap_or("-")
        );
    }
}

/// How a streaming session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Finished { frames: u64 },
    Cancelled,
}

struct StreamingTask {
    shared: Arc<Shared>,
    generation: u64,
    track: PlayedTrack,
    text_channel: Option<ChannelId>,
    cancel: CancellationToken,
    paused: watch::Receiver<bool>,
    clock: Arc<Mutex<PlaybackClock>>,
}

impl StreamingTask {
    async fn run(self) {
        let guild_id = self.shared.guild_id;
        match self.stream().await {
            Ok(StreamEnd::Finished { frames }) => {
                info!(
                    "✅ Track terminado en guild {}: {} ({} frames)",
                    guild_id,
                    self.track.title(),
                    frames
                );
            }
            Ok(StreamEnd::Cancelled) => {
                debug!("Track cancelado en guild {}: {}", guild_id, self.track.title());
            }
            Err(e) => {
                error!(
                    "❌ Error reproduciendo {} en guild {}: {:#}",
                    self.track.title(),
                    guild_id,
                    e
                );
                let failure = PlaybackFailure {
                    guild_id,
                    track: self.shared.current.lock().clone().unwrap_or_else(|| self.track.clone()),
                    reason: format!("{:#}", e),
                };
                let _ = self.shared.failures.send(failure);
            }
        }
        self.cleanup().await;
    }

    async fn stream(&self) -> anyhow::Result<StreamEnd> {
        let file_ref = &self.track.track.file_ref;
        let audio = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            audio = self.shared.services.source.get_audio(file_ref) => {
                audio.with_context(|| format!("No se pudo obtener el audio de {}", file_ref))?
            }
        };
        let mut decoder = DcaDecoder::new(audio);

        let message = self.announce().await;
        // The ticker is stopped and awaited, never dropped halfway through a
        // position write that could land after cleanup.
        let ticker_stop = self.cancel.child_token();
        let (outcome, ()) = tokio::join!(
            async {
                let outcome = self.pump(&mut decoder).await;
                ticker_stop.cancel();
                outcome
            },
            self.report_position(message, &ticker_stop),
        );

        decoder.close()?;
        outcome
    }

    /// Sends the initial status message; failures only cost the UI.
    async fn announce(&self) -> Option<MessageId> {
        let channel = self.text_channel?;
        match self
            .shared
            .services
            .notifier
            .send_playing_status(channel, &self.track)
            .await
        {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(
                    "No se pudo enviar el estado en guild {}: {:?}",
                    self.shared.guild_id, e
                );
                None
            }
        }
    }

    async fn pump<R>(&self, decoder: &mut DcaDecoder<R>) -> anyhow::Result<StreamEnd>
    where
        R: AsyncRead + Unpin,
    {
        let transport = &self.shared.services.transport;
        let poll = self.shared.settings.pause_poll_interval;
        let mut to_skip: Option<u64> = None;
        let mut frames = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(StreamEnd::Cancelled);
            }

            let paused = *self.paused.borrow();
            if paused {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                    _ = tokio::time::sleep(poll) => continue,
                }
            }

            let frame = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                frame = decoder.next_frame() => frame.context("Error decodificando frame DCA")?,
            };
            let Some(frame) = frame else {
                return Ok(StreamEnd::Finished { frames });
            };

            let remaining = to_skip.get_or_insert_with(|| {
                frames_to_skip(self.track.start_offset(), decoder.frame_duration())
            });
            if *remaining > 0 {
                *remaining -= 1;
                continue;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                sent = transport.send_audio(frame) => match sent {
                    Ok(()) => frames += 1,
                    Err(e) if e.is_cancelled() => {
                        debug!("Envío cancelado en guild {}", self.shared.guild_id);
                        return Ok(StreamEnd::Cancelled);
                    }
                    Err(e) => return Err(e).context("Error enviando audio al canal de voz"),
                },
            }
        }
    }

    /// Recomputes the position on every tick and pushes it out until `stop`.
    async fn report_position(&self, message: Option<MessageId>, stop: &CancellationToken) {
        let mut ticker = tokio::time::interval(self.shared.settings.status_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let Some(track) = self.record_position().await else {
                continue;
            };
            if let (Some(channel), Some(message)) = (self.text_channel, message) {
                if let Err(e) = self
                    .shared
                    .services
                    .notifier
                    .update_playing_status(channel, message, &track)
                    .await
                {
                    debug!(
                        "No se pudo actualizar el estado en guild {}: {:?}",
                        self.shared.guild_id, e
                    );
                }
            }
        }
    }

    async fn record_position(&self) -> Option<PlayedTrack> {
        let transition = self.shared.transition.lock().await;
        if transition.generation != self.generation || transition.session.is_none() {
            return None;
        }

        let elapsed = self.clock.lock().elapsed(Instant::now());
        let track = {
            let mut current = self.shared.current.lock();
            let track = current.as_mut()?;
            track.position_ms = elapsed.as_millis() as u64;
            track.clone()
        };

        if let Err(e) = self.shared.services.storage.set_current_track(Some(&track)).await {
            warn!(
                "No se pudo guardar la posición en guild {}: {:?}",
                self.shared.guild_id, e
            );
        }
        Some(track)
    }

    async fn cleanup(&self) {
        let mut transition = self.shared.transition.lock().await;
        if transition.generation != self.generation {
            debug!(
                "Sesión {} reemplazada en guild {}, sin limpieza",
                self.generation, self.shared.guild_id
            );
            return;
        }

        let previous = *self.shared.state.borrow();
        transition.session = None;
        self.shared.current.lock().take();
        if let Err(e) = self.shared.services.storage.set_current_track(None).await {
            warn!(
                "No se pudo limpiar el track actual en guild {}: {:?}",
                self.shared.guild_id, e
            );
        }
        self.shared.set_idle();

        if previous == PlayerState::Paused {
            self.shared.services.transport.resume().await;
        }
    }
}

/// Frames covering `offset`; a zero frame duration falls back to 20ms.
fn frames_to_skip(offset: Duration, frame_duration: Duration) -> u64 {
    let frame = if frame_duration.is_zero() {
        DEFAULT_FRAME_DURATION
    } else {
        frame_duration
    };
    (offset.as_millis() / frame.as_millis()) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStateStorage, StateStorage};
    use crate::test_support::*;
    use crate::ui::status::MockStatusNotifier;
    use pretty_assertions::assert_eq;

    struct Harness {
        controller: PlaybackController,
        transport: Arc<RecordingTransport>,
        source: Arc<MemorySource>,
        notifier: Arc<RecordingNotifier>,
        storage: Arc<MemoryStateStorage>,
    }

    fn harness(frame_delay: Duration) -> Harness {
        let fakes = TestServices::new(frame_delay);
        let controller = PlaybackController::new(GuildId::new(1), fakes.services(), fast_settings());
        Harness {
            controller,
            transport: fakes.transport,
            source: fakes.source,
            notifier: fakes.notifier,
            storage: fakes.storage,
        }
    }

    async fn wait_idle(controller: &PlaybackController) {
        let mut rx = controller.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == PlayerState::Idle))
            .await
            .expect("controller never went idle")
            .unwrap();
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let h = harness(Duration::from_millis(5));
        h.source.add_labelled("a.dca", b'a', 200);

        assert!(matches!(h.controller.pause().await, Err(PlayerError::NotPlaying)));
        assert!(matches!(h.controller.resume().await, Err(PlayerError::NotPaused)));
        h.controller.stop().await;
        assert_eq!(h.controller.current_state(), PlayerState::Idle);

        h.controller.play(played("a"), None).await.unwrap();
        assert_eq!(h.controller.current_state(), PlayerState::Playing);
        assert!(matches!(
            h.controller.play(played("a"), None).await,
            Err(PlayerError::AlreadyPlaying)
        ));
        assert!(matches!(h.controller.resume().await, Err(PlayerError::NotPaused)));

        h.controller.pause().await.unwrap();
        assert_eq!(h.controller.current_state(), PlayerState::Paused);
        assert!(matches!(h.controller.pause().await, Err(PlayerError::NotPlaying)));
        assert!(matches!(
            h.controller.play(played("a"), None).await,
            Err(PlayerError::AlreadyPlaying)
        ));

        h.controller.stop().await;
        assert_eq!(h.controller.current_state(), PlayerState::Idle);
        assert!(h.controller.current_track().is_none());
    }

    #[tokio::test]
    async fn plays_track_to_the_end_and_clears_status() {
        let h = harness(Duration::ZERO);
        h.source.add_labelled("a.dca", b'a', 10);
        let channel = ChannelId::new(50);

        h.controller.play(played("a"), Some(channel)).await.unwrap();
        wait_idle(&h.controller).await;

        assert_eq!(h.transport.frames().len(), 10);
        assert!(h.controller.current_track().is_none());
        assert_eq!(h.storage.snapshot().current_track, None);
        assert_eq!(h.notifier.sent_titles(), vec!["a".to_string()]);
        assert_eq!(h.notifier.sent_channels(), vec![channel]);
    }

    #[tokio::test]
    async fn pause_holds_frames_until_resume() {
        let h = harness(Duration::from_millis(5));
        h.source.add_labelled("a.dca", b'a', 60);

        h.controller.play(played("a"), None).await.unwrap();
        wait_until(|| h.transport.frames().len() >= 3).await;

        h.controller.pause().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let held = h.transport.frames().len();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(h.transport.frames().len(), held);
        assert_eq!(h.transport.pause_calls(), 1);

        h.controller.resume().await.unwrap();
        assert_eq!(h.transport.resume_calls(), 1);
        wait_idle(&h.controller).await;
        assert_eq!(h.transport.frames().len(), 60);
    }

    #[tokio::test]
    async fn position_advances_and_freezes_while_paused() {
        let h = harness(Duration::from_millis(5));
        h.source.add_labelled("a.dca", b'a', 400);

        h.controller.play(played("a"), None).await.unwrap();
        wait_until(|| {
            h.controller
                .current_track()
                .map_or(false, |t| t.position_ms >= 50)
        })
        .await;
        let persisted = h.storage.snapshot().current_track.unwrap();
        assert!(persisted.position_ms > 0);

        h.controller.pause().await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let frozen = h.controller.current_track().unwrap().position_ms;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.controller.current_track().unwrap().position_ms, frozen);

        h.controller.stop().await;
    }

    #[tokio::test]
    async fn stop_cancels_streaming() {
        let h = harness(Duration::from_millis(5));
        h.source.add_labelled("a.dca", b'a', 500);

        h.controller.play(played("a"), None).await.unwrap();
        wait_until(|| h.transport.frames().len() >= 2).await;

        h.controller.stop().await;
        assert_eq!(h.controller.current_state(), PlayerState::Idle);
        assert_eq!(h.storage.snapshot().current_track, None);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_stop = h.transport.frames().len();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(h.transport.frames().len(), after_stop);
        assert!(after_stop < 500);
    }

    #[tokio::test]
    async fn stop_while_paused_releases_transport_pause() {
        let h = harness(Duration::from_millis(5));
        h.source.add_labelled("a.dca", b'a', 500);

        h.controller.play(played("a"), None).await.unwrap();
        h.controller.pause().await.unwrap();
        h.controller.stop().await;

        assert_eq!(h.controller.current_state(), PlayerState::Idle);
        assert_eq!(h.transport.resume_calls(), 1);
    }

    #[tokio::test]
    async fn missing_audio_reports_failure_and_goes_idle() {
        let h = harness(Duration::ZERO);
        let mut failures = h.controller.subscribe_failures();

        h.controller.play(played("ghost"), None).await.unwrap();
        wait_idle(&h.controller).await;

        let failure = tokio::time::timeout(Duration::from_secs(1), failures.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failure.track.title(), "ghost");
        assert!(failure.reason.contains("ghost.dca"));
        assert_eq!(h.storage.snapshot().current_track, None);
        assert!(h.transport.frames().is_empty());
    }

    #[tokio::test]
    async fn transport_error_terminates_the_track() {
        let h = harness(Duration::ZERO);
        h.source.add_labelled("a.dca", b'a', 20);
        h.transport.fail_after(3);
        let mut failures = h.controller.subscribe_failures();

        h.controller.play(played("a"), None).await.unwrap();
        wait_idle(&h.controller).await;

        assert_eq!(h.transport.frames().len(), 3);
        let failure = failures.recv().await.unwrap();
        assert!(failure.reason.contains("Error enviando audio"));
    }

    #[tokio::test]
    async fn cancelled_send_is_not_a_failure() {
        let h = harness(Duration::ZERO);
        h.source.add_labelled("a.dca", b'a', 20);
        h.transport.cancel_after(2);
        let mut failures = h.controller.subscribe_failures();

        h.controller.play(played("a"), None).await.unwrap();
        wait_idle(&h.controller).await;

        assert_eq!(h.transport.frames().len(), 2);
        assert!(matches!(
            failures.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn start_offset_skips_leading_frames() {
        let h = harness(Duration::ZERO);
        h.source.add_numbered("a.dca", 10);

        let mut track = played("a");
        track.start_offset_ms = 100;
        h.controller.play(track, None).await.unwrap();
        wait_idle(&h.controller).await;

        let firsts: Vec<u8> = h.transport.frames().iter().map(|f| f[0]).collect();
        // 20ms frames: 100ms covers the first five
        assert_eq!(firsts, vec![5, 6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn notifier_receives_the_playing_track() {
        let transport = Arc::new(RecordingTransport::with_delay(Duration::ZERO));
        let source = Arc::new(MemorySource::new());
        source.add_labelled("a.dca", b'a', 5);

        let mut notifier = MockStatusNotifier::new();
        notifier
            .expect_send_playing_status()
            .withf(|channel, track| *channel == ChannelId::new(77) && track.title() == "a")
            .times(1)
            .returning(|_, _| Ok(MessageId::new(5)));
        notifier
            .expect_update_playing_status()
            .returning(|_, _, _| Ok(()));

        let controller = PlaybackController::new(
            GuildId::new(1),
            PlayerServices {
                transport: transport.clone(),
                source,
                notifier: Arc::new(notifier),
                storage: Arc::new(MemoryStateStorage::new()),
            },
            fast_settings(),
        );

        controller.play(played("a"), Some(ChannelId::new(77))).await.unwrap();
        wait_idle(&controller).await;
        assert_eq!(transport.frames().len(), 5);
    }

    #[tokio::test]
    async fn position_updates_reach_the_status_message() {
        let h = harness(Duration::from_millis(5));
        h.source.add_labelled("a.dca", b'a', 40);

        h.controller.play(played("a"), Some(ChannelId::new(50))).await.unwrap();
        wait_idle(&h.controller).await;

        assert!(h.notifier.update_count() > 0);
        let positions = h.notifier.update_positions();
        assert!(positions.windows(2).all(|w| w[0] <= w[1]), "{:?}", positions);
        assert!(positions.last().map_or(false, |p| *p > 0));
    }

    /// Storage whose writes finish on a detached task, the way a blocking
    /// file write keeps going after the future awaiting it is dropped.
    struct DetachedWriteStorage {
        inner: Arc<MemoryStateStorage>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl StateStorage for DetachedWriteStorage {
        async fn current_track(&self) -> anyhow::Result<Option<PlayedTrack>> {
            self.inner.current_track().await
        }

        async fn set_current_track(&self, track: Option<&PlayedTrack>) -> anyhow::Result<()> {
            let inner = self.inner.clone();
            let track = track.cloned();
            let delay = self.delay;
            tokio::spawn(async move {
                if track.is_some() {
                    tokio::time::sleep(delay).await;
                }
                inner.set_current_track(track.as_ref()).await
            })
            .await?
        }

        async fn voice_channel(&self) -> anyhow::Result<Option<ChannelId>> {
            self.inner.voice_channel().await
        }

        async fn set_voice_channel(&self, channel: ChannelId) -> anyhow::Result<()> {
            self.inner.set_voice_channel(channel).await
        }

        async fn text_channel(&self) -> anyhow::Result<Option<ChannelId>> {
            self.inner.text_channel().await
        }

        async fn set_text_channel(&self, channel: ChannelId) -> anyhow::Result<()> {
            self.inner.set_text_channel(channel).await
        }
    }

    #[tokio::test]
    async fn finished_track_is_not_persisted_by_a_late_position_write() {
        let fakes = TestServices::new(Duration::from_millis(5));
        fakes.source.add_labelled("a.dca", b'a', 20);
        let storage = Arc::new(MemoryStateStorage::new());
        let controller = PlaybackController::new(
            GuildId::new(1),
            PlayerServices {
                storage: Arc::new(DetachedWriteStorage {
                    inner: storage.clone(),
                    delay: Duration::from_millis(30),
                }),
                ..fakes.services()
            },
            fast_settings(),
        );

        controller.play(played("a"), None).await.unwrap();
        wait_idle(&controller).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(fakes.transport.frames().len(), 20);
        assert_eq!(storage.snapshot().current_track, None);
    }

    #[test]
    fn clock_excludes_paused_time() {
        let start = Instant::now();
        let mut clock = PlaybackClock::start(start);

        assert_eq!(clock.elapsed(start + Duration::from_secs(3)), Duration::from_secs(3));
        clock.pause(start + Duration::from_secs(3));
        assert_eq!(clock.elapsed(start + Duration::from_secs(10)), Duration::from_secs(3));
        clock.resume(start + Duration::from_secs(10));
        assert_eq!(clock.elapsed(start + Duration::from_secs(12)), Duration::from_secs(5));
    }

    #[test]
    fn zero_frame_duration_falls_back_for_offsets() {
        assert_eq!(frames_to_skip(Duration::from_millis(100), Duration::ZERO), 5);
        assert_eq!(frames_to_skip(Duration::from_millis(100), Duration::from_millis(40)), 2);
        assert_eq!(frames_to_skip(Duration::ZERO, Duration::from_millis(20)), 0);
    }
}
