//! Fakes and fixtures shared by the unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, MessageId, UserId};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    audio::{
        controller::PlayerServices,
        dca::{OpusMetadata, StreamMetadata},
        queue::{PlayedTrack, Requester, SourcePlatform, Track},
        transport::VoiceTransport,
    },
    config::PlayerSettings,
    error::TransportError,
    sources::{AudioSource, AudioStream},
    storage::MemoryStateStorage,
    ui::StatusNotifier,
};

pub fn requester() -> Requester {
    Requester::new(UserId::new(1), "tester")
}

pub fn track(name: &str) -> Track {
    Track::new(name, format!("{name}.dca"), SourcePlatform::Local)
}

/// A PlayedTrack whose file reference is `<name>.dca`.
pub fn played(name: &str) -> PlayedTrack {
    PlayedTrack::new(track(name), requester())
}

/// Length-prefixed frames without header or metadata.
pub fn raw_frames(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for frame in frames {
        out.extend_from_slice(&(frame.len() as i16).to_le_bytes());
        out.extend_from_slice(frame);
    }
    out
}

/// A complete DCA stream with a `DCA1` header.
pub fn dca_stream(metadata: &StreamMetadata, frames: &[Vec<u8>]) -> Vec<u8> {
    let json = serde_json::to_vec(metadata).unwrap();
    let mut out = b"DCA1".to_vec();
    out.extend_from_slice(&(json.len() as i32).to_le_bytes());
    out.extend_from_slice(&json);
    out.extend_from_slice(&raw_frames(frames));
    out
}

/// Stereo profile whose frames last 20ms.
pub fn stereo_20ms() -> StreamMetadata {
    StreamMetadata {
        origin: None,
        opus: Some(OpusMetadata {
            bitrate: 64_000,
            sample_rate: 48_000,
            application: "audio".into(),
            frame_size: 1920,
            channels: 2,
            vbr: true,
        }),
    }
}

pub fn fast_settings() -> PlayerSettings {
    PlayerSettings {
        status_interval: Duration::from_millis(10),
        pause_poll_interval: Duration::from_millis(5),
        event_queue_size: 64,
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within 5s");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Serves in-memory DCA files by file reference.
#[derive(Default)]
pub struct MemorySource {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, file_ref: &str, bytes: Vec<u8>) {
        self.files.lock().insert(file_ref.to_string(), bytes);
    }

    /// `count` frames, each filled with `label`.
    pub fn add_labelled(&self, file_ref: &str, label: u8, count: usize) {
        let frames = vec![vec![label; 4]; count];
        self.add(file_ref, dca_stream(&stereo_20ms(), &frames));
    }

    /// `count` frames whose first byte is their index.
    pub fn add_numbered(&self, file_ref: &str, count: usize) {
        let frames: Vec<Vec<u8>> = (0..count).map(|i| vec![i as u8, 0, 0]).collect();
        self.add(file_ref, dca_stream(&stereo_20ms(), &frames));
    }
}

#[async_trait]
impl AudioSource for MemorySource {
    async fn get_audio(&self, file_ref: &str) -> Result<AudioStream> {
        let bytes = self
            .files
            .lock()
            .get(file_ref)
            .cloned()
            .ok_or_else(|| anyhow!("archivo no encontrado: {}", file_ref))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn source_name(&self) -> &'static str {
        "memory"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendFault {
    Fail(usize),
    Cancel(usize),
}

/// Voice transport that records everything it is asked to do.
#[derive(Default)]
pub struct RecordingTransport {
    delay: Duration,
    fault: Mutex<Option<SendFault>>,
    frames: Mutex<Vec<Bytes>>,
    joined: Mutex<Vec<ChannelId>>,
    leaves: AtomicUsize,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
}

impl RecordingTransport {
    /// Every send takes `delay` before it is recorded.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Sends fail once `frames` frames went through.
    pub fn fail_after(&self, frames: usize) {
        *self.fault.lock() = Some(SendFault::Fail(frames));
    }

    /// Sends report cancellation once `frames` frames went through.
    pub fn cancel_after(&self, frames: usize) {
        *self.fault.lock() = Some(SendFault::Cancel(frames));
    }

    pub fn frames(&self) -> Vec<Bytes> {
        self.frames.lock().clone()
    }

    pub fn joined(&self) -> Vec<ChannelId> {
        self.joined.lock().clone()
    }

    pub fn leave_calls(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }

    pub fn pause_calls(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resume_calls(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceTransport for RecordingTransport {
    async fn join_channel(&self, channel: ChannelId) -> Result<(), TransportError> {
        self.joined.lock().push(channel);
        Ok(())
    }

    async fn leave_channel(&self) -> Result<(), TransportError> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_audio(&self, frame: Bytes) -> Result<(), TransportError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut frames = self.frames.lock();
        match *self.fault.lock() {
            Some(SendFault::Fail(after)) if frames.len() >= after => {
                return Err(TransportError::Other(anyhow!("voice socket closed")));
            }
            Some(SendFault::Cancel(after)) if frames.len() >= after => {
                return Err(TransportError::Cancelled);
            }
            _ => {}
        }
        frames.push(frame);
        Ok(())
    }

    async fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    async fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Status notifier that keeps every message it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(ChannelId, String)>>,
    /// Position of the track on every status update.
    updates: Mutex<Vec<u64>>,
    next_message: AtomicU64,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_titles(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, title)| title.clone()).collect()
    }

    pub fn sent_channels(&self) -> Vec<ChannelId> {
        self.sent.lock().iter().map(|(channel, _)| *channel).collect()
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().len()
    }

    pub fn update_positions(&self) -> Vec<u64> {
        self.updates.lock().clone()
    }
}

#[async_trait]
impl StatusNotifier for RecordingNotifier {
    async fn send_playing_status(&self, channel: ChannelId, track: &PlayedTrack) -> Result<MessageId> {
        self.sent.lock().push((channel, track.title().to_string()));
        Ok(MessageId::new(self.next_message.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn update_playing_status(
        &self,
        _channel: ChannelId,
        _message: MessageId,
        track: &PlayedTrack,
    ) -> Result<()> {
        self.updates.lock().push(track.position_ms);
        Ok(())
    }
}

/// The concrete fakes behind one [`PlayerServices`].
pub struct TestServices {
    pub transport: Arc<RecordingTransport>,
    pub source: Arc<MemorySource>,
    pub notifier: Arc<RecordingNotifier>,
    pub storage: Arc<MemoryStateStorage>,
}

impl TestServices {
    pub fn new(frame_delay: Duration) -> Self {
        Self::with_storage(frame_delay, MemoryStateStorage::new())
    }

    pub fn with_storage(frame_delay: Duration, storage: MemoryStateStorage) -> Self {
        Self {
            transport: Arc::new(RecordingTransport::with_delay(frame_delay)),
            source: Arc::new(MemorySource::new()),
            notifier: Arc::new(RecordingNotifier::new()),
            storage: Arc::new(storage),
        }
    }

    pub fn services(&self) -> PlayerServices {
        PlayerServices {
            transport: self.transport.clone(),
            source: self.source.clone(),
            notifier: self.notifier.clone(),
            storage: self.storage.clone(),
        }
    }
}
