use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::collections::VecDeque;
use std::time::Duration;

use crate::error::PlaylistError;

/// Platform a track was fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourcePlatform {
    YouTube,
    SoundCloud,
    Direct,
    Local,
}

impl SourcePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourcePlatform::YouTube => "youtube",
            SourcePlatform::SoundCloud => "soundcloud",
            SourcePlatform::Direct => "direct",
            SourcePlatform::Local => "local",
        }
    }
}

/// A downloaded, DCA-encoded track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Backfilled on enqueue when absent
    pub id: Option<String>,
    pub title: String,
    pub duration_ms: u64,
    pub thumbnail_url: Option<String>,
    pub source: SourcePlatform,
    /// Path (relative to the audio root) or URL of the DCA file
    pub file_ref: String,
    /// Backfilled on enqueue when absent
    pub created_at: Option<DateTime<Utc>>,
}

impl Track {
    pub fn new(title: impl Into<String>, file_ref: impl Into<String>, source: SourcePlatform) -> Self {
        Self {
            id: None,
            title: title.into(),
            duration_ms: 0,
            thumbnail_url: None,
            source,
            file_ref: file_ref.into(),
            created_at: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_thumbnail(mut self, thumbnail_url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(thumbnail_url.into());
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Who asked for a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: UserId,
    pub name: String,
}

impl Requester {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A track in a guild's playlist, with its playback bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayedTrack {
    pub track: Track,
    /// Milliseconds played since the stream started (excludes the offset)
    pub position_ms: u64,
    pub requester: Requester,
    /// Milliseconds of audio skipped at stream start
    pub start_offset_ms: u64,
}

impl PlayedTrack {
    pub fn new(track: Track, requester: Requester) -> Self {
        Self {
            track,
            position_ms: 0,
            requester,
            start_offset_ms: 0,
        }
    }

    pub fn title(&self) -> &str {
        &self.track.title
    }

    pub fn position(&self) -> Duration {
        Duration::from_millis(self.position_ms)
    }

    pub fn start_offset(&self) -> Duration {
        Duration::from_millis(self.start_offset_ms)
    }

    /// Position within the whole track, offset included.
    pub fn absolute_position(&self) -> Duration {
        Duration::from_millis(self.start_offset_ms + self.position_ms)
    }

    /// Folds the last known position into the start offset so playback
    /// resumes where it stopped.
    pub fn resume_from_position(&mut self) {
        self.start_offset_ms += self.position_ms;
        self.position_ms = 0;
    }
}

/// Thread-safe FIFO of pending tracks for one guild.
#[derive(Debug, Default)]
pub struct Playlist {
    items: RwLock<VecDeque<PlayedTrack>>,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a track to the tail, backfilling its id and creation time.
    pub fn append(&self, mut track: PlayedTrack) -> PlayedTrack {
        backfill(&mut track.track);
        self.items.write().push_back(track.clone());
        track
    }

    /// Puts a track at the head, ahead of everything queued.
    pub fn prepend(&self, mut track: PlayedTrack) -> PlayedTrack {
        backfill(&mut track.track);
        self.items.write().push_front(track.clone());
        track
    }

    /// Removes the track at a 1-based position.
    pub fn remove_at(&self, position: usize) -> Result<PlayedTrack, PlaylistError> {
        let mut items = self.items.write();
        let len = items.len();
        if position < 1 || position > len {
            return Err(PlaylistError::InvalidPosition { position, len });
        }
        items
            .remove(position - 1)
            .ok_or(PlaylistError::InvalidPosition { position, len })
    }

    /// Removes the most recently queued track with the given id.
    pub fn remove_by_id(&self, id: &str) -> Option<PlayedTrack> {
        let mut items = self.items.write();
        let index = items
            .iter()
            .rposition(|t| t.track.id.as_deref() == Some(id))?;
        items.remove(index)
    }

    pub fn pop_front(&self) -> Result<PlayedTrack, PlaylistError> {
        self.items.write().pop_front().ok_or(PlaylistError::Empty)
    }

    /// Snapshot of the queue; later mutations do not affect it.
    pub fn get_all(&self) -> Vec<PlayedTrack> {
        self.items.read().iter().cloned().collect()
    }

    /// Empties the queue, returning how many tracks were dropped.
    pub fn clear(&self) -> usize {
        let mut items = self.items.write();
        let cleared = items.len();
        items.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn total_duration(&self) -> Duration {
        self.items.read().iter().map(|t| t.track.duration()).sum()
    }
}

fn backfill(track: &mut Track) {
    if track.id.is_none() {
        track.id = Some(generate_id());
    }
    if track.created_at.is_none() {
        track.created_at = Some(Utc::now());
    }
}

fn generate_id() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}
