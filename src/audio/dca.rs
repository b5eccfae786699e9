//! DCA frame container decoder.
//!
//! Layout (little-endian):
//!
//! ```text
//! [4 bytes magic/version] [i32 metadata length] [metadata JSON]
//! ([i16 frame length] [frame bytes])*
//! ```
//!
//! The metadata block is read once, lazily on the first `next_frame` call.
//! Frames are returned as opaque Opus packets; nothing is decoded here.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::error::DecodeError;

/// Frame duration assumed when a stream carries no metadata.
pub const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(20);

/// Samples per 20ms Opus frame at 48kHz.
const SAMPLES_PER_FRAME: i64 = 960;

/// Self-description written at the head of a DCA stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    #[serde(default)]
    pub origin: Option<OriginMetadata>,
    #[serde(default)]
    pub opus: Option<OpusMetadata>,
}

/// Where the audio came from before encoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OriginMetadata {
    #[serde(default)]
    pub source: String,
    #[serde(rename = "abr", default)]
    pub bitrate: i64,
    #[serde(default)]
    pub channels: i64,
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub url: String,
}

/// Opus encoder profile used for the frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpusMetadata {
    #[serde(rename = "abr", default)]
    pub bitrate: i64,
    #[serde(default)]
    pub sample_rate: i64,
    #[serde(rename = "mode", default)]
    pub application: String,
    #[serde(default)]
    pub frame_size: i64,
    #[serde(default)]
    pub channels: i64,
    #[serde(default)]
    pub vbr: bool,
}

pub struct DcaDecoder<R> {
    reader: Option<R>,
    first_frame_processed: bool,
    header: Option<[u8; 4]>,
    metadata: Option<StreamMetadata>,
    corrupted: Option<i16>,
}

impl<R> DcaDecoder<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            first_frame_processed: false,
            header: None,
            metadata: None,
            corrupted: None,
        }
    }

    /// Decoder for legacy streams that start directly with frames.
    pub fn without_header(reader: R) -> Self {
        Self {
            first_frame_processed: true,
            ..Self::new(reader)
        }
    }

    /// Reads the magic header and the metadata block.
    ///
    /// Called implicitly by the first [`next_frame`](Self::next_frame); an
    /// explicit call is only valid before that and only once.
    pub async fn read_metadata(&mut self) -> Result<(), DecodeError> {
        if self.first_frame_processed {
            return Err(DecodeError::NotFirstFrame);
        }
        let reader = self.reader.as_mut().ok_or(DecodeError::DecoderClosed)?;
        self.first_frame_processed = true;

        let mut header = [0u8; 4];
        read_or_end(reader.read_exact(&mut header).await)?;
        self.header = Some(header);

        let len = read_or_end(reader.read_i32_le().await)?;
        if len <= 0 {
            return Err(DecodeError::InvalidMetadata);
        }

        // Grows with the bytes actually read, not with the declared length.
        let mut buf = Vec::new();
        reader.take(len as u64).read_to_end(&mut buf).await?;
        if buf.len() != len as usize {
            return Err(DecodeError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("metadata truncada: {} de {} bytes", buf.len(), len),
            )));
        }
        let metadata: StreamMetadata = serde_json::from_slice(&buf)?;
        debug!(
            "DCA metadata: {} bytes, opus profile {:?}",
            len,
            metadata.opus.as_ref().map(|o| (o.sample_rate, o.channels, o.frame_size))
        );
        self.metadata = Some(metadata);

        Ok(())
    }

    /// Returns the next opaque frame, or `None` once the stream is exhausted.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>, DecodeError> {
        if self.reader.is_none() {
            return Err(DecodeError::DecoderClosed);
        }
        if let Some(size) = self.corrupted {
            return Err(DecodeError::NegativeFrameSize(size));
        }

        if !self.first_frame_processed {
            match self.read_metadata().await {
                Ok(()) => {}
                Err(DecodeError::EndOfStream) => return Ok(None),
                Err(e) => return Err(e),
            }
        }

        let reader = self.reader.as_mut().ok_or(DecodeError::DecoderClosed)?;
        let size = match reader.read_i16_le().await {
            Ok(size) => size,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if size < 0 {
            self.corrupted = Some(size);
            return Err(DecodeError::NegativeFrameSize(size));
        }

        let mut frame = vec![0u8; size as usize];
        reader.read_exact(&mut frame).await?;
        Ok(Some(Bytes::from(frame)))
    }

    /// Releases the underlying reader. Idempotent.
    pub fn close(&mut self) -> Result<(), DecodeError> {
        if self.reader.take().is_some() {
            debug!("DCA decoder closed");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    pub fn header(&self) -> Option<[u8; 4]> {
        self.header
    }

    pub fn metadata(&self) -> Option<&StreamMetadata> {
        self.metadata.as_ref()
    }

    /// Duration of one frame: `(frame_size / channels / 960) * 20` ms in
    /// integer arithmetic when an Opus profile is present, 20ms otherwise.
    ///
    /// The integer formula matches what existing encoders and players
    /// compute, so it can legitimately be zero.
    pub fn frame_duration(&self) -> Duration {
        match self.metadata.as_ref().and_then(|m| m.opus.as_ref()) {
            Some(opus) if opus.channels > 0 => {
                let ms = ((opus.frame_size / opus.channels) / SAMPLES_PER_FRAME) * 20;
                Duration::from_millis(ms.max(0) as u64)
            }
            _ => DEFAULT_FRAME_DURATION,
        }
    }
}

fn read_or_end<T>(result: std::io::Result<T>) -> Result<T, DecodeError> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(DecodeError::EndOfStream),
        Err(e) => Err(e.into()),
    }
}
