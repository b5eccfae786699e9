use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;
use url::Url;

use super::{AudioSource, AudioStream, DirectUrlClient, LocalFileClient};

/// Which backend serves a file reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Local,
    Http,
}

/// Dispatches file references to the local or HTTP client.
pub struct SmartSource {
    local: LocalFileClient,
    http: DirectUrlClient,
}

impl SmartSource {
    pub fn new(audio_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            local: LocalFileClient::new(audio_dir),
            http: DirectUrlClient::new()?,
        })
    }

    pub fn classify(file_ref: &str) -> SourceKind {
        match Url::parse(file_ref) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => SourceKind::Http,
            _ => SourceKind::Local,
        }
    }
}

fn file_url_path(file_ref: &str) -> Option<PathBuf> {
    Url::parse(file_ref)
        .ok()
        .filter(|url| url.scheme() == "file")
        .and_then(|url| url.to_file_path().ok())
}

#[async_trait]
impl AudioSource for SmartSource {
    async fn get_audio(&self, file_ref: &str) -> Result<AudioStream> {
        let kind = Self::classify(file_ref);
        debug!("🎯 Fuente seleccionada para {}: {:?}", file_ref, kind);
        match kind {
            SourceKind::Http => self.http.get_audio(file_ref).await,
            SourceKind::Local => match file_url_path(file_ref) {
                Some(path) => self.local.get_audio(&path.to_string_lossy()).await,
                None => self.local.get_audio(file_ref).await,
            },
        }
    }

    fn source_name(&self) -> &'static str {
        "smart"
    }
}
