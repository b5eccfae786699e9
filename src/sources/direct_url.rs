use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use std::time::Duration;
use tokio_util::io::StreamReader;
use tracing::debug;

use super::{AudioSource, AudioStream};

/// Streams DCA files over HTTP(S).
#[derive(Debug, Clone)]
pub struct DirectUrlClient {
    client: reqwest::Client,
}

impl DirectUrlClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("No se pudo crear el cliente HTTP")?;
        Ok(Self { client })
    }

    pub fn is_valid_url(&self, url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }
}

#[async_trait]
impl AudioSource for DirectUrlClient {
    async fn get_audio(&self, file_ref: &str) -> Result<AudioStream> {
        let response = self
            .client
            .get(file_ref)
            .send()
            .await
            .with_context(|| format!("Error al solicitar {}", file_ref))?
            .error_for_status()
            .with_context(|| format!("Respuesta inválida para {}", file_ref))?;

        debug!(
            "🌐 Stream HTTP abierto: {} ({:?} bytes)",
            file_ref,
            response.content_length()
        );

        let body = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::new(StreamReader::new(Box::pin(body))))
    }

    fn source_name(&self) -> &'static str {
        "direct"
    }
}
