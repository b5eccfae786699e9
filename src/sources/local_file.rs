use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::{fs::File, io::BufReader};
use tracing::debug;

use super::{AudioSource, AudioStream};

/// Opens DCA files from the local audio directory.
#[derive(Debug, Clone)]
pub struct LocalFileClient {
    root: PathBuf,
}

impl LocalFileClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Relative references resolve against the root, absolute ones are kept.
    pub fn resolve(&self, file_ref: &str) -> PathBuf {
        let path = Path::new(file_ref);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[async_trait]
impl AudioSource for LocalFileClient {
    async fn get_audio(&self, file_ref: &str) -> Result<AudioStream> {
        let path = self.resolve(file_ref);
        let file = File::open(&path)
            .await
            .with_context(|| format!("No se pudo abrir {}", path.display()))?;
        debug!("📂 Abierto archivo de audio: {}", path.display());
        Ok(Box::new(BufReader::new(file)))
    }

    fn source_name(&self) -> &'static str {
        "local"
    }
}
