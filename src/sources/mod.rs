//! # Audio Sources
//!
//! Resolve a track's file reference into a readable byte stream of DCA data.
//!
//! - [`LocalFileClient`]: paths relative to the configured audio directory
//! - [`DirectUrlClient`]: `http(s)://` references streamed with reqwest
//! - [`SmartSource`]: picks one of the above from the reference itself

pub mod direct_url;
pub mod local_file;
pub mod smart_source;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;

pub use direct_url::DirectUrlClient;
pub use local_file::LocalFileClient;
pub use smart_source::SmartSource;

/// Byte stream handed to the frame decoder. Dropping it releases the
/// underlying file or connection.
pub type AudioStream = Box<dyn AsyncRead + Send + Unpin>;

/// Trait común para todas las fuentes de audio
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Abre el stream de audio para una referencia de archivo
    async fn get_audio(&self, file_ref: &str) -> Result<AudioStream>;

    /// Nombre de la fuente
    fn source_name(&self) -> &'static str;
}
