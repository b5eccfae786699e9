use anyhow::{bail, Context, Result};
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use guild_jukebox::{
    audio::{
        queue::{Requester, SourcePlatform, Track},
        transport::{PacedTransport, VoiceTransport},
        GuildPlayer, GuildRegistry, PlayerState, RegistryServices,
    },
    config::Config,
    sources::{smart_source::SourceKind, SmartSource},
    storage::JsonStorageProvider,
    ui::{DiscordStatusNotifier, LogStatusNotifier, StatusNotifier},
};

const USAGE: &str =
    "uso: guild-jukebox <guild-id> <voice-channel-id> [--text-channel=<id>] <archivo.dca>...";

fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .context("No se pudo crear el runtime")?;

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return runtime.block_on(health_check(&config));
    }

    let args = parse_args(std::env::args().skip(1))?;
    runtime.block_on(run(config, args))
}

#[derive(Debug, PartialEq)]
struct Args {
    guild_id: GuildId,
    voice_channel: ChannelId,
    /// Defaults to the voice channel's own chat
    text_channel: ChannelId,
    files: Vec<String>,
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Args> {
    let mut positional = Vec::new();
    let mut text_channel = None;

    for arg in args {
        match arg.strip_prefix("--text-channel=") {
            Some(id) => text_channel = Some(ChannelId::new(parse_id(id)?)),
            None => positional.push(arg),
        }
    }

    if positional.len() < 3 {
        bail!(USAGE);
    }
    let files = positional.split_off(2);
    let guild_id = GuildId::new(parse_id(&positional[0])?);
    let voice_channel = ChannelId::new(parse_id(&positional[1])?);

    Ok(Args {
        guild_id,
        voice_channel,
        text_channel: text_channel.unwrap_or(voice_channel),
        files,
    })
}

fn parse_id(raw: &str) -> Result<u64> {
    let id: u64 = raw.parse().with_context(|| format!("ID inválido: {}", raw))?;
    if id == 0 {
        bail!("ID inválido: 0");
    }
    Ok(id)
}

async fn run(config: Config, args: Args) -> Result<()> {
    let notifier: Arc<dyn StatusNotifier> = match &config.discord_token {
        Some(token) => {
            info!("💬 Estado publicado en Discord");
            Arc::new(DiscordStatusNotifier::from_token(token))
        }
        None => Arc::new(LogStatusNotifier::new()),
    };

    let frame_pacing = config.frame_pacing;
    let transports = move |guild_id: GuildId| -> Arc<dyn VoiceTransport> {
        Arc::new(PacedTransport::new(guild_id, frame_pacing))
    };

    let registry = GuildRegistry::new(
        RegistryServices {
            transports: Arc::new(transports),
            source: Arc::new(SmartSource::new(config.audio_dir.clone())?),
            notifier,
            storage: Arc::new(JsonStorageProvider::new(config.data_dir.clone()).await?),
        },
        config.player_settings(),
    );

    let player = registry.get_or_create(args.guild_id).await?;
    let requester = Requester::new(UserId::new(1), "cli");
    for file in &args.files {
        let track = Track::new(track_title(file), file.clone(), platform_of(file));
        player
            .add_song(
                track,
                requester.clone(),
                Some(args.text_channel),
                Some(args.voice_channel),
            )
            .await?;
    }

    tokio::select! {
        _ = wait_drained(&player) => info!("✅ Cola terminada"),
        signal = tokio::signal::ctrl_c() => {
            signal.context("Error al registrar Ctrl+C")?;
            info!("⚠️ Señal de shutdown recibida, cerrando...");
        }
    }

    registry.shutdown().await;
    Ok(())
}

fn track_title(file_ref: &str) -> String {
    Path::new(file_ref)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_ref.to_string())
}

fn platform_of(file_ref: &str) -> SourcePlatform {
    match SmartSource::classify(file_ref) {
        SourceKind::Http => SourcePlatform::Direct,
        SourceKind::Local => SourcePlatform::Local,
    }
}

/// Resolves once the player stayed idle with an empty playlist for two
/// consecutive checks; a track being handed to the controller is idle for
/// an instant.
async fn wait_drained(player: &GuildPlayer) {
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut idle_checks = 0;
    loop {
        ticker.tick().await;
        if player.state() == PlayerState::Idle && player.get_playlist().is_empty() {
            idle_checks += 1;
            if idle_checks >= 2 {
                return;
            }
        } else {
            idle_checks = 0;
        }
    }
}

async fn health_check(config: &Config) -> Result<()> {
    tokio::fs::create_dir_all(config.data_dir.join("servers"))
        .await
        .with_context(|| format!("DATA_DIR no escribible: {}", config.data_dir.display()))?;

    let audio_dir = tokio::fs::metadata(&config.audio_dir)
        .await
        .with_context(|| format!("AUDIO_DIR no encontrado: {}", config.audio_dir.display()))?;
    if !audio_dir.is_dir() {
        bail!("AUDIO_DIR no es un directorio: {}", config.audio_dir.display());
    }

    println!("OK");
    Ok(())
}
