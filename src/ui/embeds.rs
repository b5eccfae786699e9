use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::queue::PlayedTrack;

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
}

const STANDARD_FOOTER: &str = "🎵 Guild Jukebox";
const PROGRESS_SEGMENTS: usize = 20;

/// Crea el embed de "Reproduciendo Ahora" con barra de progreso
pub fn now_playing_embed(track: &PlayedTrack) -> CreateEmbed {
    let total = track.track.duration();
    let position = track.absolute_position();

    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", track.title()))
        .color(if position.is_zero() {
            colors::SUCCESS_GREEN
        } else {
            colors::MUSIC_PURPLE
        })
        .field("⏱️ Progreso", progress_line(position, total), false)
        .field("👤 Solicitado por", format!("<@{}>", track.requester.id), true)
        .field("🔗 Fuente", track.track.source.as_str(), true);

    if let Some(thumbnail) = &track.track.thumbnail_url {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// `1:05 [████▒▒▒…] 3:20`, or just the position for unknown lengths
pub fn progress_line(position: Duration, total: Duration) -> String {
    if total.is_zero() {
        return format!("{} / 🔴 En vivo", format_duration(position));
    }
    format!(
        "{} {} {}",
        format_duration(position),
        progress_bar(position, total),
        format_duration(total)
    )
}

/// Crea una barra visual de progreso
pub fn progress_bar(position: Duration, total: Duration) -> String {
    let ratio = if total.is_zero() {
        0.0
    } else {
        (position.as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0)
    };
    let filled = (ratio * PROGRESS_SEGMENTS as f64).round() as usize;
    let empty = PROGRESS_SEGMENTS - filled;

    let bar = "█".repeat(filled) + &"▒".repeat(empty);
    format!("`[{}]`", bar)
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Texto plano de estado, usado por el notificador de logs
pub fn status_line(track: &PlayedTrack) -> String {
    format!(
        "{} - {} (pedido por {})",
        track.title(),
        progress_line(track.absolute_position(), track.track.duration()),
        track.requester.name
    )
}
