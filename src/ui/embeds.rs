use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};

use super::views::{NowPlayingView, PlaylistView};
use crate::storage::{PlayCount, RequestCount};

/// Standard colour palette for the bot
pub mod colors {
    use serenity::all::Colour;

    pub const NOW_PLAYING_BLUE: Colour = Colour::from_rgb(52, 152, 219);
    pub const PLAYLIST_TEAL: Colour = Colour::from_rgb(26, 188, 156);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 Voice DJ";

/// Now-playing message, re-rendered on every tick while the song plays
pub fn now_playing_embed(view: &NowPlayingView) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title(&view.title)
        .color(colors::NOW_PLAYING_BLUE)
        .field(&view.uploader, &view.details, false)
        .field("Playing", &view.progress, false)
        .footer(CreateEmbedFooter::new(view.footer()));

    if !view.url.is_empty() {
        embed = embed.url(&view.url);
    }
    if let Some(thumbnail) = &view.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    embed
}

pub fn playlist_embed(view: &PlaylistView) -> CreateEmbed {
    let mut modes = Vec::new();
    if view.loop_enabled {
        modes.push("🔁 Loop");
    }
    if view.shuffle {
        modes.push("🔀 Shuffle");
    }

    let footer = if modes.is_empty() {
        STANDARD_FOOTER.to_string()
    } else {
        format!("{} • {}", modes.join(" • "), STANDARD_FOOTER)
    };

    let color = if view.titles.is_empty() && view.pending_downloads == 0 {
        colors::NEUTRAL_GRAY
    } else {
        colors::PLAYLIST_TEAL
    };

    CreateEmbed::default()
        .title("🎵 Current Playlist 🎵")
        .description(view.description())
        .color(color)
        .footer(CreateEmbedFooter::new(footer))
        .timestamp(Timestamp::now())
}

pub fn most_played_embed(entries: &[PlayCount]) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("Top 5 Most Played Songs 🎵")
        .color(colors::NOW_PLAYING_BLUE);

    if entries.is_empty() {
        return embed.description("Nothing has been played yet.");
    }

    for (index, entry) in entries.iter().enumerate() {
        embed = embed.field(
            format!("{}.", index + 1),
            format!(
                "[{}]({}) played **{}** time{}",
                entry.title,
                entry.url,
                entry.plays,
                plural(entry.plays)
            ),
            false,
        );
    }

    embed
}

pub fn most_requested_embed(entries: &[RequestCount]) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("Top 5 users with most requested songs 🎵")
        .color(colors::NOW_PLAYING_BLUE);

    if entries.is_empty() {
        return embed.description("Nobody has requested a song yet.");
    }

    for (index, entry) in entries.iter().enumerate() {
        embed = embed.field(
            format!("{}.", index + 1),
            format!(
                "<@{}> **{}** song{} requested",
                entry.user_id,
                entry.requests,
                plural(entry.requests)
            ),
            false,
        );
    }

    embed
}

fn plural(count: u64) -> &'static str {
    if count > 1 {
        "s"
    } else {
        ""
    }
}
