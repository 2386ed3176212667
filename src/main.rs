use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info};

use voice_dj::{
    audio::{player::SongbirdGateway, Collaborators, SessionRegistry},
    bot::VoiceDjBot,
    config::Config,
    sources::{CatalogExpander, GeniusLyrics, LyricsLookup, SpotifyCatalog, YtDlpResolver},
    storage::JsonStatistics,
    ui::DiscordNotifier,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("voice_dj=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    info!("🎵 Starting Voice DJ v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let statistics = Arc::new(JsonStatistics::open(config.data_dir.clone()).await?);

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = VoiceDjBot::new(config.clone(), statistics.clone());

    let songbird = Songbird::serenity();
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird.clone())
        .await?;

    let catalog: Option<Arc<dyn CatalogExpander>> = match (
        config.spotify_client_id.clone(),
        config.spotify_client_secret.clone(),
    ) {
        (Some(id), Some(secret)) => {
            info!("🎧 Spotify links enabled");
            Some(Arc::new(SpotifyCatalog::new(id, secret)) as Arc<dyn CatalogExpander>)
        }
        _ => None,
    };

    let lyrics: Option<Arc<dyn LyricsLookup>> = config.genius_api_key.clone().map(|key| {
        info!("📝 Genius lyrics enabled");
        Arc::new(GeniusLyrics::new(key)) as Arc<dyn LyricsLookup>
    });

    let collaborators = Collaborators {
        resolver: Arc::new(YtDlpResolver::new(
            config.audio_format.clone(),
            config.audio_quality.clone(),
        )),
        lyrics,
        catalog,
        gateway: Arc::new(SongbirdGateway::new(songbird, client.cache.clone())),
        notifier: Arc::new(DiscordNotifier::new(client.http.clone())),
        statistics,
        resolution_workers: Arc::new(Semaphore::new(1)),
    };

    {
        let mut data = client.data.write().await;
        data.insert::<SessionRegistry>(Arc::new(SessionRegistry::new(
            config.engine(),
            collaborators,
        )));
    }

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Could not register the Ctrl+C handler");
        info!("⚠️ Shutdown signal received, exiting...");
        std::process::exit(0);
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

/// `--health-check`: both external tools must be on the path
async fn health_check() -> Result<()> {
    let yt_dlp = async_process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Missing dependencies: yt-dlp and ffmpeg are required");
    }
}
