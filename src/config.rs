use anyhow::{Context, Result};
use std::{path::PathBuf, str::FromStr, time::Duration};

/// Process configuration, read from the environment (and `.env`)
#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Playback limits
    pub max_playlist_size: usize,
    pub max_song_duration: u64, // seconds
    pub idle_timeout: u64,      // seconds

    // Driver periods
    pub tick_interval: u64,  // seconds
    pub drain_interval: u64, // seconds

    // Paths
    pub download_dir: PathBuf,
    pub data_dir: PathBuf,

    // yt-dlp extraction
    pub audio_format: String,
    pub audio_quality: String,

    // Optional APIs
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
    pub genius_api_key: Option<String>,

    // UI
    pub playlist_preview_limit: usize,
}

/// The subset of [`Config`] a playback session needs
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub max_playlist_size: usize,
    pub max_song_duration: u64,
    pub idle_timeout: Duration,
    pub tick_interval: Duration,
    pub drain_interval: Duration,
    pub download_dir: PathBuf,
    pub audio_extensions: Vec<String>,
    pub playlist_preview_limit: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        std::fs::create_dir_all(&config.download_dir)?;
        std::fs::create_dir_all(&config.data_dir)?;

        config.validate()?;
        Ok(config)
    }

    /// Builds a config from any key lookup, applying defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            discord_token: optional("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            command_prefix: optional("COMMAND_PREFIX").unwrap_or(defaults.command_prefix),

            max_playlist_size: parse_or(&lookup, "MAX_PLAYLIST_SIZE", defaults.max_playlist_size)?,
            max_song_duration: parse_or(&lookup, "MAX_SONG_DURATION", defaults.max_song_duration)?,
            idle_timeout: parse_or(&lookup, "IDLE_TIMEOUT", defaults.idle_timeout)?,

            tick_interval: parse_or(&lookup, "TICK_INTERVAL", defaults.tick_interval)?,
            drain_interval: parse_or(&lookup, "DRAIN_INTERVAL", defaults.drain_interval)?,

            download_dir: optional("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            data_dir: optional("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),

            audio_format: optional("AUDIO_FORMAT").unwrap_or(defaults.audio_format),
            audio_quality: optional("AUDIO_QUALITY").unwrap_or(defaults.audio_quality),

            spotify_client_id: optional("SPOTIFY_CLIENT_ID"),
            spotify_client_secret: optional("SPOTIFY_CLIENT_SECRET"),
            genius_api_key: optional("GENIUS_API_KEY"),

            playlist_preview_limit: parse_or(
                &lookup,
                "PLAYLIST_PREVIEW_LIMIT",
                defaults.playlist_preview_limit,
            )?,
        })
    }

    /// Sanity checks on values that would stall or break the engine
    pub fn validate(&self) -> Result<()> {
        if self.command_prefix.trim().is_empty() {
            anyhow::bail!("Command prefix cannot be empty");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.max_song_duration == 0 {
            anyhow::bail!("Max song duration must be greater than 0");
        }

        if self.idle_timeout == 0 {
            anyhow::bail!("Idle timeout must be greater than 0");
        }

        if self.tick_interval == 0 || self.drain_interval == 0 {
            anyhow::bail!("Tick and drain intervals must be greater than 0");
        }

        if self.spotify_client_id.is_some() != self.spotify_client_secret.is_some() {
            anyhow::bail!("SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET must be set together");
        }

        Ok(())
    }

    /// Secret-free summary for the startup log
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Prefix: {}\n  \
            Limits: {} songs, {} max duration, {} idle timeout\n  \
            Drivers: tick every {}, download every {}\n  \
            Audio: {} @ {} in {}\n  \
            APIs: Spotify={}, Genius={}",
            self.command_prefix,
            self.max_playlist_size,
            seconds(self.max_song_duration),
            seconds(self.idle_timeout),
            seconds(self.tick_interval),
            seconds(self.drain_interval),
            self.audio_format,
            self.audio_quality,
            self.download_dir.display(),
            self.spotify_client_id.is_some(),
            self.genius_api_key.is_some()
        )
    }

    pub fn engine(&self) -> EngineConfig {
        let mut audio_extensions = vec![self.audio_format.clone()];
        if self.audio_format != "m4a" {
            audio_extensions.push("m4a".to_string());
        }

        EngineConfig {
            max_playlist_size: self.max_playlist_size,
            max_song_duration: self.max_song_duration,
            idle_timeout: Duration::from_secs(self.idle_timeout),
            tick_interval: Duration::from_secs(self.tick_interval),
            drain_interval: Duration::from_secs(self.drain_interval),
            download_dir: self.download_dir.clone(),
            audio_extensions,
            playlist_preview_limit: self.playlist_preview_limit,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            command_prefix: "!".to_string(),

            max_playlist_size: 25,
            max_song_duration: 1200, // 20 minutes
            idle_timeout: 150,

            tick_interval: 2,
            drain_interval: 30,

            download_dir: "./downloads".into(),
            data_dir: "./data".into(),

            audio_format: "mp3".to_string(),
            audio_quality: "192".to_string(),

            spotify_client_id: None,
            spotify_client_secret: None,
            genius_api_key: None,

            playlist_preview_limit: 20,
        }
    }
}

fn seconds(secs: u64) -> humantime::FormattedDuration {
    humantime::format_duration(Duration::from_secs(secs))
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key).filter(|value| !value.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", key, value)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_token_is_set() {
        let config = Config::from_lookup(lookup(&[("DISCORD_TOKEN", "token")])).unwrap();
        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.max_playlist_size, 25);
        assert_eq!(config.max_song_duration, 1200);

        let engine = config.engine();
        assert_eq!(engine.idle_timeout, Duration::from_secs(150));
        assert_eq!(engine.tick_interval, Duration::from_secs(2));
        assert_eq!(engine.drain_interval, Duration::from_secs(30));
        assert_eq!(engine.audio_extensions, vec!["mp3", "m4a"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_token_is_an_error() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "token"),
            ("COMMAND_PREFIX", "?"),
            ("MAX_PLAYLIST_SIZE", " 5 "),
            ("GENIUS_API_KEY", "key"),
        ]))
        .unwrap();
        assert_eq!(config.command_prefix, "?");
        assert_eq!(config.max_playlist_size, 5);
        assert_eq!(config.genius_api_key.as_deref(), Some("key"));
    }

    #[test]
    fn garbage_numbers_are_rejected() {
        let result = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "token"),
            ("IDLE_TIMEOUT", "soon"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn validation_catches_zero_limits_and_half_spotify_credentials() {
        let mut config = Config::default();
        config.max_playlist_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.spotify_client_id = Some("id".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn summary_hides_the_token() {
        let config = Config::from_lookup(lookup(&[("DISCORD_TOKEN", "super-secret")])).unwrap();
        let summary = config.summary();
        assert!(!summary.contains("super-secret"));
        assert!(summary.contains("20m max duration"), "{}", summary);
        assert!(summary.contains("2m 30s idle timeout"), "{}", summary);
    }
}
