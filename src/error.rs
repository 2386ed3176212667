//! Error taxonomy for the playback engine.
//!
//! Every variant's `Display` text is what the requester sees in the
//! explanatory reply, so keep them short and user-facing.

use crate::audio::state_machine::PlaybackState;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// `pending + playlist` already reached the configured maximum
    #[error("Maximum playlist size reached ({max}). Please *skip* the current song or *clear* the list to add more.")]
    CapacityExceeded { max: usize },

    /// Resolved media is longer than the allowed maximum (seconds)
    #[error("**{title}** is too long ({actual}s, the limit is {allowed}s). Try another query.")]
    DurationExceeded {
        title: String,
        actual: u64,
        allowed: u64,
    },

    /// Resolver / catalog failure (network, not found, parse error)
    #[error("There was an error downloading **{0}**. Try another query.")]
    Resolution(String),

    /// The voice output could not start or continue a stream
    #[error("Playback failed: {0}")]
    Playback(String),

    #[error("Invalid transition {from} -> {to}")]
    StateViolation {
        from: PlaybackState,
        to: PlaybackState,
    },

    #[error("You are not connected to a voice channel!")]
    NotInVoice,

    #[error("Missing query, use the command like: play https://www.youtube.com/watch?v=dQw4w9WgXcQ")]
    MissingQuery,

    #[error("Youtube playlists not yet supported. Try a spotify link instead.")]
    UnsupportedPlaylist,

    #[error("*Loop* is **ON**. Please disable *Loop* before skipping.")]
    LoopActive,

    #[error("Nothing is playing right now!")]
    NotPlaying,

    #[error("Playback is not paused!")]
    NotPaused,

    #[error("No lyrics available for **{0}**. Try using a spotify link instead.")]
    NoLyrics(String),
}

impl EngineError {
    /// Failures caused by a single queued item, as opposed to command misuse.
    pub fn is_item_failure(&self) -> bool {
        matches!(
            self,
            EngineError::DurationExceeded { .. }
                | EngineError::Resolution(_)
                | EngineError::Playback(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_message_reports_both_limits() {
        let err = EngineError::DurationExceeded {
            title: "Long Mix".into(),
            actual: 2000,
            allowed: 1200,
        };
        let text = err.to_string();
        assert!(text.contains("2000s"));
        assert!(text.contains("1200s"));
        assert!(err.is_item_failure());
    }

    #[test]
    fn command_errors_are_not_item_failures() {
        assert!(!EngineError::NotInVoice.is_item_failure());
        assert!(!EngineError::CapacityExceeded { max: 5 }.is_item_failure());
    }
}
