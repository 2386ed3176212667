use parking_lot::Mutex;
use std::fmt;
use tracing::{debug, info, warn};

use super::session::Session;
use crate::error::{EngineError, EngineResult};

/// Authoritative playback state of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    Disconnected,
    Stopped,
    Playing,
    Paused,
    Resumed,
}

impl PlaybackState {
    pub const ALL: [PlaybackState; 5] = [
        PlaybackState::Disconnected,
        PlaybackState::Stopped,
        PlaybackState::Playing,
        PlaybackState::Paused,
        PlaybackState::Resumed,
    ];

    /// The closed transition table
    pub fn can_transition_to(self, next: PlaybackState) -> bool {
        use PlaybackState::*;
        matches!(
            (self, next),
            (Disconnected, Stopped)
                | (Stopped, Playing)
                | (Stopped, Disconnected)
                | (Playing, Paused)
                | (Playing, Stopped)
                | (Paused, Resumed)
                | (Paused, Stopped)
                | (Resumed, Playing)
        )
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Disconnected => "DISCONNECTED",
            PlaybackState::Stopped => "STOPPED",
            PlaybackState::Playing => "PLAYING",
            PlaybackState::Paused => "PAUSED",
            PlaybackState::Resumed => "RESUMED",
        };
        f.write_str(name)
    }
}

/// Holds the session state and drives it one tick at a time.
///
/// Ticks never overlap: the session's ticker awaits each `tick` to
/// completion before scheduling the next one.
#[derive(Debug)]
pub struct StateMachine {
    state: Mutex<PlaybackState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlaybackState::Disconnected),
        }
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.lock()
    }

    /// Applies `next` if the table allows it. Rejected transitions are
    /// logged and leave the state untouched.
    pub fn transition_to(&self, next: PlaybackState) -> EngineResult<()> {
        let mut state = self.state.lock();
        let from = *state;

        if from.can_transition_to(next) {
            *state = next;
            info!("🔄 State {} -> {}", from, next);
            Ok(())
        } else {
            warn!("⚠️ Invalid transition attempted: {} -> {}", from, next);
            Err(EngineError::StateViolation { from, to: next })
        }
    }

    /// Applies `from -> next` only if the state is still `from`. Returns
    /// whether it was applied; a state that moved on is not an error.
    pub fn transition_from(&self, from: PlaybackState, next: PlaybackState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            debug!("State moved to {} before {} -> {}", *state, from, next);
            return false;
        }
        if !from.can_transition_to(next) {
            warn!("⚠️ Invalid transition attempted: {} -> {}", from, next);
            return false;
        }

        *state = next;
        info!("🔄 State {} -> {}", from, next);
        true
    }

    /// Follows legal edges until the session is disconnected
    pub fn walk_to_disconnected(&self) {
        loop {
            let next = match self.state() {
                PlaybackState::Disconnected => return,
                PlaybackState::Stopped => PlaybackState::Disconnected,
                PlaybackState::Playing | PlaybackState::Paused => PlaybackState::Stopped,
                PlaybackState::Resumed => PlaybackState::Playing,
            };
            let _ = self.transition_to(next);
        }
    }

    /// One pass of the driver.
    ///
    /// The per-state blocks run in sequence against the *current* state, so
    /// a song that finishes during the PLAYING block can be followed by the
    /// next one within the same tick.
    pub async fn tick(&self, session: &Session) {
        debug!("Tick for guild {} in state {}", session.guild_id(), self.state());

        if self.state() == PlaybackState::Disconnected {
            return;
        }

        if self.state() == PlaybackState::Playing {
            session.refresh_now_playing().await;

            // A pause landing mid-tick leaves the state PAUSED; the song is not over
            let idle = session.player().lock().await.idle().await;
            if idle && self.transition_from(PlaybackState::Playing, PlaybackState::Stopped) {
                session.finish_current().await;
            }
        }

        if self.state() == PlaybackState::Stopped {
            if session.has_next() {
                if session.play_next().await {
                    let _ = self.transition_to(PlaybackState::Playing);
                    session.on_song_started().await;
                }
            } else {
                let timed_out = session.player().lock().await.handle_idle().await;
                if timed_out {
                    info!("💤 Idle timeout reached in guild {}", session.guild_id());
                    session.teardown().await;
                }
            }
        }

        if self.state() == PlaybackState::Paused {
            let timed_out = {
                let mut player = session.player().lock().await;
                player.pause().await;
                player.handle_idle().await
            };
            if timed_out {
                info!("💤 Paused for too long in guild {}", session.guild_id());
                session.teardown().await;
            }
        }

        if self.state() == PlaybackState::Resumed {
            session.player().lock().await.resume().await;
            let _ = self.transition_to(PlaybackState::Playing);
        }

        if self.state() != PlaybackState::Disconnected && session.is_alone().await {
            info!("🚪 Alone in voice channel, leaving guild {}", session.guild_id());
            session.teardown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use PlaybackState::*;

    fn machine_in(state: PlaybackState) -> StateMachine {
        let machine = StateMachine::new();
        *machine.state.lock() = state;
        machine
    }

    #[test]
    fn only_declared_transitions_are_allowed() {
        let allowed: Vec<(PlaybackState, PlaybackState)> = PlaybackState::ALL
            .iter()
            .flat_map(|from| PlaybackState::ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();

        assert_eq!(
            allowed,
            vec![
                (Disconnected, Stopped),
                (Stopped, Disconnected),
                (Stopped, Playing),
                (Playing, Stopped),
                (Playing, Paused),
                (Paused, Stopped),
                (Paused, Resumed),
                (Resumed, Playing),
            ]
        );
    }

    #[test]
    fn illegal_transition_leaves_state_unchanged() {
        let machine = machine_in(Disconnected);
        assert_eq!(
            machine.transition_to(Playing),
            Err(EngineError::StateViolation {
                from: Disconnected,
                to: Playing
            })
        );
        assert_eq!(machine.state(), Disconnected);

        let machine = machine_in(Resumed);
        assert!(machine.transition_to(Paused).is_err());
        assert_eq!(machine.state(), Resumed);
    }

    #[test]
    fn legal_transition_is_applied() {
        let machine = StateMachine::new();
        machine.transition_to(Stopped).unwrap();
        machine.transition_to(Playing).unwrap();
        assert_eq!(machine.state(), Playing);
    }

    #[test]
    fn transition_from_requires_the_expected_state() {
        let machine = machine_in(Paused);
        assert!(!machine.transition_from(Playing, Stopped));
        assert_eq!(machine.state(), Paused);

        let machine = machine_in(Playing);
        assert!(machine.transition_from(Playing, Stopped));
        assert_eq!(machine.state(), Stopped);

        let machine = machine_in(Resumed);
        assert!(!machine.transition_from(Resumed, Stopped));
        assert_eq!(machine.state(), Resumed);
    }

    #[test]
    fn every_state_walks_down_to_disconnected() {
        for state in PlaybackState::ALL {
            let machine = machine_in(state);
            machine.walk_to_disconnected();
            assert_eq!(machine.state(), Disconnected, "starting from {}", state);
        }
    }
}
