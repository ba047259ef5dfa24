use log::{debug, info};
use shared::GamePhase;
use thiserror::Error;

/// Events that move the game phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTrigger {
    LoadingFinished,
    SessionJoined,
    /// Whether every player in the lobby has signaled ready.
    ReadinessChanged { all_ready: bool },
    GameStarted,
    SessionEnded,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot apply {trigger:?} while in {from}")]
pub struct InvalidTransition {
    pub from: GamePhase,
    pub trigger: PhaseTrigger,
}

/// Single owner of the game phase and the current game mode.
///
/// ```text
/// Loading -> MainMenu -> LobbyNotReady <-> LobbyIsReady -> InGame
///               ^                                            |
///               +--------------- SessionEnded ---------------+
/// ```
#[derive(Debug, Clone)]
pub struct GameStateMachine {
    phase: GamePhase,
    game_mode: String,
}

impl GameStateMachine {
    pub fn new(default_game_mode: impl Into<String>) -> Self {
        Self {
            phase: GamePhase::Loading,
            game_mode: default_game_mode.into(),
        }
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn game_mode(&self) -> &str {
        &self.game_mode
    }

    pub fn set_game_mode(&mut self, game_mode: impl Into<String>) {
        self.game_mode = game_mode.into();
    }

    /// Applies `trigger`, returning the new phase.
    pub fn apply(&mut self, trigger: PhaseTrigger) -> Result<GamePhase, InvalidTransition> {
        let next = Self::next_phase(self.phase, trigger).ok_or(InvalidTransition {
            from: self.phase,
            trigger,
        })?;

        if next != self.phase {
            info!("Game phase {} -> {}", self.phase, next);
        } else {
            debug!("Game phase stays {} on {:?}", self.phase, trigger);
        }
        self.phase = next;
        Ok(next)
    }

    fn next_phase(from: GamePhase, trigger: PhaseTrigger) -> Option<GamePhase> {
        use GamePhase::*;
        use PhaseTrigger::*;

        match (from, trigger) {
            (_, SessionEnded) => Some(MainMenu),
            (Loading, LoadingFinished) => Some(MainMenu),
            (Loading | MainMenu, SessionJoined) => Some(LobbyNotReady),
            (LobbyNotReady | LobbyIsReady, ReadinessChanged { all_ready: true }) => {
                Some(LobbyIsReady)
            }
            (LobbyNotReady | LobbyIsReady, ReadinessChanged { all_ready: false }) => {
                Some(LobbyNotReady)
            }
            (LobbyNotReady | LobbyIsReady | InGame, GameStarted) => Some(InGame),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_in(phase: GamePhase) -> GameStateMachine {
        let mut machine = GameStateMachine::new("classic");
        machine.phase = phase;
        machine
    }

    #[test]
    fn test_starts_loading() {
        let machine = GameStateMachine::new("classic");
        assert_eq!(machine.phase(), GamePhase::Loading);
        assert_eq!(machine.game_mode(), "classic");
    }

    #[test]
    fn test_full_lifecycle() {
        let mut machine = GameStateMachine::new("classic");

        assert_eq!(machine.apply(PhaseTrigger::LoadingFinished), Ok(GamePhase::MainMenu));
        assert_eq!(machine.apply(PhaseTrigger::SessionJoined), Ok(GamePhase::LobbyNotReady));
        assert_eq!(
            machine.apply(PhaseTrigger::ReadinessChanged { all_ready: true }),
            Ok(GamePhase::LobbyIsReady)
        );
        assert_eq!(
            machine.apply(PhaseTrigger::ReadinessChanged { all_ready: false }),
            Ok(GamePhase::LobbyNotReady)
        );
        assert_eq!(machine.apply(PhaseTrigger::GameStarted), Ok(GamePhase::InGame));
        assert_eq!(machine.apply(PhaseTrigger::SessionEnded), Ok(GamePhase::MainMenu));
    }

    #[test]
    fn test_loading_finishes_only_once() {
        let mut machine = machine_in(GamePhase::MainMenu);
        let err = machine.apply(PhaseTrigger::LoadingFinished).unwrap_err();
        assert_eq!(err.from, GamePhase::MainMenu);
        assert_eq!(machine.phase(), GamePhase::MainMenu);
    }

    #[test]
    fn test_game_start_from_ready_lobby() {
        let mut machine = machine_in(GamePhase::LobbyIsReady);
        assert_eq!(machine.apply(PhaseTrigger::GameStarted), Ok(GamePhase::InGame));
    }

    #[test]
    fn test_game_start_in_game_is_resync() {
        let mut machine = machine_in(GamePhase::InGame);
        assert_eq!(machine.apply(PhaseTrigger::GameStarted), Ok(GamePhase::InGame));
    }

    #[test]
    fn test_game_start_rejected_outside_session() {
        for phase in [GamePhase::Loading, GamePhase::MainMenu] {
            let mut machine = machine_in(phase);
            let err = machine.apply(PhaseTrigger::GameStarted).unwrap_err();
            assert_eq!(err.trigger, PhaseTrigger::GameStarted);
            assert_eq!(machine.phase(), phase);
        }
    }

    #[test]
    fn test_readiness_ignored_in_game() {
        let mut machine = machine_in(GamePhase::InGame);
        assert!(machine
            .apply(PhaseTrigger::ReadinessChanged { all_ready: true })
            .is_err());
        assert_eq!(machine.phase(), GamePhase::InGame);
    }

    #[test]
    fn test_session_end_from_every_phase() {
        for phase in [
            GamePhase::Loading,
            GamePhase::MainMenu,
            GamePhase::LobbyNotReady,
            GamePhase::LobbyIsReady,
            GamePhase::InGame,
        ] {
            let mut machine = machine_in(phase);
            assert_eq!(machine.apply(PhaseTrigger::SessionEnded), Ok(GamePhase::MainMenu));
        }
    }

    #[test]
    fn test_game_mode_is_kept() {
        let mut machine = GameStateMachine::new("classic");
        machine.set_game_mode("survival");
        machine.apply(PhaseTrigger::SessionEnded).unwrap();
        assert_eq!(machine.game_mode(), "survival");
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = InvalidTransition {
            from: GamePhase::MainMenu,
            trigger: PhaseTrigger::GameStarted,
        };
        assert_eq!(err.to_string(), "cannot apply GameStarted while in main menu");
    }
}
