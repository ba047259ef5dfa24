//! Decodes envelopes and hands each message to exactly one handler.
//!
//! The router holds no state of its own. It borrows the roster manager and
//! the game state machine from the session service for the duration of one
//! dispatch and reports what happened so the service can notify gameplay
//! collaborators and publish a new snapshot.

use crate::game::{GameStateMachine, PhaseTrigger};
use crate::roster::{RosterManager, UpsertOutcome};
use log::{debug, warn};
use shared::{Envelope, GameplayEvent, Message, MessageTag, ParticipantId};

/// Outcome of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    PlayerUpdated {
        player: ParticipantId,
        outcome: UpsertOutcome,
    },
    /// Readiness tracking is not wired to the lobby phase yet.
    ReadyIgnored { sender: ParticipantId, ready: bool },
    GameStarted { game_mode: String },
    /// `GameStart` arrived in a phase that cannot start a game.
    GameStartRejected,
    Gameplay {
        sender: ParticipantId,
        event: GameplayEvent,
        echoed: bool,
    },
    /// Undecodable envelope or a tag this build does not know.
    Dropped,
}

pub struct Router<'a> {
    roster: &'a mut RosterManager,
    game: &'a mut GameStateMachine,
    local_id: ParticipantId,
}

impl<'a> Router<'a> {
    pub fn new(
        roster: &'a mut RosterManager,
        game: &'a mut GameStateMachine,
        local_id: ParticipantId,
    ) -> Self {
        Self {
            roster,
            game,
            local_id,
        }
    }

    /// Routes `envelope` as if delivered by `sender`.
    ///
    /// `force_local` marks the loopback path used when a device handles its
    /// own outgoing message; the sender is then the local participant.
    pub fn dispatch(
        &mut self,
        envelope: &Envelope,
        sender: ParticipantId,
        force_local: bool,
    ) -> Routed {
        let message = match envelope.open() {
            Ok(message) => message,
            Err(e) if e.is_unknown_tag() => {
                debug!("Ignoring message with unknown tag {:?} from {}", envelope.tag, sender);
                return Routed::Dropped;
            }
            Err(e) => {
                debug!("Dropping undecodable message from {}: {}", sender, e);
                return Routed::Dropped;
            }
        };

        if force_local && sender != self.local_id {
            warn!("Local dispatch attributed to remote sender {}", sender);
        }

        match message {
            Message::PlayerUpdate(player) => {
                let outcome = self.roster.apply_player_update(player, sender);
                Routed::PlayerUpdated {
                    player: sender,
                    outcome,
                }
            }
            Message::PlayerReady(ready) => {
                debug!(
                    "{} from {} (ready={}) not wired to lobby readiness",
                    MessageTag::PlayerReady,
                    sender,
                    ready
                );
                Routed::ReadyIgnored { sender, ready }
            }
            Message::GameStart { game_mode } => match self.game.apply(PhaseTrigger::GameStarted) {
                Ok(_) => {
                    self.game.set_game_mode(game_mode.clone());
                    Routed::GameStarted { game_mode }
                }
                Err(e) => {
                    warn!("Ignoring game start '{}' from {}: {}", game_mode, sender, e);
                    Routed::GameStartRejected
                }
            },
            Message::GameplayEvent(event) => Routed::Gameplay {
                sender,
                event,
                echoed: force_local,
            },
        }
    }
}
