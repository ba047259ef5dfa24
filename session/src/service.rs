//! Session service: the single owner of roster, phase and session handle

use crate::config::SessionConfig;
use crate::game::{GameStateMachine, PhaseTrigger};
use crate::lifecycle::{Inbound, InboundEvent, SessionLifecycle};
use crate::roster::{RosterManager, UpsertOutcome};
use crate::router::{Routed, Router};
use crate::transport::{ActivationError, DeliveryMode, SessionValidity, SharedSession, Transport};
use log::{debug, error, info, warn};
use shared::{Envelope, GamePhase, GameplayEvent, Message, ParticipantId, Player};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Requests sent from collaborators to the service loop
#[derive(Debug)]
pub enum Command {
    StartActivity {
        reply: oneshot::Sender<Result<(), ActivationError>>,
    },
    FinishLoading,
    RequestStart {
        game_mode: String,
    },
    RequestReady {
        ready: bool,
    },
    SendGameplayEvent {
        event: GameplayEvent,
    },
    Send {
        message: Message,
        to: Option<BTreeSet<ParticipantId>>,
        handle_locally: bool,
    },
    Cleanup,
    Shutdown,
}

/// Notifications for gameplay and UI collaborators
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    PhaseChanged(GamePhase),
    RosterChanged,
    GameStarted {
        game_mode: String,
    },
    Gameplay {
        sender: ParticipantId,
        event: GameplayEvent,
        echoed: bool,
    },
    SessionEnded,
}

/// Read-only view of the session state, republished after every change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: GamePhase,
    /// Players in seat order.
    pub players: Vec<Player>,
    pub local_id: Option<ParticipantId>,
    pub game_mode: String,
    pub generation: u64,
}

impl SessionSnapshot {
    pub fn player(&self, id: &ParticipantId) -> Option<&Player> {
        self.players.iter().find(|player| player.id == *id)
    }

    pub fn seat_of(&self, id: &ParticipantId) -> Option<u32> {
        self.player(id).map(|player| player.seat)
    }
}

/// Cloneable call surface for collaborators
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    fn command(&self, command: Command) {
        if let Err(e) = self.commands.send(command) {
            error!("Session service stopped; dropping {:?}", e.0);
        }
    }

    /// Asks the transport for a new shared activity
    pub async fn start_activity(&self) -> Result<(), ActivationError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::StartActivity { reply })
            .map_err(|_| ActivationError::ServiceStopped)?;
        response.await.unwrap_or(Err(ActivationError::ServiceStopped))
    }

    pub fn finish_loading(&self) {
        self.command(Command::FinishLoading);
    }

    pub fn request_start(&self, game_mode: impl Into<String>) {
        self.command(Command::RequestStart {
            game_mode: game_mode.into(),
        });
    }

    pub fn request_ready(&self, ready: bool) {
        self.command(Command::RequestReady { ready });
    }

    pub fn send_gameplay_event(&self, event: GameplayEvent) {
        self.command(Command::SendGameplayEvent { event });
    }

    /// Sends `message` to `to` (everyone else when `None`)
    pub fn send(
        &self,
        message: Message,
        to: Option<BTreeSet<ParticipantId>>,
        handle_locally: bool,
    ) {
        self.command(Command::Send {
            message,
            to,
            handle_locally,
        });
    }

    pub fn cleanup(&self) {
        self.command(Command::Cleanup);
    }

    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Waits for a snapshot satisfying `predicate`. Returns `None` once the
    /// service has stopped.
    pub async fn wait_until<F>(&self, mut predicate: F) -> Option<SessionSnapshot>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut snapshot = self.snapshot.clone();
        loop {
            {
                let current = snapshot.borrow_and_update();
                if predicate(&current) {
                    return Some(current.clone());
                }
            }
            if snapshot.changed().await.is_err() {
                return None;
            }
        }
    }
}

/// Owns every piece of session state and serializes all mutation
///
/// Three sources feed the loop: collaborator commands, sessions offered by
/// the transport, and inbound events from the current session's listeners.
pub struct SessionService {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    roster: RosterManager,
    game: GameStateMachine,
    lifecycle: SessionLifecycle,

    // Communication channels
    commands_rx: mpsc::UnboundedReceiver<Command>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    sessions_rx: mpsc::UnboundedReceiver<SharedSession>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl SessionService {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
    ) -> (Self, SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let game = GameStateMachine::new(config.default_game_mode.clone());
        let initial = SessionSnapshot {
            phase: game.phase(),
            game_mode: game.game_mode().to_string(),
            ..SessionSnapshot::default()
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let service = SessionService {
            roster: RosterManager::new(config.device_kind),
            game,
            lifecycle: SessionLifecycle::new(inbound_tx, config.readiness_timeout),
            sessions_rx: transport.sessions(),
            transport,
            config,
            commands_rx,
            inbound_rx,
            events_tx,
            snapshot_tx,
        };
        let handle = SessionHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
        };

        (service, handle, events_rx)
    }

    /// Builds a service and runs it on the current tokio runtime
    pub fn spawn(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (service, handle, events) = Self::new(config, transport);
        tokio::spawn(service.run());
        (handle, events)
    }

    /// Main loop; returns after `shutdown` or once every handle is dropped
    pub async fn run(mut self) {
        info!("Session service started ({:?})", self.config.device_kind);

        loop {
            tokio::select! {
                command = self.commands_rx.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => {
                            info!("Session service shutting down");
                            break;
                        }
                        Some(command) => self.handle_command(command),
                    }
                },

                Some(session) = self.sessions_rx.recv() => {
                    self.on_session_offered(session).await;
                },

                Some(inbound) = self.inbound_rx.recv() => {
                    self.handle_inbound(inbound);
                },
            }
        }

        self.cleanup();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartActivity { reply } => {
                let result = self.transport.activate();
                if let Err(e) = &result {
                    warn!("Failed to start shared activity: {}", e);
                }
                let _ = reply.send(result);
            }
            Command::FinishLoading => self.transition(PhaseTrigger::LoadingFinished),
            Command::RequestStart { game_mode } => {
                self.send(Message::GameStart { game_mode }, None, true, DeliveryMode::Reliable);
            }
            Command::RequestReady { ready } => {
                self.send(Message::PlayerReady(ready), None, true, DeliveryMode::Reliable);
            }
            Command::SendGameplayEvent { event } => {
                let mode = self.config.gameplay_delivery;
                self.send(Message::GameplayEvent(event), None, false, mode);
            }
            Command::Send {
                message,
                to,
                handle_locally,
            } => self.send(message, to, handle_locally, DeliveryMode::Reliable),
            Command::Cleanup => self.cleanup(),
            Command::Shutdown => {}
        }
    }

    /// Replaces whatever session was live with `session` and joins it
    async fn on_session_offered(&mut self, session: SharedSession) {
        info!("Session offered to {}", session.local_participant());
        self.cleanup();
        self.lifecycle.attach(session).await;
        self.transition(PhaseTrigger::SessionJoined);
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        if !self.lifecycle.is_current(inbound.generation) {
            debug!(
                "Discarding event from stale session generation {}",
                inbound.generation
            );
            return;
        }
        let Some(local_id) = self.lifecycle.local_id() else {
            return;
        };

        match inbound.event {
            InboundEvent::ParticipantsChanged(active) => {
                self.lifecycle.set_participants(active.clone());
                let change = self.roster.on_participant_set_changed(&active, local_id);
                if change.is_empty() {
                    return;
                }
                if change.inserted_remote(local_id) {
                    self.resync_late_joiners();
                }
                self.emit(SessionEvent::RosterChanged);
                self.publish();
            }
            InboundEvent::Delivery(delivery) => match Envelope::from_bytes(&delivery.bytes) {
                Ok(envelope) => self.route(&envelope, delivery.sender, false),
                Err(e) => debug!("Dropping undecodable delivery from {}: {}", delivery.sender, e),
            },
            InboundEvent::Validity(SessionValidity::Invalidated) => {
                info!("Session invalidated");
                self.cleanup();
            }
            InboundEvent::Validity(SessionValidity::Active) => {}
        }
    }

    fn route(&mut self, envelope: &Envelope, sender: ParticipantId, force_local: bool) {
        let Some(local_id) = self.lifecycle.local_id() else {
            return;
        };
        let phase_before = self.game.phase();

        let routed = Router::new(&mut self.roster, &mut self.game, local_id).dispatch(
            envelope,
            sender,
            force_local,
        );

        match routed {
            Routed::PlayerUpdated { outcome, .. } => {
                if outcome == UpsertOutcome::Updated {
                    self.emit(SessionEvent::RosterChanged);
                }
            }
            Routed::GameStarted { game_mode } => {
                if self.game.phase() != phase_before {
                    self.emit(SessionEvent::PhaseChanged(self.game.phase()));
                }
                info!("Game started in mode '{}' by {}", game_mode, sender);
                self.emit(SessionEvent::GameStarted { game_mode });
            }
            Routed::Gameplay {
                sender,
                event,
                echoed,
            } => self.emit(SessionEvent::Gameplay {
                sender,
                event,
                echoed,
            }),
            Routed::ReadyIgnored { .. } | Routed::GameStartRejected | Routed::Dropped => {}
        }

        self.publish();
    }

    /// Re-announces the running game so late joiners catch up
    fn resync_late_joiners(&mut self) {
        if self.game.phase() != GamePhase::InGame {
            return;
        }
        let game_mode = self.game.game_mode().to_string();
        info!("Player joined mid-game; re-sending game start ({})", game_mode);
        self.send(Message::GameStart { game_mode }, None, false, DeliveryMode::Reliable);
    }

    fn send(
        &mut self,
        message: Message,
        to: Option<BTreeSet<ParticipantId>>,
        handle_locally: bool,
        mode: DeliveryMode,
    ) {
        let tag = message.tag();
        let envelope = match Envelope::seal(&message) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("Failed to encode {} message: {}", tag, e);
                return;
            }
        };
        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode {} message: {}", tag, e);
                return;
            }
        };

        if !self.lifecycle.is_active() {
            debug!("No active session; dropping outgoing {} message", tag);
            return;
        }

        if let Err(e) = self.lifecycle.send(bytes, to.as_ref(), mode) {
            warn!("Error sending {} message: {}", tag, e);
        }

        if handle_locally {
            if let Some(local_id) = self.lifecycle.local_id() {
                self.route(&envelope, local_id, true);
            }
        }
    }

    /// Leaves the session and resets roster and phase. Safe to repeat.
    fn cleanup(&mut self) {
        let had_session = self.lifecycle.teardown();
        self.roster.reset();
        self.transition(PhaseTrigger::SessionEnded);
        if had_session {
            self.emit(SessionEvent::SessionEnded);
        }
        self.publish();
    }

    fn transition(&mut self, trigger: PhaseTrigger) {
        let before = self.game.phase();
        match self.game.apply(trigger) {
            Ok(after) if after != before => self.emit(SessionEvent::PhaseChanged(after)),
            Ok(_) => {}
            Err(e) => warn!("{}", e),
        }
        self.publish();
    }

    fn emit(&self, event: SessionEvent) {
        // Collaborators may ignore events and only watch snapshots.
        let _ = self.events_tx.send(event);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.game.phase(),
            players: self.roster.roster().by_seat(),
            local_id: self.lifecycle.local_id(),
            game_mode: self.game.game_mode().to_string(),
            generation: self.lifecycle.generation(),
        }
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
