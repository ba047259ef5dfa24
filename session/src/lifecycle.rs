//! Session handle ownership and the join handshake
//!
//! `SessionLifecycle` wires a transport session into the service: it builds
//! the messengers and starts one listener task per transport stream. Each
//! task subscribes to its stream itself and then signals readiness; the
//! session is joined only after every signal arrived. Listener tasks never
//! touch session state; they forward events tagged with the generation that
//! spawned them, and the service discards anything from an older generation.

use crate::transport::{
    Delivery, DeliveryMode, Messenger, SendError, SessionValidity, SharedSession,
};
use log::{debug, info, warn};
use shared::ParticipantId;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Event forwarded from a session listener to the service loop.
#[derive(Debug)]
pub struct Inbound {
    pub generation: u64,
    pub event: InboundEvent,
}

#[derive(Debug)]
pub enum InboundEvent {
    ParticipantsChanged(BTreeSet<ParticipantId>),
    Delivery(Delivery),
    Validity(SessionValidity),
}

/// The live session and everything bound to it.
struct ActiveSession {
    session: SharedSession,
    reliable: Arc<dyn Messenger>,
    unreliable: Arc<dyn Messenger>,
    local_id: ParticipantId,
    generation: u64,
    participants: BTreeSet<ParticipantId>,
    listeners: Vec<JoinHandle<()>>,
}

pub struct SessionLifecycle {
    current: Option<ActiveSession>,
    generation: u64,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    readiness_timeout: Duration,
}

impl SessionLifecycle {
    pub fn new(inbound_tx: mpsc::UnboundedSender<Inbound>, readiness_timeout: Duration) -> Self {
        Self {
            current: None,
            generation: 0,
            inbound_tx,
            readiness_timeout,
        }
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn local_id(&self) -> Option<ParticipantId> {
        self.current.as_ref().map(|active| active.local_id)
    }

    /// Generation of the current session, or of the last one torn down.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True if `generation` belongs to the session that is live right now.
    pub fn is_current(&self, generation: u64) -> bool {
        self.current
            .as_ref()
            .map_or(false, |active| active.generation == generation)
    }

    pub fn set_participants(&mut self, participants: BTreeSet<ParticipantId>) {
        if let Some(active) = self.current.as_mut() {
            active.participants = participants;
        }
    }

    /// Wires `session` and joins it once every listener is subscribed.
    ///
    /// Callers must have torn down any previous session first.
    pub async fn attach(&mut self, session: SharedSession) -> u64 {
        debug_assert!(self.current.is_none(), "previous session still attached");

        self.generation += 1;
        let generation = self.generation;
        let local_id = session.local_participant();
        let reliable = session.messenger(DeliveryMode::Reliable);
        let unreliable = session.messenger(DeliveryMode::Unreliable);

        let mut ready = Vec::with_capacity(4);
        let mut listeners = Vec::with_capacity(4);

        let (task, signal) = self.spawn_validity_listener(&session, generation);
        listeners.push(task);
        ready.push(signal);

        let (task, signal) = self.spawn_participant_listener(&session, generation);
        listeners.push(task);
        ready.push(signal);

        for messenger in [&reliable, &unreliable] {
            let (task, signal) = self.spawn_message_listener(messenger, generation);
            listeners.push(task);
            ready.push(signal);
        }

        self.current = Some(ActiveSession {
            session: Arc::clone(&session),
            reliable,
            unreliable,
            local_id,
            generation,
            participants: BTreeSet::new(),
            listeners,
        });

        let subscribed = async {
            for signal in ready {
                let _ = signal.await;
            }
        };
        if tokio::time::timeout(self.readiness_timeout, subscribed).await.is_err() {
            warn!(
                "Session listeners not ready after {:?}; joining anyway",
                self.readiness_timeout
            );
        }

        session.join();
        info!("Joined session generation {} as {}", generation, local_id);
        generation
    }

    fn spawn_validity_listener(
        &self,
        session: &SharedSession,
        generation: u64,
    ) -> (JoinHandle<()>, oneshot::Receiver<()>) {
        let session = Arc::clone(session);
        let inbound_tx = self.inbound_tx.clone();
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut validity = session.validity();
            let _ = ready_tx.send(());
            loop {
                let state = *validity.borrow_and_update();
                let event = InboundEvent::Validity(state);
                if inbound_tx.send(Inbound { generation, event }).is_err() {
                    break;
                }
                if state == SessionValidity::Invalidated || validity.changed().await.is_err() {
                    break;
                }
            }
        });

        (task, ready_rx)
    }

    fn spawn_participant_listener(
        &self,
        session: &SharedSession,
        generation: u64,
    ) -> (JoinHandle<()>, oneshot::Receiver<()>) {
        let session = Arc::clone(session);
        let inbound_tx = self.inbound_tx.clone();
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut participants = session.active_participants();
            let _ = ready_tx.send(());
            loop {
                let current = participants.borrow_and_update().clone();
                let event = InboundEvent::ParticipantsChanged(current);
                if inbound_tx.send(Inbound { generation, event }).is_err() {
                    break;
                }
                if participants.changed().await.is_err() {
                    break;
                }
            }
        });

        (task, ready_rx)
    }

    fn spawn_message_listener(
        &self,
        messenger: &Arc<dyn Messenger>,
        generation: u64,
    ) -> (JoinHandle<()>, oneshot::Receiver<()>) {
        let messenger = Arc::clone(messenger);
        let inbound_tx = self.inbound_tx.clone();
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut incoming = messenger.incoming();
            let _ = ready_tx.send(());
            while let Some(delivery) = incoming.recv().await {
                let event = InboundEvent::Delivery(delivery);
                if inbound_tx.send(Inbound { generation, event }).is_err() {
                    break;
                }
            }
        });

        (task, ready_rx)
    }

    /// Sends `bytes` to `to`, or to everyone else in the session.
    pub fn send(
        &self,
        bytes: Vec<u8>,
        to: Option<&BTreeSet<ParticipantId>>,
        mode: DeliveryMode,
    ) -> Result<(), SendError> {
        let active = self.current.as_ref().ok_or(SendError::NotJoined)?;

        let everyone_else: BTreeSet<ParticipantId>;
        let recipients = match to {
            Some(recipients) => recipients,
            None => {
                everyone_else = active
                    .participants
                    .iter()
                    .copied()
                    .filter(|id| *id != active.local_id)
                    .collect();
                &everyone_else
            }
        };

        if recipients.is_empty() {
            debug!("No recipients for outgoing message");
            return Ok(());
        }

        let messenger = match mode {
            DeliveryMode::Reliable => &active.reliable,
            DeliveryMode::Unreliable => &active.unreliable,
        };
        messenger.send(bytes, recipients)
    }

    /// Leaves the session and stops its listeners. Returns false if there
    /// was nothing to tear down.
    pub fn teardown(&mut self) -> bool {
        let Some(active) = self.current.take() else {
            return false;
        };

        for listener in &active.listeners {
            listener.abort();
        }
        active.session.leave();
        info!("Left session generation {}", active.generation);
        true
    }
}

impl Drop for SessionLifecycle {
    fn drop(&mut self) {
        self.teardown();
    }
}
