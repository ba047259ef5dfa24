//! Transport seam consumed by the session layer.
//!
//! A transport is a group-messaging primitive: it offers sessions, reports
//! the live participant set and the session's validity, and moves opaque
//! byte payloads between participants over a reliable and an unreliable
//! channel. The session layer never looks inside a transport; the loopback
//! module provides an in-memory one.

use shared::ParticipantId;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Delivery guarantee requested from a messenger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    #[default]
    Reliable,
    Unreliable,
}

/// Validity signal of a transport session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionValidity {
    #[default]
    Active,
    Invalidated,
}

/// One inbound payload together with the identity the transport vouches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub bytes: Vec<u8>,
    pub sender: ParticipantId,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActivationError {
    #[error("no eligible peers to share the activity with")]
    NoEligiblePeers,
    #[error("activation declined: {0}")]
    Declined(String),
    #[error("session service is no longer running")]
    ServiceStopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("local participant has not joined the session")]
    NotJoined,
    #[error("session was invalidated")]
    Invalidated,
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Sends and receives payloads within one session.
pub trait Messenger: Send + Sync + 'static {
    /// Submits `bytes` for delivery to `to`. At most once, unacknowledged.
    fn send(&self, bytes: Vec<u8>, to: &BTreeSet<ParticipantId>) -> Result<(), SendError>;

    /// Subscribes to payloads addressed to the local participant.
    fn incoming(&self) -> mpsc::UnboundedReceiver<Delivery>;
}

/// A live shared activity joining several devices.
pub trait GroupSession: Send + Sync + 'static {
    fn local_participant(&self) -> ParticipantId;

    /// Current participant set, updated as devices join and leave.
    fn active_participants(&self) -> watch::Receiver<BTreeSet<ParticipantId>>;

    fn validity(&self) -> watch::Receiver<SessionValidity>;

    fn messenger(&self, mode: DeliveryMode) -> Arc<dyn Messenger>;

    fn join(&self);

    fn leave(&self);
}

pub type SharedSession = Arc<dyn GroupSession>;

/// Platform entry point for shared activities.
pub trait Transport: Send + Sync + 'static {
    /// Asks the platform to start a new shared activity. The resulting
    /// session, if any, arrives through [`Transport::sessions`].
    fn activate(&self) -> Result<(), ActivationError>;

    /// Stream of sessions offered to this device, self-started or invited.
    fn sessions(&self) -> mpsc::UnboundedReceiver<SharedSession>;
}
