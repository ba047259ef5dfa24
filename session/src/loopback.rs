//! In-memory transport connecting any number of devices in one process.
//!
//! A `LoopbackHub` plays the platform's part: it issues participant
//! identities, offers the current group activity to every registered device
//! and moves payloads between joined participants. Reliable and unreliable
//! messengers both deliver in order and without loss here.

use crate::transport::{
    ActivationError, Delivery, DeliveryMode, GroupSession, Messenger, SendError, SessionValidity,
    SharedSession, Transport,
};
use log::{debug, info};
use shared::ParticipantId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One group activity shared by every device of the hub.
struct Group {
    id: u64,
    participants: watch::Sender<BTreeSet<ParticipantId>>,
    validity: watch::Sender<SessionValidity>,
    inboxes: Mutex<HashMap<(ParticipantId, DeliveryMode), Vec<mpsc::UnboundedSender<Delivery>>>>,
}

impl Group {
    fn new(id: u64) -> Self {
        let (participants, _) = watch::channel(BTreeSet::new());
        let (validity, _) = watch::channel(SessionValidity::Active);
        Self {
            id,
            participants,
            validity,
            inboxes: Mutex::new(HashMap::new()),
        }
    }

    fn is_invalidated(&self) -> bool {
        *self.validity.borrow() == SessionValidity::Invalidated
    }

    fn is_joined(&self, id: &ParticipantId) -> bool {
        self.participants.borrow().contains(id)
    }

    fn deliver(&self, to: ParticipantId, mode: DeliveryMode, delivery: &Delivery) {
        let mut inboxes = lock(&self.inboxes);
        if let Some(subscribers) = inboxes.get_mut(&(to, mode)) {
            subscribers.retain(|subscriber| subscriber.send(delivery.clone()).is_ok());
        }
    }
}

#[derive(Default)]
struct HubState {
    devices: BTreeMap<ParticipantId, Option<mpsc::UnboundedSender<SharedSession>>>,
    group: Option<Arc<Group>>,
    next_group_id: u64,
    activation_declined: bool,
}

/// Shared platform stand-in. Cloning yields another handle to the same hub.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device to the hub and returns its transport.
    pub fn register_device(&self) -> LoopbackTransport {
        let local_id = ParticipantId::random();
        lock(&self.state).devices.insert(local_id, None);
        debug!("Registered loopback device {}", local_id);
        LoopbackTransport {
            hub: self.clone(),
            local_id,
        }
    }

    /// Makes every later activation fail, as a platform with no peers would.
    pub fn decline_activations(&self, declined: bool) {
        lock(&self.state).activation_declined = declined;
    }

    /// Participants currently joined to the live group.
    pub fn active_participants(&self) -> BTreeSet<ParticipantId> {
        lock(&self.state)
            .group
            .as_ref()
            .map(|group| group.participants.borrow().clone())
            .unwrap_or_default()
    }

    /// Ends the live group for everyone.
    pub fn invalidate(&self) {
        let group = lock(&self.state).group.take();
        if let Some(group) = group {
            info!("Invalidating loopback group {}", group.id);
            group.validity.send_replace(SessionValidity::Invalidated);
            lock(&group.inboxes).clear();
        }
    }

    /// Delivers raw bytes to `to` as if `sender` had sent them.
    pub fn inject(
        &self,
        bytes: Vec<u8>,
        sender: ParticipantId,
        to: ParticipantId,
        mode: DeliveryMode,
    ) {
        let group = lock(&self.state).group.clone();
        if let Some(group) = group {
            group.deliver(to, mode, &Delivery { bytes, sender });
        }
    }

    fn activate(&self, requested_by: ParticipantId) -> Result<(), ActivationError> {
        let (group, previous, offers) = {
            let mut state = lock(&self.state);
            if state.activation_declined {
                return Err(ActivationError::NoEligiblePeers);
            }

            state.next_group_id += 1;
            let group = Arc::new(Group::new(state.next_group_id));
            let previous = state.group.replace(Arc::clone(&group));
            let offers: Vec<(ParticipantId, mpsc::UnboundedSender<SharedSession>)> = state
                .devices
                .iter()
                .filter_map(|(id, sessions)| sessions.clone().map(|tx| (*id, tx)))
                .collect();
            (group, previous, offers)
        };

        if let Some(previous) = previous {
            previous.validity.send_replace(SessionValidity::Invalidated);
        }

        info!("Device {} activated loopback group {}", requested_by, group.id);
        for (id, sessions) in offers {
            offer(&group, id, &sessions);
        }
        Ok(())
    }

    fn subscribe_sessions(
        &self,
        local_id: ParticipantId,
    ) -> mpsc::UnboundedReceiver<SharedSession> {
        let (tx, rx) = mpsc::unbounded_channel();
        let group = {
            let mut state = lock(&self.state);
            state.devices.insert(local_id, Some(tx.clone()));
            state.group.clone()
        };

        // A device that shows up late is invited to the running group.
        if let Some(group) = group {
            offer(&group, local_id, &tx);
        }
        rx
    }
}

fn offer(
    group: &Arc<Group>,
    local_id: ParticipantId,
    sessions: &mpsc::UnboundedSender<SharedSession>,
) {
    let session: SharedSession = Arc::new(LoopbackSession {
        group: Arc::clone(group),
        local_id,
    });
    if sessions.send(session).is_err() {
        debug!("Device {} no longer listens for sessions", local_id);
    }
}

/// Transport of one registered device.
pub struct LoopbackTransport {
    hub: LoopbackHub,
    local_id: ParticipantId,
}

impl LoopbackTransport {
    pub fn local_id(&self) -> ParticipantId {
        self.local_id
    }
}

impl Transport for LoopbackTransport {
    fn activate(&self) -> Result<(), ActivationError> {
        self.hub.activate(self.local_id)
    }

    fn sessions(&self) -> mpsc::UnboundedReceiver<SharedSession> {
        self.hub.subscribe_sessions(self.local_id)
    }
}

/// One device's view of a loopback group.
pub struct LoopbackSession {
    group: Arc<Group>,
    local_id: ParticipantId,
}

impl GroupSession for LoopbackSession {
    fn local_participant(&self) -> ParticipantId {
        self.local_id
    }

    fn active_participants(&self) -> watch::Receiver<BTreeSet<ParticipantId>> {
        self.group.participants.subscribe()
    }

    fn validity(&self) -> watch::Receiver<SessionValidity> {
        self.group.validity.subscribe()
    }

    fn messenger(&self, mode: DeliveryMode) -> Arc<dyn Messenger> {
        Arc::new(LoopbackMessenger {
            group: Arc::clone(&self.group),
            local_id: self.local_id,
            mode,
        })
    }

    fn join(&self) {
        if self.group.is_invalidated() {
            debug!("Device {} cannot join invalidated group {}", self.local_id, self.group.id);
            return;
        }
        let local_id = self.local_id;
        self.group.participants.send_if_modified(|set| set.insert(local_id));
    }

    fn leave(&self) {
        let local_id = self.local_id;
        self.group.participants.send_if_modified(|set| set.remove(&local_id));
        lock(&self.group.inboxes).retain(|(owner, _), _| *owner != local_id);
    }
}

struct LoopbackMessenger {
    group: Arc<Group>,
    local_id: ParticipantId,
    mode: DeliveryMode,
}

impl Messenger for LoopbackMessenger {
    fn send(&self, bytes: Vec<u8>, to: &BTreeSet<ParticipantId>) -> Result<(), SendError> {
        if self.group.is_invalidated() {
            return Err(SendError::Invalidated);
        }
        if !self.group.is_joined(&self.local_id) {
            return Err(SendError::NotJoined);
        }

        let delivery = Delivery {
            bytes,
            sender: self.local_id,
        };
        for recipient in to {
            if self.group.is_joined(recipient) {
                self.group.deliver(*recipient, self.mode, &delivery);
            }
        }
        Ok(())
    }

    fn incoming(&self) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.group.inboxes)
            .entry((self.local_id, self.mode))
            .or_default()
            .push(tx);
        rx
    }
}
