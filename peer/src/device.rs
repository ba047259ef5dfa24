use log::{debug, info};
use session::loopback::LoopbackHub;
use session::{SessionConfig, SessionEvent, SessionHandle, SessionService, SessionSnapshot};
use shared::{DeviceKind, GamePhase, ParticipantId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{device} timed out waiting for {waiting_for}")]
    Timeout {
        device: String,
        waiting_for: String,
    },
    #[error("session service of {0} stopped")]
    Stopped(String),
}

/// One simulated device: a session service running on the loopback hub
/// plus the collaborator side of its event stream.
pub struct Device {
    name: String,
    local_id: ParticipantId,
    handle: SessionHandle,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Device {
    pub fn spawn(hub: &LoopbackHub, name: impl Into<String>, config: SessionConfig) -> Self {
        let name = name.into();
        let kind = config.device_kind;
        let transport = Arc::new(hub.register_device());
        let local_id = transport.local_id();

        let (handle, events) = SessionService::spawn(config, transport);
        info!("{} ({:?}) is participant {}", name, kind, local_id);

        Device {
            name,
            local_id,
            handle,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_id(&self) -> ParticipantId {
        self.local_id
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.handle.snapshot()
    }

    /// Waits up to `wait` for the next collaborator event.
    pub async fn next_event(&mut self, wait: Duration) -> Option<SessionEvent> {
        timeout(wait, self.events.recv()).await.ok().flatten()
    }

    /// Waits until the next `Gameplay` event, skipping everything else.
    pub async fn next_gameplay_event(&mut self, wait: Duration) -> Option<SessionEvent> {
        let found = timeout(wait, async {
            while let Some(event) = self.events.recv().await {
                if matches!(event, SessionEvent::Gameplay { .. }) {
                    return Some(event);
                }
                debug!("{} skipping {:?}", self.name, event);
            }
            None
        })
        .await;
        found.ok().flatten()
    }

    pub async fn wait_for_phase(
        &self,
        phase: GamePhase,
        wait: Duration,
    ) -> Result<SessionSnapshot, DeviceError> {
        self.wait_for(format!("phase {}", phase), wait, |snapshot| snapshot.phase == phase)
            .await
    }

    /// Waits until the roster holds exactly `count` players.
    pub async fn wait_for_players(
        &self,
        count: usize,
        wait: Duration,
    ) -> Result<SessionSnapshot, DeviceError> {
        self.wait_for(format!("{} players", count), wait, |snapshot| {
            snapshot.players.len() == count
        })
        .await
    }

    pub async fn wait_for<F>(
        &self,
        waiting_for: String,
        wait: Duration,
        predicate: F,
    ) -> Result<SessionSnapshot, DeviceError>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        match timeout(wait, self.handle.wait_until(predicate)).await {
            Ok(Some(snapshot)) => Ok(snapshot),
            Ok(None) => Err(DeviceError::Stopped(self.name.clone())),
            Err(_) => Err(DeviceError::Timeout {
                device: self.name.clone(),
                waiting_for,
            }),
        }
    }
}
