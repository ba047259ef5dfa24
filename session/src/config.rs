use crate::transport::DeliveryMode;
use shared::{DeviceKind, DEFAULT_GAME_MODE};
use std::time::Duration;

/// Default upper bound on waiting for session listeners before joining.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-device settings for a [`crate::service::SessionService`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hardware of this device; head-mounted devices always sit in seat 1.
    pub device_kind: DeviceKind,
    /// Game mode announced before anyone picks one.
    pub default_game_mode: String,
    /// Channel used for gameplay events. Roster and phase messages always
    /// go over the reliable channel.
    pub gameplay_delivery: DeliveryMode,
    /// How long to wait for listener subscriptions before joining anyway.
    pub readiness_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_kind: DeviceKind::Handheld,
            default_game_mode: DEFAULT_GAME_MODE.to_string(),
            gameplay_delivery: DeliveryMode::Reliable,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
        }
    }
}

impl SessionConfig {
    pub fn new(device_kind: DeviceKind) -> Self {
        Self {
            device_kind,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_default_game_mode(mut self, game_mode: impl Into<String>) -> Self {
        self.default_game_mode = game_mode.into();
        self
    }

    #[must_use]
    pub fn with_gameplay_delivery(mut self, mode: DeliveryMode) -> Self {
        self.gameplay_delivery = mode;
        self
    }

    #[must_use]
    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }
}
