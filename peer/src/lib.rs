//! # Group Session Peer
//!
//! The collaborator side of a group session: what a game running on one device
//! does with the session library. It spawns a session service per device,
//! watches the snapshot for phase and roster changes, consumes gameplay events
//! and draws the roster.
//!
//! ## Module Organization
//!
//! ### Device Module (`device`)
//! Wraps a `SessionHandle` and its event stream for one simulated device:
//! - Spawning the service on a loopback hub
//! - Waiting for phases and roster sizes with timeouts
//! - Reading gameplay events
//!
//! ### Rendering Module (`rendering`)
//! Text rendering of a snapshot, one line per seat, using the seat colors
//! (1 red, 2 blue, 3 purple, 4 yellow, everyone else black).
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use peer::device::Device;
//! use peer::rendering::{RenderConfig, TextRenderer};
//! use session::loopback::LoopbackHub;
//! use session::SessionConfig;
//! use shared::{DeviceKind, GamePhase};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = LoopbackHub::new();
//!     let headset = Device::spawn(&hub, "headset", SessionConfig::new(DeviceKind::HeadMounted));
//!     let tablet = Device::spawn(&hub, "tablet", SessionConfig::new(DeviceKind::Handheld));
//!
//!     headset.handle().finish_loading();
//!     tablet.handle().finish_loading();
//!     headset.handle().start_activity().await?;
//!
//!     let snapshot = tablet.wait_for_players(2, Duration::from_secs(2)).await?;
//!     let renderer = TextRenderer::new(RenderConfig {
//!         device_name: tablet.name().to_string(),
//!         show_ids: false,
//!     });
//!     print!("{}", renderer.render(&snapshot));
//!
//!     headset.handle().request_start("classic");
//!     tablet.wait_for_phase(GamePhase::InGame, Duration::from_secs(2)).await?;
//!     Ok(())
//! }
//! ```

pub mod device;
pub mod rendering;
