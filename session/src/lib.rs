//! # Group Session Library
//!
//! This library coordinates a small group of co-located devices (one head-mounted
//! display plus any number of handhelds) through a shared activity. It tracks who
//! is present, gives every participant a stable seat, moves the group through the
//! game phases and relays gameplay events between peers.
//!
//! ## Core Responsibilities
//!
//! ### Roster and Seats
//! The roster holds one `Player` per participant identity. Seats are recomputed
//! from the sorted set of active participants every time the set changes, so all
//! devices agree on seating without a coordinator:
//! - The head-mounted device always sits in seat 1
//! - A handheld's own seat is the number of participants (a lone handheld gets 2)
//! - Remote participants fill seats 2, 3, ... in identity order, skipping the
//!   local seat
//!
//! ### Game Phases
//! A single state machine owns the phase: loading, main menu, the two lobby
//! states and in-game. Leaving a session always lands in the main menu.
//!
//! ### Message Routing
//! Messages travel as tagged envelopes. Each tag goes to exactly one handler and
//! tags this build does not know are dropped, so newer peers can add messages
//! without breaking older ones.
//!
//! ## Architecture Design
//!
//! ### Single Owner
//! `SessionService` owns the roster, the phase and the session handle. Every
//! mutation happens on its loop; collaborators talk to it through a cloneable
//! `SessionHandle` and read state through a `watch` snapshot.
//!
//! ### Generations
//! Each joined session gets a new generation number. Listener tasks tag what
//! they forward with the generation that spawned them, and the service drops
//! anything from a session that has since been torn down.
//!
//! ### Join Handshake
//! The service only joins a session after every listener task has signaled that
//! it is subscribed, bounded by `SessionConfig::readiness_timeout`.
//!
//! ## Module Organization
//!
//! ### Transport Module (`transport`)
//! Traits for the group-session platform: activation, offered sessions,
//! participant and validity streams, reliable and unreliable messengers.
//!
//! ### Loopback Module (`loopback`)
//! An in-process transport that connects any number of simulated devices.
//!
//! ### Roster Module (`roster`)
//! Seat assignment and roster reconciliation.
//!
//! ### Game Module (`game`)
//! The game phase state machine.
//!
//! ### Router Module (`router`)
//! Decodes envelopes and dispatches each message to its handler.
//!
//! ### Lifecycle Module (`lifecycle`)
//! Session attach, listener tasks, sending and teardown.
//!
//! ### Service Module (`service`)
//! The event loop tying everything together.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use session::config::SessionConfig;
//! use session::loopback::LoopbackHub;
//! use session::service::SessionService;
//! use shared::{DeviceKind, GamePhase};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = LoopbackHub::new();
//!     let transport = Arc::new(hub.register_device());
//!
//!     let (handle, _events) =
//!         SessionService::spawn(SessionConfig::new(DeviceKind::HeadMounted), transport);
//!     handle.finish_loading();
//!     handle.start_activity().await?;
//!
//!     handle
//!         .wait_until(|snapshot| snapshot.phase == GamePhase::LobbyNotReady)
//!         .await;
//!     handle.request_start("classic");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod game;
pub mod lifecycle;
pub mod loopback;
pub mod roster;
pub mod router;
pub mod service;
pub mod transport;

pub use config::SessionConfig;
pub use service::{SessionEvent, SessionHandle, SessionService, SessionSnapshot};
pub use transport::{ActivationError, DeliveryMode, SendError, Transport};
