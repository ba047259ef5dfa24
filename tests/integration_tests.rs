//! Integration tests for group sessions across several simulated devices
//!
//! Every device runs its own session service on a shared loopback hub, so these
//! tests exercise the full path: transport, listeners, routing and snapshots.

use peer::device::Device;
use session::loopback::LoopbackHub;
use session::{ActivationError, DeliveryMode, SessionConfig, SessionEvent};
use shared::{DeviceKind, Envelope, GamePhase, GameplayEvent, Message, Player};
use std::collections::BTreeSet;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

fn headset(hub: &LoopbackHub) -> Device {
    Device::spawn(hub, "headset", SessionConfig::new(DeviceKind::HeadMounted))
}

fn handheld(hub: &LoopbackHub, name: &str) -> Device {
    Device::spawn(hub, name, SessionConfig::new(DeviceKind::Handheld))
}

/// Loads every device, activates from the first and waits for a full lobby.
async fn start_lobby(devices: &[Device]) {
    for device in devices {
        device.handle().finish_loading();
    }
    devices[0].handle().start_activity().await.unwrap();
    for device in devices {
        device.wait_for_players(devices.len(), WAIT).await.unwrap();
        device
            .wait_for_phase(GamePhase::LobbyNotReady, WAIT)
            .await
            .unwrap();
    }
}

async fn start_game(devices: &[Device], game_mode: &str) {
    devices[0].handle().request_start(game_mode);
    for device in devices {
        device.wait_for_phase(GamePhase::InGame, WAIT).await.unwrap();
    }
}

/// Waits for the next `GameStarted` event, skipping everything else.
async fn next_game_start(device: &mut Device) -> Option<String> {
    while let Some(event) = device.next_event(WAIT).await {
        if let SessionEvent::GameStarted { game_mode } = event {
            return Some(game_mode);
        }
    }
    None
}

/// ROSTER AND SEAT TESTS
mod roster_tests {
    use super::*;

    /// A head-mounted device seats itself at 1 and the others by identity
    #[tokio::test]
    async fn headset_seats_remotes_by_identity() {
        let hub = LoopbackHub::new();
        let devices = vec![headset(&hub), handheld(&hub, "b"), handheld(&hub, "c")];
        start_lobby(&devices).await;

        let snapshot = devices[0].snapshot();
        assert_eq!(snapshot.seat_of(&devices[0].local_id()), Some(1));

        let mut remotes = vec![devices[1].local_id(), devices[2].local_id()];
        remotes.sort();
        assert_eq!(snapshot.seat_of(&remotes[0]), Some(2));
        assert_eq!(snapshot.seat_of(&remotes[1]), Some(3));
    }

    /// Every device sees every participant exactly once with distinct seats
    #[tokio::test]
    async fn seats_are_distinct_on_every_device() {
        let hub = LoopbackHub::new();
        let devices = vec![
            headset(&hub),
            handheld(&hub, "b"),
            handheld(&hub, "c"),
            handheld(&hub, "d"),
        ];
        start_lobby(&devices).await;

        let everyone: BTreeSet<_> = devices.iter().map(Device::local_id).collect();
        for device in &devices {
            let snapshot = device.snapshot();
            let ids: BTreeSet<_> = snapshot.players.iter().map(|p| p.id).collect();
            let seats: BTreeSet<_> = snapshot.players.iter().map(|p| p.seat).collect();

            assert_eq!(ids, everyone);
            assert_eq!(seats.len(), devices.len());
            assert_eq!(
                snapshot.players.iter().filter(|p| p.is_local_device).count(),
                1
            );
            assert!(snapshot.player(&device.local_id()).unwrap().is_local_device);
        }
    }

    /// A handheld's own seat is the participant count
    #[tokio::test]
    async fn handheld_sits_at_participant_count() {
        let hub = LoopbackHub::new();
        let devices = vec![handheld(&hub, "a"), handheld(&hub, "b"), handheld(&hub, "c")];
        start_lobby(&devices).await;

        for device in &devices {
            assert_eq!(device.snapshot().seat_of(&device.local_id()), Some(3));
        }
    }

    /// Departed participants disappear from every roster
    #[tokio::test]
    async fn leaving_device_is_removed() {
        let hub = LoopbackHub::new();
        let devices = vec![headset(&hub), handheld(&hub, "b"), handheld(&hub, "c")];
        start_lobby(&devices).await;

        devices[2].handle().cleanup();
        devices[2]
            .wait_for_phase(GamePhase::MainMenu, WAIT)
            .await
            .unwrap();

        for device in &devices[..2] {
            let snapshot = device.wait_for_players(2, WAIT).await.unwrap();
            assert!(snapshot.player(&devices[2].local_id()).is_none());
        }
        assert!(devices[2].snapshot().players.is_empty());
    }

    /// A player update cannot claim someone else's identity
    #[tokio::test]
    async fn player_update_identity_comes_from_sender() {
        let hub = LoopbackHub::new();
        let devices = vec![headset(&hub), handheld(&hub, "b")];
        start_lobby(&devices).await;

        let mut claim = Player::new(devices[0].local_id(), 1, true);
        claim.score = 99;
        claim.name = "impostor".to_string();
        let bytes = Envelope::seal(&Message::PlayerUpdate(claim))
            .unwrap()
            .to_bytes()
            .unwrap();
        hub.inject(
            bytes,
            devices[1].local_id(),
            devices[0].local_id(),
            DeliveryMode::Reliable,
        );

        let remote = devices[1].local_id();
        let snapshot = devices[0]
            .wait_for("spoofed update".to_string(), WAIT, |s| {
                s.player(&remote).map_or(false, |p| p.score == 99)
            })
            .await
            .unwrap();

        let own = snapshot.player(&devices[0].local_id()).unwrap();
        assert_eq!(own.score, 0);
        assert_eq!(own.seat, 1);
        let updated = snapshot.player(&remote).unwrap();
        assert_eq!(updated.name, "impostor");
        assert_eq!(updated.seat, 2);
        assert!(!updated.is_local_device);
    }
}

/// GAME PHASE TESTS
mod phase_tests {
    use super::*;

    /// Starting a game moves every device in game with the requested mode
    #[tokio::test]
    async fn game_start_reaches_every_device() {
        let hub = LoopbackHub::new();
        let mut devices = vec![headset(&hub), handheld(&hub, "b"), handheld(&hub, "c")];
        start_lobby(&devices).await;

        devices[0].handle().request_ready(true);
        start_game(&devices, "classic").await;

        for device in devices.iter_mut() {
            assert_eq!(next_game_start(device).await.as_deref(), Some("classic"));
            assert_eq!(device.snapshot().game_mode, "classic");
        }
    }

    /// Readiness messages leave the lobby phase alone
    #[tokio::test]
    async fn ready_messages_do_not_change_phase() {
        let hub = LoopbackHub::new();
        let devices = vec![headset(&hub), handheld(&hub, "b")];
        start_lobby(&devices).await;

        for device in &devices {
            device.handle().request_ready(true);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        for device in &devices {
            assert_eq!(device.snapshot().phase, GamePhase::LobbyNotReady);
        }
    }

    /// A device joining mid-game is brought into the running game
    #[tokio::test]
    async fn late_joiner_is_resynced() {
        let hub = LoopbackHub::new();
        let mut devices = vec![headset(&hub), handheld(&hub, "b")];
        start_lobby(&devices).await;
        start_game(&devices, "survival").await;
        for device in devices.iter_mut() {
            assert_eq!(next_game_start(device).await.as_deref(), Some("survival"));
        }

        let late = handheld(&hub, "late");
        late.handle().finish_loading();
        devices.push(late);

        let snapshot = devices[2]
            .wait_for_phase(GamePhase::InGame, WAIT)
            .await
            .unwrap();
        assert_eq!(snapshot.game_mode, "survival");
        for device in &devices {
            device.wait_for_players(3, WAIT).await.unwrap();
        }

        // The existing handheld also hears the fresh game start.
        assert_eq!(next_game_start(&mut devices[1]).await.as_deref(), Some("survival"));
        assert_eq!(devices[1].snapshot().phase, GamePhase::InGame);
    }

    /// A refused activation reports an error and stays in the main menu
    #[tokio::test]
    async fn declined_activation_stays_in_main_menu() {
        let hub = LoopbackHub::new();
        hub.decline_activations(true);
        let device = headset(&hub);
        device.handle().finish_loading();
        device.wait_for_phase(GamePhase::MainMenu, WAIT).await.unwrap();

        let result = device.handle().start_activity().await;
        assert_eq!(result, Err(ActivationError::NoEligiblePeers));
        assert_eq!(device.snapshot().phase, GamePhase::MainMenu);
        assert!(device.snapshot().players.is_empty());
    }
}

/// SESSION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// Invalidating the session cleans up every device
    #[tokio::test]
    async fn invalidation_cleans_up_everyone() {
        let hub = LoopbackHub::new();
        let mut devices = vec![headset(&hub), handheld(&hub, "b")];
        start_lobby(&devices).await;
        start_game(&devices, "classic").await;

        hub.invalidate();

        for device in devices.iter_mut() {
            let snapshot = device.wait_for_phase(GamePhase::MainMenu, WAIT).await.unwrap();
            assert!(snapshot.players.is_empty());
            assert_eq!(snapshot.local_id, None);

            let mut ended = false;
            while let Some(event) = device.next_event(Duration::from_millis(200)).await {
                ended |= event == SessionEvent::SessionEnded;
            }
            assert!(ended, "{} never saw the session end", device.name());
        }
    }

    /// Cleaning up twice leaves the same state as cleaning up once
    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let hub = LoopbackHub::new();
        let devices = vec![headset(&hub), handheld(&hub, "b")];
        start_lobby(&devices).await;

        devices[0].handle().cleanup();
        let first = devices[0]
            .wait_for_phase(GamePhase::MainMenu, WAIT)
            .await
            .unwrap();
        devices[0].handle().cleanup();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(devices[0].snapshot(), first);
        assert!(first.players.is_empty());
        assert_eq!(first.local_id, None);
    }

    /// A second activation replaces the first session with a new generation
    #[tokio::test]
    async fn reactivation_starts_new_generation() {
        let hub = LoopbackHub::new();
        let devices = vec![headset(&hub), handheld(&hub, "b")];
        start_lobby(&devices).await;
        assert_eq!(devices[0].snapshot().generation, 1);

        devices[1].handle().start_activity().await.unwrap();
        for device in &devices {
            let snapshot = device
                .wait_for("second generation".to_string(), WAIT, |s| {
                    s.generation == 2 && s.players.len() == 2
                })
                .await
                .unwrap();
            assert_eq!(snapshot.phase, GamePhase::LobbyNotReady);
        }
    }

    /// Shutting down a device stops its service
    #[tokio::test]
    async fn shutdown_leaves_session() {
        let hub = LoopbackHub::new();
        let devices = vec![headset(&hub), handheld(&hub, "b")];
        start_lobby(&devices).await;

        devices[1].handle().shutdown();
        devices[0].wait_for_players(1, WAIT).await.unwrap();
        assert!(!hub.active_participants().contains(&devices[1].local_id()));
    }
}

/// MESSAGE ROUTING TESTS
mod routing_tests {
    use super::*;

    /// Gameplay events arrive with the sender's identity
    #[tokio::test]
    async fn gameplay_event_delivered() {
        let hub = LoopbackHub::new();
        let mut devices = vec![headset(&hub), handheld(&hub, "b")];
        start_lobby(&devices).await;
        start_game(&devices, "classic").await;

        let heart = GameplayEvent::new("heart", vec![7]);
        devices[0].handle().send_gameplay_event(heart.clone());

        let sender = devices[0].local_id();
        match devices[1].next_gameplay_event(WAIT).await {
            Some(SessionEvent::Gameplay {
                sender: from,
                event,
                echoed,
            }) => {
                assert_eq!(from, sender);
                assert_eq!(event, heart);
                assert!(!echoed);
            }
            other => panic!("expected gameplay event, got {:?}", other),
        }
    }

    /// Gameplay over the unreliable channel still reaches loopback peers
    #[tokio::test]
    async fn unreliable_gameplay_delivered() {
        let hub = LoopbackHub::new();
        let config = SessionConfig::new(DeviceKind::HeadMounted)
            .with_gameplay_delivery(DeliveryMode::Unreliable);
        let mut devices = vec![
            Device::spawn(&hub, "headset", config),
            handheld(&hub, "b"),
        ];
        start_lobby(&devices).await;

        devices[0]
            .handle()
            .send_gameplay_event(GameplayEvent::new("heart", vec![]));
        assert!(devices[1].next_gameplay_event(WAIT).await.is_some());
    }

    /// Handling locally echoes the message back to the sender
    #[tokio::test]
    async fn local_handling_echoes_gameplay() {
        let hub = LoopbackHub::new();
        let mut devices = vec![headset(&hub), handheld(&hub, "b")];
        start_lobby(&devices).await;

        let event = GameplayEvent::new("heart", vec![1, 2]);
        devices[0]
            .handle()
            .send(Message::GameplayEvent(event.clone()), None, true);

        match devices[0].next_gameplay_event(WAIT).await {
            Some(SessionEvent::Gameplay { echoed, sender, .. }) => {
                assert!(echoed);
                assert_eq!(sender, devices[0].local_id());
            }
            other => panic!("expected echoed gameplay event, got {:?}", other),
        }
        assert!(devices[1].next_gameplay_event(WAIT).await.is_some());
    }

    /// Messages addressed to a subset only reach that subset
    #[tokio::test]
    async fn targeted_send_reaches_only_recipients() {
        let hub = LoopbackHub::new();
        let mut devices = vec![headset(&hub), handheld(&hub, "b"), handheld(&hub, "c")];
        start_lobby(&devices).await;

        let only_b: BTreeSet<_> = [devices[1].local_id()].into_iter().collect();
        devices[0].handle().send(
            Message::GameplayEvent(GameplayEvent::new("whisper", vec![])),
            Some(only_b),
            false,
        );

        assert!(devices[1].next_gameplay_event(WAIT).await.is_some());
        assert!(devices[2]
            .next_gameplay_event(Duration::from_millis(200))
            .await
            .is_none());
    }

    /// Unknown tags are dropped and later messages still flow
    #[tokio::test]
    async fn unknown_tag_is_ignored() {
        let hub = LoopbackHub::new();
        let mut devices = vec![headset(&hub), handheld(&hub, "b")];
        start_lobby(&devices).await;
        let before = devices[1].snapshot();

        let unknown = Envelope {
            tag: "heart_spawned".to_string(),
            payload: vec![9, 9, 9],
        };
        let known = Envelope::seal(&Message::GameplayEvent(GameplayEvent::new("heart", vec![])))
            .unwrap();
        let from = devices[0].local_id();
        let to = devices[1].local_id();
        hub.inject(unknown.to_bytes().unwrap(), from, to, DeliveryMode::Reliable);
        hub.inject(vec![0xff, 0x01], from, to, DeliveryMode::Reliable);
        hub.inject(known.to_bytes().unwrap(), from, to, DeliveryMode::Reliable);

        assert!(devices[1].next_gameplay_event(WAIT).await.is_some());
        assert_eq!(devices[1].snapshot(), before);
    }
}
