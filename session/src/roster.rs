//! Player roster and seat assignment for a group session
//!
//! This module owns the mapping from participant identity to `Player`:
//! - Seat assignment whenever the transport reports a new participant set
//! - Duplicate-join protection (one Player per identity, ever)
//! - Applying `PlayerUpdate` messages without trusting identity claims
//! - Removing players whose participant left the session
//!
//! Seats are a pure function of the participant set, the local identity and
//! the local device kind, so every recomputation yields distinct seats.

use log::{debug, info};
use shared::{DeviceKind, ParticipantId, Player};
use std::collections::{BTreeMap, BTreeSet};

/// Lowest seat handed to remote participants.
pub const FIRST_REMOTE_SEAT: u32 = 2;

/// Number of seats the session should show for `participants` devices
///
/// A lone participant still reserves a second seat so that a solo device
/// renders two slots.
pub fn effective_participant_count(participants: usize) -> usize {
    if participants <= 1 {
        2
    } else {
        participants
    }
}

/// Computes the seat of every participant, local one first
///
/// The local device sits in seat 1 on a head-mounted device and in the seat
/// equal to the effective participant count otherwise. Remote participants
/// are sorted by identity and take seats 2, 3, 4, ... in that order, skipping
/// the local seat when it falls inside that range.
pub fn assign_seats(
    active: &BTreeSet<ParticipantId>,
    local_id: ParticipantId,
    device_kind: DeviceKind,
) -> Vec<(ParticipantId, u32)> {
    let mut remotes: Vec<ParticipantId> =
        active.iter().copied().filter(|id| *id != local_id).collect();
    remotes.sort();

    let count = effective_participant_count(remotes.len() + 1);
    let local_seat = match device_kind {
        DeviceKind::HeadMounted => 1,
        DeviceKind::Handheld => count as u32,
    };

    let mut seats = Vec::with_capacity(remotes.len() + 1);
    seats.push((local_id, local_seat));

    let mut next_seat = FIRST_REMOTE_SEAT;
    for id in remotes {
        if next_seat == local_seat {
            next_seat += 1;
        }
        seats.push((id, next_seat));
        next_seat += 1;
    }

    seats
}

/// Players keyed by identity
///
/// `BTreeMap` keeps enumeration sorted by identity, which is the stable order
/// every device agrees on. Rendering wants seat order instead, see
/// [`Roster::by_seat`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    players: BTreeMap<ParticipantId, Player>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.players.contains_key(id)
    }

    /// Players in identity order
    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// Players in seat order, as a renderer lays them out
    pub fn by_seat(&self) -> Vec<Player> {
        let mut players: Vec<Player> = self.players.values().cloned().collect();
        players.sort_by_key(|player| (player.seat, player.id));
        players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

/// What a participant-set change did to the roster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterChange {
    pub inserted: Vec<ParticipantId>,
    pub removed: Vec<ParticipantId>,
    pub reseated: Vec<ParticipantId>,
}

impl RosterChange {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty() && self.reseated.is_empty()
    }

    /// True if a participant other than `local_id` got a new Player
    pub fn inserted_remote(&self, local_id: ParticipantId) -> bool {
        self.inserted.iter().any(|id| *id != local_id)
    }
}

/// Result of applying a `PlayerUpdate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Updated,
    /// The update carried nothing new.
    Unchanged,
    /// The sender has no Player, so nothing was applied.
    Ignored,
}

/// Owns the roster and every rule that mutates it
///
/// Only the session service calls into this type, always from its single
/// owning task.
#[derive(Debug)]
pub struct RosterManager {
    roster: Roster,
    device_kind: DeviceKind,
}

impl RosterManager {
    pub fn new(device_kind: DeviceKind) -> Self {
        Self {
            roster: Roster::new(),
            device_kind,
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Reconciles the roster with the transport's participant set
    ///
    /// New identities get a fresh Player, departed ones are removed and
    /// everyone else keeps their record with only the seat recomputed.
    pub fn on_participant_set_changed(
        &mut self,
        active: &BTreeSet<ParticipantId>,
        local_id: ParticipantId,
    ) -> RosterChange {
        let seats = assign_seats(active, local_id, self.device_kind);
        let mut change = RosterChange::default();

        let present: BTreeSet<ParticipantId> = seats.iter().map(|(id, _)| *id).collect();
        let departed: Vec<ParticipantId> = self
            .roster
            .players
            .keys()
            .filter(|id| !present.contains(*id))
            .copied()
            .collect();
        for id in departed {
            self.roster.players.remove(&id);
            info!("Player {} left the session", id);
            change.removed.push(id);
        }

        for (id, seat) in seats {
            match self.roster.players.get_mut(&id) {
                Some(player) => {
                    if player.seat != seat {
                        debug!("Player {} moved from seat {} to {}", id, player.seat, seat);
                        player.seat = seat;
                        change.reseated.push(id);
                    }
                }
                None => {
                    let is_local = id == local_id;
                    info!(
                        "Player {} joined in seat {}{}",
                        id,
                        seat,
                        if is_local { " (local)" } else { "" }
                    );
                    self.roster
                        .players
                        .insert(id, Player::new(id, seat, is_local));
                    change.inserted.push(id);
                }
            }
        }

        change
    }

    /// Applies a `PlayerUpdate` received from `sender`
    ///
    /// Identity, seat and the local-device flag are never taken from the
    /// payload: identity is the transport-reported sender, and seat and local
    /// flag belong to the roster entry.
    pub fn apply_player_update(&mut self, update: Player, sender: ParticipantId) -> UpsertOutcome {
        if update.id != sender {
            debug!(
                "PlayerUpdate from {} claims identity {}; using sender",
                sender, update.id
            );
        }

        if let Some(player) = self.roster.players.get_mut(&sender) {
            let before = player.clone();
            player.name = update.name;
            player.score = update.score;
            player.is_active = update.is_active;
            player.is_ready = update.is_ready;
            return if *player == before {
                UpsertOutcome::Unchanged
            } else {
                UpsertOutcome::Updated
            };
        }

        // Players only enter the roster through participant-set changes; an
        // update from a sender without one is stale or early.
        debug!("Ignoring PlayerUpdate from {} with no roster entry", sender);
        UpsertOutcome::Ignored
    }

    /// Empties the roster
    pub fn reset(&mut self) {
        if !self.roster.is_empty() {
            debug!("Clearing roster of {} players", self.roster.len());
        }
        self.roster.players.clear();
    }
}
