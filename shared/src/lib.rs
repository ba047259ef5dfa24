//! Wire types shared by every peer in a group session.
//!
//! Everything that crosses the transport lives here: participant identities,
//! the `Player` record, the message variants and the envelope codec. The
//! codec is two-layered so that older peers can skip message kinds they do
//! not know yet: the outer `Envelope` always decodes, and only its payload
//! depends on the tag.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Game mode used when nobody has picked one yet.
pub const DEFAULT_GAME_MODE: &str = "classic";

/// Opaque participant identity issued by the transport.
///
/// The core never mints these itself; they arrive with sessions and
/// deliveries. `Ord` gives every device the same enumeration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    /// Fresh random identity. Only transports should call this.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of hardware the local device is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Head-mounted display; always takes seat 1.
    HeadMounted,
    #[default]
    Handheld,
}

/// Game-facing projection of a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: ParticipantId,
    pub name: String,
    pub score: i64,
    pub is_active: bool,
    pub is_ready: bool,
    pub is_local_device: bool,
    pub seat: u32,
}

impl Player {
    pub fn new(id: ParticipantId, seat: u32, is_local_device: bool) -> Self {
        Self {
            id,
            name: format!("Player {}", seat),
            score: 0,
            is_active: true,
            is_ready: false,
            is_local_device,
            seat,
        }
    }
}

/// Phase of the game as seen by this device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GamePhase {
    #[default]
    Loading,
    MainMenu,
    LobbyNotReady,
    LobbyIsReady,
    InGame,
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loading => "loading",
            Self::MainMenu => "main menu",
            Self::LobbyNotReady => "lobby (not ready)",
            Self::LobbyIsReady => "lobby (ready)",
            Self::InGame => "in game",
        };
        f.write_str(name)
    }
}

/// Gameplay payload the session layer forwards without interpreting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameplayEvent {
    pub kind: String,
    pub data: Vec<u8>,
}

impl GameplayEvent {
    pub fn new(kind: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// Every message kind peers exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    PlayerUpdate(Player),
    PlayerReady(bool),
    GameStart { game_mode: String },
    GameplayEvent(GameplayEvent),
}

#[derive(Serialize, Deserialize)]
struct GameStartPayload {
    game_mode: String,
}

/// Variant tag written into every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTag {
    PlayerUpdate,
    PlayerReady,
    GameStart,
    GameplayEvent,
}

impl MessageTag {
    pub const ALL: [MessageTag; 4] = [
        Self::PlayerUpdate,
        Self::PlayerReady,
        Self::GameStart,
        Self::GameplayEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlayerUpdate => "player_update",
            Self::PlayerReady => "player_ready",
            Self::GameStart => "game_start",
            Self::GameplayEvent => "gameplay_event",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|known| known.as_str() == tag)
    }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialize {tag} payload: {source}")]
    Payload {
        tag: MessageTag,
        source: bincode::Error,
    },
    #[error("failed to serialize envelope: {0}")]
    Envelope(bincode::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(bincode::Error),
    #[error("unknown message tag {0:?}")]
    UnknownTag(String),
    #[error("malformed {tag} payload: {source}")]
    Payload {
        tag: MessageTag,
        source: bincode::Error,
    },
}

impl DecodeError {
    /// True when the envelope was fine but came from a newer peer.
    pub fn is_unknown_tag(&self) -> bool {
        matches!(self, Self::UnknownTag(_))
    }
}

impl Message {
    pub fn tag(&self) -> MessageTag {
        match self {
            Self::PlayerUpdate(_) => MessageTag::PlayerUpdate,
            Self::PlayerReady(_) => MessageTag::PlayerReady,
            Self::GameStart { .. } => MessageTag::GameStart,
            Self::GameplayEvent(_) => MessageTag::GameplayEvent,
        }
    }
}

/// Tagged wrapper around a serialized message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub tag: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn seal(message: &Message) -> Result<Self, EncodeError> {
        let tag = message.tag();
        let payload = match message {
            Message::PlayerUpdate(player) => bincode::serialize(player),
            Message::PlayerReady(ready) => bincode::serialize(ready),
            Message::GameStart { game_mode } => bincode::serialize(&GameStartPayload {
                game_mode: game_mode.clone(),
            }),
            Message::GameplayEvent(event) => bincode::serialize(event),
        }
        .map_err(|source| EncodeError::Payload { tag, source })?;

        Ok(Self {
            tag: tag.as_str().to_string(),
            payload,
        })
    }

    /// Decodes the payload. Unknown tags are reported, not guessed at.
    pub fn open(&self) -> Result<Message, DecodeError> {
        let tag = MessageTag::from_tag(&self.tag)
            .ok_or_else(|| DecodeError::UnknownTag(self.tag.clone()))?;

        let message = match tag {
            MessageTag::PlayerUpdate => Message::PlayerUpdate(self.payload_as(tag)?),
            MessageTag::PlayerReady => Message::PlayerReady(self.payload_as(tag)?),
            MessageTag::GameStart => {
                let payload: GameStartPayload = self.payload_as(tag)?;
                Message::GameStart {
                    game_mode: payload.game_mode,
                }
            }
            MessageTag::GameplayEvent => Message::GameplayEvent(self.payload_as(tag)?),
        };
        Ok(message)
    }

    fn payload_as<T: DeserializeOwned>(&self, tag: MessageTag) -> Result<T, DecodeError> {
        bincode::deserialize(&self.payload).map_err(|source| DecodeError::Payload { tag, source })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        bincode::serialize(self).map_err(EncodeError::Envelope)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        bincode::deserialize(bytes).map_err(DecodeError::Malformed)
    }
}

/// Seals a message and serializes the envelope in one step.
pub fn encode(message: &Message) -> Result<Vec<u8>, EncodeError> {
    Envelope::seal(message)?.to_bytes()
}

/// Inverse of [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    Envelope::from_bytes(bytes)?.open()
}
