use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::models::{Board, Channel, Message, Role, Snowflake, User};

/// Frame kind, carried in the `op` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    Hello = 10,
    HeartbeatAck = 11,
    SlowDown = 12,
}

impl OpCode {
    pub fn from_u8(op: u8) -> Option<Self> {
        match op {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            12 => Some(Self::SlowDown),
            _ => None,
        }
    }
}

/// Gateway close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    InvalidIdentify = 4001,
    DecodeError = 4002,
    NotAuthenticated = 4003,
    InvalidToken = 4004,
    AlreadyAuthenticated = 4005,
    HeartbeatTooFast = 4008,
    HeartbeatTimeout = 4009,
}

impl CloseCode {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn reason(self) -> &'static str {
        match self {
            CloseCode::InvalidIdentify => "The identify payload was not valid",
            CloseCode::DecodeError => "What was that?",
            CloseCode::NotAuthenticated => "Not authenticated",
            CloseCode::InvalidToken => "The token you sent is invalid",
            CloseCode::AlreadyAuthenticated => "Already authenticated",
            CloseCode::HeartbeatTooFast => "Too fast, slow down",
            CloseCode::HeartbeatTimeout => "Too slow",
        }
    }
}

/// Dispatch event names, carried in the `t` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventName {
    Ready,
    BoardCreate,
    BoardUpdate,
    BoardDelete,
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,
    MessageCreate,
}

/// One JSON frame on the gateway socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub op: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<EventName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl Frame {
    pub fn new(op: OpCode) -> Self {
        Self { op: op as u8, t: None, d: None }
    }

    pub fn hello(heartbeat_interval_ms: u64) -> Self {
        Self {
            d: Some(json!({ "heartbeat_interval": heartbeat_interval_ms })),
            ..Self::new(OpCode::Hello)
        }
    }

    pub fn heartbeat_ack() -> Self {
        Self::new(OpCode::HeartbeatAck)
    }

    pub fn slow_down() -> Self {
        Self::new(OpCode::SlowDown)
    }

    pub fn dispatch(name: EventName, payload: Value) -> Self {
        Self {
            t: Some(name),
            d: Some(payload),
            ..Self::new(OpCode::Dispatch)
        }
    }

    pub fn ready(payload: &ReadyPayload) -> Self {
        Self::dispatch(EventName::Ready, json!(payload))
    }

    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_u8(self.op)
    }

    pub fn to_json(&self) -> String {
        // Frames only hold JSON-safe data; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A board listed in READY before its full state is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableBoard {
    pub id: Snowflake,
    pub unavailable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub user: User,
    pub boards: Vec<UnavailableBoard>,
}

impl ReadyPayload {
    pub fn new(user: User, board_ids: impl IntoIterator<Item = Snowflake>) -> Self {
        Self {
            user,
            boards: board_ids
                .into_iter()
                .map(|id| UnavailableBoard { id, unavailable: true })
                .collect(),
        }
    }
}

/// Full board state captured by the publisher. The viewer-dependent
/// `owner` flag is filled in only when the event is rendered for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardSnapshot {
    pub board: Board,
    pub channels: Vec<Channel>,
    pub roles: Vec<Role>,
    pub owner_ids: Vec<Snowflake>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePayload {
    pub id: Snowflake,
    pub name: String,
    pub permissions: u64,
}

impl From<&Role> for RolePayload {
    fn from(role: &Role) -> Self {
        Self {
            id: role.id,
            name: role.name.clone(),
            permissions: role.permissions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardPayload {
    pub id: Snowflake,
    pub name: String,
    pub channels: Vec<Channel>,
    pub roles: Vec<RolePayload>,
    pub owner_ids: Vec<Snowflake>,
    pub owner: bool,
}

impl BoardSnapshot {
    /// Render from the point of view of `viewer`.
    pub fn render_for(&self, viewer: Snowflake) -> BoardPayload {
        BoardPayload {
            id: self.board.id,
            name: self.board.name.clone(),
            channels: self.channels.clone(),
            roles: self.roles.iter().map(RolePayload::from).collect(),
            owner_ids: self.owner_ids.clone(),
            owner: self.owner_ids.contains(&viewer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub board_id: Snowflake,
    pub author: User,
    /// ISO-8601, recovered from the id.
    pub timestamp: String,
    pub content: String,
}

impl From<&Message> for MessagePayload {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id,
            channel_id: m.channel_id,
            board_id: m.board_id,
            author: m.author.clone(),
            timestamp: m.created_at().to_rfc3339(),
            content: m.content.clone(),
        }
    }
}

/// A mutation event routed to board subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    BoardCreate(BoardSnapshot),
    BoardUpdate(BoardSnapshot),
    BoardDelete { board_id: Snowflake },
    ChannelCreate(Channel),
    ChannelUpdate(Channel),
    ChannelDelete(Channel),
    MessageCreate(Message),
}

impl GatewayEvent {
    pub fn name(&self) -> EventName {
        match self {
            Self::BoardCreate(_) => EventName::BoardCreate,
            Self::BoardUpdate(_) => EventName::BoardUpdate,
            Self::BoardDelete { .. } => EventName::BoardDelete,
            Self::ChannelCreate(_) => EventName::ChannelCreate,
            Self::ChannelUpdate(_) => EventName::ChannelUpdate,
            Self::ChannelDelete(_) => EventName::ChannelDelete,
            Self::MessageCreate(_) => EventName::MessageCreate,
        }
    }

    /// The board this event belongs to.
    pub fn board_id(&self) -> Snowflake {
        match self {
            Self::BoardCreate(s) | Self::BoardUpdate(s) => s.board.id,
            Self::BoardDelete { board_id } => *board_id,
            Self::ChannelCreate(c) | Self::ChannelUpdate(c) | Self::ChannelDelete(c) => c.board_id,
            Self::MessageCreate(m) => m.board_id,
        }
    }

    /// Build the dispatch frame as seen by `viewer`.
    pub fn render(&self, viewer: Snowflake) -> Frame {
        let d = match self {
            Self::BoardCreate(s) | Self::BoardUpdate(s) => json!(s.render_for(viewer)),
            Self::BoardDelete { board_id } => json!({ "id": board_id, "unavailable": false }),
            Self::ChannelCreate(c) | Self::ChannelUpdate(c) | Self::ChannelDelete(c) => json!(c),
            Self::MessageCreate(m) => json!(MessagePayload::from(m)),
        };
        Frame::dispatch(self.name(), d)
    }
}
