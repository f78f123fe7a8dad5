//! Protocol message definitions for WebTerm.
//!
//! This module defines the JSON messages exchanged between the browser and
//! the server over the WebSocket connection. Messages are adjacently tagged
//! (`{"type": "...", "data": {...}}`) with snake_case event names and
//! camelCase payload fields.

use serde::{Deserialize, Serialize};

/// Messages sent by the browser to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Request a new shell session for the authenticated user.
    CreateSession {},
    /// Keystrokes for a session's shell.
    InputCommand(InputCommand),
    /// Terminal geometry change.
    Resize(Resize),
    /// Explicit session close request.
    CloseSession(SessionRef),
    /// Acknowledge a pending idle-timeout warning.
    AcknowledgeWarning(SessionRef),
    /// Request the caller's session list.
    ListSessions {},
    /// Connection heartbeat; counts as liveness for all owned sessions.
    Ping(Ping),
}

/// Messages sent by the server to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake confirmation, sent once after the connection is admitted.
    Connected(Connected),
    /// A session was created for this connection.
    SessionCreated(SessionCreated),
    /// Raw shell output, UTF-8 decoded for the terminal display.
    OutputData(OutputData),
    /// Idle-timeout warning; the session closes unless activity or an
    /// acknowledgment arrives within `remaining_time` milliseconds.
    SessionTimeoutWarning(SessionTimeoutWarning),
    /// An idle-timeout warning was acknowledged.
    WarningAcknowledged(SessionRef),
    /// A session was closed (explicitly, by timeout, or by process exit).
    SessionClosed(SessionRef),
    /// Response to `list_sessions`.
    SessionsList(Vec<SessionOverview>),
    /// Request-scoped failure.
    Error(ErrorMessage),
    /// Heartbeat response echoing the client timestamp.
    Pong(Ping),
}

/// Keystroke payload for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputCommand {
    /// Target session.
    pub session_id: String,
    /// Raw input text, forwarded to the shell unmodified.
    pub command: String,
}

/// Terminal resize payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resize {
    /// Target session.
    pub session_id: String,
    /// New terminal width in columns.
    pub cols: u16,
    /// New terminal height in rows.
    pub rows: u16,
}

/// Payload carrying only a session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    /// The referenced session.
    pub session_id: String,
}

/// Heartbeat payload; the timestamp is opaque to the server and echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Client-supplied timestamp (epoch milliseconds by convention).
    pub timestamp: u64,
}

/// Handshake confirmation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    /// Authenticated principal that owns this connection.
    pub user_id: String,
}

/// Session creation confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    /// Identifier of the new session.
    pub session_id: String,
    /// Registry occupancy after the creation.
    pub stats: SessionStats,
}

/// Shell output payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputData {
    /// Source session.
    pub session_id: String,
    /// Output text, control sequences included.
    pub data: String,
}

/// Idle-timeout warning payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTimeoutWarning {
    /// Session about to be closed.
    pub session_id: String,
    /// Milliseconds until the close fires if nothing intervenes.
    pub remaining_time: u64,
}

/// One entry of a `sessions_list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOverview {
    /// Session identifier.
    pub id: String,
    /// Creation instant, epoch milliseconds.
    pub created_at: u64,
}

/// Registry occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Number of live (non-closed) sessions.
    pub total_sessions: usize,
    /// Configured capacity.
    pub max_sessions: usize,
}

/// Request-scoped failure payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Human-readable description, surfaced to the user.
    pub message: String,
}

impl ServerMessage {
    /// Shorthand for an `error` message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorMessage {
            message: message.into(),
        })
    }
}
