//! # WebTerm Protocol Library
//!
//! Wire protocol definitions for the WebTerm browser terminal.
//!
//! The protocol is a bidirectional stream of JSON text frames over a
//! WebSocket. Each frame is one adjacently tagged message:
//!
//! ```text
//! {"type": "input_command", "data": {"sessionId": "...", "command": "ls\r"}}
//! ```
//!
//! Client-originated messages are [`ClientMessage`]; server-originated
//! messages are [`ServerMessage`]. The server never interprets shell output:
//! `output_data` carries the raw byte stream of the pseudo-terminal, decoded
//! as UTF-8 for the browser's terminal display.
//!
//! ## Modules
//!
//! - [`messages`]: message and payload definitions
//! - [`error`]: encode/decode error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    ClientMessage, Connected, ErrorMessage, InputCommand, OutputData, Ping, Resize,
    ServerMessage, SessionCreated, SessionOverview, SessionRef, SessionStats,
    SessionTimeoutWarning,
};
