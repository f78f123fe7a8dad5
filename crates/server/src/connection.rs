//! Per-connection protocol handling.
//!
//! A [`Connection`] translates inbound protocol messages into registry
//! operations and registry events into outbound protocol messages, while
//! tracking which sessions the connection owns. A connection owns at most
//! one session at a time; a second `create_session` force-closes the
//! previous one first.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use webterm_protocol::{
    ClientMessage, Connected, OutputData, ServerMessage, SessionCreated, SessionRef,
    SessionTimeoutWarning,
};

use crate::filter::{CommandFilter, Verdict};
use crate::session::{SessionEvent, SessionId, SessionRegistry};

/// Error text for operations on a session the connection cannot use.
const INVALID_SESSION: &str = "Invalid or closed session";

/// The sessions a connection is responsible for, capacity-limited.
///
/// Inserting into a full set first evicts the oldest entries; the caller
/// closes the evicted sessions before the insert takes effect.
#[derive(Debug)]
pub struct OwnedSessions {
    capacity: usize,
    ids: VecDeque<SessionId>,
}

impl OwnedSessions {
    /// Creates an empty set holding at most `capacity` sessions.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ids: VecDeque::new(),
        }
    }

    /// Removes and returns the oldest entries that must be closed before
    /// one more session can be inserted.
    pub fn evict_for_insert(&mut self) -> Vec<SessionId> {
        let mut evicted = Vec::new();
        while self.ids.len() >= self.capacity {
            if let Some(id) = self.ids.pop_front() {
                evicted.push(id);
            }
        }
        evicted
    }

    /// Inserts a session id. Call [`Self::evict_for_insert`] first.
    pub fn insert(&mut self, id: SessionId) {
        self.ids.push_back(id);
    }

    /// Removes a session id, returning whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|owned| owned != id);
        self.ids.len() < before
    }

    /// Whether the connection owns `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|owned| owned == id)
    }

    /// Removes and returns every owned id.
    pub fn drain_all(&mut self) -> Vec<SessionId> {
        self.ids.drain(..).collect()
    }

    /// Snapshot of the owned ids.
    pub fn ids(&self) -> Vec<SessionId> {
        self.ids.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Protocol handler for one authenticated connection.
pub struct Connection {
    registry: Arc<SessionRegistry>,
    filter: Arc<CommandFilter>,
    user_id: String,
    owned: OwnedSessions,
    sink: mpsc::UnboundedSender<SessionEvent>,
    torn_down: bool,
}

impl Connection {
    /// Creates a handler for `user_id` and returns it with the receiver the
    /// transport must drain for session events.
    pub fn new(
        registry: Arc<SessionRegistry>,
        filter: Arc<CommandFilter>,
        user_id: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (sink, events) = mpsc::unbounded_channel();
        (
            Self {
                registry,
                filter,
                user_id: user_id.into(),
                owned: OwnedSessions::new(1),
                sink,
                torn_down: false,
            },
            events,
        )
    }

    /// The authenticated principal that owns this connection.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The handshake confirmation for this connection.
    pub fn hello(&self) -> ServerMessage {
        ServerMessage::Connected(Connected {
            user_id: self.user_id.clone(),
        })
    }

    /// Handles one inbound message and returns the direct responses.
    ///
    /// Output, warnings, and close notifications arrive asynchronously
    /// through the event receiver, not as return values here.
    pub async fn handle_message(&mut self, message: ClientMessage) -> Vec<ServerMessage> {
        match message {
            ClientMessage::CreateSession {} => self.create_session().await,
            ClientMessage::InputCommand(input) => {
                self.input_command(&input.session_id, &input.command).await
            }
            ClientMessage::Resize(resize) => {
                self.resize(&resize.session_id, resize.cols, resize.rows).await
            }
            ClientMessage::AcknowledgeWarning(r) => self.acknowledge_warning(&r.session_id).await,
            ClientMessage::CloseSession(r) => self.close_session(&r.session_id).await,
            ClientMessage::ListSessions {} => self.list_sessions().await,
            ClientMessage::Ping(ping) => self.ping(ping.timestamp).await,
        }
    }

    /// Converts a registry event into the outbound message for the client.
    ///
    /// Returns `None` for a close notification the client has already seen
    /// through a direct response (force-close on create).
    pub fn handle_event(&mut self, event: SessionEvent) -> Option<ServerMessage> {
        match event {
            SessionEvent::Output { session_id, data } => {
                Some(ServerMessage::OutputData(OutputData {
                    session_id,
                    data: String::from_utf8_lossy(&data).into_owned(),
                }))
            }
            SessionEvent::TimeoutWarning {
                session_id,
                remaining,
            } => {
                debug!(user = %self.user_id, session_id = %session_id, "Relaying idle warning");
                Some(ServerMessage::SessionTimeoutWarning(SessionTimeoutWarning {
                    session_id,
                    remaining_time: remaining.as_millis() as u64,
                }))
            }
            SessionEvent::Closed { session_id } => {
                if self.owned.remove(&session_id) {
                    Some(ServerMessage::SessionClosed(SessionRef { session_id }))
                } else {
                    None
                }
            }
        }
    }

    /// Closes every session this connection still owns.
    ///
    /// Runs the sweep at most once even when teardown triggers race
    /// (socket error plus explicit logout); the underlying close is
    /// idempotent regardless.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let ids = self.owned.drain_all();
        if !ids.is_empty() {
            info!(
                user = %self.user_id,
                sessions = ids.len(),
                "Closing sessions on disconnect"
            );
        }
        for id in ids {
            self.registry.close(&id).await;
        }
    }

    async fn create_session(&mut self) -> Vec<ServerMessage> {
        let mut responses = Vec::new();

        // One session per connection: the previous one goes first, and its
        // session_closed precedes the new session_created on the wire. The
        // eviction drops it from the owned set, which also suppresses the
        // duplicate close notification from the event path.
        for stale in self.owned.evict_for_insert() {
            info!(
                user = %self.user_id,
                session_id = %stale,
                "Closing existing session on new create request"
            );
            self.registry.close(&stale).await;
            responses.push(ServerMessage::SessionClosed(SessionRef {
                session_id: stale,
            }));
        }

        match self.registry.create(&self.user_id, self.sink.clone()).await {
            Ok(created) => {
                self.owned.insert(created.id.clone());
                responses.push(ServerMessage::SessionCreated(SessionCreated {
                    session_id: created.id,
                    stats: created.stats,
                }));
            }
            Err(e) => {
                warn!(user = %self.user_id, error = %e, "Session creation failed");
                responses.push(ServerMessage::error(e.to_string()));
            }
        }
        responses
    }

    async fn input_command(&mut self, session_id: &str, command: &str) -> Vec<ServerMessage> {
        if !self.owned.contains(session_id) {
            return vec![ServerMessage::error(INVALID_SESSION)];
        }

        if self.filter.enabled() {
            if let Verdict::Denied { reason } = self.filter.check(command) {
                warn!(user = %self.user_id, session_id = %session_id, %reason, "Command rejected");
                return vec![ServerMessage::error(reason)];
            }
        }

        if self.registry.write(session_id, command.as_bytes()).await {
            vec![]
        } else {
            vec![ServerMessage::error(INVALID_SESSION)]
        }
    }

    async fn resize(&mut self, session_id: &str, cols: u16, rows: u16) -> Vec<ServerMessage> {
        if !self.owned.contains(session_id) {
            return vec![ServerMessage::error(INVALID_SESSION)];
        }

        if self.registry.resize(session_id, cols, rows).await {
            vec![]
        } else {
            vec![ServerMessage::error(INVALID_SESSION)]
        }
    }

    async fn acknowledge_warning(&mut self, session_id: &str) -> Vec<ServerMessage> {
        if !self.owned.contains(session_id) {
            return vec![ServerMessage::error(INVALID_SESSION)];
        }

        if self.registry.acknowledge_warning(session_id).await {
            vec![ServerMessage::WarningAcknowledged(SessionRef {
                session_id: session_id.to_string(),
            })]
        } else {
            vec![ServerMessage::error(INVALID_SESSION)]
        }
    }

    async fn close_session(&mut self, session_id: &str) -> Vec<ServerMessage> {
        // Idempotent and never an error: a close may race a timeout, a
        // process exit, or reference a session already force-closed. The
        // session stays in the owned set until its closed event comes back,
        // which is what emits the session_closed notification.
        if self.owned.contains(session_id) {
            self.registry.close(session_id).await;
        } else {
            debug!(
                user = %self.user_id,
                session_id = %session_id,
                "Close request for session not owned by this connection"
            );
        }
        vec![]
    }

    async fn list_sessions(&self) -> Vec<ServerMessage> {
        let sessions = self.registry.sessions_for(&self.user_id).await;
        vec![ServerMessage::SessionsList(sessions)]
    }

    async fn ping(&mut self, timestamp: u64) -> Vec<ServerMessage> {
        // A heartbeat proves the user is still there even when the shell is
        // silent; it refreshes every owned session's idle clock.
        for id in self.owned.ids() {
            self.registry.refresh(&id).await;
        }
        vec![ServerMessage::Pong(webterm_protocol::Ping { timestamp })]
    }
}
