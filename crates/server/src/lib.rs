//! # WebTerm Server Library
//!
//! Shell sessions for the browser, multiplexed over a WebSocket.
//!
//! The server lets authenticated users spawn remote shell sessions and
//! interact with them from a terminal display in the browser. The core is
//! the session registry: it owns the mapping between a connection, a user,
//! and at most one live shell process; enforces the global capacity limit;
//! and runs the two-stage idle-timeout protocol (warning, then close).
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      axum router                          │
//! │   /api/auth/login   /api/auth/verify   /api/status   /ws  │
//! ├───────────────────────────────────────────────────────────┤
//! │              Connection protocol handler                  │
//! │        (one per socket, owns at most one session)         │
//! ├───────────────────────────────────────────────────────────┤
//! │                    Session registry                       │
//! │   capacity · idle timers · idempotent close · events      │
//! ├───────────────────────────────────────────────────────────┤
//! │               PTY provisioning (portable-pty)             │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`]: configuration loading and validation
//! - [`auth`]: user store and bearer tokens
//! - [`filter`]: command text filtering
//! - [`session`]: PTY provisioning and the session registry
//! - [`connection`]: per-connection protocol handling
//! - [`http`]: axum routes and the WebSocket loop

pub mod auth;
pub mod config;
pub mod connection;
pub mod filter;
pub mod http;
pub mod session;

// Re-export protocol for convenience
pub use webterm_protocol as protocol;

pub use auth::{AuthError, AuthService};
pub use config::Config;
pub use connection::{Connection, OwnedSessions};
pub use filter::{CommandFilter, Verdict};
pub use http::{build_router, AppState};
pub use session::{
    PtySpawner, RegistryError, SessionEvent, SessionRegistry, ShellSpawner, SpawnSpec,
    TimeoutPolicy,
};
