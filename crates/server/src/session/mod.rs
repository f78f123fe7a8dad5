//! Shell session management: PTY provisioning, the session registry, and
//! the idle-timeout scheduler.

pub mod pty;
pub mod registry;

pub use pty::{ProcessHandle, PtyError, PtySpawner, ShellSpawner, SpawnSpec, SpawnedProcess};
pub use registry::{
    CreatedSession, EventSink, RegistryError, SessionEvent, SessionId, SessionRegistry,
    TimeoutPolicy, UserId,
};
