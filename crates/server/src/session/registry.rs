//! Session registry and lifecycle management.
//!
//! The registry owns every live shell session: it enforces the global
//! capacity limit, serializes mutations per session, runs the two-stage
//! idle-timeout scheduler (warning, then close), and bridges process output
//! and process exit back to the connection that owns each session.
//!
//! Closing is idempotent by construction: explicit requests, idle timeouts,
//! process exits, and disconnect sweeps all funnel into the same path, and
//! only the caller that flips the session to `Closed` under its lock tears
//! it down and decrements the count.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use webterm_protocol::{SessionOverview, SessionStats};

use super::pty::{ProcessHandle, PtyError, ShellSpawner, SpawnSpec};

/// Unique identifier for a session.
pub type SessionId = String;

/// Identity of an authenticated user.
pub type UserId = String;

/// Events delivered to the connection that owns a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Raw output bytes from the shell, in production order.
    Output {
        session_id: SessionId,
        data: Vec<u8>,
    },
    /// The idle warning fired; the session closes in `remaining` unless
    /// activity or an acknowledgment arrives.
    TimeoutWarning {
        session_id: SessionId,
        remaining: Duration,
    },
    /// The session is gone, whatever the trigger.
    Closed { session_id: SessionId },
}

/// Channel end the registry pushes session events into.
pub type EventSink = mpsc::UnboundedSender<SessionEvent>;

/// Errors surfaced by registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The registry is at its configured capacity.
    #[error("Maximum sessions reached")]
    CapacityExceeded,

    /// The shell process could not be provisioned.
    #[error("failed to provision shell process: {0}")]
    Provisioning(#[from] PtyError),
}

/// Idle-timeout parameters.
///
/// A session with no activity receives a warning after
/// `idle_timeout - warning_lead` and is closed after `idle_timeout`.
/// Configuration validation guarantees `warning_lead < idle_timeout`.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    /// Total idle budget before forced closure.
    pub idle_timeout: Duration,
    /// How long before the close the one-time warning fires.
    pub warning_lead: Duration,
}

/// Result of a successful `create`.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    /// Identifier of the new session.
    pub id: SessionId,
    /// Creation instant, epoch milliseconds.
    pub created_at: u64,
    /// Occupancy after the creation.
    pub stats: SessionStats,
}

/// Lifecycle state of a session. Transitions are forward-only;
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Active,
    WarningIssued,
    Closed,
}

/// All bookkeeping for one live session. Mutations go through the entry's
/// async mutex, which is what serializes racing operations per session id.
struct SessionEntry {
    id: SessionId,
    owner: UserId,
    process: Box<dyn ProcessHandle>,
    created_at: u64,
    created_seq: u64,
    state: SessionState,
    /// Bumped on every timer re-arm and on close; a fired timer callback
    /// acts only if it still carries the current value, which removes the
    /// cancel-and-reschedule race window.
    timer_generation: u64,
    sink: EventSink,
}

/// The session registry.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Mutex<SessionEntry>>>,
    /// Count of non-closed sessions. Capacity checks and count updates
    /// happen under this one lock so concurrent creates can never
    /// both take the last slot.
    admitted: Mutex<usize>,
    creation_seq: AtomicU64,
    spawner: Arc<dyn ShellSpawner>,
    policy: TimeoutPolicy,
    max_sessions: usize,
    spawn_spec: SpawnSpec,
    exit_tx: mpsc::UnboundedSender<SessionId>,
}

impl SessionRegistry {
    /// Creates a registry and starts its process-exit listener.
    pub fn new(
        spawner: Arc<dyn ShellSpawner>,
        max_sessions: usize,
        policy: TimeoutPolicy,
        spawn_spec: SpawnSpec,
    ) -> Arc<Self> {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();

        let registry = Arc::new(Self {
            sessions: DashMap::new(),
            admitted: Mutex::new(0),
            creation_seq: AtomicU64::new(0),
            spawner,
            policy,
            max_sessions,
            spawn_spec,
            exit_tx,
        });

        registry.start_exit_listener(exit_rx);
        registry
    }

    /// Creates a new session for `owner`, delivering its events to `sink`.
    ///
    /// Fails fast with [`RegistryError::CapacityExceeded`] when the registry
    /// is full; creation is never queued.
    pub async fn create(
        self: &Arc<Self>,
        owner: &str,
        sink: EventSink,
    ) -> Result<CreatedSession, RegistryError> {
        let mut admitted = self.admitted.lock().await;
        if *admitted >= self.max_sessions {
            return Err(RegistryError::CapacityExceeded);
        }

        let spawned = self.spawner.spawn(&self.spawn_spec)?;

        *admitted += 1;
        let count = *admitted;
        drop(admitted);

        let created_seq = self.creation_seq.fetch_add(1, Ordering::Relaxed);
        let created_at = now_millis();
        // The sequence keeps ids unique even when one user creates
        // concurrently within the same millisecond.
        let id = format!("{}-{}-{}", owner, created_at, created_seq);

        let entry = Arc::new(Mutex::new(SessionEntry {
            id: id.clone(),
            owner: owner.to_string(),
            process: spawned.handle,
            created_at,
            created_seq,
            state: SessionState::Active,
            timer_generation: 0,
            sink: sink.clone(),
        }));
        self.sessions.insert(id.clone(), Arc::clone(&entry));

        self.start_output_bridge(id.clone(), spawned.output, sink);

        {
            let mut guard = entry.lock().await;
            self.arm_timers(&mut guard);
        }

        info!(session_id = %id, owner = %owner, count, "Session created");

        Ok(CreatedSession {
            id,
            created_at,
            stats: SessionStats {
                total_sessions: count,
                max_sessions: self.max_sessions,
            },
        })
    }

    /// Pure lookup; never mutates.
    pub async fn get(&self, id: &str) -> Option<SessionOverview> {
        let entry = self.entry(id)?;
        let entry = entry.lock().await;
        if entry.state == SessionState::Closed {
            return None;
        }
        Some(SessionOverview {
            id: entry.id.clone(),
            created_at: entry.created_at,
        })
    }

    /// Forwards input to the session's shell and resets the idle clock.
    ///
    /// Returns whether the write was applied; an absent or closed session is
    /// a no-op, not an error.
    pub async fn write(self: &Arc<Self>, id: &str, data: &[u8]) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        let mut entry = entry.lock().await;
        if entry.state == SessionState::Closed {
            return false;
        }

        if let Err(e) = entry.process.write(data) {
            // The process is on its way out; the exit path will close the
            // session shortly.
            warn!(session_id = %id, error = %e, "Write to shell failed");
        }

        entry.state = SessionState::Active;
        self.arm_timers(&mut entry);
        true
    }

    /// Propagates a terminal geometry change; counts as activity.
    pub async fn resize(self: &Arc<Self>, id: &str, cols: u16, rows: u16) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        let mut entry = entry.lock().await;
        if entry.state == SessionState::Closed {
            return false;
        }

        if let Err(e) = entry.process.resize(cols, rows) {
            warn!(session_id = %id, error = %e, "Resize failed");
        }

        entry.state = SessionState::Active;
        self.arm_timers(&mut entry);
        debug!(session_id = %id, cols, rows, "Session resized");
        true
    }

    /// Resets the idle clock without touching the shell. Used for
    /// heartbeats, which prove liveness even with no terminal I/O.
    pub async fn refresh(self: &Arc<Self>, id: &str) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        let mut entry = entry.lock().await;
        if entry.state == SessionState::Closed {
            return false;
        }

        entry.state = SessionState::Active;
        self.arm_timers(&mut entry);
        true
    }

    /// Acknowledges a pending idle warning, cancelling the scheduled close
    /// and restarting the full idle window from now.
    pub async fn acknowledge_warning(self: &Arc<Self>, id: &str) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        let mut entry = entry.lock().await;
        if entry.state == SessionState::Closed {
            return false;
        }

        entry.state = SessionState::Active;
        self.arm_timers(&mut entry);
        debug!(session_id = %id, "Idle warning acknowledged");
        true
    }

    /// Closes a session: cancels its timers, destroys the process, removes
    /// the entry, decrements the count, and notifies the owning connection.
    ///
    /// Idempotent: closing an unknown or already-closed session is a no-op,
    /// because explicit requests, idle timeouts, and process exits are
    /// expected to race. Returns whether this call performed the close.
    pub async fn close(&self, id: &str) -> bool {
        self.close_with(id, None, "request").await
    }

    async fn close_with(&self, id: &str, expected_generation: Option<u64>, reason: &str) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        let mut entry = entry.lock().await;
        if entry.state == SessionState::Closed {
            return false;
        }
        if let Some(generation) = expected_generation {
            // A stale close timer; the session saw activity since.
            if entry.timer_generation != generation {
                return false;
            }
        }

        entry.state = SessionState::Closed;
        entry.timer_generation += 1;

        if let Err(e) = entry.process.destroy() {
            warn!(session_id = %id, error = %e, "Failed to destroy shell process");
        }
        let sink = entry.sink.clone();
        let session_id = entry.id.clone();
        drop(entry);

        self.sessions.remove(id);
        let mut admitted = self.admitted.lock().await;
        *admitted -= 1;
        let count = *admitted;
        drop(admitted);

        // Notify last: a client that sees the closed notification and
        // immediately retries a create must find the slot free.
        let _ = sink.send(SessionEvent::Closed { session_id });

        info!(session_id = %id, reason, count, "Session closed");
        true
    }

    /// Snapshot of `owner`'s live sessions, in creation order.
    pub async fn sessions_for(&self, owner: &str) -> Vec<SessionOverview> {
        let entries: Vec<Arc<Mutex<SessionEntry>>> = self
            .sessions
            .iter()
            .map(|item| Arc::clone(item.value()))
            .collect();

        let mut matching = Vec::new();
        for entry in entries {
            let entry = entry.lock().await;
            if entry.state != SessionState::Closed && entry.owner == owner {
                matching.push((
                    entry.created_seq,
                    SessionOverview {
                        id: entry.id.clone(),
                        created_at: entry.created_at,
                    },
                ));
            }
        }

        matching.sort_by_key(|(seq, _)| *seq);
        matching.into_iter().map(|(_, overview)| overview).collect()
    }

    /// Current occupancy.
    pub async fn stats(&self) -> SessionStats {
        SessionStats {
            total_sessions: *self.admitted.lock().await,
            max_sessions: self.max_sessions,
        }
    }

    /// Number of live sessions.
    pub async fn count(&self) -> usize {
        *self.admitted.lock().await
    }

    fn entry(&self, id: &str) -> Option<Arc<Mutex<SessionEntry>>> {
        self.sessions.get(id).map(|item| Arc::clone(item.value()))
    }

    /// Forwards process output to the owning connection and reports the
    /// process exit (output channel EOF) into the close path.
    fn start_output_bridge(
        self: &Arc<Self>,
        id: SessionId,
        mut output: mpsc::UnboundedReceiver<Vec<u8>>,
        sink: EventSink,
    ) {
        let exit_tx = self.exit_tx.clone();
        tokio::spawn(async move {
            while let Some(chunk) = output.recv().await {
                // Chunks arrive and are forwarded in production order,
                // untouched; interpretation is the display layer's job.
                let _ = sink.send(SessionEvent::Output {
                    session_id: id.clone(),
                    data: chunk,
                });
            }
            // EOF: the shell exited, or destroy() closed the terminal.
            let _ = exit_tx.send(id);
        });
    }

    /// Consumes process-exit notifications, funnelling them into the same
    /// idempotent close path as explicit and timeout closes.
    fn start_exit_listener(self: &Arc<Self>, mut exit_rx: mpsc::UnboundedReceiver<SessionId>) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(id) = exit_rx.recv().await {
                if registry.close_with(&id, None, "process exit").await {
                    debug!(session_id = %id, "Closed after process exit");
                }
            }
        });
    }

    /// Re-arms the two-stage idle timer for a session.
    ///
    /// Bumping the generation invalidates both previously scheduled
    /// callbacks before the new ones are armed, so the old and new timers
    /// can never both fire.
    fn arm_timers(self: &Arc<Self>, entry: &mut SessionEntry) {
        entry.timer_generation += 1;
        let generation = entry.timer_generation;
        let id = entry.id.clone();

        let warning_lead = self.policy.warning_lead;
        let warn_after = self.policy.idle_timeout - warning_lead;

        let registry = Arc::clone(self);
        let warn_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(warn_after).await;
            registry.fire_warning(&warn_id, generation).await;
        });

        let registry = Arc::clone(self);
        let idle_timeout = self.policy.idle_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(idle_timeout).await;
            registry.close_with(&id, Some(generation), "idle timeout").await;
        });
    }

    async fn fire_warning(&self, id: &str, generation: u64) {
        let Some(entry) = self.entry(id) else {
            return;
        };
        let mut entry = entry.lock().await;
        if entry.timer_generation != generation || entry.state != SessionState::Active {
            return;
        }

        entry.state = SessionState::WarningIssued;
        let _ = entry.sink.send(SessionEvent::TimeoutWarning {
            session_id: entry.id.clone(),
            remaining: self.policy.warning_lead,
        });
        debug!(session_id = %id, "Idle timeout warning issued");
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::pty::mock::MockSpawner;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::{timeout, Instant};

    const IDLE: Duration = Duration::from_millis(300_000);
    const LEAD: Duration = Duration::from_millis(30_000);

    fn test_policy() -> TimeoutPolicy {
        TimeoutPolicy {
            idle_timeout: IDLE,
            warning_lead: LEAD,
        }
    }

    fn registry_with(
        max_sessions: usize,
    ) -> (Arc<SessionRegistry>, Arc<MockSpawner>) {
        let spawner = Arc::new(MockSpawner::new());
        let registry = SessionRegistry::new(
            Arc::clone(&spawner) as Arc<dyn ShellSpawner>,
            max_sessions,
            test_policy(),
            SpawnSpec::default(),
        );
        (registry, spawner)
    }

    fn sink() -> (EventSink, UnboundedReceiver<SessionEvent>) {
        mpsc::unbounded_channel()
    }

    async fn recv(rx: &mut UnboundedReceiver<SessionEvent>) -> SessionEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (registry, _spawner) = registry_with(10);
        let (tx, _rx) = sink();

        let created = registry.create("alice", tx).await.unwrap();
        assert!(created.id.starts_with("alice-"));
        assert_eq!(created.stats.total_sessions, 1);
        assert_eq!(created.stats.max_sessions, 10);

        let overview = registry.get(&created.id).await.unwrap();
        assert_eq!(overview.id, created.id);
        assert_eq!(overview.created_at, created.created_at);

        assert!(registry.get("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn test_session_ids_unique_for_same_user() {
        let (registry, _spawner) = registry_with(10);
        let (tx, _rx) = sink();

        let a = registry.create("alice", tx.clone()).await.unwrap();
        let b = registry.create("alice", tx).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_capacity_enforced() {
        let (registry, _spawner) = registry_with(1);
        let (tx, _rx) = sink();

        let first = registry.create("alice", tx.clone()).await.unwrap();

        let second = registry.create("bob", tx.clone()).await;
        assert!(matches!(second, Err(RegistryError::CapacityExceeded)));

        // Freeing the slot lets the retry succeed.
        assert!(registry.close(&first.id).await);
        let retry = registry.create("bob", tx).await;
        assert!(retry.is_ok());
    }

    #[tokio::test]
    async fn test_spawn_failure_does_not_consume_capacity() {
        let (registry, spawner) = registry_with(1);
        let (tx, _rx) = sink();

        spawner.fail();
        let result = registry.create("alice", tx.clone()).await;
        assert!(matches!(result, Err(RegistryError::Provisioning(_))));
        assert_eq!(registry.count().await, 0);

        spawner.fail_spawn.store(false, std::sync::atomic::Ordering::SeqCst);
        assert!(registry.create("alice", tx).await.is_ok());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (registry, spawner) = registry_with(10);
        let (tx, mut rx) = sink();

        let created = registry.create("alice", tx).await.unwrap();
        assert_eq!(registry.count().await, 1);

        assert!(registry.close(&created.id).await);
        assert!(!registry.close(&created.id).await);
        assert!(!registry.close("nonexistent").await);

        assert_eq!(registry.count().await, 0);
        assert!(spawner.process(0).was_destroyed());

        // Exactly one closed notification.
        assert_eq!(
            recv(&mut rx).await,
            SessionEvent::Closed {
                session_id: created.id.clone()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_forwards_to_process() {
        let (registry, spawner) = registry_with(10);
        let (tx, _rx) = sink();

        let created = registry.create("alice", tx).await.unwrap();
        assert!(registry.write(&created.id, b"ls -la\r").await);
        assert_eq!(spawner.process(0).written(), b"ls -la\r");

        assert!(!registry.write("nonexistent", b"x").await);
    }

    #[tokio::test]
    async fn test_resize_forwards_geometry() {
        let (registry, spawner) = registry_with(10);
        let (tx, _rx) = sink();

        let created = registry.create("alice", tx).await.unwrap();
        assert!(registry.resize(&created.id, 120, 40).await);
        assert_eq!(spawner.process(0).resizes.lock().unwrap()[0], (120, 40));
    }

    #[tokio::test]
    async fn test_write_after_close_is_noop() {
        let (registry, spawner) = registry_with(10);
        let (tx, _rx) = sink();

        let created = registry.create("alice", tx).await.unwrap();
        registry.close(&created.id).await;

        assert!(!registry.write(&created.id, b"x").await);
        assert!(!registry.resize(&created.id, 10, 10).await);
        assert!(!registry.acknowledge_warning(&created.id).await);
        assert!(spawner.process(0).written().is_empty());
    }

    #[tokio::test]
    async fn test_output_forwarded_in_order() {
        let (registry, spawner) = registry_with(10);
        let (tx, mut rx) = sink();

        let created = registry.create("alice", tx).await.unwrap();
        let process = spawner.process(0);
        for i in 0..10u8 {
            process.push_output(&[i]);
        }

        for i in 0..10u8 {
            assert_eq!(
                recv(&mut rx).await,
                SessionEvent::Output {
                    session_id: created.id.clone(),
                    data: vec![i],
                }
            );
        }
    }

    #[tokio::test]
    async fn test_process_exit_closes_session() {
        let (registry, spawner) = registry_with(10);
        let (tx, mut rx) = sink();

        let created = registry.create("alice", tx).await.unwrap();
        spawner.process(0).simulate_exit();

        assert_eq!(
            recv(&mut rx).await,
            SessionEvent::Closed {
                session_id: created.id.clone()
            }
        );
        assert_eq!(registry.count().await, 0);

        // A late explicit close is a harmless no-op.
        assert!(!registry.close(&created.id).await);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_sessions_for_in_creation_order() {
        let (registry, _spawner) = registry_with(10);
        let (tx, _rx) = sink();

        let a = registry.create("alice", tx.clone()).await.unwrap();
        let b = registry.create("bob", tx.clone()).await.unwrap();
        let c = registry.create("alice", tx).await.unwrap();

        let alice = registry.sessions_for("alice").await;
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].id, a.id);
        assert_eq!(alice[1].id, c.id);

        let bob = registry.sessions_for("bob").await;
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].id, b.id);

        assert!(registry.sessions_for("mallory").await.is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let (registry, _spawner) = registry_with(3);
        let (tx, _rx) = sink();

        let stats = registry.stats().await;
        assert_eq!(stats.total_sessions, 0);
        assert_eq!(stats.max_sessions, 3);

        registry.create("alice", tx).await.unwrap();
        assert_eq!(registry.stats().await.total_sessions, 1);
    }

    // Timer behavior runs against the paused clock: awaiting the event
    // channel auto-advances virtual time to the next armed deadline. The
    // bare `recv` (no timeout wrapper) is deliberate: a wall-clock timeout
    // would itself become the next deadline under the paused clock.

    async fn recv_paused(rx: &mut UnboundedReceiver<SessionEvent>) -> SessionEvent {
        rx.recv().await.expect("event channel closed")
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_warns_then_closes() {
        let (registry, _spawner) = registry_with(10);
        let (tx, mut rx) = sink();
        let start = Instant::now();

        let created = registry.create("alice", tx).await.unwrap();

        let warning = recv_paused(&mut rx).await;
        assert_eq!(
            warning,
            SessionEvent::TimeoutWarning {
                session_id: created.id.clone(),
                remaining: LEAD,
            }
        );
        let warned_at = start.elapsed();
        assert!(warned_at >= IDLE - LEAD && warned_at < IDLE - LEAD + Duration::from_secs(1));

        let closed = recv_paused(&mut rx).await;
        assert_eq!(
            closed,
            SessionEvent::Closed {
                session_id: created.id.clone()
            }
        );
        let closed_at = start.elapsed();
        assert!(closed_at >= IDLE && closed_at < IDLE + Duration::from_secs(1));

        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_restarts_full_window() {
        let (registry, _spawner) = registry_with(10);
        let (tx, mut rx) = sink();
        let start = Instant::now();

        let created = registry.create("alice", tx).await.unwrap();

        // First warning at T - w.
        let _ = recv_paused(&mut rx).await;
        tokio::time::advance(Duration::from_millis(5_000)).await;

        // Acknowledge at ~275s; the close armed for 300s must not fire.
        assert!(registry.acknowledge_warning(&created.id).await);

        let warning = recv_paused(&mut rx).await;
        assert!(matches!(warning, SessionEvent::TimeoutWarning { .. }));
        // Next warning fires a full window after the acknowledgment
        // (~275s + 270s), not at the original 300s deadline.
        let warned_at = start.elapsed();
        let expected = Duration::from_millis(275_000) + (IDLE - LEAD);
        assert!(
            warned_at >= expected && warned_at < expected + Duration::from_secs(1),
            "second warning at {:?}",
            warned_at
        );

        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_resets_idle_window() {
        let (registry, _spawner) = registry_with(10);
        let (tx, mut rx) = sink();
        let start = Instant::now();

        let created = registry.create("alice", tx).await.unwrap();

        tokio::time::advance(Duration::from_millis(200_000)).await;
        assert!(registry.write(&created.id, b"k").await);

        let warning = recv_paused(&mut rx).await;
        assert!(matches!(warning, SessionEvent::TimeoutWarning { .. }));
        let warned_at = start.elapsed();
        let expected = Duration::from_millis(200_000) + (IDLE - LEAD);
        assert!(
            warned_at >= expected && warned_at < expected + Duration::from_secs(1),
            "warning at {:?}",
            warned_at
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_withdraws_issued_warning() {
        let (registry, _spawner) = registry_with(10);
        let (tx, mut rx) = sink();

        let created = registry.create("alice", tx).await.unwrap();

        // Let the warning fire, then type something.
        let _ = recv_paused(&mut rx).await;
        assert!(registry.write(&created.id, b"k").await);

        // The next event is another warning a full lead-window later, not
        // the close of the withdrawn warning.
        let next = recv_paused(&mut rx).await;
        assert!(matches!(next, SessionEvent::TimeoutWarning { .. }));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_refresh_defers_timeout() {
        let (registry, _spawner) = registry_with(10);
        let (tx, mut rx) = sink();
        let start = Instant::now();

        let created = registry.create("alice", tx).await.unwrap();

        tokio::time::advance(Duration::from_millis(100_000)).await;
        assert!(registry.refresh(&created.id).await);

        let _ = recv_paused(&mut rx).await;
        let warned_at = start.elapsed();
        let expected = Duration::from_millis(100_000) + (IDLE - LEAD);
        assert!(
            warned_at >= expected && warned_at < expected + Duration::from_secs(1),
            "warning at {:?}",
            warned_at
        );
    }
}
