//! PTY provisioning for shell sessions.
//!
//! This module owns the boundary to the operating system: spawning a shell
//! behind a pseudo-terminal, pumping its output into a channel, and killing
//! it on close. Everything above this layer talks to the [`ShellSpawner`]
//! trait, which keeps the registry testable without real processes.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Buffer size for reading from the PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Errors that can occur while provisioning or driving a PTY process.
#[derive(Error, Debug)]
pub enum PtyError {
    /// The shell process could not be spawned.
    #[error("failed to spawn shell process: {0}")]
    SpawnFailed(String),

    /// Writing to the process input stream failed.
    #[error("failed to write to shell process: {0}")]
    WriteFailed(String),

    /// Resizing the terminal failed.
    #[error("failed to resize terminal: {0}")]
    ResizeFailed(String),

    /// Killing the process failed.
    #[error("failed to destroy shell process: {0}")]
    DestroyFailed(String),

    /// The process has already exited.
    #[error("shell process has exited")]
    ProcessExited,
}

/// Parameters for spawning a shell process.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Shell command to run. `None` means `$SHELL`, falling back to /bin/sh.
    pub shell: Option<String>,
    /// Initial terminal width in columns.
    pub cols: u16,
    /// Initial terminal height in rows.
    pub rows: u16,
    /// Working directory. `None` means `$HOME`, falling back to the
    /// current directory.
    pub cwd: Option<String>,
    /// Additional environment variables for the shell.
    pub env: Vec<(String, String)>,
}

impl Default for SpawnSpec {
    fn default() -> Self {
        Self {
            shell: None,
            cols: 80,
            rows: 24,
            cwd: None,
            env: Vec::new(),
        }
    }
}

/// Control handle to a live pseudo-terminal-backed process.
///
/// The handle's owner (the session entry) is the sole owner of the process:
/// dropping the session always goes through `destroy`.
pub trait ProcessHandle: Send + Sync {
    /// Writes input bytes to the process, unbuffered.
    fn write(&self, data: &[u8]) -> Result<(), PtyError>;

    /// Propagates a terminal geometry change to the process.
    fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError>;

    /// Kills the process and reaps it. Idempotent.
    fn destroy(&self) -> Result<(), PtyError>;

    /// Process ID of the shell, if known.
    fn pid(&self) -> Option<u32>;
}

/// A freshly spawned process: its control handle plus the output stream.
///
/// The output channel yields raw byte chunks in the order the process
/// produced them and closes when the process exits (reader EOF).
pub struct SpawnedProcess {
    /// Control handle.
    pub handle: Box<dyn ProcessHandle>,
    /// Output stream; closed on process exit.
    pub output: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// The provisioning collaborator consumed by the session registry.
pub trait ShellSpawner: Send + Sync {
    /// Spawns a new shell process behind a pseudo-terminal.
    fn spawn(&self, spec: &SpawnSpec) -> Result<SpawnedProcess, PtyError>;
}

/// Resolves the shell command to run.
///
/// Preference order: the configured shell, then `$SHELL`, then /bin/sh.
pub fn detect_shell(shell: Option<&str>) -> String {
    if let Some(s) = shell {
        return s.to_string();
    }
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

/// Resolves the working directory for a new shell.
fn detect_cwd(cwd: Option<&str>) -> String {
    if let Some(dir) = cwd {
        return dir.to_string();
    }
    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
}

/// Real PTY provisioning via portable-pty.
pub struct PtySpawner;

impl PtySpawner {
    /// Creates a new spawner.
    pub fn new() -> Self {
        Self
    }
}

impl Default for PtySpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellSpawner for PtySpawner {
    fn spawn(&self, spec: &SpawnSpec) -> Result<SpawnedProcess, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        let shell = detect_shell(spec.shell.as_deref());
        let mut cmd = CommandBuilder::new(&shell);
        cmd.cwd(detect_cwd(spec.cwd.as_deref()));
        cmd.env("TERM", "xterm-color");
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        let pid = child.process_id();

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        start_reader(reader, output_tx);

        let handle = PtyProcess {
            writer: Mutex::new(writer),
            master: Mutex::new(pair.master),
            child: Mutex::new(child),
            alive: AtomicBool::new(true),
            pid,
        };

        Ok(SpawnedProcess {
            handle: Box::new(handle),
            output: output_rx,
        })
    }
}

/// Pumps PTY output into the channel from a blocking thread.
///
/// Dropping the sender on EOF or read error is what signals process exit to
/// the layer above.
fn start_reader(mut reader: Box<dyn Read + Send>, output_tx: mpsc::UnboundedSender<Vec<u8>>) {
    tokio::task::spawn_blocking(move || {
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if output_tx.send(buffer[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "PTY read ended");
                    break;
                }
            }
        }
    });
}

/// A shell process behind a real PTY.
struct PtyProcess {
    writer: Mutex<Box<dyn Write + Send>>,
    /// Kept alive for the lifetime of the process; dropping the master
    /// closes the terminal under the shell.
    master: Mutex<Box<dyn MasterPty + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    alive: AtomicBool,
    pid: Option<u32>,
}

impl ProcessHandle for PtyProcess {
    fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(PtyError::ProcessExited);
        }
        let mut writer = self.writer.lock().unwrap();
        writer
            .write_all(data)
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(PtyError::ProcessExited);
        }
        self.master
            .lock()
            .unwrap()
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))
    }

    fn destroy(&self) -> Result<(), PtyError> {
        if self.alive.swap(false, Ordering::SeqCst) {
            let mut child = self.child.lock().unwrap();
            child
                .kill()
                .map_err(|e| PtyError::DestroyFailed(e.to_string()))?;
            child
                .wait()
                .map_err(|e| PtyError::DestroyFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Controllable spawner for registry and connection tests.

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use tokio::sync::mpsc;

    use super::{ProcessHandle, PtyError, ShellSpawner, SpawnSpec, SpawnedProcess};

    /// Test-side control over one spawned mock process.
    pub struct MockProcess {
        output_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
        pub writes: Mutex<Vec<Vec<u8>>>,
        pub resizes: Mutex<Vec<(u16, u16)>>,
        pub destroyed: AtomicBool,
    }

    impl MockProcess {
        /// Emits output as if the shell had produced it.
        pub fn push_output(&self, data: &[u8]) {
            if let Some(tx) = self.output_tx.lock().unwrap().as_ref() {
                let _ = tx.send(data.to_vec());
            }
        }

        /// Simulates a spontaneous process exit (reader EOF).
        pub fn simulate_exit(&self) {
            self.output_tx.lock().unwrap().take();
        }

        /// Whether destroy() was called.
        pub fn was_destroyed(&self) -> bool {
            self.destroyed.load(Ordering::SeqCst)
        }

        /// All bytes written so far, concatenated.
        pub fn written(&self) -> Vec<u8> {
            self.writes.lock().unwrap().concat()
        }
    }

    struct MockHandle {
        process: Arc<MockProcess>,
    }

    impl ProcessHandle for MockHandle {
        fn write(&self, data: &[u8]) -> Result<(), PtyError> {
            self.process.writes.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
            self.process.resizes.lock().unwrap().push((cols, rows));
            Ok(())
        }

        fn destroy(&self) -> Result<(), PtyError> {
            self.process.destroyed.store(true, Ordering::SeqCst);
            // Killing the process ends the reader.
            self.process.output_tx.lock().unwrap().take();
            Ok(())
        }

        fn pid(&self) -> Option<u32> {
            Some(4242)
        }
    }

    /// Spawner that fabricates processes and records everything.
    #[derive(Default)]
    pub struct MockSpawner {
        pub fail_spawn: AtomicBool,
        pub spawned: Mutex<Vec<Arc<MockProcess>>>,
    }

    impl MockSpawner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes every subsequent spawn fail.
        pub fn fail(&self) {
            self.fail_spawn.store(true, Ordering::SeqCst);
        }

        /// Control handle for the n-th spawned process.
        pub fn process(&self, index: usize) -> Arc<MockProcess> {
            Arc::clone(&self.spawned.lock().unwrap()[index])
        }

        pub fn spawn_count(&self) -> usize {
            self.spawned.lock().unwrap().len()
        }
    }

    impl ShellSpawner for MockSpawner {
        fn spawn(&self, _spec: &SpawnSpec) -> Result<SpawnedProcess, PtyError> {
            if self.fail_spawn.load(Ordering::SeqCst) {
                return Err(PtyError::SpawnFailed("mock spawn failure".to_string()));
            }

            let (output_tx, output_rx) = mpsc::unbounded_channel();
            let process = Arc::new(MockProcess {
                output_tx: Mutex::new(Some(output_tx)),
                writes: Mutex::new(Vec::new()),
                resizes: Mutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
            });
            self.spawned.lock().unwrap().push(Arc::clone(&process));

            Ok(SpawnedProcess {
                handle: Box::new(MockHandle { process }),
                output: output_rx,
            })
        }
    }
}
