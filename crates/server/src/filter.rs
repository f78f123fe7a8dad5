//! Command text filtering.
//!
//! A substring blacklist over inbound command text, consulted by the
//! connection handler before input is forwarded to a shell. This is policy,
//! not a security boundary: it catches the obvious foot-guns, nothing more.

/// Command fragments that are never forwarded.
const DANGEROUS_COMMANDS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    ":(){:|:&};:",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "chmod 777 /",
    "chown root:root /",
    "sudo rm",
    "format",
    "del /f /s /q",
    "fdisk",
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
];

/// Paths that must not appear in command text.
const RESTRICTED_PATHS: &[&str] = &[
    "/etc/shadow",
    "/etc/passwd",
    "/etc/sudoers",
    "/root",
    "/boot",
    "/sys",
];

/// Outcome of a filter check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The command may be forwarded.
    Allowed,
    /// The command is rejected; `reason` is surfaced to the client.
    Denied { reason: String },
}

/// Substring filter over command text.
pub struct CommandFilter {
    enabled: bool,
}

impl CommandFilter {
    /// Creates a filter; when disabled, the handler skips consultation.
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Whether the connection handler should consult this filter.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Checks one command string. Matching is case-insensitive over the
    /// trimmed text.
    pub fn check(&self, command: &str) -> Verdict {
        let lowered = command.to_lowercase();
        let lowered = lowered.trim();

        if lowered.is_empty() {
            return Verdict::Denied {
                reason: "Empty command".to_string(),
            };
        }

        for dangerous in DANGEROUS_COMMANDS {
            if lowered.contains(dangerous) {
                return Verdict::Denied {
                    reason: format!("Dangerous command detected: {}", dangerous),
                };
            }
        }

        for path in RESTRICTED_PATHS {
            if lowered.contains(path) {
                return Verdict::Denied {
                    reason: format!("Access to restricted path: {}", path),
                };
            }
        }

        Verdict::Allowed
    }
}
