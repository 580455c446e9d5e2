//! Muster Shared Protocol
//!
//! This crate provides the wire-protocol tokens and the file-transfer codec
//! shared between the operator server and anything else that needs to speak
//! the agent protocol (tests, future tooling).
//!
//! The wire format is plain text over one persistent TCP connection per
//! agent: commands are raw bytes with no framing, replies are a single
//! bounded read, and file retrieval uses a sentinel-delimited stream (see
//! [`transfer`]).

pub mod transfer;

/// Greeting sent to an agent immediately after it connects.
pub const GREETING: &[u8] = b"connected";

/// First read of a file stream must equal this token exactly.
pub const FILE_TRANSFER_START: &[u8] = b"FILE_TRANSFER_START";

/// Appears as a substring of the final chunk of a file stream.
pub const FILE_TRANSFER_END: &[u8] = b"FILE_TRANSFER_END";

/// Commands that tell the agent to terminate its session. No reply is
/// expected after one of these.
pub const QUIT_COMMANDS: [&str; 4] = ["q", "quit", "x", "exit"];

/// Command prefix that triggers the file-retrieval sub-protocol.
pub const DOWNLOAD_PREFIX: &str = "download";

/// Check whether a command is a quit/exit token (case-insensitive).
pub fn is_quit_command(cmd: &str) -> bool {
    QUIT_COMMANDS.iter().any(|q| cmd.eq_ignore_ascii_case(q))
}

/// Check whether a command requests a file retrieval.
pub fn is_download_command(cmd: &str) -> bool {
    cmd.starts_with(DOWNLOAD_PREFIX)
}

/// Timing parameters for the session protocol
pub mod timing {
    /// Bounded wait on a session's command queue in milliseconds
    pub const COMMAND_POLL_MS: u64 = 100;

    /// Idle time after which a liveness probe is sent, in seconds
    pub const IDLE_PROBE_SECS: u64 = 5;

    /// Interval between sweeps of disconnected sessions, in milliseconds
    pub const SWEEP_INTERVAL_MS: u64 = 1000;

    /// Default window for collecting responses after a dispatch, in milliseconds
    pub const RESPONSE_WINDOW_MS: u64 = 2000;
}

/// Size limits for the session protocol
pub mod limits {
    /// Maximum bytes of a plain reply; longer replies are truncated
    pub const PLAIN_REPLY_MAX: usize = 1024;

    /// Read size for file-transfer chunks
    pub const TRANSFER_CHUNK_SIZE: usize = 4096;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quit_commands_case_insensitive() {
        assert!(is_quit_command("q"));
        assert!(is_quit_command("QUIT"));
        assert!(is_quit_command("Exit"));
        assert!(is_quit_command("X"));
        assert!(!is_quit_command("quitting"));
        assert!(!is_quit_command("ls"));
    }

    #[test]
    fn test_download_detection() {
        assert!(is_download_command("download /tmp/a.bin"));
        assert!(is_download_command("download"));
        assert!(!is_download_command("load download"));
    }

    #[test]
    fn test_greeting_non_empty() {
        assert!(!GREETING.is_empty());
    }
}
