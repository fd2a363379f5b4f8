//! Error classification for runner failures.
//!
//! `ssh` exits 255 both when it cannot reach the host and when the remote
//! command itself exits 255. Stderr tells the two apart: connection-level
//! failures print recognizable diagnostics before any remote output.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Categories of ssh transport failures.
///
/// Every category means the command never ran on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SshFailure {
    /// Host name did not resolve
    Resolve,
    /// Host down, port closed, or network path broken
    Unreachable,
    /// Key or password rejected
    Authentication,
    /// Host key unknown or changed
    HostKey,
    /// Session dropped mid-command
    Closed,
}

impl SshFailure {
    /// Classify ssh stderr, or `None` if it does not look like a transport error.
    ///
    /// Only the last non-empty line is read, since ssh reports its own
    /// failure after any remote output, and only in the forms ssh prints
    /// (`ssh: connect to host ...`, `Connection to ... closed`). A remote
    /// command that exits 255 and ends its stderr with one of those lines
    /// verbatim is still taken for a transport failure; stderr is all ssh
    /// gives us to tell the two apart.
    pub fn classify(stderr: &str) -> Option<Self> {
        let line = stderr
            .lines()
            .map(str::trim)
            .rev()
            .find(|line| !line.is_empty())?;
        let line_lower = line.to_lowercase();

        if line_lower.starts_with("ssh: could not resolve hostname") {
            return Some(Self::Resolve);
        }

        if line_lower.starts_with("host key verification failed")
            || (line_lower.starts_with("unable to negotiate with ")
                && line_lower.contains("no matching host key type"))
        {
            return Some(Self::HostKey);
        }

        if line_lower.contains(": permission denied (")
            || line_lower.starts_with("permission denied (")
            || line_lower.contains("too many authentication failures")
            || line_lower.contains("no supported authentication methods")
        {
            return Some(Self::Authentication);
        }

        if line_lower.starts_with("ssh: connect to host ")
            || line_lower.starts_with("kex_exchange_identification:")
        {
            return Some(Self::Unreachable);
        }

        if (line_lower.starts_with("connection to ") && line_lower.contains(" closed"))
            || line_lower.starts_with("client_loop: ")
            || line_lower.starts_with("read from remote host ")
            || line_lower.starts_with("control socket connect")
        {
            return Some(Self::Closed);
        }

        None
    }

    /// Short description of the failure.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Resolve => "host name did not resolve",
            Self::Unreachable => "host unreachable",
            Self::Authentication => "authentication failed",
            Self::HostKey => "host key not trusted",
            Self::Closed => "connection closed",
        }
    }

    /// Actionable advice for resolving the failure.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Resolve => "Check the host name or add it to ~/.ssh/config",
            Self::Unreachable => "Check the host is up and the ssh port is open",
            Self::Authentication => {
                "Load the key into ssh-agent or pass --identity; password prompts are disabled"
            }
            Self::HostKey => {
                "Connect once with ssh to trust the host key, or run with --accept-new-host-keys"
            }
            Self::Closed => "The host may have rebooted; re-run once it is back",
        }
    }
}

/// Failure of the process driver itself.
#[derive(Debug, Error)]
pub(crate) enum ProcessError {
    /// The program could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The deadline passed; the process group has been killed
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// Waiting on the child failed
    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    /// True when the program binary itself is missing
    pub(crate) fn is_not_found(&self) -> bool {
        matches!(self, Self::Spawn { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_unreachable() {
        let failure =
            SshFailure::classify("ssh: connect to host 10.0.0.5 port 22: Connection refused\r\n");
        assert_eq!(failure, Some(SshFailure::Unreachable));

        let failure =
            SshFailure::classify("ssh: connect to host web1 port 22: Connection timed out");
        assert_eq!(failure, Some(SshFailure::Unreachable));
    }

    #[test]
    fn test_classify_resolve() {
        let failure = SshFailure::classify(
            "ssh: Could not resolve hostname nope.invalid: Name or service not known",
        );
        assert_eq!(failure, Some(SshFailure::Resolve));
    }

    #[test]
    fn test_classify_authentication() {
        let failure = SshFailure::classify("deploy@web1: Permission denied (publickey).");
        assert_eq!(failure, Some(SshFailure::Authentication));
    }

    #[test]
    fn test_classify_host_key() {
        let failure = SshFailure::classify("Host key verification failed.");
        assert_eq!(failure, Some(SshFailure::HostKey));
    }

    #[test]
    fn test_classify_closed() {
        let failure = SshFailure::classify("Connection to web1 closed by remote host.");
        assert_eq!(failure, Some(SshFailure::Closed));
    }

    #[test]
    fn test_remote_command_errors_are_not_transport_failures() {
        assert_eq!(SshFailure::classify(""), None);
        assert_eq!(
            SshFailure::classify("E: Unable to locate package nginxx"),
            None
        );
        // sudo's own permission message has no "(" after it
        assert_eq!(
            SshFailure::classify("mkdir: cannot create directory '/srv': Permission denied"),
            None
        );
        let curl = "curl: (7) Failed to connect to localhost port 8080: Connection refused";
        assert_eq!(SshFailure::classify(curl), None);
    }

    #[test]
    fn test_only_last_line_counts() {
        let dropped = "Reading package lists...\nConnection to web1 closed by remote host.\n";
        assert_eq!(SshFailure::classify(dropped), Some(SshFailure::Closed));

        let remote = "ssh: connect to host db port 22: Connection refused\nfallback failed\n";
        assert_eq!(SshFailure::classify(remote), None);
    }

    #[test]
    fn test_classify_reset_during_handshake() {
        let failure =
            SshFailure::classify("kex_exchange_identification: read: Connection reset by peer");
        assert_eq!(failure, Some(SshFailure::Unreachable));
        let failure = SshFailure::classify("client_loop: send disconnect: Broken pipe");
        assert_eq!(failure, Some(SshFailure::Closed));
    }

    #[test]
    fn test_every_category_has_advice() {
        for failure in [
            SshFailure::Resolve,
            SshFailure::Unreachable,
            SshFailure::Authentication,
            SshFailure::HostKey,
            SshFailure::Closed,
        ] {
            assert!(!failure.description().is_empty());
            assert!(!failure.advice().is_empty());
        }
    }
}
