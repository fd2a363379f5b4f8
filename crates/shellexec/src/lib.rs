//! # shellexec
//!
//! Command runners for [`converge`]: the local shell and remote hosts over
//! the system `ssh` client.
//!
//! Every runner:
//! - closes stdin, so a command can never wait on a prompt
//! - captures stdout and stderr
//! - kills the command (and its process group) once the timeout elapses
//! - never retries on its own
//!
//! ## Example
//!
//! ```no_run
//! use converge::{CommandRunner, Target};
//! use shellexec::{RunnerOptions, runner_for};
//! use std::time::Duration;
//!
//! let target = Target::parse("deploy@web1.example.com").unwrap();
//! let runner = runner_for(&target, &RunnerOptions::default());
//! let out = runner.run("uname -a", Duration::from_secs(30)).unwrap();
//! println!("{}", out.stdout);
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod local;
mod process;
pub mod shell;
pub mod ssh;

pub use error::SshFailure;
pub use local::LocalRunner;
pub use ssh::SshRunner;

use converge::{CommandRunner, Target};
use std::path::PathBuf;
use std::time::Duration;

/// Transport settings shared by remote runners.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// How long ssh may take to establish a connection
    pub connect_timeout: Duration,
    /// Trust host keys seen for the first time (never changed ones)
    pub accept_new_host_keys: bool,
    /// Directory for ssh control sockets; `Some` reuses one connection for
    /// every command of a run
    pub control_dir: Option<PathBuf>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            accept_new_host_keys: false,
            control_dir: None,
        }
    }
}

/// Create the runner for a target.
pub fn runner_for(target: &Target, options: &RunnerOptions) -> Box<dyn CommandRunner> {
    match target {
        Target::Local => Box::new(LocalRunner::new()),
        Target::Ssh(host) => Box::new(SshRunner::new(host.clone(), options.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::SshTarget;

    #[test]
    fn test_runner_for_keeps_target() {
        let options = RunnerOptions::default();
        assert_eq!(*runner_for(&Target::Local, &options).target(), Target::Local);

        let remote = Target::Ssh(SshTarget::new("web1"));
        assert_eq!(*runner_for(&remote, &options).target(), remote);
    }
}
