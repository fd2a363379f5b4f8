//! Runner that executes commands on a remote host through the `ssh` client.
//!
//! Going through the system client keeps the user's `~/.ssh/config`,
//! agent and known_hosts in play. Batch mode disables every prompt.

use crate::RunnerOptions;
use crate::error::{ProcessError, SshFailure};
use crate::process;
use converge::{CommandOutcome, CommandRunner, ExecError, SshTarget, Target};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// Exit status ssh uses for its own failures
const SSH_ERROR_EXIT: i32 = 255;

/// Runs commands on one host over ssh.
#[derive(Debug)]
pub struct SshRunner {
    target: Target,
    host: SshTarget,
    options: RunnerOptions,
    /// `None` when no ssh client is installed; every run then fails as a
    /// connection error
    ssh: Option<PathBuf>,
}

impl SshRunner {
    /// Create a runner, locating the `ssh` client on `PATH`
    pub fn new(host: SshTarget, options: RunnerOptions) -> Self {
        let ssh = which::which("ssh").ok();
        if ssh.is_none() {
            log::warn!("ssh client not found in PATH");
        }
        Self {
            target: Target::Ssh(host.clone()),
            host,
            options,
            ssh,
        }
    }

    /// Arguments passed to `ssh` for one remote command
    pub fn ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!(
                "ConnectTimeout={}",
                self.options.connect_timeout.as_secs().max(1)
            ),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
        ];
        if self.options.accept_new_host_keys {
            args.extend(["-o".to_string(), "StrictHostKeyChecking=accept-new".to_string()]);
        }
        if let Some(dir) = &self.options.control_dir {
            args.extend([
                "-o".to_string(),
                "ControlMaster=auto".to_string(),
                "-o".to_string(),
                format!("ControlPath={}", dir.join("%C").display()),
                "-o".to_string(),
                "ControlPersist=60".to_string(),
            ]);
        }
        if let Some(port) = self.host.port {
            args.extend(["-p".to_string(), port.to_string()]);
        }
        if let Some(identity) = &self.host.identity {
            args.extend([
                "-i".to_string(),
                identity.display().to_string(),
                "-o".to_string(),
                "IdentitiesOnly=yes".to_string(),
            ]);
        }
        // Options end before the destination; everything after it is the
        // remote command line
        args.push("--".to_string());
        args.push(self.host.destination());
        args.push(command.to_string());
        args
    }

    fn connection_error(&self, message: impl Into<String>) -> ExecError {
        ExecError::Connection {
            target: self.target.to_string(),
            message: message.into(),
        }
    }

    /// Turn exit 255 into a connection error when stderr says ssh itself failed
    fn classify(&self, outcome: CommandOutcome) -> Result<CommandOutcome, ExecError> {
        if outcome.exit_code != Some(SSH_ERROR_EXIT) {
            return Ok(outcome);
        }
        match SshFailure::classify(&outcome.stderr) {
            Some(failure) => {
                log::debug!("ssh transport failure: {}", outcome.stderr.trim());
                Err(self.connection_error(format!(
                    "{}: {}. {}",
                    failure.description(),
                    outcome.stderr_tail(3),
                    failure.advice()
                )))
            }
            // The remote command itself exited 255
            None => Ok(outcome),
        }
    }
}

impl CommandRunner for SshRunner {
    fn target(&self) -> &Target {
        &self.target
    }

    fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutcome, ExecError> {
        let Some(ssh) = &self.ssh else {
            return Err(self.connection_error(
                "ssh client not found in PATH. Install openssh-client",
            ));
        };

        let mut cmd = Command::new(ssh);
        cmd.args(self.ssh_args(command));

        match process::run(cmd, timeout) {
            Ok(outcome) => self.classify(outcome),
            Err(ProcessError::TimedOut(timeout)) => Err(ExecError::Timeout {
                command: command.to_string(),
                timeout,
            }),
            Err(e) if e.is_not_found() => Err(self.connection_error(e.to_string())),
            Err(e) => Err(ExecError::Spawn {
                command: command.to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Any exit from the remote `true` proves the transport works
    fn probe(&self, timeout: Duration) -> Result<(), ExecError> {
        let budget = timeout.min(self.options.connect_timeout + Duration::from_secs(10));
        self.run("true", budget).map(|_| ())
    }
}
