//! Timeout-bounded child process driver shared by every runner.

use crate::error::ProcessError;
use converge::CommandOutcome;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Upper bound on the wait between liveness checks
const MAX_POLL: Duration = Duration::from_millis(100);

/// Run `command` to completion, killing it once `timeout` elapses.
///
/// Stdin is closed so nothing can block on a prompt. On Unix the child leads
/// its own process group, and the whole group is killed on timeout so
/// grandchildren (`sh -c` pipelines, remote ssh sessions) die with it.
pub(crate) fn run(mut command: Command, timeout: Duration) -> Result<CommandOutcome, ProcessError> {
    let program = command.get_program().to_string_lossy().into_owned();
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let started = Instant::now();
    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let mut poll = Duration::from_millis(5);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    kill(&mut child);
                    log::debug!("{program} killed after {elapsed:?}");
                    // Reader threads are detached; they end when the pipes close
                    return Err(ProcessError::TimedOut(timeout));
                }
                thread::sleep(poll.min(timeout - elapsed));
                poll = (poll * 2).min(MAX_POLL);
            }
            Err(source) => {
                kill(&mut child);
                return Err(ProcessError::Wait { program, source });
            }
        }
    };

    // A backgrounded grandchild may still hold the pipes open; wait for
    // output only as long as the time budget allows
    let deadline = started + timeout;
    let stdout = collect(stdout, deadline);
    let stderr = collect(stderr, deadline);

    Ok(CommandOutcome::new(
        status.code(),
        stdout,
        stderr,
        started.elapsed(),
    ))
}

/// Read a pipe to the end on a background thread
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>, deadline: Instant) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!("output still open after the command exited; dropping it");
            return String::new();
        }
        thread::sleep(Duration::from_millis(5));
    }
    handle.join().unwrap_or_default()
}

#[allow(unsafe_code)]
fn kill(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = i32::try_from(child.id()) {
            // SAFETY: signals the process group spawned above; no memory is touched
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn test_captures_output_and_exit_code() {
        let out = run(sh("echo hello; echo oops >&2; exit 3"), Duration::from_secs(5)).unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "oops\n");
    }

    #[test]
    fn test_timeout_kills_child() {
        let started = Instant::now();
        let err = run(sh("sleep 5"), Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_timeout_kills_grandchildren() {
        let started = Instant::now();
        let err = run(sh("sleep 5 | cat"), Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_missing_program() {
        let err = run(
            Command::new("definitely-not-a-real-program-4242"),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_stdin_is_closed() {
        let out = run(sh("cat"), Duration::from_secs(5)).unwrap();
        assert!(out.success());
        assert!(out.stdout.is_empty());
    }
}
