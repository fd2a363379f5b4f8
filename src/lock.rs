//! One run per host at a time
//!
//! Each host has a lock file holding an exclusive advisory lock for the
//! length of a run. A second run against the same host fails fast and names
//! the holder, whichever user it logs in as. The kernel drops the lock when
//! its process exits, so a file left behind by a crash does not block later
//! runs.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use converge::Target;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Attempts before giving up when the file keeps being replaced under us
const ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    started_at: DateTime<Utc>,
    target: String,
}

/// Held for the duration of a run; the file is removed on drop
#[derive(Debug)]
pub struct TargetLock {
    path: PathBuf,
    file: File,
}

impl TargetLock {
    /// Acquire the lock for the host behind `target` under `dir`
    pub fn acquire(dir: &Path, target: &Target) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create lock directory: {}", dir.display()))?;
        let path = dir.join(format!("{}.lock", sanitize(&target.host_key())));

        for _ in 0..ATTEMPTS {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&path)
                .with_context(|| format!("Failed to open lock {}", path.display()))?;

            match file.try_lock() {
                Ok(()) => {}
                Err(TryLockError::WouldBlock) => return Err(held(&path, target)),
                Err(TryLockError::Error(e)) => {
                    return Err(e).with_context(|| format!("Failed to lock {}", path.display()));
                }
            }

            // A previous holder may have unlinked the file between our open and lock
            if !still_linked(&file, &path) {
                log::debug!("Lock {} was replaced, retrying", path.display());
                continue;
            }

            if let Some(stale) = read_info(&path) {
                log::warn!(
                    "Taking over lock left by pid {} (started {})",
                    stale.pid,
                    stale.started_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            let mut lock = Self { path, file };
            lock.write_info(target)?;
            log::debug!("Acquired lock {}", lock.path.display());
            return Ok(lock);
        }
        bail!("could not acquire lock {}", path.display())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_info(&mut self, target: &Target) -> Result<()> {
        let info = LockInfo {
            pid: std::process::id(),
            started_at: Utc::now(),
            target: target.to_string(),
        };
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file
            .write_all(serde_json::to_string(&info)?.as_bytes())
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

impl Drop for TargetLock {
    fn drop(&mut self) {
        // Unlink while still locked; the lock itself goes with the handle
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to remove lock {}: {e}", self.path.display());
        }
    }
}

fn held(path: &Path, target: &Target) -> anyhow::Error {
    match read_info(path) {
        Some(info) => anyhow::anyhow!(
            "another run against {} is in progress (pid {}, started {})",
            info.target,
            info.pid,
            info.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => anyhow::anyhow!(
            "another run against {} is in progress ({})",
            target,
            path.display()
        ),
    }
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}

/// Target key as a file name
pub fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn read_info(path: &Path) -> Option<LockInfo> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::SshTarget;
    use std::sync::Barrier;

    fn web1_as(user: &str) -> Target {
        let mut host = SshTarget::new("web1.example.com");
        host.user = Some(user.into());
        Target::Ssh(host)
    }

    fn web1() -> Target {
        web1_as("deploy")
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("web1.example.com:22"), "web1.example.com_22");
        assert_eq!(sanitize("2001:db8::1:22"), "2001_db8__1_22");
        assert_eq!(sanitize("local"), "local");
    }

    #[test]
    fn test_second_lock_fails_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let first = TargetLock::acquire(dir.path(), &web1()).unwrap();
        assert!(first.path().exists());

        let err = TargetLock::acquire(dir.path(), &web1()).unwrap_err();
        assert!(err.to_string().contains("in progress"));
        assert!(err.to_string().contains(&std::process::id().to_string()));

        let path = first.path().to_path_buf();
        drop(first);
        assert!(!path.exists());
        assert!(TargetLock::acquire(dir.path(), &web1()).is_ok());
    }

    #[test]
    fn test_other_users_on_same_host_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let deploy = TargetLock::acquire(dir.path(), &web1_as("deploy")).unwrap();
        assert!(deploy.path().ends_with("web1.example.com_22.lock"));

        let err = TargetLock::acquire(dir.path(), &web1_as("root")).unwrap_err();
        assert!(err.to_string().contains("deploy@web1.example.com"));
        let no_user = Target::Ssh(SshTarget::new("web1.example.com"));
        assert!(TargetLock::acquire(dir.path(), &no_user).is_err());
    }

    #[test]
    fn test_other_hosts_do_not_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let _web = TargetLock::acquire(dir.path(), &web1()).unwrap();
        assert!(TargetLock::acquire(dir.path(), &Target::Local).is_ok());

        let mut other_port = SshTarget::new("web1.example.com");
        other_port.port = Some(2222);
        assert!(TargetLock::acquire(dir.path(), &Target::Ssh(other_port)).is_ok());
    }

    #[test]
    fn test_unreadable_lock_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("local.lock"), "garbage").unwrap();
        let lock = TargetLock::acquire(dir.path(), &Target::Local).unwrap();
        let info = read_info(lock.path()).unwrap();
        assert_eq!(info.pid, std::process::id());
    }

    #[test]
    fn test_unlocked_file_from_dead_run_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let info = LockInfo {
            pid: 4_194_304 + 7,
            started_at: Utc::now(),
            target: "local".into(),
        };
        // Longer than the new content, so a missing truncate would leave junk
        let mut stale = serde_json::to_string(&info).unwrap();
        stale.push_str(&" ".repeat(64));
        stale.push('x');
        fs::write(dir.path().join("local.lock"), stale).unwrap();

        let lock = TargetLock::acquire(dir.path(), &Target::Local).unwrap();
        assert_eq!(read_info(lock.path()).unwrap().pid, std::process::id());
    }

    #[test]
    fn test_concurrent_takeover_has_one_winner() {
        for _ in 0..20 {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("local.lock"), "left by a crashed run").unwrap();

            let barrier = Barrier::new(4);
            let results: Vec<Result<TargetLock>> = std::thread::scope(|s| {
                let handles: Vec<_> = (0..4)
                    .map(|_| {
                        s.spawn(|| {
                            barrier.wait();
                            TargetLock::acquire(dir.path(), &Target::Local)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            let winners = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(winners, 1);
        }
    }
}
