//! Where stagehand keeps its state
//!
//! # Environment Variables
//!
//! - `STAGEHAND_STATE_DIR` - Override the state directory
//!
//! # Path Resolution Priority
//!
//! For state_dir():
//! 1. `STAGEHAND_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/stagehand` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\stagehand`
//!    - macOS/Linux: `~/.local/state/stagehand`
//!
//! Everything else lives below the state directory:
//!
//! ```text
//! <state>/reports/<host-key>/<run-id>.json
//! <state>/locks/<host-key>.lock
//! <state>/ssh/                  (ssh control sockets)
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "STAGEHAND_STATE_DIR";

/// Get the stagehand state directory path
///
/// Priority:
/// 1. `STAGEHAND_STATE_DIR` env var
/// 2. `XDG_STATE_HOME/stagehand`
/// 3. Platform default
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("stagehand");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("stagehand");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("stagehand");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Directory holding persisted run reports
pub fn reports_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("reports"))
}

/// Directory holding per-target run locks
pub fn locks_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("locks"))
}

/// Directory for ssh control sockets
///
/// Falls back to `/tmp` when the state path would overflow the socket
/// path limit (ssh appends a 40 character hash).
pub fn ssh_control_dir() -> Result<PathBuf> {
    let dir = state_dir()?.join("ssh");
    if dir.as_os_str().len() > 60 {
        return Ok(std::env::temp_dir().join(format!("stagehand-ssh-{}", user_tag())));
    }
    Ok(dir)
}

fn user_tag() -> String {
    std::env::var("USER").unwrap_or_else(|_| "user".to_string())
}

/// Expand ~ and environment variables in a path string.
///
/// # Examples
///
/// ```ignore
/// let key = paths::expand("~/.ssh/deploy_ed25519");
/// let steps = paths::expand("$HOME/infra/web.toml");
/// ```
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, MutexGuard};

    /// Serializes tests that touch the process environment
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_guard() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Helper to run a test with temporary env var
    ///
    /// # Safety
    /// This function uses unsafe env::set_var/remove_var which can cause issues
    /// if other threads read environment variables concurrently.
    /// Only use in single-threaded test contexts.
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: Tests run in isolation and don't read env vars concurrently
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: Tests run in isolation
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    /// Helper to run a test with env var removed
    ///
    /// # Safety
    /// Same caveats as [`with_env_var`].
    fn without_env_var<F, R>(key: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: Tests run in isolation and don't read env vars concurrently
        unsafe { env::remove_var(key) };
        let result = f();
        if let Some(v) = original {
            // SAFETY: Tests run in isolation
            unsafe { env::set_var(key, v) };
        }
        result
    }

    #[test]
    fn test_state_dir_env_override() {
        let _guard = env_guard();
        with_env_var(ENV_STATE_DIR, "/custom/state/path", || {
            let result = state_dir().unwrap();
            assert_eq!(result, PathBuf::from("/custom/state/path"));
            assert_eq!(
                reports_dir().unwrap(),
                PathBuf::from("/custom/state/path/reports")
            );
            assert_eq!(
                locks_dir().unwrap(),
                PathBuf::from("/custom/state/path/locks")
            );
            assert_eq!(
                ssh_control_dir().unwrap(),
                PathBuf::from("/custom/state/path/ssh")
            );
        });
    }

    #[test]
    fn test_state_dir_env_override_with_tilde() {
        let _guard = env_guard();
        let home = dirs::home_dir().unwrap();
        with_env_var(ENV_STATE_DIR, "~/stagehand-tilde-test", || {
            assert_eq!(state_dir().unwrap(), home.join("stagehand-tilde-test"));
        });
    }

    #[test]
    fn test_xdg_state_home() {
        let _guard = env_guard();
        without_env_var(ENV_STATE_DIR, || {
            with_env_var("XDG_STATE_HOME", "/tmp/xdg-state-test", || {
                let result = state_dir().unwrap();
                assert_eq!(result, PathBuf::from("/tmp/xdg-state-test/stagehand"));
            });
        });
    }

    #[test]
    fn test_long_state_dir_moves_control_sockets() {
        let _guard = env_guard();
        let long = format!("/tmp/{}", "nested-directory/".repeat(5));
        with_env_var(ENV_STATE_DIR, &long, || {
            let dir = ssh_control_dir().unwrap();
            assert!(dir.starts_with(env::temp_dir()));
        });
    }

    #[test]
    fn test_expand_with_tilde() {
        let result = expand("~/test/path");
        let home = dirs::home_dir().unwrap();
        assert_eq!(result, home.join("test").join("path"));
    }

    #[test]
    fn test_expand_with_env_var() {
        let _guard = env_guard();
        with_env_var("STAGEHAND_TEST_VAR", "test_value", || {
            let result = expand("/path/$STAGEHAND_TEST_VAR/file");
            assert_eq!(result, PathBuf::from("/path/test_value/file"));
        });
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_VAR_12345/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_VAR_12345/file"));
    }

    #[cfg(unix)]
    #[test]
    fn test_default_state_dir_unix() {
        let _guard = env_guard();
        without_env_var(ENV_STATE_DIR, || {
            without_env_var("XDG_STATE_HOME", || {
                let result = state_dir().unwrap();
                let home = dirs::home_dir().unwrap();
                assert_eq!(result, home.join(".local").join("state").join("stagehand"));
            });
        });
    }
}
