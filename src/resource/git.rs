//! Git checkout at a branch

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use shellexec::shell::quote;

use super::{Commands, Resource, validate_absolute};

fn default_branch() -> String {
    "main".to_string()
}

/// A repository cloned to `dest` with `branch` checked out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitCheckout {
    pub repo: String,
    pub dest: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Also require the checkout to match the remote branch head
    ///
    /// The remote head is read with `ls-remote`, so checking never touches
    /// the local refs; only apply fetches.
    #[serde(default)]
    pub pull: bool,
}

impl Resource for GitCheckout {
    fn describe(&self) -> String {
        format!("git {} ({}) at {}", self.repo, self.branch, self.dest)
    }

    fn validate(&self) -> Result<()> {
        validate_absolute(&self.dest)?;
        if self.repo.trim().is_empty() {
            bail!("repo must not be empty");
        }
        if self.branch.trim().is_empty() {
            bail!("branch must not be empty");
        }
        Ok(())
    }

    fn commands(&self) -> Commands {
        let dest = quote(&self.dest);
        let branch = quote(&self.branch);
        let git = format!("git -C {dest}");

        let mut check = format!(
            "[ -d {dest}/.git ] && [ \"$({git} rev-parse --abbrev-ref HEAD)\" = {branch} ]"
        );
        if self.pull {
            let remote_ref = quote(&format!("refs/heads/{}", self.branch));
            check.push_str(&format!(
                " && [ \"$({git} rev-parse HEAD)\" = \"$({git} ls-remote origin {remote_ref} | cut -f1)\" ]"
            ));
        }

        let apply = format!(
            "if [ -d {dest}/.git ]; then \
             {git} fetch -q origin {branch} && {git} checkout -q {branch} && {git} merge -q --ff-only FETCH_HEAD; \
             else git clone -q --branch {branch} {} {dest}; fi",
            quote(&self.repo)
        );

        Commands {
            precondition: Some(check),
            apply: vec![apply],
            verify: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkout(pull: bool) -> GitCheckout {
        GitCheckout {
            repo: "https://github.com/acme/app.git".into(),
            dest: "/srv/app".into(),
            branch: "main".into(),
            pull,
        }
    }

    #[test]
    fn test_default_branch() {
        let git: GitCheckout = toml::from_str(
            r#"
            repo = "git@github.com:acme/app.git"
            dest = "/srv/app"
            "#,
        )
        .unwrap();
        assert_eq!(git.branch, "main");
        assert!(!git.pull);
    }

    #[test]
    fn test_commands() {
        let commands = checkout(false).commands();
        assert_eq!(
            commands.precondition.unwrap(),
            "[ -d /srv/app/.git ] && [ \"$(git -C /srv/app rev-parse --abbrev-ref HEAD)\" = main ]"
        );
        let apply = &commands.apply[0];
        assert!(apply.contains("git clone -q --branch main https://github.com/acme/app.git /srv/app"));
        assert!(apply.contains("merge -q --ff-only FETCH_HEAD"));
    }

    #[test]
    fn test_pull_compares_remote_head() {
        let check = checkout(true).commands().precondition.unwrap();
        assert!(check.ends_with(
            "[ \"$(git -C /srv/app rev-parse HEAD)\" = \"$(git -C /srv/app ls-remote origin refs/heads/main | cut -f1)\" ]"
        ));
    }

    #[test]
    fn test_check_never_fetches() {
        for pull in [false, true] {
            let check = checkout(pull).commands().precondition.unwrap();
            assert!(!check.contains("fetch"), "{check}");
        }
    }

    #[test]
    fn test_relative_dest_rejected() {
        let mut git = checkout(false);
        git.dest = "app".into();
        assert!(git.validate().is_err());
    }
}
