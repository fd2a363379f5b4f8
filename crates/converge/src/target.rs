//! Target hosts that commands run against

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Where a run executes its commands
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    /// The machine stagehand itself runs on
    Local,
    /// A remote host reached over SSH
    Ssh(SshTarget),
}

/// Connection details for an SSH target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SshTarget {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Private key passed to ssh with `-i`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<PathBuf>,
}

impl SshTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            identity: None,
        }
    }

    /// `user@host` or just `host`, as ssh expects it
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }
}

/// Invalid target string
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TargetParseError {
    #[error("target is empty")]
    Empty,
    #[error("target '{0}' has an empty user before '@'")]
    EmptyUser(String),
    #[error("target '{0}' has no host")]
    EmptyHost(String),
    #[error("invalid port in target '{0}'")]
    InvalidPort(String),
}

impl Target {
    /// Parse `local` or `[user@]host[:port]` (IPv6 hosts in brackets: `[::1]:2222`)
    pub fn parse(input: &str) -> Result<Self, TargetParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TargetParseError::Empty);
        }
        if input == "local" {
            return Ok(Self::Local);
        }

        let (user, rest) = match input.rsplit_once('@') {
            Some(("", _)) => return Err(TargetParseError::EmptyUser(input.to_string())),
            Some((user, rest)) => (Some(user.to_string()), rest),
            None => (None, input),
        };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| TargetParseError::EmptyHost(input.to_string()))?;
            let port = match after.strip_prefix(':') {
                Some(p) => Some(parse_port(p, input)?),
                None if after.is_empty() => None,
                None => return Err(TargetParseError::InvalidPort(input.to_string())),
            };
            (host, port)
        } else {
            match rest.split_once(':') {
                Some((host, p)) => (host, Some(parse_port(p, input)?)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(TargetParseError::EmptyHost(input.to_string()));
        }

        Ok(Self::Ssh(SshTarget {
            host: host.to_string(),
            user,
            port,
            identity: None,
        }))
    }

    /// Connection identity: `[user@]host:port`
    pub fn key(&self) -> String {
        match self {
            Self::Local => "local".to_string(),
            Self::Ssh(ssh) => format!("{}:{}", ssh.destination(), ssh.port.unwrap_or(22)),
        }
    }

    /// Machine identity: `host:port`, whatever user logs in
    ///
    /// Runs are single-flighted and reports grouped on this key.
    pub fn host_key(&self) -> String {
        match self {
            Self::Local => "local".to_string(),
            Self::Ssh(ssh) => format!("{}:{}", ssh.host, ssh.port.unwrap_or(22)),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }

    /// Set the login user unless one was given in the target string
    pub fn with_default_user(mut self, user: Option<String>) -> Self {
        if let Self::Ssh(ssh) = &mut self
            && ssh.user.is_none()
        {
            ssh.user = user;
        }
        self
    }

    /// Set the port unless one was given in the target string
    pub fn with_default_port(mut self, port: Option<u16>) -> Self {
        if let Self::Ssh(ssh) = &mut self
            && ssh.port.is_none()
        {
            ssh.port = port;
        }
        self
    }

    pub fn with_identity(mut self, identity: Option<PathBuf>) -> Self {
        if let Self::Ssh(ssh) = &mut self
            && identity.is_some()
        {
            ssh.identity = identity;
        }
        self
    }
}

fn parse_port(port: &str, input: &str) -> Result<u16, TargetParseError> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(TargetParseError::InvalidPort(input.to_string())),
        Ok(p) => Ok(p),
    }
}

impl FromStr for Target {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Ssh(ssh) => {
                write!(f, "{}", ssh.destination())?;
                if let Some(port) = ssh.port {
                    write!(f, ":{port}")?;
                }
                Ok(())
            }
        }
    }
}
