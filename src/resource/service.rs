//! systemd service resource

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use shellexec::shell::quote;

use super::{Commands, Resource, default_true};

/// A systemd unit that should be enabled and/or running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    /// Start at boot
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Running now
    #[serde(default = "default_true")]
    pub running: bool,
}

impl Resource for Service {
    fn describe(&self) -> String {
        match (self.enabled, self.running) {
            (true, true) => format!("service {} enabled and running", self.name),
            (true, false) => format!("service {} enabled", self.name),
            _ => format!("service {} running", self.name),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("service name must not be empty");
        }
        if !self.enabled && !self.running {
            bail!("service must be enabled, running, or both");
        }
        Ok(())
    }

    fn commands(&self) -> Commands {
        let unit = quote(&self.name);
        let mut checks = Vec::new();
        if self.enabled {
            checks.push(format!("systemctl is-enabled --quiet {unit}"));
        }
        if self.running {
            checks.push(format!("systemctl is-active --quiet {unit}"));
        }

        let apply = match (self.enabled, self.running) {
            (true, true) => format!("systemctl enable --now {unit}"),
            (true, false) => format!("systemctl enable {unit}"),
            _ => format!("systemctl start {unit}"),
        };

        Commands {
            precondition: Some(checks.join(" && ")),
            apply: vec![apply],
            verify: None,
        }
    }
}
