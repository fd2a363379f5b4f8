//! Raw command step - precondition, apply and verify written by hand

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use super::{Commands, OneOrMany, Resource};

/// A step given directly as shell commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStep {
    /// Exit 0 means the step is already done
    #[serde(default)]
    pub precondition: Option<String>,
    /// One command or a list run in order
    pub apply: OneOrMany,
    #[serde(default)]
    pub verify: Option<String>,
}

impl Resource for CommandStep {
    fn describe(&self) -> String {
        match self.apply.to_vec().first() {
            Some(first) => format!("run `{}`", first_line(first)),
            None => "run commands".to_string(),
        }
    }

    fn validate(&self) -> Result<()> {
        let apply = self.apply.to_vec();
        if apply.is_empty() || apply.iter().any(|c| c.trim().is_empty()) {
            bail!("apply must contain at least one non-empty command");
        }
        Ok(())
    }

    fn commands(&self) -> Commands {
        Commands {
            precondition: self.precondition.clone(),
            apply: self.apply.to_vec(),
            verify: self.verify.clone(),
        }
    }
}

fn first_line(command: &str) -> &str {
    command.lines().next().unwrap_or(command).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_apply_string() {
        let step: CommandStep = toml::from_str(
            r#"
            precondition = "id deploy"
            apply = "useradd -m -s /bin/bash deploy"
            "#,
        )
        .unwrap();
        let commands = step.commands();
        assert_eq!(commands.precondition.as_deref(), Some("id deploy"));
        assert_eq!(commands.apply, vec!["useradd -m -s /bin/bash deploy"]);
        assert_eq!(step.describe(), "run `useradd -m -s /bin/bash deploy`");
    }

    #[test]
    fn test_apply_list() {
        let step: CommandStep = toml::from_str(
            r#"apply = ["npm ci", "npm run build"]"#,
        )
        .unwrap();
        assert_eq!(step.commands().apply.len(), 2);
        assert!(step.commands().precondition.is_none());
    }

    #[test]
    fn test_empty_apply_rejected() {
        let step: CommandStep = toml::from_str(r#"apply = []"#).unwrap();
        assert!(step.validate().is_err());
        let step: CommandStep = toml::from_str(r#"apply = "  ""#).unwrap();
        assert!(step.validate().is_err());
    }
}
