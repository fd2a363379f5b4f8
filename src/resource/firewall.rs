//! ufw firewall rules

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use shellexec::shell::quote;

use super::{Commands, OneOrMany, Resource, default_true};

const ACTIONS: [&str; 4] = ["allow", "deny", "limit", "reject"];

/// ufw rules, written as the arguments after `ufw`
///
/// ```toml
/// rules = ["allow OpenSSH", "allow 'Nginx Full'"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Firewall {
    pub rules: OneOrMany,
    /// Enable the firewall after adding the rules
    #[serde(default = "default_true")]
    pub enable: bool,
}

impl Resource for Firewall {
    fn describe(&self) -> String {
        format!("firewall {}", self.rules.to_vec().join(", "))
    }

    fn validate(&self) -> Result<()> {
        let rules = self.rules.to_vec();
        if rules.is_empty() {
            bail!("rules must not be empty");
        }
        for rule in &rules {
            let action = rule.split_whitespace().next().unwrap_or_default();
            if !ACTIONS.contains(&action) {
                bail!(
                    "rule '{rule}' must start with one of: {}",
                    ACTIONS.join(", ")
                );
            }
        }
        Ok(())
    }

    fn commands(&self) -> Commands {
        let rules = self.rules.to_vec();
        let mut checks = Vec::new();
        if self.enable {
            checks.push("ufw status | grep -q '^Status: active'".to_string());
        }
        // `ufw show added` lists each rule as the command that added it
        checks.extend(rules.iter().map(|rule| {
            format!(
                "ufw show added | grep -qxF {}",
                quote(&format!("ufw {}", normalize(rule)))
            )
        }));

        let mut apply: Vec<String> = rules.iter().map(|rule| format!("ufw {rule}")).collect();
        if self.enable {
            apply.push("ufw --force enable".to_string());
        }

        Commands {
            precondition: Some(checks.join(" && ")),
            apply,
            verify: None,
        }
    }
}

/// Rule text as ufw prints it back: single spaces, no shell quotes
fn normalize(rule: &str) -> String {
    rule.replace(['\'', '"'], "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands() {
        let fw: Firewall = toml::from_str(r#"rules = ["allow OpenSSH", "allow 'Nginx Full'"]"#)
            .unwrap();
        let commands = fw.commands();
        let check = commands.precondition.unwrap();
        assert!(check.starts_with("ufw status | grep -q '^Status: active' && "));
        assert!(check.contains("grep -qxF 'ufw allow OpenSSH'"));
        assert!(check.contains("grep -qxF 'ufw allow Nginx Full'"));
        assert_eq!(
            commands.apply,
            vec![
                "ufw allow OpenSSH",
                "ufw allow 'Nginx Full'",
                "ufw --force enable",
            ]
        );
    }

    #[test]
    fn test_without_enable() {
        let fw = Firewall {
            rules: OneOrMany::One("limit 22/tcp".into()),
            enable: false,
        };
        let commands = fw.commands();
        assert_eq!(commands.apply, vec!["ufw limit 22/tcp"]);
        assert!(!commands.precondition.unwrap().contains("Status: active"));
    }

    #[test]
    fn test_unknown_action() {
        let fw = Firewall {
            rules: OneOrMany::One("open 80".into()),
            enable: true,
        };
        assert!(fw.validate().unwrap_err().to_string().contains("allow"));
    }
}
