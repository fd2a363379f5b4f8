//! Directory resource

use anyhow::Result;
use serde::{Deserialize, Serialize};
use shellexec::shell::quote;

use super::{
    Commands, Resource, attribute_checks, attribute_commands, validate_absolute, validate_mode,
};

/// A directory, created with its parents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub path: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

impl Resource for Directory {
    fn describe(&self) -> String {
        format!("directory {}", self.path)
    }

    fn validate(&self) -> Result<()> {
        validate_absolute(&self.path)?;
        validate_mode(self.mode.as_deref())
    }

    fn commands(&self) -> Commands {
        let mut checks = vec![format!("test -d {}", quote(&self.path))];
        checks.extend(attribute_checks(
            &self.path,
            self.mode.as_deref(),
            self.owner.as_deref(),
        ));

        let mut apply = vec![format!("mkdir -p {}", quote(&self.path))];
        apply.extend(attribute_commands(
            &self.path,
            self.mode.as_deref(),
            self.owner.as_deref(),
        ));

        Commands {
            precondition: Some(checks.join(" && ")),
            apply,
            verify: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands() {
        let dir: Directory = toml::from_str(
            r#"
            path = "/srv/app"
            owner = "deploy:deploy"
            "#,
        )
        .unwrap();
        let commands = dir.commands();
        assert_eq!(
            commands.precondition.unwrap(),
            "test -d /srv/app && [ \"$(stat -c %U:%G /srv/app)\" = deploy:deploy ]"
        );
        assert_eq!(
            commands.apply,
            vec!["mkdir -p /srv/app", "chown deploy:deploy /srv/app"]
        );
    }

    #[test]
    fn test_path_with_spaces() {
        let dir = Directory {
            path: "/srv/my app".into(),
            mode: None,
            owner: None,
        };
        assert_eq!(dir.commands().apply, vec!["mkdir -p '/srv/my app'"]);
    }
}
