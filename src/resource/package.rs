//! apt package resource

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use shellexec::shell::{join, quote};

use super::{Commands, OneOrMany, Resource, default_true};

/// Debian/Ubuntu packages installed with apt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub packages: OneOrMany,
    /// Refresh the package index before installing
    #[serde(default = "default_true")]
    pub update: bool,
}

impl Package {
    fn names(&self) -> Vec<String> {
        self.packages.to_vec()
    }
}

impl Resource for Package {
    fn describe(&self) -> String {
        let names = self.names();
        if names.len() == 1 {
            format!("apt package {}", names[0])
        } else {
            format!("apt packages {}", names.join(", "))
        }
    }

    fn validate(&self) -> Result<()> {
        let names = self.names();
        if names.is_empty() {
            bail!("packages must not be empty");
        }
        if let Some(bad) = names
            .iter()
            .find(|n| n.is_empty() || n.chars().any(char::is_whitespace))
        {
            bail!("invalid package name '{bad}'");
        }
        Ok(())
    }

    fn commands(&self) -> Commands {
        let names = self.names();
        let installed = names
            .iter()
            .map(|name| {
                format!(
                    "dpkg-query -W -f='${{Status}}' {} 2>/dev/null | grep -q 'install ok installed'",
                    quote(name)
                )
            })
            .collect::<Vec<_>>()
            .join(" && ");

        let mut apply = Vec::new();
        if self.update {
            apply.push("apt-get update -q".to_string());
        }
        apply.push(format!(
            "DEBIAN_FRONTEND=noninteractive apt-get install -y -q {}",
            join(&names)
        ));

        Commands {
            precondition: Some(installed),
            apply,
            verify: None,
        }
    }
}
