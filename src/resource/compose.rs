//! docker compose project

use anyhow::Result;
use serde::{Deserialize, Serialize};
use shellexec::shell::quote;

use super::{Commands, Resource, validate_absolute};

/// A compose project brought up detached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeProject {
    /// Project directory on the target
    pub dir: String,
    /// Compose file, relative to `dir`
    #[serde(default)]
    pub file: Option<String>,
    /// Rebuild images on every apply
    #[serde(default)]
    pub build: bool,
}

impl ComposeProject {
    fn base(&self) -> String {
        let mut base = format!("docker compose --project-directory {}", quote(&self.dir));
        if let Some(file) = &self.file {
            base.push_str(&format!(" -f {}", quote(file)));
        }
        base
    }
}

impl Resource for ComposeProject {
    fn describe(&self) -> String {
        format!("compose project {}", self.dir)
    }

    fn validate(&self) -> Result<()> {
        validate_absolute(&self.dir)
    }

    fn commands(&self) -> Commands {
        let base = self.base();
        // Satisfied when every declared service is running
        let check = format!(
            "[ -n \"$({base} config --services)\" ] && \
             [ \"$({base} ps --status running --services | sort)\" = \"$({base} config --services | sort)\" ]"
        );
        let mut up = format!("{base} up -d --remove-orphans");
        if self.build {
            up.push_str(" --build");
        }
        Commands {
            precondition: Some(check),
            apply: vec![up],
            verify: None,
        }
    }
}
