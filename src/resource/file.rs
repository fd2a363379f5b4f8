//! File with exact content

use anyhow::Result;
use serde::{Deserialize, Serialize};
use shellexec::shell::quote;

use super::{
    Commands, Resource, attribute_checks, attribute_commands, validate_absolute, validate_mode,
};

/// A file whose content, mode and owner are managed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    /// Octal mode such as `644`
    #[serde(default)]
    pub mode: Option<String>,
    /// `user` or `user:group`
    #[serde(default)]
    pub owner: Option<String>,
}

impl FileContent {
    fn parent(&self) -> &str {
        match self.path.rsplit_once('/') {
            Some(("", _)) | None => "/",
            Some((parent, _)) => parent,
        }
    }
}

impl Resource for FileContent {
    fn describe(&self) -> String {
        format!("file {}", self.path)
    }

    fn validate(&self) -> Result<()> {
        validate_absolute(&self.path)?;
        validate_mode(self.mode.as_deref())
    }

    fn commands(&self) -> Commands {
        let path = quote(&self.path);
        let content = quote(&self.content);

        let mut checks = vec![format!(
            "[ -f {path} ] && printf '%s' {content} | cmp -s - {path}"
        )];
        checks.extend(attribute_checks(
            &self.path,
            self.mode.as_deref(),
            self.owner.as_deref(),
        ));

        let mut apply = vec![
            format!("mkdir -p {}", quote(self.parent())),
            format!("printf '%s' {content} > {path}"),
        ];
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
