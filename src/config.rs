//! Steps file loading
//!
//! A steps file is TOML (or JSON, by extension):
//!
//! ```toml
//! [settings]
//! timeout_secs = 300
//! policy = "halt-on-failure"
//!
//! [vars]
//! app_dir = "/srv/app"
//!
//! [[steps]]
//! id = "app-dir"
//! kind = "directory"
//! path = "{{app_dir}}"
//! privileged = true
//! ```
//!
//! Placeholders are substituted everywhere except inside `[vars]` before the
//! file is deserialized, so every kind sees final values.

use anyhow::{Context, Result, bail};
use converge::FailurePolicy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::resource::StepKind;
use crate::template;

/// Run defaults from the `[settings]` table; CLI flags take precedence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Per-command time budget
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub policy: Option<FailurePolicy>,
    /// Steps that may run at once
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// ssh connection timeout
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

/// One `[[steps]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Run every command through `sudo -n`
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Extra apply attempts after the first
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub retry_delay_secs: Option<u64>,
    #[serde(flatten)]
    pub kind: StepKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepsFile {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

/// A rendered steps file and where it came from
#[derive(Debug, Clone)]
pub struct LoadedSteps {
    pub file: StepsFile,
    pub path: PathBuf,
    /// blake3 hash of the rendered definitions
    pub digest: String,
}

/// Read, render and parse a steps file
///
/// `overrides` replace (or add to) the file's `[vars]`.
pub fn load(path: &Path, overrides: &[(String, String)]) -> Result<LoadedSteps> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read steps file {}", path.display()))?;
    let value = parse(path, &content)?;
    let (file, digest) = render(value, overrides)
        .with_context(|| format!("Invalid steps file {}", path.display()))?;
    log::debug!(
        "Loaded {} steps from {} (digest {})",
        file.steps.len(),
        path.display(),
        &digest[..12]
    );
    Ok(LoadedSteps {
        file,
        path: path.to_path_buf(),
        digest,
    })
}

fn parse(path: &Path, content: &str) -> Result<Value> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(content)
            .with_context(|| format!("Failed to parse JSON in {}", path.display()))
    } else {
        toml::from_str(content)
            .with_context(|| format!("Failed to parse TOML in {}", path.display()))
    }
}

/// Substitute variables and deserialize; returns the file and its digest
fn render(mut value: Value, overrides: &[(String, String)]) -> Result<(StepsFile, String)> {
    let Value::Object(root) = &mut value else {
        bail!("top level must be a table");
    };

    let mut vars = match root.remove("vars") {
        Some(raw) => vars_table(raw)?,
        None => BTreeMap::new(),
    };
    for (key, val) in overrides {
        vars.insert(key.clone(), val.clone());
    }

    template::render_value(&mut value, &vars)?;

    let digest = blake3::hash(&serde_json::to_vec(&value)?).to_hex().to_string();

    if let Value::Object(root) = &mut value {
        let table: Map<String, Value> = vars
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        root.insert("vars".to_string(), Value::Object(table));
    }

    let raw_steps = value.get("steps").cloned();
    let file: StepsFile = serde_json::from_value(value)?;
    if let Some(Value::Array(raw_steps)) = raw_steps {
        for (raw, spec) in raw_steps.iter().zip(&file.steps) {
            reject_unknown_fields(raw, spec)?;
        }
    }
    Ok((file, digest))
}

/// Fail on step keys that neither the common fields nor the kind declare
///
/// `flatten` swallows extra keys, so the raw entry is compared with the
/// fields the parsed step serializes back to.
fn reject_unknown_fields(raw: &Value, spec: &StepSpec) -> Result<()> {
    let Value::Object(raw) = raw else {
        return Ok(());
    };
    let Value::Object(known) = serde_json::to_value(spec)? else {
        return Ok(());
    };
    if let Some(key) = raw.keys().find(|key| !known.contains_key(*key)) {
        let expected: Vec<&str> = known.keys().map(String::as_str).collect();
        bail!(
            "step '{}': unknown field '{key}' (expected one of: {})",
            spec.id,
            expected.join(", ")
        );
    }
    Ok(())
}

/// Flatten `[vars]` to strings; numbers and booleans are stringified
fn vars_table(raw: Value) -> Result<BTreeMap<String, String>> {
    let Value::Object(table) = raw else {
        bail!("[vars] must be a table");
    };
    table
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => bail!("variable '{key}' must be a string, number or boolean"),
            };
            Ok((key, text))
        })
        .collect()
}
