//! `{{name}}` placeholders in steps files
//!
//! Values come from the file's `[vars]` table and `--var` overrides, all
//! resolved before a run starts.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid regex")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("undefined variable '{name}' (define it under [vars] or pass --var {name}=...)")]
    Undefined { name: String },
}

/// Substitute every placeholder in `input`
pub fn render(input: &str, vars: &BTreeMap<String, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(input) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = vars
            .get(name.as_str())
            .ok_or_else(|| TemplateError::Undefined {
                name: name.as_str().to_string(),
            })?;
        out.push_str(&input[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

/// Substitute placeholders in every string of a JSON tree
pub fn render_value(value: &mut Value, vars: &BTreeMap<String, String>) -> Result<(), TemplateError> {
    match value {
        Value::String(s) => {
            if PLACEHOLDER.is_match(s) {
                *s = render(s, vars)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                render_value(item, vars)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                render_value(item, vars)?;
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}
