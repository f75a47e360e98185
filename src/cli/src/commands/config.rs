//! Configuration commands.
//!
//! Shows the effective configuration: defaults, then the optional file, then
//! `LAPSYNC__*` environment overrides.

use anyhow::Result;
use clap::Subcommand;
use serde_json::Value;
use std::path::Path;

use lapsync_core::config::Config;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Check the configuration and report where it came from
    Validate,
}

/// Flatten nested JSON into `a.b.c = value` pairs.
fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&path, child, out);
            }
        }
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

pub fn execute(
    cmd: ConfigCommands,
    config: &Config,
    source: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        ConfigCommands::Show => match format {
            OutputFormat::Table => {
                let mut pairs = Vec::new();
                flatten("", &serde_json::to_value(config)?, &mut pairs);
                output::print_header("Configuration");
                for (key, value) in &pairs {
                    output::print_detail(key, value);
                }
            }
            _ => output::print_item(config, format)?,
        },

        ConfigCommands::Validate => {
            // Loading already validated; re-run for the explicit report.
            config.validate()?;
            let origin = source
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults + environment".to_string());
            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Configuration is valid ({})", origin))
                }
                _ => output::print_item(
                    &serde_json::json!({ "valid": true, "source": origin }),
                    format,
                )?,
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_nested() {
        let mut pairs = Vec::new();
        flatten(
            "",
            &serde_json::json!({ "replica": { "watch_count": 9 }, "name": "x" }),
            &mut pairs,
        );
        assert!(pairs.contains(&("replica.watch_count".to_string(), "9".to_string())));
        assert!(pairs.contains(&("name".to_string(), "x".to_string())));
    }
}
