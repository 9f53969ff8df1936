// cloudpipe-cli/src/local.rs
// ============================================================================
// Module: Local Adapter
// Description: Broker for a local application with an on-disk .env file.
// Purpose: Publish pipe config into .env and rebuild pipes from it.
// Dependencies: cloudpipe-core, cloudpipe-broker
// ============================================================================

//! ## Overview
//! The local adapter wraps one application on disk. Its metadata comes from
//! the application's factor command (`name`/`url`/`iss`/`sub` lines), its
//! configuration lands in `{path}/.env`, and pipes negotiated in an earlier
//! run are rebuilt from the saved `PIPE_*` variables at startup.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use clap::Args;
use cloudpipe_broker::run_broker_server;
use cloudpipe_core::CallbackError;
use cloudpipe_core::Pipe;
use cloudpipe_core::Resource;
use cloudpipe_core::ResourceRegistry;
use serde_json::Map;
use serde_json::Value;
use tracing::info;
use tracing::warn;

use crate::CliError;
use crate::config_vars::ConfigUpdater;
use crate::config_vars::resource_for_app;
use crate::env_file;

// ============================================================================
// SECTION: Command
// ============================================================================

/// Configuration for the `local` subcommand.
#[derive(Args, Debug)]
pub struct LocalCommand {
    /// Path to the local application; falls back to `APP_PATH`, then `.`.
    #[arg(long)]
    pub path: Option<PathBuf>,
    /// Command printing the application's factor metadata.
    #[arg(long, default_value = "factor info")]
    pub factor: String,
}

/// Runs the local broker on port 8003.
pub async fn run(command: LocalCommand) -> Result<(), CliError> {
    let path = command
        .path
        .or_else(|| env::var("APP_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    let resource = local_resource(&path, &command.factor)?;
    build_pipes_from_env(&resource, &env_file::read_vars(&path.join(".env")));
    let registry = Arc::new(ResourceRegistry::new(vec![resource]));
    Ok(run_broker_server(8003, registry).await?)
}

// ============================================================================
// SECTION: Resource Construction
// ============================================================================

/// Builds the resource for the application at the given path.
fn local_resource(path: &Path, factor: &str) -> Result<Resource, CliError> {
    let mut parts = factor.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| CliError::Adapter("factor command is empty".to_string()))?;
    let output = Command::new(program)
        .args(parts)
        .current_dir(path)
        .output()
        .map_err(|err| CliError::Adapter(format!("error running factor command: {err}")))?;
    if !output.status.success() {
        return Err(CliError::Adapter(format!(
            "factor command failed with status {}",
            output.status
        )));
    }
    let metadata = parse_metadata(&String::from_utf8_lossy(&output.stdout));

    let env_path = path.join(".env");
    let updater: ConfigUpdater = Arc::new(move |_name, vars| {
        env_file::update(&env_path, vars).map_err(|err| CallbackError(err.to_string()))
    });
    Ok(resource_for_app(&metadata.name, &metadata.url, &metadata.iss, &metadata.sub, updater))
}

/// Application metadata reported by the factor command.
#[derive(Debug, Default, PartialEq, Eq)]
struct FactorMetadata {
    /// Application name.
    name: String,
    /// Application public URL.
    url: String,
    /// Identity provider issuer for the application.
    iss: String,
    /// Identity subject of the application.
    sub: String,
}

/// Parses `key = value` metadata lines from the factor command output.
fn parse_metadata(output: &str) -> FactorMetadata {
    let mut metadata = FactorMetadata::default();
    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "name" => metadata.name = value,
            "url" => metadata.url = value,
            "iss" => metadata.iss = value,
            "sub" => metadata.sub = value,
            _ => {}
        }
    }
    metadata
}

// ============================================================================
// SECTION: Pipe Reconstruction
// ============================================================================

/// Rebuilds pipes recorded in the env file into the resource.
pub fn build_pipes_from_env(resource: &Resource, vars: &BTreeMap<String, String>) {
    // The saved PIPE_{ID}_ID entries carry the original-case pipe ids.
    let mut ids: BTreeMap<String, String> = BTreeMap::new();
    for (key, value) in vars {
        if let Some(inner) = key.strip_prefix("PIPE_").and_then(|rest| rest.strip_suffix("_ID")) {
            ids.insert(inner.to_uppercase(), value.clone());
        }
    }
    info!("Found {} pipe ids: {:?}", ids.len(), ids.values());

    let Ok(mut pipes) = resource.pipes.write() else {
        warn!("resource lock poisoned, skipping pipe reconstruction");
        return;
    };
    for (upper_id, original_id) in &ids {
        if let Some(pipe) = reconstruct_pipe(upper_id, original_id, vars) {
            pipes.insert(original_id.clone(), pipe);
            info!("Loaded pipe {original_id} from environment variables");
        } else {
            warn!("Failed to reconstruct pipe {original_id} from environment variables");
        }
    }
}

/// Rebuilds one pipe from its `PIPE_{ID}_THIS_*` / `PIPE_{ID}_OTHER_*` vars.
fn reconstruct_pipe(
    upper_id: &str,
    original_id: &str,
    vars: &BTreeMap<String, String>,
) -> Option<Pipe> {
    let this_data = collect_prefixed(vars, &format!("PIPE_{upper_id}_THIS_"));
    let other_data = collect_prefixed(vars, &format!("PIPE_{upper_id}_OTHER_"));
    if this_data.is_empty() && other_data.is_empty() {
        return None;
    }
    let mut pipe = Pipe {
        id: original_id.to_string(),
        ..Pipe::default()
    };
    if !this_data.is_empty() {
        pipe.this.data = Some(Value::Object(this_data));
    }
    if !other_data.is_empty() {
        pipe.other.data = Some(Value::Object(other_data));
    }
    Some(pipe)
}

/// Collects fields under a prefix, matching keys case-insensitively.
fn collect_prefixed(vars: &BTreeMap<String, String>, prefix: &str) -> Map<String, Value> {
    let wanted = prefix.to_uppercase();
    let mut fields = Map::new();
    for (key, value) in vars {
        let upper_key = key.to_uppercase();
        if let Some(field) = upper_key.strip_prefix(&wanted) {
            fields.insert(field.to_string(), Value::String(value.clone()));
        }
    }
    fields
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only local adapter assertions.")]

    use std::collections::BTreeMap;

    use cloudpipe_core::Resource;
    use serde_json::json;

    use super::build_pipes_from_env;
    use super::parse_metadata;

    #[test]
    fn metadata_lines_are_parsed_and_trimmed() {
        let output = "name = frontend\nurl=https://frontend.example.com\niss = https://oidc\nsub=frontend\nnoise line\n";
        let metadata = parse_metadata(output);
        assert_eq!(metadata.name, "frontend");
        assert_eq!(metadata.url, "https://frontend.example.com");
        assert_eq!(metadata.iss, "https://oidc");
        assert_eq!(metadata.sub, "frontend");
    }

    #[test]
    fn pipes_rebuild_from_saved_vars_preserving_case() {
        let mut vars = BTreeMap::new();
        vars.insert("PIPE_MyPipe_ID".to_string(), "MyPipe".to_string());
        vars.insert("PIPE_MYPIPE_THIS_AUD".to_string(), "db".to_string());
        vars.insert("PIPE_MYPIPE_OTHER_URI".to_string(), "postgresqls://host/db".to_string());
        vars.insert("UNRELATED".to_string(), "x".to_string());

        let resource = Resource::new("frontend");
        build_pipes_from_env(&resource, &vars);

        let pipes = resource.pipes.read().unwrap();
        let pipe = pipes.get("MyPipe").unwrap();
        assert_eq!(pipe.this.data, Some(json!({"AUD": "db"})));
        assert_eq!(pipe.other.data, Some(json!({"URI": "postgresqls://host/db"})));
    }

    #[test]
    fn id_entries_without_data_are_skipped() {
        let mut vars = BTreeMap::new();
        vars.insert("PIPE_ghost_ID".to_string(), "ghost".to_string());
        let resource = Resource::new("frontend");
        build_pipes_from_env(&resource, &vars);
        assert!(resource.pipes.read().unwrap().is_empty());
    }
}
