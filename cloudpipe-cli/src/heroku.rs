// cloudpipe-cli/src/heroku.rs
// ============================================================================
// Module: Heroku Adapter
// Description: Broker over the apps of a Heroku account or team.
// Purpose: Publish pipe config through the platform config-vars API.
// Dependencies: cloudpipe-core, cloudpipe-broker, reqwest
// ============================================================================

//! ## Overview
//! The heroku adapter lists the account's apps (optionally limited to a
//! team), registers each as a `backing_service` resource, and publishes
//! configuration changes through `PATCH /apps/{name}/config-vars`. Unset
//! variables are sent as JSON null, which is the platform's removal
//! convention. Config pushes are fire-and-forget like mirror updates.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use cloudpipe_broker::run_broker_server;
use cloudpipe_core::ResourceRegistry;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::error;

use crate::CliError;
use crate::config_vars::ConfigUpdater;
use crate::config_vars::ConfigVars;
use crate::config_vars::resource_for_app;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Platform API base URL.
const API_BASE: &str = "https://api.heroku.com";
/// Platform API version header value.
const API_ACCEPT: &str = "application/vnd.heroku+json; version=3";
/// Platform request timeout.
const API_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// SECTION: Command
// ============================================================================

/// Configuration for the `heroku` subcommand.
#[derive(Args, Debug)]
pub struct HerokuCommand {
    /// Limit apps to this team; falls back to `HEROKU_TEAM`.
    #[arg(long)]
    pub team: Option<String>,
}

/// Runs the heroku broker on port 8002.
pub async fn run(command: HerokuCommand) -> Result<(), CliError> {
    let token = env::var("HEROKU_API_KEY")
        .map_err(|_| CliError::Adapter("HEROKU_API_KEY not set".to_string()))?;
    let team = command.team.or_else(|| env::var("HEROKU_TEAM").ok());
    let client = Arc::new(HerokuClient::new(token)?);

    let apps = client.list_apps(team.as_deref()).await?;
    let mut resources = Vec::new();
    for app in apps {
        let url = app.web_url.clone().unwrap_or_default();
        // The platform identity provider uses the app url as issuer and the
        // app name as subject.
        resources.push(resource_for_app(
            &app.name,
            &url,
            &url,
            &app.name,
            config_updater(Arc::clone(&client)),
        ));
    }
    Ok(run_broker_server(8002, Arc::new(ResourceRegistry::new(resources))).await?)
}

// ============================================================================
// SECTION: Platform Client
// ============================================================================

/// App entry returned by the platform API.
#[derive(Debug, Clone, Deserialize)]
struct HerokuApp {
    /// App name.
    name: String,
    /// Public web URL of the app.
    web_url: Option<String>,
}

/// Thin platform API client.
struct HerokuClient {
    /// Bounded HTTP client.
    http: reqwest::Client,
    /// Platform API token.
    token: String,
}

impl HerokuClient {
    /// Builds the client with a bounded timeout.
    fn new(token: String) -> Result<Self, CliError> {
        let http = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|err| CliError::Adapter(format!("http client build failed: {err}")))?;
        Ok(Self {
            http,
            token,
        })
    }

    /// Lists apps for the account or the given team.
    async fn list_apps(&self, team: Option<&str>) -> Result<Vec<HerokuApp>, CliError> {
        let url = match team {
            Some(team) => format!("{API_BASE}/teams/{team}/apps"),
            None => format!("{API_BASE}/apps"),
        };
        self.http
            .get(url)
            .bearer_auth(&self.token)
            .header(ACCEPT, API_ACCEPT)
            .send()
            .await
            .map_err(|err| CliError::Adapter(format!("app list failed: {err}")))?
            .error_for_status()
            .map_err(|err| CliError::Adapter(format!("app list failed: {err}")))?
            .json()
            .await
            .map_err(|err| CliError::Adapter(format!("app list decode failed: {err}")))
    }

    /// Patches an app's config vars; null values unset.
    async fn update_config_vars(&self, app: &str, vars: &ConfigVars) -> Result<(), CliError> {
        self.http
            .patch(format!("{API_BASE}/apps/{app}/config-vars"))
            .bearer_auth(&self.token)
            .header(ACCEPT, API_ACCEPT)
            .json(vars)
            .send()
            .await
            .map_err(|err| CliError::Adapter(format!("config var update failed: {err}")))?
            .error_for_status()
            .map_err(|err| CliError::Adapter(format!("config var update failed: {err}")))?;
        Ok(())
    }
}

/// Builds the updater pushing config changes through the platform API.
fn config_updater(client: Arc<HerokuClient>) -> ConfigUpdater {
    Arc::new(move |name, vars| {
        let client = Arc::clone(&client);
        let name = name.to_string();
        let vars = vars.clone();
        tokio::spawn(async move {
            if let Err(err) = client.update_config_vars(&name, &vars).await {
                error!("Error updating config vars for {name}: {err}");
            }
        });
        Ok(())
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================
