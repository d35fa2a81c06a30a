//! # Hook Relay Service
//!
//! Binary entry point for the GitHub webhook relay.
//!
//! This executable:
//! - Loads configuration from files and the environment
//! - Initializes logging
//! - Builds the GitHub App client, allowlist, transformer and forwarder
//! - Pre-warms GitHub's source ranges and starts the HTTP server

use github_app_client::GitHubAppClient;
use hook_relay_api::{
    start_server, AppState, ConfigError, HttpForwarder, LoggingConfig, RelayMetrics,
    ServiceConfig, ServiceError,
};
use hook_relay_core::{IpAllowlist, PayloadTransformer};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CONFIG_FILE_ENV: &str = "RELAY_CONFIG_FILE";
const ENV_PREFIX: &str = "RELAY";

#[tokio::main]
async fn main() {
    // Logging depends on the configuration, so a configuration failure is
    // reported through a subscriber built from the defaults.
    let result = match load_config() {
        Ok(config) => {
            init_tracing(&config.logging);
            run(config).await
        }
        Err(e) => {
            init_tracing(&LoggingConfig::default());
            Err(ServiceError::from(e))
        }
    };

    if let Err(e) = result {
        error!(error = %e, "hook-relay terminated");
        std::process::exit(e.exit_code());
    }
}

async fn run(service_config: ServiceConfig) -> Result<(), ServiceError> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting hook-relay");

    service_config.validate()?;
    let state = build_state(service_config)?;

    // Populate the source ranges before the first delivery arrives. Failure
    // only means the first delivery fetches them instead.
    let allowlist = state.allowlist.clone();
    tokio::spawn(async move {
        allowlist.prewarm().await;
    });

    info!(
        host = %state.config.server.host,
        port = state.config.server.port,
        downstream = %state.config.downstream.base_url,
        "Starting HTTP server"
    );

    start_server(state).await
}

// ============================================================================
// Private helpers
// ============================================================================

/// Load configuration, later sources overriding earlier ones:
///
///  1. `/etc/hook-relay/service.yaml`
///  2. `./config/service.yaml`
///  3. the file named by `RELAY_CONFIG_FILE` (required when set)
///  4. `RELAY__`-prefixed environment variables, e.g. `RELAY__SERVER__PORT=9090`
///
/// Every field has a default, so missing files are not an error.
fn load_config() -> Result<ServiceConfig, ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(
            config::File::with_name("/etc/hook-relay/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        )
        .add_source(
            config::File::with_name("config/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        );

    if let Ok(explicit_path) = std::env::var(CONFIG_FILE_ENV) {
        if !explicit_path.is_empty() {
            builder = builder.add_source(
                config::File::with_name(&explicit_path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }
    }

    builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("security.allowed_hosts")
                .try_parsing(true),
        )
        .build()
        .and_then(|config| config.try_deserialize())
        .map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })
}

/// `RUST_LOG` wins over `logging.level` when set.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Dependency root: every cache lives in an instance created here.
fn build_state(config: ServiceConfig) -> Result<AppState, ConfigError> {
    let credentials = config.github.app_credentials()?;
    info!(app_id = %credentials.app_id(), "Loaded GitHub App credentials");

    let github = GitHubAppClient::new(credentials, config.client_config())
        .map_err(|e| invalid("GitHub client", e))?;
    let github = Arc::new(github);
    let allowlist = Arc::new(IpAllowlist::new(github.clone(), config.cache.ip_ranges_ttl()));
    let transformer = PayloadTransformer::new(github);
    let forwarder = HttpForwarder::new(
        config.downstream.base_url.clone(),
        config.downstream.timeout(),
        config.downstream.connect_timeout(),
    )
    .map_err(|e| invalid("downstream forwarder", e))?;
    let metrics = RelayMetrics::new().map_err(|e| invalid("metrics registry", e))?;

    Ok(AppState::new(
        config,
        allowlist,
        transformer,
        Arc::new(forwarder),
        metrics,
    ))
}

fn invalid(component: &str, error: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        message: format!("cannot build {}: {}", component, error),
    }
}
