//! # conduit-gateway
//!
//! Gateway binary: loads layered settings, builds the validator, bus, and
//! registry backends, and serves until Ctrl-C.
//!
//! Redis backends connect on first use. An unreachable Redis at boot leaves
//! the gateway serving with `/health` reporting the backend down.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use conduit_auth::{HttpSessionValidator, SessionValidator, StaticSessionValidator};
use conduit_bus::{FanOutBus, MemoryBus};
use conduit_registry::{ConnectionRegistry, MemoryStore, RegistryStore};
use conduit_server::{GatewayConfig, GatewayDeps, GatewayServer};
use conduit_settings::{Backend, ConduitSettings, ValidatorMode};
use tracing::{info, warn};

/// Conduit real-time connection gateway.
#[derive(Parser, Debug)]
#[command(name = "conduit-gateway", about = "Conduit WebSocket connection gateway")]
struct Cli {
    /// Settings file (defaults to `~/.conduit/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Instance ID on the bus and in the registry (generated if unset).
    #[arg(long)]
    instance_id: Option<String>,

    /// Redis URL for both the bus and the registry; selects the Redis backends.
    #[arg(long)]
    redis_url: Option<String>,

    /// Log level filter (overrides settings; `RUST_LOG` wins over both).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Fold command-line overrides into loaded settings.
    fn apply(&self, settings: &mut ConduitSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(id) = &self.instance_id {
            settings.server.instance_id = Some(id.clone());
        }
        if let Some(url) = &self.redis_url {
            settings.bus.backend = Backend::Redis;
            settings.bus.redis_url.clone_from(url);
            settings.registry.backend = Backend::Redis;
            settings.registry.redis_url.clone_from(url);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

/// Log level while settings are still loading.
const DEFAULT_LOG_LEVEL: &str = "info";

/// Load settings, fold in CLI overrides, and validate.
fn resolve_settings(cli: &Cli) -> Result<ConduitSettings> {
    let mut settings =
        conduit_settings::load_settings(cli.config.as_deref()).context("loading settings")?;
    cli.apply(&mut settings);
    conduit_settings::validate(&settings).context("invalid settings")?;
    Ok(settings)
}

fn build_validator(settings: &ConduitSettings) -> Result<Arc<dyn SessionValidator>> {
    let validator = &settings.validator;
    Ok(match validator.mode {
        ValidatorMode::Http => {
            let url = validator
                .url
                .clone()
                .context("validator.url is required when validator.mode = \"http\"")?;
            Arc::new(HttpSessionValidator::new(url, validator.timeout())?)
        }
        ValidatorMode::Static => {
            if validator.static_tokens.is_empty() {
                warn!("static validator has no tokens; every connection will be rejected");
            }
            Arc::new(StaticSessionValidator::new(
                validator
                    .static_tokens
                    .iter()
                    .map(|(token, identity)| (token.clone(), identity.clone())),
            ))
        }
    })
}

fn build_bus(settings: &ConduitSettings) -> Result<Arc<dyn FanOutBus>> {
    match settings.bus.backend {
        Backend::Memory => Ok(Arc::new(MemoryBus::new())),
        #[cfg(feature = "redis")]
        Backend::Redis => {
            let bus = conduit_bus::RedisBus::open(&settings.bus.redis_url)
                .with_context(|| format!("bus.redis_url {}", settings.bus.redis_url))?;
            Ok(Arc::new(bus))
        }
        #[cfg(not(feature = "redis"))]
        Backend::Redis => bail!("bus.backend = \"redis\" needs the `redis` feature"),
    }
}

fn build_registry(settings: &ConduitSettings) -> Result<ConnectionRegistry> {
    let store: Arc<dyn RegistryStore> = match settings.registry.backend {
        Backend::Memory => Arc::new(MemoryStore::new()),
        #[cfg(feature = "redis")]
        Backend::Redis => Arc::new(
            conduit_registry::RedisStore::open(&settings.registry.redis_url)
                .with_context(|| format!("registry.redis_url {}", settings.registry.redis_url))?,
        ),
        #[cfg(not(feature = "redis"))]
        Backend::Redis => bail!("registry.backend = \"redis\" needs the `redis` feature"),
    };
    Ok(ConnectionRegistry::new(
        store,
        settings.registry.key_prefix.clone(),
        settings.max_idle_time(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let bootstrap = conduit_core::logging::bootstrap_dispatch(
        cli.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL),
    );
    let settings = tracing::dispatcher::with_default(&bootstrap, || resolve_settings(&cli))?;

    conduit_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    let metrics = match conduit_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder not installed; /metrics disabled");
            None
        }
    };

    let deps = GatewayDeps {
        validator: build_validator(&settings)?,
        bus: build_bus(&settings)?,
        registry: build_registry(&settings)?,
    };
    let server = GatewayServer::new(GatewayConfig::from_settings(&settings), deps, metrics);
    let addr = server.listen().await.context("binding listener")?;
    info!(%addr, instance_id = %server.config().instance_id, "conduit gateway started");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    if !server.shutdown().await {
        bail!("shutdown deadline passed with tasks still running");
    }
    info!("shutdown complete");
    Ok(())
}
