use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::Notify;

use nexa_realtime::{
    arguments::{patterns, print_debug_info, print_help},
    broker::Broker,
    config::{self, Config, StaticServiceConfig},
    logger::{self, LogTag},
    services::{
        ClientSettings, RegisterOptions, ReqwestTransport, ServiceClient, ServiceRegistry,
    },
    webserver::{self, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if patterns::is_help_requested() {
        print_help();
        return Ok(());
    }

    let config_path = patterns::get_config_path()
        .unwrap_or_else(|| config::CONFIG_FILE_PATH.to_string());
    let config_loaded = std::path::Path::new(&config_path).exists();
    if config_loaded {
        config::load_config_from_path(&config_path)
            .with_context(|| format!("loading {}", config_path))?;
    }
    let mut cfg: Config = config::get_config_clone();
    if let Some(host) = patterns::get_host() {
        cfg.broker.host = host;
    }
    if let Some(port) = patterns::get_port() {
        cfg.broker.port = port;
    }

    logger::init_with(|lc| {
        lc.file_logging = cfg.logging.file_logging;
        lc.log_dir = cfg.logging.log_dir.clone().into();
    });
    print_debug_info();

    if config_loaded {
        logger::info(LogTag::Config, &format!("Loaded configuration from {}", config_path));
    } else {
        logger::warning(
            LogTag::Config,
            &format!("{} not found, using defaults", config_path),
        );
    }

    let result = run(cfg).await;
    if let Err(e) = &result {
        logger::error(LogTag::System, &format!("Fatal: {:#}", e));
    }
    logger::flush();
    result
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let shutdown = Arc::new(Notify::new());
    let transport = Arc::new(ReqwestTransport::new());

    let registry = Arc::new(ServiceRegistry::from_config(&cfg.registry, transport.clone()));
    for service in &cfg.services {
        register_static(&registry, service).await;
    }
    let mut tasks = Vec::new();
    if cfg.registry.health_check_interval_secs > 0 {
        tasks.push(registry.spawn_health_monitor(
            Duration::from_secs(cfg.registry.health_check_interval_secs),
            shutdown.clone(),
        ));
    }

    let client = Arc::new(ServiceClient::new(
        ClientSettings::from_config(&cfg.client),
        registry,
        transport,
    ));

    let broker = Broker::from_config(&cfg.broker);
    tasks.push(broker.spawn_heartbeat(shutdown.clone()));

    let state = Arc::new(AppState::new(broker, client));
    let mut server = tokio::spawn({
        let shutdown = shutdown.clone();
        let host = cfg.broker.host.clone();
        let port = cfg.broker.port;
        async move { webserver::start_server(&host, port, state, shutdown).await }
    });

    // The server only returns early on bind failure
    let early_exit = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("installing Ctrl-C handler")?;
            logger::info(LogTag::System, "Shutdown requested");
            None
        }
        joined = &mut server => Some(joined),
    };

    shutdown.notify_waiters();
    for task in tasks {
        let _ = task.await;
    }
    let joined = match early_exit {
        Some(joined) => joined,
        None => server.await,
    };
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(anyhow::anyhow!(e)),
        Err(e) => Err(anyhow::anyhow!("webserver task failed: {}", e)),
    }
}

async fn register_static(registry: &ServiceRegistry, service: &StaticServiceConfig) {
    let options = RegisterOptions {
        host: service.host.clone(),
        port: service.port,
        protocol: service.protocol.clone(),
        version: service.version.clone(),
        health_check_path: service.health_check_path.clone(),
        tags: service.tags.clone(),
        metadata: service.metadata.clone(),
    };
    let id = registry.register(&service.name, options).await;
    logger::info(
        LogTag::Registry,
        &format!("Registered static service {} as {}", service.name, id),
    );
}
