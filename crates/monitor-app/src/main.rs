mod systemd;

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cloud_client::HttpCloudClient;
use device_registry::SettingsOwner;
use history_store::HistoryStore;
use monitor_app::{LogDisplay, MonitorConfig};
use poll_scheduler::PollScheduler;

#[derive(Debug, Default)]
struct CliArgs {
    config: Option<String>,
    simulate: bool,
    export: bool,
    init_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args();
    if let Some(path) = args.init_config.as_deref() {
        MonitorConfig::default()
            .save(path)
            .context("write default config failed")?;
        info!(path = %path.display(), "default config written");
        return Ok(());
    }

    let config = load_config(&args).context("load config failed")?;
    let settings = config.settings()?;
    let owner = SettingsOwner::new(settings);
    let store = HistoryStore::new(owner.snapshot().save_dir.clone());

    for device in &owner.snapshot().devices {
        match store.load(&device.label).await {
            Ok(dataset) => info!(device = %device.label, rows = dataset.len(), "history loaded"),
            Err(err) => warn!(device = %device.label, error = %err, "history load failed"),
        }
    }

    if args.export {
        let written = store
            .export_all(&config.export_dir, Local::now().naive_local())
            .await
            .context("history export failed")?;
        info!(files = written.len(), dir = %config.export_dir.display(), "export complete");
        return Ok(());
    }

    install_metrics(config.metrics_listen.as_deref())?;

    let client = HttpCloudClient::new(config.client.clone()).context("cloud client init failed")?;
    let scheduler = PollScheduler::new(
        owner.subscribe(),
        Arc::new(client),
        store.clone(),
        Arc::new(LogDisplay::new()),
        config.simulate,
    );
    scheduler.start();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    systemd::ready();
    let watchdog = systemd::spawn_watchdog(shutdown_rx);

    let mut reload = ReloadSignal::new()?;
    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("shutdown signal received");
                break;
            }
            _ = reload.recv() => {
                reload_settings(&args, &owner, &scheduler).await;
            }
        }
    }

    systemd::stopping();
    let _ = shutdown_tx.send(true);
    scheduler.stop().await;
    if let Some(handle) = watchdog {
        let _ = handle.await;
    }
    Ok(())
}

fn load_config(args: &CliArgs) -> Result<MonitorConfig> {
    let mut config = MonitorConfig::load_with_path(args.config.clone())?;
    if args.simulate {
        config.simulate = true;
    }
    config.validate().context("config validation failed")?;
    Ok(config)
}

/// Re-reads the config file; a rejected file leaves the running settings untouched.
async fn reload_settings(args: &CliArgs, owner: &SettingsOwner, scheduler: &PollScheduler) {
    let config = match load_config(args) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "settings reload rejected");
            return;
        }
    };

    let previous = owner.snapshot();
    match owner.apply_update(config.settings_update()) {
        Ok(applied) => {
            if applied.save_dir != previous.save_dir {
                warn!(
                    save_dir = %applied.save_dir.display(),
                    "save_dir change takes effect after restart"
                );
            }
        }
        Err(err) => {
            warn!(error = %err, "settings reload rejected");
            return;
        }
    }

    if let Some(summary) = scheduler.set_simulate(config.simulate).await {
        info!(simulated = summary.simulated, "simulation round complete");
    }
}

fn install_metrics(listen: Option<&str>) -> Result<()> {
    let Some(listen) = listen else {
        return Ok(());
    };
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid metrics listen address {listen}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("prometheus exporter install failed")?;
    info!(%addr, "metrics exporter listening");
    Ok(())
}

fn parse_args() -> CliArgs {
    let mut cli = CliArgs::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => cli.config = args.next(),
            "--simulate" => cli.simulate = true,
            "--export" => cli.export = true,
            "--init-config" => cli.init_config = args.next().map(PathBuf::from),
            other => {
                if let Some(path) = other.strip_prefix("--config=") {
                    cli.config = Some(path.to_string());
                } else {
                    warn!(arg = %other, "ignoring unknown argument");
                }
            }
        }
    }
    cli
}

struct ReloadSignal {
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl ReloadSignal {
    #[cfg(unix)]
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        let hangup = signal(SignalKind::hangup()).context("install SIGHUP handler failed")?;
        Ok(Self { hangup })
    }

    #[cfg(not(unix))]
    fn new() -> Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        if self.hangup.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
        info!("reload signal received");
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        std::future::pending::<()>().await
    }
}
