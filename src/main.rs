use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use surveil_rs::api::{self, QueryFacade};
use surveil_rs::engine::enricher::Enricher;
use surveil_rs::engine::scorer::{InsiderScorer, ManipulationScorer};
use surveil_rs::market_data::adapters::nse::NseIndexSource;
use surveil_rs::market_data::simulator::{SimulatedSource, Simulator};
use surveil_rs::pipeline::config::ConfigHandle;
use surveil_rs::pipeline::scheduler::FetchScheduler;
use surveil_rs::settings::Settings;
use surveil_rs::store::history::HistoryStore;
use surveil_rs::telemetry;

#[derive(Parser)]
#[command(name = "surveil")]
#[command(version, about = "Index trade surveillance service", long_about = None)]
struct Cli {
    /// TOML settings file (defaults to ./surveil.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long)]
    bind: Option<String>,

    /// Start on the simulated feed
    #[arg(long)]
    mock: bool,

    #[arg(long)]
    interval_secs: Option<u64>,

    /// Initial risk threshold in [0, 1]
    #[arg(long)]
    threshold: Option<f64>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long)]
    log: Option<String>,
}

impl Cli {
    fn apply(self, mut s: Settings) -> Settings {
        if let Some(bind) = self.bind {
            s.bind_addr = bind;
        }
        if self.mock {
            s.use_mock = true;
        }
        if let Some(secs) = self.interval_secs {
            s.fetch_interval_secs = secs;
        }
        if let Some(t) = self.threshold {
            s.risk_threshold = t;
        }
        if let Some(log) = self.log {
            s.log_filter = log;
        }
        s
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    let settings = cli.apply(settings);
    settings.validate().context("validating settings")?;

    telemetry::init_tracing(&settings.log_filter);
    telemetry::init_metrics(settings.metrics_port)?;
    info!(?settings, "Starting surveillance service");

    let config = ConfigHandle::new(settings.runtime_config());
    let store = Arc::new(HistoryStore::new(settings.trade_capacity, settings.alert_capacity));
    info!(trades = store.trade_capacity(), alerts = store.alert_capacity(), "History buffers sized");
    let enricher = Enricher::new(Arc::new(ManipulationScorer::default()), Arc::new(InsiderScorer::default()));

    let live = Arc::new(NseIndexSource::new(&settings.source.url, settings.source_timeout())?);
    let mock = Arc::new(SimulatedSource::new(Simulator::new(settings.anomaly_every, settings.seed)));

    let scheduler = FetchScheduler::new(live.clone(), mock, enricher.clone(), Arc::clone(&store), config.clone());
    let demo = settings
        .demo_fallback
        .then(|| Simulator::new(settings.anomaly_every, settings.seed.map(|s| s.wrapping_add(1))));
    let facade = Arc::new(QueryFacade::new(store, config, enricher, scheduler.status(), live, demo));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut fetcher = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;
    info!(addr = %settings.bind_addr, "HTTP server listening");

    let mut http_shutdown = shutdown_rx;
    let server = axum::serve(listener, api::router(facade)).with_graceful_shutdown(async move {
        let _ = http_shutdown.wait_for(|stop| *stop).await;
    });
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
        res = &mut fetcher => {
            // scheduler only exits early on a fatal pipeline error
            let _ = shutdown_tx.send(true);
            let _ = server.await;
            return match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.into()),
                Err(e) => Err(e.into()),
            };
        }
        res = &mut server => {
            error!(?res, "HTTP server exited");
            let _ = shutdown_tx.send(true);
            let _ = fetcher.await;
            res??;
            return Ok(());
        }
    }

    let _ = shutdown_tx.send(true);
    server.await??;
    fetcher.await??;
    info!("Shutdown complete");
    Ok(())
}
