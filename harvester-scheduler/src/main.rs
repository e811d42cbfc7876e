use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Arg, ArgAction, ArgMatches, Command};
use config::{AppConfig, DEFAULT_CONFIG_PATH, DriverKind};
use coordinator::{CoordinatorConfig, default::Coordinator};
use engine::{EngineConfig, ExecutionEngine};
use harvester_api_rest::server::{ApiServer, AppState};
use harvester_common::{error::Error, state::DatabaseTrait};
use harvester_connector::{
    Collector, ConnectorSettings, Connectors,
    rpa::{BrowserDriver, ChromiumDriver, HttpDriver},
};
use harvester_persistence_pg::db::PostgresStateDb;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracker::ExecutionTracker;

mod config;
mod coordinator;
mod engine;
mod scheduler;
mod tracker;

const COMMAND_CHANNEL_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_level(true)
        .with_target(true)
        .init();

    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("serve", sub_matches)) => serve(sub_matches).await,
        Some(("migrate", sub_matches)) => migrate(sub_matches).await,
        _ => Err(Error::Config("unknown subcommand".to_string())),
    }
}

fn cli() -> Command {
    let config_arg = Arg::new("config")
        .short('c')
        .long("config")
        .help("Path to the configuration file")
        .default_value(DEFAULT_CONFIG_PATH)
        .action(ArgAction::Set);

    Command::new("harvester")
        .about("Harvester task scheduling and collection service")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("serve")
                .about("Runs the scheduler, the execution engine and the REST API")
                .arg(config_arg.clone())
                .arg(
                    Arg::new("listen_addr")
                        .short('l')
                        .long("listen-addr")
                        .help("Address the REST API listens on, overrides the config file")
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            Command::new("migrate")
                .about("Applies pending database migrations and exits")
                .arg(config_arg),
        )
}

fn load_config(matches: &ArgMatches) -> Result<AppConfig, Error> {
    let path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    AppConfig::load(&path)
}

async fn migrate(matches: &ArgMatches) -> Result<(), Error> {
    let config = load_config(matches)?;
    let state_db = PostgresStateDb::new(config.database_url()?).await?;

    state_db.run_migrations().await?;
    info!("Migrations applied");
    Ok(())
}

async fn build_driver(config: &AppConfig) -> Result<Arc<dyn BrowserDriver>, Error> {
    match config.browser.driver {
        DriverKind::Http => Ok(Arc::new(HttpDriver::new()?)),
        DriverKind::Chromium => {
            let driver = match config.browser.cdp_url.as_deref() {
                Some(cdp_url) => {
                    info!("Connecting to Chromium at {}", cdp_url);
                    ChromiumDriver::connect(cdp_url).await?
                }
                None => {
                    info!("Launching headless Chromium");
                    ChromiumDriver::launch().await?
                }
            };
            Ok(Arc::new(driver))
        }
    }
}

async fn serve(matches: &ArgMatches) -> Result<(), Error> {
    let mut config = load_config(matches)?;
    if let Some(addr) = matches.get_one::<String>("listen_addr") {
        config.api.listen_addr = addr.clone();
    }
    let listen_addr = config.listen_addr()?;
    let jwt_secret = config.jwt_secret()?.to_string();
    let worker_id = config.worker_id();

    let state_db = PostgresStateDb::new(config.database_url()?).await?;
    state_db.run_migrations().await?;
    let db_arc: Arc<dyn DatabaseTrait> = Arc::new(state_db);

    let connectors = Connectors::new(ConnectorSettings {
        driver: build_driver(&config).await?,
        session_reuse: config.session_reuse(),
    })?;

    let shutdown = CancellationToken::new();
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

    let tracker = ExecutionTracker::new(Arc::clone(&db_arc), worker_id.clone());
    let collector: Arc<dyn Collector> = Arc::new(connectors.clone());
    let engine = ExecutionEngine::new(
        EngineConfig {
            max_workers: config.engine.max_workers,
            retry: config.retry_policy(),
        },
        Arc::clone(&db_arc),
        collector,
        tracker.clone(),
        shutdown.clone(),
    );

    let mut coordinator = Coordinator::new(
        CoordinatorConfig {
            tick_interval: Duration::from_millis(config.engine.tick_interval_ms),
            shutdown_grace: Duration::from_secs(config.engine.shutdown_grace_secs),
        },
        Arc::clone(&db_arc),
        engine,
        tracker,
        cmd_rx,
        shutdown.clone(),
    );

    let mut coordinator_handle: JoinHandle<Result<(), Error>> =
        tokio::spawn(async move { coordinator.run_main_loop().await });

    let api_server = ApiServer::new(
        AppState::new(Arc::clone(&db_arc), cmd_tx, connectors, &jwt_secret),
        listen_addr,
    );
    let mut api_handle = api_server.serve(shutdown.child_token()).await?;

    info!("Harvester [{}]: serving on {}", worker_id, listen_addr);

    let overall_timeout =
        Duration::from_secs(config.engine.shutdown_grace_secs) + Duration::from_secs(15);

    let mut is_shutting_down = false;

    'main_loop: loop {
        if is_shutting_down {
            tokio::select! {
                biased;

                coordinator_res = &mut coordinator_handle => {
                    match coordinator_res {
                        Ok(Ok(())) => info!("Main Loop: Coordinator drained. Exiting application."),
                        Ok(Err(e)) => error!("Main Loop: Coordinator stopped with an error: {}", e),
                        Err(e) => error!("Main Loop: Coordinator task failed: {:?}", e),
                    }
                    break 'main_loop;
                }

                _ = tokio::time::sleep(overall_timeout) => {
                    error!("Main Loop: Overall timeout waiting for the coordinator to drain. Forcing exit.");
                    break 'main_loop;
                }

                _ = tokio::signal::ctrl_c() => {
                    warn!("Main Loop: Second Ctrl+C received during shutdown. Forcing exit immediately.");
                    break 'main_loop;
                }
            }
        } else {
            tokio::select! {
                biased;

                ctrl_c_res = tokio::signal::ctrl_c() => {
                    if let Err(e) = ctrl_c_res {
                        error!("Main Loop: Error listening for Ctrl+C: {:?}", e);
                        continue;
                    }

                    info!("Main Loop: Ctrl+C received, shutting down gracefully");
                    is_shutting_down = true;
                    shutdown.cancel();
                }

                api_res = &mut api_handle => {
                    error!("Main Loop: API server task has completed (ok: {}). Initiating graceful shutdown...", api_res.is_ok());
                    is_shutting_down = true;
                    shutdown.cancel();
                }

                coordinator_res = &mut coordinator_handle => {
                    error!("Main Loop: Coordinator exited unexpectedly (ok: {}). Stopping.", matches!(coordinator_res, Ok(Ok(()))));
                    shutdown.cancel();
                    break 'main_loop;
                }
            }
        }
    }

    if !api_handle.is_finished() {
        api_handle.abort();
    }

    info!("Main Loop: Exiting application.");
    Ok(())
}
