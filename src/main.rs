use log::*;
use rodbus::server::{spawn_tcp_server_task, AddressFilter, RequestHandler, ServerHandlerMap};
use rodbus::{DecodeLevel, UnitId};
use std::sync::Arc;

use shelly_em24::config::Config;
use shelly_em24::handler::{ModbusServerHandler, RegisterReadHandler};
use shelly_em24::latest::LatestValue;
use shelly_em24::refresh::RefreshLoop;
use shelly_em24::registers::RegisterMapper;
use shelly_em24::telemetry::HttpFetcher;
use shelly_em24::watchdog::{supervise, Outcome};

const DEFAULT_CONFIG: &str = "config.yaml";

type Error = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GATEWAY_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.into());
    let cfg = Config::load(&path)?;
    setup_logging(&cfg)?;
    info!("Main start, config {path}");

    let latest = Arc::new(LatestValue::new());

    let fetcher = HttpFetcher::new(&cfg.upstream);
    info!("Polling {}", fetcher.url());
    let refresh = tokio::spawn(
        RefreshLoop::new(fetcher, latest.clone(), cfg.refresh_interval()).run(),
    );

    let handler =
        ModbusServerHandler::new(RegisterReadHandler::new(latest, RegisterMapper::default()));
    let handlers = ServerHandlerMap::single(UnitId::new(cfg.server.unit_id), handler.wrap());
    // dropping the handle stops the server
    let _server = spawn_tcp_server_task(
        cfg.server.max_sessions,
        cfg.server.listen,
        handlers,
        AddressFilter::Any,
        DecodeLevel::default(),
    )
    .await?;
    info!(
        "Serving EM24 registers on {} (unit {})",
        cfg.server.listen, cfg.server.unit_id
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    match supervise(refresh, shutdown).await {
        Outcome::Shutdown => Ok(()),
        outcome => std::process::exit(outcome.exit_code()),
    }
}

fn setup_logging(cfg: &Config) -> Result<(), Error> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(cfg.level_filter())
        .level_for("reqwest", LevelFilter::Warn)
        .chain(std::io::stdout());
    if let Some(file) = &cfg.log_file {
        dispatch = dispatch.chain(fern::log_file(file)?);
    }
    dispatch.apply()?;
    Ok(())
}
