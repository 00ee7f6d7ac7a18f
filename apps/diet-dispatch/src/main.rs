use std::process::ExitCode;
use std::sync::Arc;

use diet_dispatch::config::AppConfig;
use diet_dispatch::error::StartupError;
use diet_dispatch::metrics;
use diet_dispatch::startup;
use diet_dispatch::telemetry::init_tracing;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cfg = match AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("diet-dispatch: {err}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&cfg.log_filter, cfg.log_format);

    match run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "diet-dispatch stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: AppConfig) -> Result<(), StartupError> {
    info!(
        addr = %cfg.bind_addr,
        instance = %cfg.instance_id,
        role = cfg.role.as_str(),
        backend = ?cfg.broker_backend,
        parameter_queue = %cfg.names.parameter_queue,
        trigger_exchange = %cfg.names.trigger_exchange,
        trigger_queue = ?cfg.names.trigger_queue,
        connect_timeout_ms = cfg.connect_timeout.as_millis() as u64,
        publish_timeout_ms = cfg.publish_timeout.as_millis() as u64,
        "starting diet-dispatch"
    );
    metrics::BOOT_COUNTER.inc();

    let broker = startup::build_broker(&cfg)
        .await
        .map_err(StartupError::Connect)?;
    let state = match startup::bootstrap(&cfg, Arc::clone(&broker)).await {
        Ok(state) => state,
        Err(err) => {
            broker.shutdown().await;
            return Err(err);
        }
    };

    startup::serve(&cfg, broker, state, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "unable to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
