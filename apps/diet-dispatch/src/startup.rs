use std::future::Future;
use std::sync::Arc;

use broker_amqp::{AmqpBroker, AmqpOptions};
use broker_bus::{Broker, BrokerResult, LocalBroker};
use tracing::{info, warn};

use crate::config::{AppConfig, BrokerBackend};
use crate::error::StartupError;
use crate::routes;
use crate::state::AppState;
use crate::topology::TopologyProvisioner;

/// Open the configured broker. There is no fallback backend: an unreachable
/// broker stops startup.
pub async fn build_broker(cfg: &AppConfig) -> BrokerResult<Arc<dyn Broker>> {
    match cfg.broker_backend {
        BrokerBackend::InMemory => {
            warn!("DIET_BROKER_BACKEND=memory; messages never leave this process");
            Ok(Arc::new(LocalBroker::new()))
        }
        BrokerBackend::Amqp => {
            let options = AmqpOptions {
                connect_timeout: cfg.connect_timeout,
                publish_timeout: cfg.publish_timeout,
                connection_name: cfg.instance_id.clone(),
            };
            info!(url = %cfg.redacted_amqp_url(), "connecting to amqp broker");
            let broker = AmqpBroker::connect(cfg.amqp_url.clone(), options).await?;
            Ok(Arc::new(broker))
        }
    }
}

/// Provision topology for the configured role and build the request state.
/// No state exists, and so nothing can publish, until the broker confirms
/// the topology.
pub async fn bootstrap(cfg: &AppConfig, broker: Arc<dyn Broker>) -> Result<AppState, StartupError> {
    let provisioner = TopologyProvisioner::new(cfg.role, cfg.names.clone());
    let topology = provisioner
        .provision(broker.as_ref())
        .await
        .map_err(StartupError::Topology)?;
    Ok(AppState::new(
        cfg.instance_id.clone(),
        cfg.role,
        broker,
        topology,
        cfg.publish_timeout,
    ))
}

/// Bind and serve until `shutdown` resolves, then close the broker. The
/// broker is closed on a bind or serve failure too.
pub async fn serve<F>(
    cfg: &AppConfig,
    broker: Arc<dyn Broker>,
    state: AppState,
    shutdown: F,
) -> Result<(), StartupError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let served = bind_and_serve(cfg, state, shutdown).await;
    broker.shutdown().await;
    served
}

async fn bind_and_serve<F>(
    cfg: &AppConfig,
    state: AppState,
    shutdown: F,
) -> Result<(), StartupError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: cfg.bind_addr,
            source,
        })?;
    info!(addr = %cfg.bind_addr, "accepting requests");

    axum::serve(listener, routes::router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(StartupError::Serve)
}
