use std::sync::Arc;
use std::time::Duration;

use broker_bus::{Broker, BrokerError, OutboundMessage, PublishOutcome, Route};
use diet_proto::{ParameterMessage, TriggerSignal};
use tracing::{debug, warn};

use crate::error::PublishError;
use crate::metrics;
use crate::topology::ProvisionedTopology;

const PARAMETERS: &str = "parameters";
const TRIGGER: &str = "trigger";

/// Sends validated parameters to the durable work queue, where exactly one
/// competing consumer picks each message up.
#[derive(Clone)]
pub struct ParameterPublisher {
    broker: Arc<dyn Broker>,
    route: Route,
    deadline: Duration,
}

impl ParameterPublisher {
    /// `None` when the provisioned role has no work queue.
    pub fn new(
        broker: Arc<dyn Broker>,
        topology: &ProvisionedTopology,
        deadline: Duration,
    ) -> Option<Self> {
        let queue = topology.parameter_queue()?;
        Some(Self {
            broker,
            route: Route::queue(queue),
            deadline,
        })
    }

    pub async fn publish(&self, parameters: &ParameterMessage) -> Result<(), PublishError> {
        let payload = parameters
            .encode()
            .map_err(|err| failed(PARAMETERS, PublishError::from(err)))?;
        let outcome = send(PARAMETERS, self.broker.as_ref(), &self.route, self.deadline, payload)
            .await?;
        match outcome {
            PublishOutcome::Routed => {
                debug!(
                    route = %self.route,
                    calories = parameters.calories(),
                    "parameters published"
                );
                Ok(())
            }
            // The work queue vanished after provisioning; the message is gone.
            PublishOutcome::Unroutable => Err(failed(
                PARAMETERS,
                PublishError::Unroutable {
                    target: self.route.to_string(),
                },
            )),
        }
    }
}

/// Broadcasts the run signal through the fanout exchange; every bound queue
/// receives its own copy.
#[derive(Clone)]
pub struct TriggerPublisher {
    broker: Arc<dyn Broker>,
    route: Route,
    deadline: Duration,
}

impl TriggerPublisher {
    /// `None` when the provisioned role has no trigger exchange.
    pub fn new(
        broker: Arc<dyn Broker>,
        topology: &ProvisionedTopology,
        deadline: Duration,
    ) -> Option<Self> {
        let exchange = topology.trigger_exchange()?;
        Some(Self {
            broker,
            route: Route::fanout(exchange),
            deadline,
        })
    }

    /// An exchange with no bound queues drops the signal. That is reported
    /// as [`PublishOutcome::Unroutable`], not as an error.
    pub async fn broadcast_run(&self) -> Result<PublishOutcome, PublishError> {
        let payload = TriggerSignal.encode();
        let outcome = send(TRIGGER, self.broker.as_ref(), &self.route, self.deadline, payload)
            .await?;
        match outcome {
            PublishOutcome::Routed => debug!(route = %self.route, "run signal broadcast"),
            PublishOutcome::Unroutable => warn!(
                route = %self.route,
                "run signal dropped: no queue is bound to the trigger exchange"
            ),
        }
        Ok(outcome)
    }
}

async fn send(
    publisher: &'static str,
    broker: &dyn Broker,
    route: &Route,
    deadline: Duration,
    payload: bytes::Bytes,
) -> Result<PublishOutcome, PublishError> {
    // Bounds the whole call whatever the backend does with its own timeouts.
    let publish = broker.publish(route, OutboundMessage::text(payload));
    let outcome = tokio::time::timeout(deadline, publish)
        .await
        .unwrap_or(Err(BrokerError::Timeout(deadline)))
        .map_err(|err| failed(publisher, PublishError::from(err)))?;
    let label = match outcome {
        PublishOutcome::Routed => "acknowledged",
        PublishOutcome::Unroutable => "unroutable",
    };
    metrics::PUBLISHED
        .with_label_values(&[publisher, label])
        .inc();
    Ok(outcome)
}

fn failed(publisher: &'static str, err: PublishError) -> PublishError {
    metrics::PUBLISHED
        .with_label_values(&[publisher, "failed"])
        .inc();
    metrics::PUBLISH_FAILURES
        .with_label_values(&[publisher, err.stage().as_str()])
        .inc();
    warn!(publisher, stage = err.stage().as_str(), error = %err, "publish failed");
    err
}
