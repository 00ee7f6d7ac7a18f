use std::sync::Arc;
use std::time::{Duration, Instant};

use broker_bus::Broker;

use crate::config::Role;
use crate::publisher::{ParameterPublisher, TriggerPublisher};
use crate::topology::ProvisionedTopology;

#[derive(Clone)]
pub struct AppState {
    start: Instant,
    instance_id: String,
    role: Role,
    topology: ProvisionedTopology,
    parameters: Option<ParameterPublisher>,
    trigger: Option<TriggerPublisher>,
}

impl AppState {
    /// Publishers exist only for the entities the provisioner confirmed.
    pub fn new(
        instance_id: String,
        role: Role,
        broker: Arc<dyn Broker>,
        topology: ProvisionedTopology,
        publish_timeout: Duration,
    ) -> Self {
        let parameters = ParameterPublisher::new(Arc::clone(&broker), &topology, publish_timeout);
        let trigger = TriggerPublisher::new(broker, &topology, publish_timeout);
        Self {
            start: Instant::now(),
            instance_id,
            role,
            topology,
            parameters,
            trigger,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn topology(&self) -> &ProvisionedTopology {
        &self.topology
    }

    pub fn parameters(&self) -> Option<&ParameterPublisher> {
        self.parameters.as_ref()
    }

    pub fn trigger(&self) -> Option<&TriggerPublisher> {
        self.trigger.as_ref()
    }
}
