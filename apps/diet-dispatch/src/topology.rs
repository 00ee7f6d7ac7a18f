use broker_bus::{BindingSpec, Broker, BrokerResult, ExchangeSpec, QueueSpec, Topology};
use tracing::{info, warn};

use crate::config::{BrokerNames, Role};
use crate::metrics;

/// Declares the broker entities a role depends on.
///
/// The declaration is pure data, so running it on every start converges on
/// the same broker state.
#[derive(Debug, Clone)]
pub struct TopologyProvisioner {
    role: Role,
    names: BrokerNames,
    topology: Topology,
}

/// Proof that provisioning succeeded, carrying the names publishers may use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedTopology {
    parameter_queue: Option<String>,
    trigger_exchange: Option<String>,
    trigger_queue: Option<String>,
}

impl ProvisionedTopology {
    pub fn parameter_queue(&self) -> Option<&str> {
        self.parameter_queue.as_deref()
    }

    pub fn trigger_exchange(&self) -> Option<&str> {
        self.trigger_exchange.as_deref()
    }

    pub fn trigger_queue(&self) -> Option<&str> {
        self.trigger_queue.as_deref()
    }
}

impl TopologyProvisioner {
    pub fn new(role: Role, names: BrokerNames) -> Self {
        let topology = topology_for(role, &names);
        Self {
            role,
            names,
            topology,
        }
    }

    pub async fn provision(&self, broker: &dyn Broker) -> BrokerResult<ProvisionedTopology> {
        broker.declare(&self.topology).await?;

        metrics::TOPOLOGY_DECLARED
            .with_label_values(&["exchange"])
            .inc_by(self.topology.exchanges.len() as u64);
        metrics::TOPOLOGY_DECLARED
            .with_label_values(&["queue"])
            .inc_by(self.topology.queues.len() as u64);
        metrics::TOPOLOGY_DECLARED
            .with_label_values(&["binding"])
            .inc_by(self.topology.bindings.len() as u64);

        for exchange in self.topology.unbound_fanouts() {
            warn!(
                exchange = %exchange,
                "fanout exchange has no binding declared here; broadcasts are dropped until a consumer binds a queue"
            );
        }
        info!(
            role = self.role.as_str(),
            exchanges = self.topology.exchanges.len(),
            queues = self.topology.queues.len(),
            bindings = self.topology.bindings.len(),
            "broker topology confirmed"
        );

        let triggers = self.role.publishes_triggers();
        Ok(ProvisionedTopology {
            parameter_queue: self
                .role
                .publishes_parameters()
                .then(|| self.names.parameter_queue.clone()),
            trigger_exchange: triggers.then(|| self.names.trigger_exchange.clone()),
            trigger_queue: if triggers {
                self.names.trigger_queue.clone()
            } else {
                None
            },
        })
    }
}

/// Point-to-point work queue for parameters; fanout exchange (plus the
/// optional local queue bound to it) for run triggers.
pub fn topology_for(role: Role, names: &BrokerNames) -> Topology {
    let mut topology = Topology::new();
    if role.publishes_parameters() {
        topology = topology.with_queue(QueueSpec::durable(names.parameter_queue.clone()));
    }
    if role.publishes_triggers() {
        topology = topology.with_exchange(ExchangeSpec::fanout(names.trigger_exchange.clone()));
        if let Some(queue) = &names.trigger_queue {
            topology = topology
                .with_queue(QueueSpec::durable(queue.clone()))
                .with_binding(BindingSpec::fanout(
                    queue.clone(),
                    names.trigger_exchange.clone(),
                ));
        }
    }
    topology
}

#[cfg(test)]
mod tests {
    use broker_bus::{BrokerError, ExchangeKind, LocalBroker};

    use super::*;

    #[test]
    fn parameters_role_declares_only_the_work_queue() {
        let topology = topology_for(Role::Parameters, &BrokerNames::default());
        assert!(topology.exchanges.is_empty());
        assert!(topology.bindings.is_empty());
        assert_eq!(topology.queues, vec![QueueSpec::durable("userParams")]);
    }

    #[test]
    fn crawl_role_declares_fanout_and_binding() {
        let topology = topology_for(Role::Crawl, &BrokerNames::default());
        assert_eq!(topology.exchanges.len(), 1);
        let exchange = &topology.exchanges[0];
        assert_eq!(exchange.name, "runTriggerFanoutExchange");
        assert_eq!(exchange.kind, ExchangeKind::Fanout);
        assert!(exchange.durable);
        assert!(!exchange.auto_delete);
        assert_eq!(
            topology.bindings,
            vec![BindingSpec::fanout("runTrigger", "runTriggerFanoutExchange")]
        );
        assert!(topology.unbound_fanouts().is_empty());
    }

    #[test]
    fn crawl_role_without_queue_leaves_fanout_unbound() {
        let names = BrokerNames {
            trigger_queue: None,
            ..BrokerNames::default()
        };
        let topology = topology_for(Role::Crawl, &names);
        assert!(topology.queues.is_empty());
        assert_eq!(topology.unbound_fanouts(), vec!["runTriggerFanoutExchange"]);
    }

    #[tokio::test]
    async fn provisioning_twice_is_idempotent() {
        let broker = LocalBroker::new();
        let provisioner = TopologyProvisioner::new(Role::All, BrokerNames::default());
        let first = provisioner.provision(&broker).await.expect("provision");
        let snapshot = broker.snapshot();
        let second = provisioner.provision(&broker).await.expect("provision again");
        assert_eq!(first, second);
        assert_eq!(broker.snapshot(), snapshot);
        assert_eq!(snapshot.queues.len(), 2);
        assert_eq!(snapshot.exchanges.len(), 1);
        assert_eq!(snapshot.bindings.len(), 1);
    }

    #[tokio::test]
    async fn provisioned_names_follow_role() {
        let broker = LocalBroker::new();
        let params = TopologyProvisioner::new(Role::Parameters, BrokerNames::default())
            .provision(&broker)
            .await
            .expect("provision");
        assert_eq!(params.parameter_queue(), Some("userParams"));
        assert_eq!(params.trigger_exchange(), None);
        assert_eq!(params.trigger_queue(), None);

        let crawl = TopologyProvisioner::new(Role::Crawl, BrokerNames::default())
            .provision(&broker)
            .await
            .expect("provision");
        assert_eq!(crawl.parameter_queue(), None);
        assert_eq!(crawl.trigger_exchange(), Some("runTriggerFanoutExchange"));
        assert_eq!(crawl.trigger_queue(), Some("runTrigger"));
    }

    #[tokio::test]
    async fn unreachable_broker_fails_provisioning() {
        let broker = LocalBroker::new();
        broker.set_online(false);
        let err = TopologyProvisioner::new(Role::All, BrokerNames::default())
            .provision(&broker)
            .await
            .expect_err("offline");
        assert!(matches!(err, BrokerError::Unavailable(_)));
        assert!(broker.snapshot().queues.is_empty());
    }
}
