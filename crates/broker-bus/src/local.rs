use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::trace;

use crate::topology::{
    BindingSpec, ExchangeKind, ExchangeSpec, QueueSpec, Topology, TopologySnapshot,
};
use crate::{Broker, BrokerError, BrokerResult, OutboundMessage, PublishOutcome, Route};

/// In-process broker with AMQP-like delivery semantics.
///
/// Queues hold messages until a consumer takes them, and each message is
/// handed to exactly one consumer of its queue. Fanout exchanges copy a
/// message into every bound queue. A message that matches no queue is
/// dropped and reported as [`PublishOutcome::Unroutable`].
#[derive(Debug)]
pub struct LocalBroker {
    state: RwLock<LocalState>,
    online: AtomicBool,
}

#[derive(Debug, Default)]
struct LocalState {
    exchanges: BTreeMap<String, ExchangeSpec>,
    queues: BTreeMap<String, Arc<LocalQueue>>,
    bindings: BTreeSet<BindingSpec>,
}

#[derive(Debug)]
struct LocalQueue {
    spec: QueueSpec,
    messages: Mutex<VecDeque<Bytes>>,
    notify: Notify,
}

impl LocalQueue {
    fn new(spec: QueueSpec) -> Self {
        Self {
            spec,
            messages: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(&self, payload: Bytes) {
        self.messages.lock().push_back(payload);
        self.notify.notify_one();
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self {
            state: RwLock::new(LocalState::default()),
            online: AtomicBool::new(true),
        }
    }
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the broker going away (or coming back). While offline every
    /// operation fails with [`BrokerError::Unavailable`].
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> BrokerResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("local broker is offline".into()))
        }
    }

    pub fn snapshot(&self) -> TopologySnapshot {
        let state = self.state.read();
        TopologySnapshot {
            exchanges: state.exchanges.clone(),
            queues: state
                .queues
                .iter()
                .map(|(name, queue)| (name.clone(), queue.spec.clone()))
                .collect(),
            bindings: state.bindings.clone(),
        }
    }

    /// Number of messages waiting on `queue`.
    pub fn depth(&self, queue: &str) -> BrokerResult<usize> {
        let state = self.state.read();
        let queue = state
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
        let depth = queue.messages.lock().len();
        Ok(depth)
    }

    /// Attach a consumer to `queue`. Consumers of the same queue compete.
    pub fn consume(&self, queue: &str) -> BrokerResult<LocalConsumer> {
        self.ensure_online()?;
        let state = self.state.read();
        let queue = state
            .queues
            .get(queue)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
        Ok(LocalConsumer { queue })
    }

    fn declare_exchange(state: &mut LocalState, spec: &ExchangeSpec) -> BrokerResult<()> {
        match state.exchanges.get(&spec.name) {
            Some(existing) if existing == spec => Ok(()),
            Some(existing) => Err(BrokerError::TopologyConflict {
                entity: format!("exchange {}", spec.name),
                reason: format!(
                    "declared as {} durable={} auto_delete={}, requested {} durable={} auto_delete={}",
                    existing.kind.as_str(),
                    existing.durable,
                    existing.auto_delete,
                    spec.kind.as_str(),
                    spec.durable,
                    spec.auto_delete
                ),
            }),
            None => {
                state.exchanges.insert(spec.name.clone(), spec.clone());
                Ok(())
            }
        }
    }

    fn declare_queue(state: &mut LocalState, spec: &QueueSpec) -> BrokerResult<()> {
        match state.queues.get(&spec.name) {
            Some(existing) if existing.spec == *spec => Ok(()),
            Some(existing) => Err(BrokerError::TopologyConflict {
                entity: format!("queue {}", spec.name),
                reason: format!(
                    "declared durable={} auto_delete={}, requested durable={} auto_delete={}",
                    existing.spec.durable,
                    existing.spec.auto_delete,
                    spec.durable,
                    spec.auto_delete
                ),
            }),
            None => {
                state
                    .queues
                    .insert(spec.name.clone(), Arc::new(LocalQueue::new(spec.clone())));
                Ok(())
            }
        }
    }

    fn bind(state: &mut LocalState, spec: &BindingSpec) -> BrokerResult<()> {
        if !state.exchanges.contains_key(&spec.exchange) {
            return Err(BrokerError::UnknownExchange(spec.exchange.clone()));
        }
        if !state.queues.contains_key(&spec.queue) {
            return Err(BrokerError::UnknownQueue(spec.queue.clone()));
        }
        state.bindings.insert(spec.clone());
        Ok(())
    }

    fn targets(state: &LocalState, route: &Route) -> BrokerResult<Vec<Arc<LocalQueue>>> {
        match route {
            Route::Queue(name) => Ok(state.queues.get(name).cloned().into_iter().collect()),
            Route::Exchange {
                exchange,
                routing_key,
            } => {
                let spec = state
                    .exchanges
                    .get(exchange)
                    .ok_or_else(|| BrokerError::UnknownExchange(exchange.clone()))?;
                // A queue bound more than once still receives a single copy.
                let names: BTreeSet<&str> = state
                    .bindings
                    .iter()
                    .filter(|binding| binding.exchange == *exchange)
                    .filter(|binding| match spec.kind {
                        ExchangeKind::Fanout => true,
                        ExchangeKind::Direct => binding.routing_key == *routing_key,
                    })
                    .map(|binding| binding.queue.as_str())
                    .collect();
                Ok(names
                    .into_iter()
                    .filter_map(|name| state.queues.get(name).cloned())
                    .collect())
            }
        }
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn declare(&self, topology: &Topology) -> BrokerResult<()> {
        self.ensure_online()?;
        let mut state = self.state.write();
        for exchange in &topology.exchanges {
            Self::declare_exchange(&mut state, exchange)?;
        }
        for queue in &topology.queues {
            Self::declare_queue(&mut state, queue)?;
        }
        for binding in &topology.bindings {
            Self::bind(&mut state, binding)?;
        }
        Ok(())
    }

    async fn publish(
        &self,
        route: &Route,
        message: OutboundMessage,
    ) -> BrokerResult<PublishOutcome> {
        self.ensure_online()?;
        let targets = {
            let state = self.state.read();
            Self::targets(&state, route)?
        };
        if targets.is_empty() {
            trace!(%route, "local broker dropped unroutable message");
            return Ok(PublishOutcome::Unroutable);
        }
        for queue in &targets {
            queue.push(message.payload.clone());
        }
        trace!(%route, copies = targets.len(), "local broker routed message");
        Ok(PublishOutcome::Routed)
    }
}

/// Handle on one queue of a [`LocalBroker`].
#[derive(Debug, Clone)]
pub struct LocalConsumer {
    queue: Arc<LocalQueue>,
}

impl LocalConsumer {
    pub fn try_recv(&self) -> Option<Bytes> {
        self.queue.messages.lock().pop_front()
    }

    /// Wait until a message is available and take it.
    pub async fn recv(&self) -> Bytes {
        loop {
            let notified = self.queue.notify.notified();
            if let Some(payload) = self.try_recv() {
                return payload;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn broadcast_topology(queues: &[&str]) -> Topology {
        let mut topology =
            Topology::new().with_exchange(ExchangeSpec::fanout("runTriggerFanoutExchange"));
        for queue in queues {
            topology = topology
                .with_queue(QueueSpec::durable(*queue))
                .with_binding(BindingSpec::fanout(*queue, "runTriggerFanoutExchange"));
        }
        topology
    }

    #[tokio::test]
    async fn repeated_declaration_converges() {
        let broker = LocalBroker::new();
        let topology = broadcast_topology(&["crawler", "dupes"]);
        broker.declare(&topology).await.expect("first declare");
        let first = broker.snapshot();
        for _ in 0..5 {
            broker.declare(&topology).await.expect("repeat declare");
        }
        assert_eq!(broker.snapshot(), first);
        assert_eq!(first.bindings_for("runTriggerFanoutExchange"), 2);
    }

    #[tokio::test]
    async fn conflicting_queue_attributes_are_rejected() {
        let broker = LocalBroker::new();
        broker
            .declare(&Topology::new().with_queue(QueueSpec::durable("userParams")))
            .await
            .expect("declare");
        let transient = QueueSpec {
            durable: false,
            ..QueueSpec::durable("userParams")
        };
        let err = broker
            .declare(&Topology::new().with_queue(transient))
            .await
            .expect_err("conflict");
        assert!(matches!(err, BrokerError::TopologyConflict { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn conflicting_exchange_kind_is_rejected() {
        let broker = LocalBroker::new();
        broker
            .declare(&Topology::new().with_exchange(ExchangeSpec::fanout("ex")))
            .await
            .expect("declare");
        let direct = ExchangeSpec {
            kind: ExchangeKind::Direct,
            ..ExchangeSpec::fanout("ex")
        };
        let err = broker
            .declare(&Topology::new().with_exchange(direct))
            .await
            .expect_err("conflict");
        assert!(matches!(err, BrokerError::TopologyConflict { .. }));
    }

    #[tokio::test]
    async fn binding_requires_declared_entities() {
        let broker = LocalBroker::new();
        let err = broker
            .declare(&Topology::new().with_binding(BindingSpec::fanout("q", "missing")))
            .await
            .expect_err("unknown exchange");
        assert!(matches!(err, BrokerError::UnknownExchange(name) if name == "missing"));
    }

    #[tokio::test]
    async fn fanout_delivers_one_copy_per_bound_queue() {
        let broker = LocalBroker::new();
        let queues = ["a", "b", "c"];
        broker.declare(&broadcast_topology(&queues)).await.expect("declare");

        let outcome = broker
            .publish(
                &Route::fanout("runTriggerFanoutExchange"),
                OutboundMessage::text(Bytes::from_static(b"run")),
            )
            .await
            .expect("publish");
        assert_eq!(outcome, PublishOutcome::Routed);
        for queue in queues {
            assert_eq!(broker.depth(queue).expect("depth"), 1);
            let consumer = broker.consume(queue).expect("consume");
            assert_eq!(consumer.try_recv(), Some(Bytes::from_static(b"run")));
        }
    }

    #[tokio::test]
    async fn fanout_without_bindings_is_unroutable() {
        let broker = LocalBroker::new();
        broker.declare(&broadcast_topology(&[])).await.expect("declare");
        let outcome = broker
            .publish(
                &Route::fanout("runTriggerFanoutExchange"),
                OutboundMessage::text(Bytes::from_static(b"run")),
            )
            .await
            .expect("publish");
        assert_eq!(outcome, PublishOutcome::Unroutable);
    }

    #[tokio::test]
    async fn direct_exchange_matches_routing_key() {
        let broker = LocalBroker::new();
        let topology = Topology::new()
            .with_exchange(ExchangeSpec {
                kind: ExchangeKind::Direct,
                ..ExchangeSpec::fanout("codes")
            })
            .with_queue(QueueSpec::durable("mc"))
            .with_queue(QueueSpec::durable("bk"))
            .with_binding(BindingSpec {
                queue: "mc".into(),
                exchange: "codes".into(),
                routing_key: "mc".into(),
            })
            .with_binding(BindingSpec {
                queue: "bk".into(),
                exchange: "codes".into(),
                routing_key: "bk".into(),
            });
        broker.declare(&topology).await.expect("declare");
        broker
            .publish(
                &Route::Exchange {
                    exchange: "codes".into(),
                    routing_key: "bk".into(),
                },
                OutboundMessage::text(Bytes::from_static(b"42")),
            )
            .await
            .expect("publish");
        assert_eq!(broker.depth("mc").expect("depth"), 0);
        assert_eq!(broker.depth("bk").expect("depth"), 1);
    }

    #[tokio::test]
    async fn queue_route_to_missing_queue_is_unroutable() {
        let broker = LocalBroker::new();
        let outcome = broker
            .publish(
                &Route::queue("nobody"),
                OutboundMessage::text(Bytes::from_static(b"{}")),
            )
            .await
            .expect("publish");
        assert_eq!(outcome, PublishOutcome::Unroutable);
    }

    #[tokio::test]
    async fn competing_consumers_split_messages_without_duplicates() {
        let broker = LocalBroker::new();
        broker
            .declare(&Topology::new().with_queue(QueueSpec::durable("work")))
            .await
            .expect("declare");
        let consumers: Vec<_> = (0..3)
            .map(|_| broker.consume("work").expect("consume"))
            .collect();

        for n in 0..30u32 {
            broker
                .publish(&Route::queue("work"), OutboundMessage::text(n.to_string()))
                .await
                .expect("publish");
        }

        let mut seen = Vec::new();
        let mut idx = 0;
        while let Some(payload) = consumers[idx % consumers.len()].try_recv() {
            seen.push(String::from_utf8(payload.to_vec()).expect("utf8"));
            idx += 1;
        }
        seen.sort_by_key(|s| s.parse::<u32>().expect("number"));
        let expected: Vec<String> = (0..30u32).map(|n| n.to_string()).collect();
        assert_eq!(seen, expected);
        assert_eq!(broker.depth("work").expect("depth"), 0);
    }

    #[tokio::test]
    async fn recv_waits_for_publish() {
        let broker = Arc::new(LocalBroker::new());
        broker
            .declare(&Topology::new().with_queue(QueueSpec::durable("work")))
            .await
            .expect("declare");
        let consumer = broker.consume("work").expect("consume");
        let waiter = tokio::spawn(async move { consumer.recv().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        broker
            .publish(&Route::queue("work"), OutboundMessage::text("late"))
            .await
            .expect("publish");
        let payload = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("no timeout")
            .expect("join");
        assert_eq!(payload, Bytes::from_static(b"late"));
    }

    #[tokio::test]
    async fn offline_broker_fails_every_operation() {
        let broker = LocalBroker::new();
        broker.set_online(false);
        let err = broker
            .declare(&Topology::new().with_queue(QueueSpec::durable("q")))
            .await
            .expect_err("offline");
        assert!(err.is_retryable());
        let err = broker
            .publish(&Route::queue("q"), OutboundMessage::text("x"))
            .await
            .expect_err("offline");
        assert!(matches!(err, BrokerError::Unavailable(_)));

        broker.set_online(true);
        broker
            .declare(&Topology::new().with_queue(QueueSpec::durable("q")))
            .await
            .expect("back online");
    }
}
