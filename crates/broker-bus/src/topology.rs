use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExchangeKind {
    Direct,
    Fanout,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
}

impl ExchangeSpec {
    /// Durable, non-auto-delete fanout exchange.
    pub fn fanout(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Fanout,
            durable: true,
            auto_delete: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
}

impl QueueSpec {
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            auto_delete: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BindingSpec {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

impl BindingSpec {
    /// Binding with an empty routing key, as fanout exchanges expect.
    pub fn fanout(queue: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: String::new(),
        }
    }
}

/// Declarative description of the entities a process depends on.
///
/// Declaration order is exchanges, then queues, then bindings, so a binding
/// never refers to something that has not been declared yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
    pub bindings: Vec<BindingSpec>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exchange(mut self, exchange: ExchangeSpec) -> Self {
        if !self.exchanges.contains(&exchange) {
            self.exchanges.push(exchange);
        }
        self
    }

    pub fn with_queue(mut self, queue: QueueSpec) -> Self {
        if !self.queues.contains(&queue) {
            self.queues.push(queue);
        }
        self
    }

    pub fn with_binding(mut self, binding: BindingSpec) -> Self {
        if !self.bindings.contains(&binding) {
            self.bindings.push(binding);
        }
        self
    }

    /// Fanout exchanges in this topology with no binding declared alongside them.
    pub fn unbound_fanouts(&self) -> Vec<&str> {
        self.exchanges
            .iter()
            .filter(|exchange| exchange.kind == ExchangeKind::Fanout)
            .filter(|exchange| {
                !self
                    .bindings
                    .iter()
                    .any(|binding| binding.exchange == exchange.name)
            })
            .map(|exchange| exchange.name.as_str())
            .collect()
    }
}

/// Broker-visible topology, ordered so two snapshots compare structurally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologySnapshot {
    pub exchanges: BTreeMap<String, ExchangeSpec>,
    pub queues: BTreeMap<String, QueueSpec>,
    pub bindings: BTreeSet<BindingSpec>,
}

impl TopologySnapshot {
    pub fn bindings_for(&self, exchange: &str) -> usize {
        self.bindings
            .iter()
            .filter(|binding| binding.exchange == exchange)
            .count()
    }
}
