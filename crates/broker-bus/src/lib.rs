//! Broker-facing contract shared by every publisher in the workspace.
//!
//! A [`Broker`] only knows how to declare a [`Topology`] and publish an
//! [`OutboundMessage`] along a [`Route`]. Connection and channel lifecycles
//! stay inside the implementation. [`LocalBroker`] is the in-process
//! implementation used by tests and the `memory` backend.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

mod local;
pub mod topology;

pub use local::{LocalBroker, LocalConsumer};
pub use topology::{
    BindingSpec, ExchangeKind, ExchangeSpec, QueueSpec, Topology, TopologySnapshot,
};

pub const CONTENT_TYPE_TEXT: &str = "text/plain";
pub const CONTENT_ENCODING_UTF8: &str = "UTF-8";

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("broker transport error: {0}")]
    Transport(String),
    #[error("broker operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("broker rejected message published to {0}")]
    Rejected(String),
    #[error("{entity} conflicts with existing broker state: {reason}")]
    TopologyConflict { entity: String, reason: String },
    #[error("exchange {0} does not exist")]
    UnknownExchange(String),
    #[error("queue {0} does not exist")]
    UnknownQueue(String),
}

impl BrokerError {
    /// Whether the caller may reasonably try the same operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::Unavailable(_)
                | BrokerError::Transport(_)
                | BrokerError::Timeout(_)
                | BrokerError::Rejected(_)
        )
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Where a message is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Default (nameless, direct) exchange with the queue name as routing key.
    Queue(String),
    /// Named exchange. Fanout exchanges ignore the routing key.
    Exchange {
        exchange: String,
        routing_key: String,
    },
}

impl Route {
    pub fn queue(name: impl Into<String>) -> Self {
        Route::Queue(name.into())
    }

    pub fn fanout(exchange: impl Into<String>) -> Self {
        Route::Exchange {
            exchange: exchange.into(),
            routing_key: String::new(),
        }
    }

    /// Exchange name as seen on the wire; the default exchange is `""`.
    pub fn exchange(&self) -> &str {
        match self {
            Route::Queue(_) => "",
            Route::Exchange { exchange, .. } => exchange,
        }
    }

    pub fn routing_key(&self) -> &str {
        match self {
            Route::Queue(queue) => queue,
            Route::Exchange { routing_key, .. } => routing_key,
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Queue(queue) => write!(f, "queue:{queue}"),
            Route::Exchange { exchange, .. } => write!(f, "exchange:{exchange}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub payload: Bytes,
    pub content_type: &'static str,
    pub persistent: bool,
}

impl OutboundMessage {
    /// Persistent UTF-8 text message.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            content_type: CONTENT_TYPE_TEXT,
            persistent: true,
        }
    }
}

/// What the broker did with an accepted publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Stored on at least one queue.
    Routed,
    /// Accepted but matched no queue, so the broker dropped it.
    Unroutable,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare every entity in `topology`. Repeating an identical declaration
    /// is a no-op; a conflicting one fails with [`BrokerError::TopologyConflict`].
    async fn declare(&self, topology: &Topology) -> BrokerResult<()>;

    async fn publish(&self, route: &Route, message: OutboundMessage)
        -> BrokerResult<PublishOutcome>;

    /// Release pooled resources. Further calls may reconnect.
    async fn shutdown(&self) {}
}
