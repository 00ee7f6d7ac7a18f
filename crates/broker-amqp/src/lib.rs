//! AMQP 0-9-1 implementation of [`broker_bus::Broker`] on top of lapin.
//!
//! One connection is shared by every caller and re-opened lazily when the
//! broker drops it. Each declare or publish runs on its own channel, which is
//! closed again whatever the outcome, so concurrent publishers never share a
//! channel and a failed call never leaks one.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker_bus::{
    BindingSpec, Broker, BrokerError, BrokerResult, ExchangeKind, OutboundMessage, PublishOutcome,
    Route, Topology, CONTENT_ENCODING_UTF8,
};
use lapin::options::{
    BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const REPLY_SUCCESS: u16 = 200;
const DELIVERY_TRANSIENT: u8 = 1;
const DELIVERY_PERSISTENT: u8 = 2;

#[derive(Debug, Clone)]
pub struct AmqpOptions {
    pub connect_timeout: Duration,
    /// Upper bound for a single declare or publish, including its confirm.
    pub publish_timeout: Duration,
    pub connection_name: String,
}

impl Default for AmqpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(5),
            connection_name: "diet-dispatch".into(),
        }
    }
}

pub struct AmqpBroker {
    uri: String,
    options: AmqpOptions,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl AmqpBroker {
    /// Open the shared connection eagerly so an unreachable broker fails here
    /// rather than on the first publish.
    pub async fn connect(uri: impl Into<String>, options: AmqpOptions) -> BrokerResult<Self> {
        let broker = Self {
            uri: uri.into(),
            options,
            connection: Mutex::new(None),
        };
        broker.connection().await?;
        Ok(broker)
    }

    async fn connection(&self) -> BrokerResult<Arc<Connection>> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.as_ref() {
            if connection.status().connected() {
                return Ok(Arc::clone(connection));
            }
            warn!(
                connection = %self.options.connection_name,
                "amqp connection lost; reconnecting"
            );
        }

        let properties = ConnectionProperties::default()
            .with_connection_name(self.options.connection_name.clone().into());
        let connection = bounded(self.options.connect_timeout, async {
            Connection::connect(&self.uri, properties)
                .await
                .map_err(|err| BrokerError::Unavailable(err.to_string()))
        })
        .await?;
        info!(
            connection = %self.options.connection_name,
            "connected to amqp broker"
        );
        let connection = Arc::new(connection);
        *guard = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// Run `op` on a fresh channel and close the channel afterwards on every
    /// path, including errors and timeouts inside `op`.
    async fn with_channel<T, F, Fut>(&self, op: F) -> BrokerResult<T>
    where
        F: FnOnce(Channel) -> Fut + Send,
        Fut: Future<Output = BrokerResult<T>> + Send,
        T: Send,
    {
        let connection = self.connection().await?;
        let limit = self.options.publish_timeout;
        let channel = bounded(limit, async {
            connection
                .create_channel()
                .await
                .map_err(|err| BrokerError::Transport(err.to_string()))
        })
        .await?;
        let result = bounded(limit, op(channel.clone())).await;
        release(channel).await;
        result
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare(&self, topology: &Topology) -> BrokerResult<()> {
        self.with_channel(|channel| async move {
            for exchange in &topology.exchanges {
                let options = ExchangeDeclareOptions {
                    durable: exchange.durable,
                    auto_delete: exchange.auto_delete,
                    ..ExchangeDeclareOptions::default()
                };
                channel
                    .exchange_declare(
                        &exchange.name,
                        exchange_kind(exchange.kind),
                        options,
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|err| declare_error(format!("exchange {}", exchange.name), err))?;
                debug!(
                    exchange = %exchange.name,
                    kind = exchange.kind.as_str(),
                    "exchange declared"
                );
            }
            for queue in &topology.queues {
                let options = QueueDeclareOptions {
                    durable: queue.durable,
                    auto_delete: queue.auto_delete,
                    ..QueueDeclareOptions::default()
                };
                channel
                    .queue_declare(&queue.name, options, FieldTable::default())
                    .await
                    .map_err(|err| declare_error(format!("queue {}", queue.name), err))?;
                debug!(queue = %queue.name, "queue declared");
            }
            for binding in &topology.bindings {
                channel
                    .queue_bind(
                        &binding.queue,
                        &binding.exchange,
                        &binding.routing_key,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|err| bind_error(binding, err))?;
                debug!(queue = %binding.queue, exchange = %binding.exchange, "queue bound");
            }
            Ok(())
        })
        .await
    }

    async fn publish(
        &self,
        route: &Route,
        message: OutboundMessage,
    ) -> BrokerResult<PublishOutcome> {
        self.with_channel(|channel| async move {
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|err| BrokerError::Transport(err.to_string()))?;
            let options = BasicPublishOptions {
                mandatory: true,
                ..BasicPublishOptions::default()
            };
            let confirmation = channel
                .basic_publish(
                    route.exchange(),
                    route.routing_key(),
                    options,
                    &message.payload,
                    properties_for(&message),
                )
                .await
                .map_err(|err| publish_error(route, err))?
                .await
                .map_err(|err| publish_error(route, err))?;
            match confirmation {
                Confirmation::Ack(None) | Confirmation::NotRequested => Ok(PublishOutcome::Routed),
                Confirmation::Ack(Some(_)) => {
                    debug!(%route, "broker returned message as unroutable");
                    Ok(PublishOutcome::Unroutable)
                }
                Confirmation::Nack(_) => Err(BrokerError::Rejected(route.to_string())),
            }
        })
        .await
    }

    async fn shutdown(&self) {
        let Some(connection) = self.connection.lock().await.take() else {
            return;
        };
        if let Err(err) = connection.close(REPLY_SUCCESS, "shutdown").await {
            warn!(error = %err, "failed to close amqp connection cleanly");
        } else {
            info!(connection = %self.options.connection_name, "amqp connection closed");
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = BrokerResult<T>>,
) -> BrokerResult<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| BrokerError::Timeout(limit))?
}

async fn release(channel: Channel) {
    // A channel-level exception already closed it on the broker side.
    if !channel.status().connected() {
        return;
    }
    if let Err(err) = channel.close(REPLY_SUCCESS, "OK").await {
        debug!(error = %err, "channel close failed");
    }
}

fn exchange_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
    }
}

fn properties_for(message: &OutboundMessage) -> BasicProperties {
    let delivery_mode = if message.persistent {
        DELIVERY_PERSISTENT
    } else {
        DELIVERY_TRANSIENT
    };
    BasicProperties::default()
        .with_content_type(message.content_type.into())
        .with_content_encoding(CONTENT_ENCODING_UTF8.into())
        .with_delivery_mode(delivery_mode)
}

fn soft_error(err: &lapin::Error) -> Option<(&AMQPSoftError, &str)> {
    match err {
        lapin::Error::ProtocolError(amqp) => match amqp.kind() {
            AMQPErrorKind::Soft(soft) => Some((soft, amqp.get_message().as_str())),
            AMQPErrorKind::Hard(_) => None,
        },
        _ => None,
    }
}

fn declare_error(entity: String, err: lapin::Error) -> BrokerError {
    match soft_error(&err) {
        Some((AMQPSoftError::PRECONDITIONFAILED, reason)) => BrokerError::TopologyConflict {
            entity,
            reason: reason.to_string(),
        },
        _ => BrokerError::Transport(err.to_string()),
    }
}

fn bind_error(binding: &BindingSpec, err: lapin::Error) -> BrokerError {
    match soft_error(&err) {
        Some((AMQPSoftError::NOTFOUND, reason)) if reason.contains("no queue") => {
            BrokerError::UnknownQueue(binding.queue.clone())
        }
        Some((AMQPSoftError::NOTFOUND, _)) => {
            BrokerError::UnknownExchange(binding.exchange.clone())
        }
        _ => declare_error(
            format!("binding {} -> {}", binding.queue, binding.exchange),
            err,
        ),
    }
}

fn publish_error(route: &Route, err: lapin::Error) -> BrokerError {
    match soft_error(&err) {
        Some((AMQPSoftError::NOTFOUND, _)) => {
            BrokerError::UnknownExchange(route.exchange().to_string())
        }
        _ => BrokerError::Transport(err.to_string()),
    }
}
