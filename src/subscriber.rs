// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscriptions
//!
//! A subscription owns one channel: it declares and binds its queue, limits the
//! channel to [`PREFETCH_COUNT`] unacknowledged deliveries, starts a consumer and
//! hands the delivery stream to a background task running the consume loop.
//!
//! Setup errors are returned to the caller. Once the task is running there is no
//! unsubscribe: it ends when the channel or connection closes, or when a decode
//! failure stops it under [`DecodeFailurePolicy::Stop`].

use crate::{
    channel::BrokerConnection,
    codec::{BincodeCodec, Codec, JsonCodec},
    consumer::{consume_loop, DecodeFailurePolicy, InboundMessage},
    errors::AmqpError,
    handler::ConsumerHandler,
    queue::SimpleQueueType,
    topology::declare_and_bind,
};
use futures_util::StreamExt;
use lapin::{
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Channel, Consumer,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Maximum number of unacknowledged deliveries outstanding on a subscription channel.
pub const PREFETCH_COUNT: u16 = 10;

/// Definition of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub(crate) exchange: String,
    pub(crate) queue: String,
    pub(crate) routing_key: String,
    pub(crate) kind: SimpleQueueType,
    pub(crate) on_decode_failure: DecodeFailurePolicy,
}

impl Subscription {
    /// Creates a subscription definition.
    ///
    /// # Parameters
    /// * `exchange` - Exchange the queue is bound to
    /// * `queue` - Queue name; per-subscriber for fan-out, shared for competing consumers
    /// * `routing_key` - Binding key, may be a topic pattern
    /// * `kind` - Durability class of the queue
    pub fn new(exchange: &str, queue: &str, routing_key: &str, kind: SimpleQueueType) -> Self {
        Subscription {
            exchange: exchange.to_owned(),
            queue: queue.to_owned(),
            routing_key: routing_key.to_owned(),
            kind,
            on_decode_failure: DecodeFailurePolicy::default(),
        }
    }

    /// Sets what happens when a delivery cannot be decoded.
    pub fn on_decode_failure(mut self, policy: DecodeFailurePolicy) -> Self {
        self.on_decode_failure = policy;
        self
    }

    /// Sets up the subscription and starts consuming in the background.
    ///
    /// Returns once the consumer is registered; messages are decoded with `C` into
    /// `T` and passed to `handler` on a spawned task.
    pub async fn start<C, T, H>(self, broker: &BrokerConnection, handler: H) -> Result<(), AmqpError>
    where
        C: Codec,
        T: DeserializeOwned + Send + 'static,
        H: ConsumerHandler<T>,
    {
        let (channel, _) = declare_and_bind(
            broker,
            &self.exchange,
            &self.queue,
            &self.routing_key,
            self.kind,
        )
        .await?;

        set_prefetch(&channel).await?;
        let consumer = create_consumer(&channel, &self.queue).await?;

        let deliveries = consumer.map(|result| {
            result
                .map(InboundMessage::from)
                .map_err(|err| AmqpError::ConsumerError(err.to_string()))
        });

        let handler = Arc::new(handler);
        let queue = self.queue;
        let policy = self.on_decode_failure;

        tokio::spawn(async move {
            // keeps the channel open for as long as the loop runs
            let _channel = channel;

            if let Err(err) =
                consume_loop::<C, T, H, _, _>(queue.clone(), deliveries, handler, policy).await
            {
                error!(error = err.to_string(), queue = queue.as_str(), "subscription stopped");
            }
        });

        Ok(())
    }
}

async fn set_prefetch(channel: &Channel) -> Result<(), AmqpError> {
    match channel
        .basic_qos(PREFETCH_COUNT, BasicQosOptions { global: true })
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "failure to configure qos");
            Err(AmqpError::QoSDeclarationError(err.to_string()))
        }
        _ => Ok(()),
    }
}

async fn create_consumer(channel: &Channel, queue: &str) -> Result<Consumer, AmqpError> {
    let tag = format!("{}-{}", queue, Uuid::new_v4());

    match channel
        .basic_consume(
            queue,
            &tag,
            BasicConsumeOptions {
                no_local: false,
                no_ack: false,
                exclusive: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to create the consumer");
            Err(AmqpError::ConsumerDeclarationError(queue.to_owned()))
        }
        Ok(c) => {
            debug!(queue = queue, tag = tag.as_str(), "consumer created");
            Ok(c)
        }
    }
}

/// Subscribes `handler` to `queue_name` bound on `exchange` under `key`, decoding with `C`.
pub async fn subscribe<C, T, H>(
    broker: &BrokerConnection,
    exchange: &str,
    queue_name: &str,
    key: &str,
    kind: SimpleQueueType,
    handler: H,
) -> Result<(), AmqpError>
where
    C: Codec,
    T: DeserializeOwned + Send + 'static,
    H: ConsumerHandler<T>,
{
    Subscription::new(exchange, queue_name, key, kind)
        .start::<C, T, H>(broker, handler)
        .await
}

/// Subscribes a handler to JSON messages.
pub async fn subscribe_json<T, H>(
    broker: &BrokerConnection,
    exchange: &str,
    queue_name: &str,
    key: &str,
    kind: SimpleQueueType,
    handler: H,
) -> Result<(), AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    H: ConsumerHandler<T>,
{
    subscribe::<JsonCodec, T, H>(broker, exchange, queue_name, key, kind, handler).await
}

/// Subscribes a handler to bincode messages.
pub async fn subscribe_bincode<T, H>(
    broker: &BrokerConnection,
    exchange: &str,
    queue_name: &str,
    key: &str,
    kind: SimpleQueueType,
    handler: H,
) -> Result<(), AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    H: ConsumerHandler<T>,
{
    subscribe::<BincodeCodec, T, H>(broker, exchange, queue_name, key, kind, handler).await
}
