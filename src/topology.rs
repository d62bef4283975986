// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscription Topology
//!
//! Declares a subscription's queue and binds it to an exchange. The exchange and the
//! dead-letter exchange are provisioned elsewhere; this module only creates queues
//! and bindings.

use crate::{
    channel::BrokerConnection,
    errors::AmqpError,
    queue::{QueueBinding, QueueDefinition, SimpleQueueType},
};
use lapin::{options::QueueBindOptions, types::FieldTable, Channel, Queue};
use std::sync::Arc;
use tracing::{debug, error};

/// Opens a channel, declares `queue_name` and binds it to `exchange` under `key`.
///
/// Declaring a queue that already exists with the same parameters is a no-op on the
/// broker; conflicting parameters fail with [`AmqpError::DeclareQueueError`].
/// Nothing is retried, partial state is left for the caller to handle.
///
/// # Returns
/// The channel the queue was declared on together with the broker's queue handle.
/// A transient queue lives only as long as this channel's connection.
pub async fn declare_and_bind(
    broker: &BrokerConnection,
    exchange: &str,
    queue_name: &str,
    key: &str,
    kind: SimpleQueueType,
) -> Result<(Arc<Channel>, Queue), AmqpError> {
    let channel = broker.create_channel().await?;

    let def = QueueDefinition::new(queue_name, kind, broker.dead_letter_exchange());
    let queue = declare_queue(&channel, &def).await?;

    let binding = QueueBinding::new(queue_name)
        .exchange(exchange)
        .routing_key(key);
    bind_queue(&channel, &binding).await?;

    Ok((channel, queue))
}

pub(crate) async fn declare_queue(
    channel: &Channel,
    def: &QueueDefinition,
) -> Result<Queue, AmqpError> {
    debug!(kind = ?def.kind, "creating queue: {}", def.name);

    match channel
        .queue_declare(&def.name, def.declare_options(), def.arguments())
        .await
    {
        Err(err) => {
            error!(
                error = err.to_string(),
                name = def.name.as_str(),
                "error to declare the queue"
            );
            Err(AmqpError::DeclareQueueError(def.name.clone()))
        }
        Ok(queue) => {
            debug!("queue: {} was created", def.name);
            Ok(queue)
        }
    }
}

pub(crate) async fn bind_queue(
    channel: &Channel,
    binding: &QueueBinding<'_>,
) -> Result<(), AmqpError> {
    debug!(
        "binding queue: {} to the exchange: {} with the key: {}",
        binding.queue_name, binding.exchange_name, binding.routing_key
    );

    match channel
        .queue_bind(
            binding.queue_name,
            binding.exchange_name,
            binding.routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to bind queue to exchange");

            Err(AmqpError::BindingExchangeToQueueError(
                binding.exchange_name.to_owned(),
                binding.queue_name.to_owned(),
            ))
        }
        _ => Ok(()),
    }
}
