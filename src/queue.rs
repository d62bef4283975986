// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! This module provides the types describing the queues a subscription declares.
//! Every queue is one of two durability classes and always dead-letters rejected
//! messages to the process-wide dead-letter exchange.

use lapin::{
    options::QueueDeclareOptions,
    types::{AMQPValue, FieldTable, LongString, ShortString},
};
use std::collections::BTreeMap;

/// Constant for the argument used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Durability class of a declared queue.
///
/// - Durable: shared work queue, survives broker restarts, not exclusive, never auto-deleted.
/// - Transient: per-subscriber queue, exclusive to the declaring connection and
///   deleted once it is no longer used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleQueueType {
    Durable,
    Transient,
}

/// Definition of a queue with its configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) kind: SimpleQueueType,
    pub(crate) dead_letter_exchange: String,
}

impl QueueDefinition {
    /// Creates a new queue definition.
    ///
    /// # Parameters
    /// * `name` - The name of the queue
    /// * `kind` - Durability class of the queue
    /// * `dead_letter_exchange` - Exchange receiving messages rejected without requeue
    pub fn new(name: &str, kind: SimpleQueueType, dead_letter_exchange: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            kind,
            dead_letter_exchange: dead_letter_exchange.to_owned(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SimpleQueueType {
        self.kind
    }

    /// Flags passed to `queue.declare`.
    pub fn declare_options(&self) -> QueueDeclareOptions {
        let transient = self.kind == SimpleQueueType::Transient;

        QueueDeclareOptions {
            passive: false,
            durable: !transient,
            exclusive: transient,
            auto_delete: transient,
            nowait: false,
        }
    }

    /// Arguments passed to `queue.declare`.
    pub fn arguments(&self) -> FieldTable {
        let mut args = BTreeMap::new();

        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from(self.dead_letter_exchange.clone())),
        );

        FieldTable::from(args)
    }
}

/// Binding of a queue to an exchange under a routing key.
///
/// Bindings are additive: binding the same queue again under another key adds a
/// route without removing existing ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding<'qeb> {
    pub(crate) queue_name: &'qeb str,
    pub(crate) exchange_name: &'qeb str,
    pub(crate) routing_key: &'qeb str,
}

impl<'qeb> QueueBinding<'qeb> {
    /// Creates a new queue binding for the given queue.
    ///
    /// By default, the exchange name and routing key are empty strings.
    /// These should be set using the `exchange` and `routing_key` methods.
    pub fn new(queue: &'qeb str) -> QueueBinding<'qeb> {
        QueueBinding {
            queue_name: queue,
            exchange_name: "",
            routing_key: "",
        }
    }

    /// Sets the exchange to bind the queue to.
    pub fn exchange(mut self, exchange: &'qeb str) -> Self {
        self.exchange_name = exchange;
        self
    }

    /// Sets the routing key for the binding.
    pub fn routing_key(mut self, key: &'qeb str) -> Self {
        self.routing_key = key;
        self
    }
}
