// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Typed Message Publisher
//!
//! This module encodes values with a [`Codec`] and writes them to an exchange.
//! The body is always fully encoded before anything is sent, so an encoding
//! failure never reaches the broker.
//!
//! Publishing waits for the broker to accept the frame but not for a publisher
//! confirm: success means the message was handed to the broker, not that it was
//! stored. Unroutable messages are dropped by the broker (non-mandatory).

use crate::{
    codec::{BincodeCodec, Codec, JsonCodec},
    errors::AmqpError,
    otel,
};
use async_trait::async_trait;
use lapin::{
    options::BasicPublishOptions,
    types::{FieldTable, ShortString},
    BasicProperties, Channel,
};
#[cfg(test)]
use mockall::automock;
use opentelemetry::Context;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Destination of encoded messages.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;
}

#[async_trait]
impl MessageSink for Channel {
    async fn send(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        match self
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                properties,
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError)
            }
            _ => Ok(()),
        }
    }
}

/// Publisher bound to one channel.
///
/// A publisher's channel is not used for consuming; give each publishing task its
/// own publisher when they must not stall each other.
pub struct RabbitMQPublisher<S = Channel> {
    sink: Arc<S>,
}

impl<S> RabbitMQPublisher<S>
where
    S: MessageSink,
{
    /// Creates a new publisher writing through `sink`.
    ///
    /// # Returns
    /// An Arc-wrapped publisher for sharing between handlers
    pub fn new(sink: Arc<S>) -> Arc<RabbitMQPublisher<S>> {
        Arc::new(RabbitMQPublisher { sink })
    }

    /// Encodes `value` with `C` and publishes it to `exchange` under `key`.
    ///
    /// # Parameters
    /// * `ctx` - OpenTelemetry context propagated in the message headers
    /// * `exchange` - Target exchange
    /// * `key` - Routing key
    /// * `value` - Value to encode
    ///
    /// # Returns
    /// Ok(()) once the broker accepted the message, [`AmqpError::EncodeError`]
    /// without any network write when encoding fails, or
    /// [`AmqpError::PublishingError`] when the write fails
    pub async fn publish<C, T>(
        &self,
        ctx: &Context,
        exchange: &str,
        key: &str,
        value: &T,
    ) -> Result<(), AmqpError>
    where
        C: Codec,
        T: Serialize + ?Sized + Sync,
    {
        let payload = C::encode(value)?;

        let properties = BasicProperties::default()
            .with_content_type(ShortString::from(C::CONTENT_TYPE))
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_headers(FieldTable::from(otel::inject(ctx)));

        self.sink.send(exchange, key, &payload, properties).await?;

        debug!(
            exchange = exchange,
            key = key,
            content_type = C::CONTENT_TYPE,
            "message published"
        );

        Ok(())
    }

    /// Publishes `value` as JSON.
    pub async fn publish_json<T>(
        &self,
        ctx: &Context,
        exchange: &str,
        key: &str,
        value: &T,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized + Sync,
    {
        self.publish::<JsonCodec, T>(ctx, exchange, key, value).await
    }

    /// Publishes `value` as bincode.
    pub async fn publish_bincode<T>(
        &self,
        ctx: &Context,
        exchange: &str,
        key: &str,
        value: &T,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized + Sync,
    {
        self.publish::<BincodeCodec, T>(ctx, exchange, key, value).await
    }
}
