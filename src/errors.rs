// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Pub/Sub Layer
//!
//! This module provides the error type shared by every operation of the crate.
//! Setup failures (connection, channel, queue declaration, binding, QoS) are
//! returned to the caller of the setup operation, publish failures to the caller
//! of `publish`, and per-delivery failures are logged from inside the consumer loop.

use thiserror::Error;

/// Represents errors that can occur while talking to the broker or while
/// encoding and decoding message bodies.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Configuration could not be loaded or deserialized
    #[error("failure to load configs `{0}`")]
    ConfigError(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error registering a consumer on a queue
    #[error("failure to declare consumer `{0}`")]
    ConsumerDeclarationError(String),

    /// Error reported by the delivery stream
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// Error serializing a value into a message body
    #[error("failure to encode payload `{0}`")]
    EncodeError(String),

    /// Error deserializing a message body
    #[error("failure to decode payload `{0}`")]
    DecodeError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error closing the connection
    #[error("failure to close the connection")]
    CloseError,
}
