// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Connection Management
//!
//! This module owns the single process-wide AMQP connection. Every subscription and
//! every publisher derives its own channel from it, so a channel is never shared
//! between a consume loop and a publisher.

use crate::{configs::RabbitMQConfigs, errors::AmqpError, publisher::RabbitMQPublisher};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error};

/// Reply code sent with a normal connection close.
const REPLY_SUCCESS: u16 = 200;

/// Long-lived handle to the broker.
///
/// Created once at startup and closed at shutdown. It also carries the name of the
/// dead-letter exchange, fixed for the lifetime of the connection.
#[derive(Clone)]
pub struct BrokerConnection {
    conn: Arc<Connection>,
    dead_letter_exchange: Arc<str>,
}

impl BrokerConnection {
    /// Connects to the broker described by `cfg`.
    ///
    /// No retry is attempted, a failure is returned as [`AmqpError::ConnectionError`]
    /// and the caller decides whether it is fatal.
    pub async fn connect(cfg: &RabbitMQConfigs) -> Result<BrokerConnection, AmqpError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(cfg.connection_name.clone()));

        let conn = match Connection::connect(&cfg.uri(), options).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError {})
            }
        }?;
        debug!("amqp connected");

        Ok(BrokerConnection {
            conn: Arc::new(conn),
            dead_letter_exchange: Arc::from(cfg.dead_letter_exchange.as_str()),
        })
    }

    /// Opens a new channel on the shared connection.
    pub async fn create_channel(&self) -> Result<Arc<Channel>, AmqpError> {
        debug!("creating amqp channel...");
        match self.conn.create_channel().await {
            Ok(c) => {
                debug!(id = c.id(), "channel created");
                Ok(Arc::new(c))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError {})
            }
        }
    }

    /// Creates a publisher owning a dedicated channel.
    pub async fn publisher(&self) -> Result<Arc<RabbitMQPublisher>, AmqpError> {
        let channel = self.create_channel().await?;
        Ok(RabbitMQPublisher::new(channel))
    }

    /// Name of the exchange every declared queue dead-letters to.
    ///
    /// Fixed at connect time from `RabbitMQConfigs::dead_letter_exchange`.
    pub fn dead_letter_exchange(&self) -> &str {
        &self.dead_letter_exchange
    }

    /// Closes the connection. Transient queues declared through it are removed by the broker.
    pub async fn close(&self) -> Result<(), AmqpError> {
        debug!("closing amqp connection...");
        self.conn
            .close(REPLY_SUCCESS, "shutdown")
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "failure to close the connection");
                AmqpError::CloseError
            })
    }
}
