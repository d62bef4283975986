// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Configuration
//!
//! Connection settings and the process-wide dead-letter exchange name. Values are
//! layered from an optional `config/pubsub.*` file and `PUBSUB__*` environment
//! variables on top of the defaults below.

use crate::{errors::AmqpError, routing};
use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::error;

/// Default location of the optional configuration file, without extension.
pub const CONFIG_FILE: &str = "config/pubsub";

/// Prefix of the environment variables overriding file values.
pub const ENV_PREFIX: &str = "PUBSUB";

/// Settings required to reach the broker.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    pub connection_name: String,
    /// Exchange every declared queue dead-letters into. Provisioned outside this crate.
    pub dead_letter_exchange: String,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "".to_owned(),
            connection_name: "pubsub".to_owned(),
            dead_letter_exchange: routing::EXCHANGE_PERIL_DLX.to_owned(),
        }
    }
}

impl RabbitMQConfigs {
    /// Loads the settings from [`CONFIG_FILE`] and the environment.
    pub fn load() -> Result<Self, AmqpError> {
        let cfg = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|err| {
                error!(error = err.to_string(), "failure to read configs");
                AmqpError::ConfigError(err.to_string())
            })?;

        Self::from_config(cfg)
    }

    pub(crate) fn from_config(cfg: Config) -> Result<Self, AmqpError> {
        cfg.try_deserialize::<RabbitMQConfigs>().map_err(|err| {
            error!(error = err.to_string(), "failure to deserialize configs");
            AmqpError::ConfigError(err.to_string())
        })
    }

    /// Renders the AMQP URI for these settings.
    pub fn uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.vhost
        )
    }
}
