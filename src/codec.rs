// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Body Codecs
//!
//! A codec turns a typed value into a message body and back. Two strategies are
//! provided:
//! - [`JsonCodec`]: self-describing text, any structurally compatible type decodes it.
//! - [`BincodeCodec`]: compact binary, both sides must share the exact type.
//!
//! Codecs are selected as a type parameter on each publish or subscribe call, so
//! the payload type is fixed once per call and no runtime type inspection happens.

use crate::errors::AmqpError;
use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};
use tracing::error;

/// Content type attached to JSON bodies
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type attached to bincode bodies
pub const BINCODE_CONTENT_TYPE: &str = "application/x-bincode";

/// Upper bound on a bincode body, in both directions.
///
/// Decoding rejects corrupt length prefixes before allocating. Encoding rejects any
/// value whose serialized form exceeds 16 MiB with [`AmqpError::EncodeError`], so
/// such a value is never published.
pub const MAX_BINARY_PAYLOAD: u64 = 16 * 1024 * 1024;

/// Stateless encode/decode strategy for message bodies.
///
/// Decoding never panics on malformed input, it returns [`AmqpError::DecodeError`].
pub trait Codec: Send + Sync + 'static {
    /// Value written to the `content_type` property of published messages.
    const CONTENT_TYPE: &'static str;

    fn encode<T>(value: &T) -> Result<Vec<u8>, AmqpError>
    where
        T: Serialize + ?Sized;

    fn decode<T>(data: &[u8]) -> Result<T, AmqpError>
    where
        T: DeserializeOwned;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    const CONTENT_TYPE: &'static str = JSON_CONTENT_TYPE;

    fn encode<T>(value: &T) -> Result<Vec<u8>, AmqpError>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value).map_err(|err| {
            error!(error = err.to_string(), "failure to encode json payload");
            AmqpError::EncodeError(err.to_string())
        })
    }

    fn decode<T>(data: &[u8]) -> Result<T, AmqpError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(data).map_err(|err| AmqpError::DecodeError(err.to_string()))
    }
}

/// Binary codec backed by `bincode`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    fn options() -> impl Options {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .with_limit(MAX_BINARY_PAYLOAD)
    }
}

impl Codec for BincodeCodec {
    const CONTENT_TYPE: &'static str = BINCODE_CONTENT_TYPE;

    fn encode<T>(value: &T) -> Result<Vec<u8>, AmqpError>
    where
        T: Serialize + ?Sized,
    {
        Self::options().serialize(value).map_err(|err| {
            error!(error = err.to_string(), "failure to encode bincode payload");
            AmqpError::EncodeError(err.to_string())
        })
    }

    fn decode<T>(data: &[u8]) -> Result<T, AmqpError>
    where
        T: DeserializeOwned,
    {
        Self::options()
            .deserialize(data)
            .map_err(|err| AmqpError::DecodeError(err.to_string()))
    }
}
