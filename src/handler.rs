// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Message handlers and the acknowledgment decision they return.

use async_trait::async_trait;
use opentelemetry::Context;
use std::future::Future;

/// Outcome of handling one delivery. Each variant maps to exactly one broker call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Processing succeeded, remove the message from the queue.
    Ack,
    /// Processing failed for now, put the message back for redelivery.
    NackRequeue,
    /// The message can never be processed, route it to the dead-letter exchange.
    NackDiscard,
}

/// Handles decoded messages of type `T` for one subscription.
///
/// Handlers never fail into the consumer loop; business failures are expressed
/// through the returned [`AckDecision`]. Calls on a single subscription are sequential.
///
/// `ctx` carries the consumer span of the delivery, itself parented on the
/// publisher's trace context. Pass it to follow-up publishes to continue the trace.
#[async_trait]
pub trait ConsumerHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn exec(&self, ctx: &Context, msg: T) -> AckDecision;
}

#[async_trait]
impl<T, F, Fut> ConsumerHandler<T> for F
where
    T: Send + 'static,
    F: Fn(Context, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AckDecision> + Send + 'static,
{
    async fn exec(&self, ctx: &Context, msg: T) -> AckDecision {
        (self)(ctx.clone(), msg).await
    }
}
