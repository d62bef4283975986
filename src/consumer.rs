// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Processing
//!
//! This module runs the decode-handle-acknowledge cycle of a subscription:
//! 1. Opens a consumer span parented on the publisher's trace context
//! 2. Decodes the body with the subscription's codec
//! 3. Invokes the handler with the delivery's trace context
//! 4. Translates the returned [`AckDecision`] into exactly one ack or nack call
//!
//! Deliveries of one subscription are processed one at a time, in stream order.

use crate::{
    codec::Codec,
    errors::AmqpError,
    handler::{AckDecision, ConsumerHandler},
    otel,
};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lapin::{
    acker::Acker,
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions},
    BasicProperties,
};
#[cfg(test)]
use mockall::automock;
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
};
use std::{pin::pin, sync::Arc};
use tracing::{debug, error, warn};

/// What the loop does with a delivery whose body cannot be decoded.
///
/// Both policies reject the delivery without requeue, so it is dead-lettered and
/// still receives exactly one acknowledgment call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeFailurePolicy {
    /// End the subscription after rejecting the delivery.
    #[default]
    Stop,
    /// Keep consuming after rejecting the delivery.
    Skip,
}

/// Acknowledgment handle of a single delivery.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn acknowledge(&self) -> Result<(), AmqpError>;

    async fn reject(&self, requeue: bool) -> Result<(), AmqpError>;
}

#[async_trait]
impl Acknowledger for Acker {
    async fn acknowledge(&self) -> Result<(), AmqpError> {
        self.ack(BasicAckOptions { multiple: false })
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn reject(&self, requeue: bool) -> Result<(), AmqpError> {
        self.nack(BasicNackOptions {
            multiple: false,
            requeue,
        })
        .await
        .map(|_| ())
        .map_err(|err| {
            error!(error = err.to_string(), requeue, "error whiling nack msg");
            AmqpError::NackMessageError
        })
    }
}

/// A raw delivery: body, properties and its acknowledgment handle.
pub(crate) struct InboundMessage<A> {
    pub(crate) delivery_tag: u64,
    pub(crate) redelivered: bool,
    pub(crate) properties: BasicProperties,
    pub(crate) data: Vec<u8>,
    pub(crate) acker: A,
}

impl From<Delivery> for InboundMessage<Acker> {
    fn from(delivery: Delivery) -> Self {
        InboundMessage {
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            properties: delivery.properties,
            data: delivery.data,
            acker: delivery.acker,
        }
    }
}

/// Processes deliveries until the stream ends.
///
/// Stream errors and acknowledgment failures are logged and the loop moves on.
/// A decode failure ends the loop under [`DecodeFailurePolicy::Stop`].
///
/// # Returns
/// Ok(()) when the stream closed, or the decode error that stopped the loop
pub(crate) async fn consume_loop<C, T, H, A, S>(
    queue: String,
    deliveries: S,
    handler: Arc<H>,
    policy: DecodeFailurePolicy,
) -> Result<(), AmqpError>
where
    C: Codec,
    T: serde::de::DeserializeOwned + Send + 'static,
    H: ConsumerHandler<T>,
    A: Acknowledger,
    S: Stream<Item = Result<InboundMessage<A>, AmqpError>> + Send,
{
    let tracer = global::tracer("amqp consumer");
    let mut deliveries = pin!(deliveries);

    while let Some(result) = deliveries.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(err) => {
                error!(error = err.to_string(), queue = queue.as_str(), "errors consume msg");
                continue;
            }
        };

        match consume::<C, T, H, A>(&tracer, &queue, &msg, handler.as_ref()).await {
            Ok(()) => {}
            Err(AmqpError::DecodeError(reason)) if policy == DecodeFailurePolicy::Stop => {
                error!(
                    error = reason.as_str(),
                    queue = queue.as_str(),
                    "stopping subscription after undecodable message"
                );
                return Err(AmqpError::DecodeError(reason));
            }
            Err(err) => error!(error = err.to_string(), queue = queue.as_str(), "error consume msg"),
        }
    }

    debug!(queue = queue.as_str(), "delivery stream closed");
    Ok(())
}

/// Decodes, handles and acknowledges one delivery.
async fn consume<C, T, H, A>(
    tracer: &BoxedTracer,
    queue: &str,
    msg: &InboundMessage<A>,
    handler: &H,
) -> Result<(), AmqpError>
where
    C: Codec,
    T: serde::de::DeserializeOwned + Send + 'static,
    H: ConsumerHandler<T>,
    A: Acknowledger,
{
    let (ctx, mut span) = otel::new_span(&msg.properties, tracer, queue);

    debug!(
        queue = queue,
        delivery_tag = msg.delivery_tag,
        redelivered = msg.redelivered,
        "received"
    );

    let value = match C::decode::<T>(&msg.data) {
        Ok(value) => value,
        Err(err) => {
            error!(error = err.to_string(), "failure to decode message, discarding");
            span.record_error(&err);
            span.set_status(Status::error("failure to decode message"));

            if let Err(e) = msg.acker.reject(false).await {
                span.record_error(&e);
            }
            span.end();

            return Err(err);
        }
    };

    let decision = handler.exec(&ctx, value).await;

    let result = match decision {
        AckDecision::Ack => {
            debug!("message successfully processed");
            msg.acker.acknowledge().await
        }
        AckDecision::NackRequeue => {
            warn!("message not processed, requeuing");
            msg.acker.reject(true).await
        }
        AckDecision::NackDiscard => {
            warn!("message discarded, sending to dead-letter exchange");
            msg.acker.reject(false).await
        }
    };

    match &result {
        Ok(()) => span.set_status(Status::Ok),
        Err(e) => {
            span.record_error(e);
            span.set_status(Status::error("failure to acknowledge msg"));
        }
    }
    span.end();

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{BincodeCodec, JsonCodec},
        publisher::{MockMessageSink, RabbitMQPublisher},
        routing::{player_key, PlayingState, EXCHANGE_PERIL_TOPIC, WAR_RECOGNITIONS_PREFIX},
    };
    use futures_util::stream;
    use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
    use opentelemetry::{
        propagation::{text_map_propagator::FieldIter, Extractor, Injector, TextMapPropagator},
        trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState},
        Context,
    };
    use std::{
        collections::BTreeMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    const TRACE_HEADER: &str = "x-trace-id";

    /// Carries only the trace id, in a single header.
    #[derive(Debug)]
    struct TraceIdPropagator {
        fields: Vec<String>,
    }

    impl TextMapPropagator for TraceIdPropagator {
        fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
            let span_context = cx.span().span_context().clone();
            if span_context.is_valid() {
                injector.set(TRACE_HEADER, span_context.trace_id().to_string());
            }
        }

        fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
            match extractor
                .get(TRACE_HEADER)
                .and_then(|value| TraceId::from_hex(value).ok())
            {
                Some(trace_id) => cx.with_remote_span_context(SpanContext::new(
                    trace_id,
                    SpanId::from_bytes([0, 0, 0, 0, 0, 0, 0, 1]),
                    TraceFlags::SAMPLED,
                    true,
                    TraceState::default(),
                )),
                None => cx.clone(),
            }
        }

        fn fields(&self) -> FieldIter<'_> {
            FieldIter::new(&self.fields)
        }
    }

    fn inbound(tag: u64, data: &[u8], acker: MockAcknowledger) -> InboundMessage<MockAcknowledger> {
        InboundMessage {
            delivery_tag: tag,
            redelivered: false,
            properties: BasicProperties::default(),
            data: data.to_vec(),
            acker,
        }
    }

    fn pause(tag: u64, acker: MockAcknowledger) -> InboundMessage<MockAcknowledger> {
        let data = JsonCodec::encode(&PlayingState { is_paused: true }).unwrap();
        inbound(tag, &data, acker)
    }

    fn expect_ack() -> MockAcknowledger {
        let mut acker = MockAcknowledger::new();
        acker.expect_acknowledge().times(1).returning(|| Ok(()));
        acker.expect_reject().never();
        acker
    }

    fn expect_reject(requeue: bool) -> MockAcknowledger {
        let mut acker = MockAcknowledger::new();
        acker.expect_acknowledge().never();
        acker
            .expect_reject()
            .withf(move |r| *r == requeue)
            .times(1)
            .returning(|_| Ok(()));
        acker
    }

    fn untouched() -> MockAcknowledger {
        let mut acker = MockAcknowledger::new();
        acker.expect_acknowledge().never();
        acker.expect_reject().never();
        acker
    }

    async fn run_single(
        msg: InboundMessage<MockAcknowledger>,
        decision: AckDecision,
    ) -> Result<(), AmqpError> {
        let handler = Arc::new(move |_: Context, _: PlayingState| async move { decision });
        consume_loop::<JsonCodec, PlayingState, _, _, _>(
            "pause.ana".to_owned(),
            stream::iter(vec![Ok(msg)]),
            handler,
            DecodeFailurePolicy::Stop,
        )
        .await
    }

    #[tokio::test]
    async fn test_ack_decision_acknowledges() {
        let result = run_single(pause(1, expect_ack()), AckDecision::Ack).await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_nack_requeue_rejects_with_requeue() {
        let result = run_single(pause(1, expect_reject(true)), AckDecision::NackRequeue).await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_nack_discard_rejects_without_requeue() {
        let result = run_single(pause(1, expect_reject(false)), AckDecision::NackDiscard).await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_one_call_per_delivery_in_order() {
        let decisions = [
            AckDecision::Ack,
            AckDecision::NackDiscard,
            AckDecision::NackRequeue,
            AckDecision::Ack,
        ];
        let ackers = vec![
            expect_ack(),
            expect_reject(false),
            expect_reject(true),
            expect_ack(),
        ];
        let deliveries: Vec<_> = ackers
            .into_iter()
            .enumerate()
            .map(|(tag, acker)| Ok(pause(tag as u64, acker)))
            .collect();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = Arc::new(move |_: Context, _: PlayingState| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let decision = decisions[n];
            async move { decision }
        });

        let result = consume_loop::<JsonCodec, PlayingState, _, _, _>(
            "army_moves.ana".to_owned(),
            stream::iter(deliveries),
            handler,
            DecodeFailurePolicy::Stop,
        )
        .await;

        assert_eq!(result, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_decode_failure_stops_subscription() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = Arc::new(move |_: Context, _: PlayingState| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { AckDecision::Ack }
        });

        let result = consume_loop::<JsonCodec, PlayingState, _, _, _>(
            "pause.ana".to_owned(),
            stream::iter(vec![
                Ok(inbound(1, b"{broken", expect_reject(false))),
                Ok(pause(2, untouched())),
            ]),
            handler,
            DecodeFailurePolicy::Stop,
        )
        .await;

        assert!(matches!(result, Err(AmqpError::DecodeError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_decode_failure_skip_keeps_consuming() {
        let handler = Arc::new(|_: Context, _: PlayingState| async { AckDecision::Ack });

        let result = consume_loop::<JsonCodec, PlayingState, _, _, _>(
            "pause.ana".to_owned(),
            stream::iter(vec![
                Ok(inbound(1, b"{broken", expect_reject(false))),
                Ok(pause(2, expect_ack())),
            ]),
            handler,
            DecodeFailurePolicy::Skip,
        )
        .await;

        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_binary_payload_with_wrong_type_is_rejected() {
        let handler = Arc::new(|_: Context, _: (u64, u64)| async { AckDecision::Ack });

        let result = consume_loop::<BincodeCodec, (u64, u64), _, _, _>(
            "game_logs".to_owned(),
            stream::iter(vec![Ok(inbound(1, &[1, 2, 3], expect_reject(false)))]),
            handler,
            DecodeFailurePolicy::Stop,
        )
        .await;

        assert!(matches!(result, Err(AmqpError::DecodeError(_))));
    }

    #[tokio::test]
    async fn test_ack_failure_does_not_stop_loop() {
        let mut failing = MockAcknowledger::new();
        failing
            .expect_acknowledge()
            .times(1)
            .returning(|| Err(AmqpError::AckMessageError));
        failing.expect_reject().never();

        let handler = Arc::new(|_: Context, _: PlayingState| async { AckDecision::Ack });

        let result = consume_loop::<JsonCodec, PlayingState, _, _, _>(
            "pause.ana".to_owned(),
            stream::iter(vec![Ok(pause(1, failing)), Ok(pause(2, expect_ack()))]),
            handler,
            DecodeFailurePolicy::Stop,
        )
        .await;

        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_stream_error_is_skipped() {
        let handler = Arc::new(|_: Context, _: PlayingState| async { AckDecision::Ack });

        let result = consume_loop::<JsonCodec, PlayingState, _, _, _>(
            "pause.ana".to_owned(),
            stream::iter(vec![
                Err(AmqpError::ConsumerError("channel error".to_owned())),
                Ok(pause(2, expect_ack())),
            ]),
            handler,
            DecodeFailurePolicy::Stop,
        )
        .await;

        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_handlers_run_one_at_a_time() {
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let (a, m) = (active.clone(), max_seen.clone());
        let handler = Arc::new(move |_: Context, _: PlayingState| {
            let (a, m) = (a.clone(), m.clone());
            async move {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                a.fetch_sub(1, Ordering::SeqCst);
                AckDecision::Ack
            }
        });

        let deliveries: Vec<_> = (0..5).map(|tag| Ok(pause(tag, expect_ack()))).collect();

        let result = consume_loop::<JsonCodec, PlayingState, _, _, _>(
            "pause.ana".to_owned(),
            stream::iter(deliveries),
            handler,
            DecodeFailurePolicy::Stop,
        )
        .await;

        assert_eq!(result, Ok(()));
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_continues_publisher_trace() {
        opentelemetry::global::set_text_map_propagator(TraceIdPropagator {
            fields: vec![TRACE_HEADER.to_owned()],
        });

        let trace_id = TraceId::from_bytes([7; 16]);
        let mut headers = BTreeMap::new();
        headers.insert(
            ShortString::from(TRACE_HEADER),
            AMQPValue::LongString(LongString::from(trace_id.to_string())),
        );
        let mut msg = pause(1, expect_ack());
        msg.properties = BasicProperties::default().with_headers(FieldTable::from(headers));

        let expected = AMQPValue::LongString(LongString::from(trace_id.to_string()));
        let mut sink = MockMessageSink::new();
        sink.expect_send()
            .withf(move |_, key, _, props| {
                key == "war.ana"
                    && props
                        .headers()
                        .as_ref()
                        .and_then(|h| h.inner().get(TRACE_HEADER).cloned())
                        == Some(expected.clone())
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let publisher = RabbitMQPublisher::new(Arc::new(sink));
        let handler = Arc::new(move |ctx: Context, state: PlayingState| {
            let publisher = publisher.clone();
            async move {
                if ctx.span().span_context().trace_id() != trace_id {
                    return AckDecision::NackDiscard;
                }

                let key = player_key(WAR_RECOGNITIONS_PREFIX, "ana");
                match publisher
                    .publish_json(&ctx, EXCHANGE_PERIL_TOPIC, &key, &state)
                    .await
                {
                    Ok(()) => AckDecision::Ack,
                    Err(_) => AckDecision::NackRequeue,
                }
            }
        });

        let result = consume_loop::<JsonCodec, PlayingState, _, _, _>(
            "army_moves.ana".to_owned(),
            stream::iter(vec![Ok(msg)]),
            handler,
            DecodeFailurePolicy::Stop,
        )
        .await;

        assert_eq!(result, Ok(()));
    }
}
