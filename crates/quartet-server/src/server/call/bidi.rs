//! Duplex calls.
//!
//! The inbound and outbound directions run as two independent tasks so that
//! neither waits on the other: an emission is handed over as soon as the
//! accumulator produces it, before the caller half-closes. A supervisor joins
//! both and reports the first real failure as the terminal status.

use super::stream::send_terminal;
use super::{CallContext, CallRecord, CallStream, Method, Scan, StreamSession, call_span};
use crate::server::telemetry::{increment_messages_received, increment_messages_sent};
use core::pin::pin;
use futures::{Stream, StreamExt};
use quartet_core::{Error, Result};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tonic::{Response, Status};
use tracing::Instrument;

/// Drives a bidirectional-streaming call.
///
/// Each inbound message is fed to `scan`; whatever it emits is passed through
/// `render` and sent in emission order. The call completes once the caller
/// half-closed and every emission has been sent.
pub fn bidi_streaming<A, S, T, R>(
    ctx: CallContext,
    method: &'static Method,
    inbound: S,
    scan: A,
    render: R,
    buffer: usize,
) -> Response<CallStream<T>>
where
    A: Scan,
    S: Stream<Item = Result<A::Input, Status>> + Send + 'static,
    T: Send + 'static,
    R: FnMut(A::Emit) -> T + Send + 'static,
{
    let buffer = buffer.max(1);
    let (out_tx, out_rx) = mpsc::channel(buffer);
    let stream = CallStream::new(out_rx, ctx.token().clone());

    tokio::spawn(
        async move {
            let record = CallRecord::begin(method);
            let (emit_tx, emit_rx) = mpsc::channel(buffer);

            let consumer = tokio::spawn(
                consume(ctx.clone(), method, inbound, scan, emit_tx).in_current_span(),
            );
            let producer = tokio::spawn(
                produce(ctx.clone(), method, emit_rx, render, out_tx.clone()).in_current_span(),
            );
            let (consumed, produced) = tokio::join!(consumer, producer);

            let outcome = settle(joined(consumed), joined(produced));
            record.finish(&outcome);
            if let Err(err) = outcome {
                send_terminal(&ctx, &out_tx, err).await;
            }
        }
        .instrument(call_span(method)),
    );

    Response::new(stream)
}

/// Inbound loop: owns the session and its accumulator.
async fn consume<A, S>(
    ctx: CallContext,
    method: &'static Method,
    inbound: S,
    scan: A,
    emit_tx: mpsc::Sender<A::Emit>,
) -> Result<u64>
where
    A: Scan,
    S: Stream<Item = Result<A::Input, Status>>,
{
    let mut session = StreamSession::new(scan);
    let mut inbound = pin!(inbound);

    while let Some(input) = ctx.guard(async { Ok(inbound.next().await) }).await? {
        let input = input.map_err(Error::from)?;
        increment_messages_received(method);
        if let Some(emit) = session.step(input)? {
            ctx.guard(async {
                emit_tx.send(emit).await.map_err(|_| Error::ChannelError {
                    context: "Outbound loop stopped".to_string(),
                })
            })
            .await?;
        }
    }

    session.half_close_recv();
    tracing::debug!(
        received = session.received(),
        emitted = session.emitted(),
        "Request stream half-closed"
    );
    Ok(session.received())
}

/// Outbound loop: renders emissions and sends them until the inbound loop is
/// done and the hand-off channel is drained.
async fn produce<E, T, R>(
    ctx: CallContext,
    method: &'static Method,
    mut emit_rx: mpsc::Receiver<E>,
    mut render: R,
    out_tx: mpsc::Sender<Result<T, Status>>,
) -> Result<u64>
where
    R: FnMut(E) -> T,
{
    let mut sent = 0;
    while let Some(emit) = ctx.guard(async { Ok(emit_rx.recv().await) }).await? {
        let message = render(emit);
        ctx.guard(async {
            out_tx
                .send(Ok(message))
                .await
                .map_err(|_| Error::RequestCancelled)
        })
        .await?;
        increment_messages_sent(method);
        sent += 1;
    }
    tracing::debug!(sent, "Response stream complete");
    Ok(sent)
}

fn joined(res: core::result::Result<Result<u64>, JoinError>) -> Result<u64> {
    match res {
        Ok(inner) => inner,
        Err(e) => Err(Error::internal(format!("Stream task failed: {e}"))),
    }
}

/// Picks the terminal outcome of a duplex call. A broken hand-off on the
/// inbound side is only a symptom when the outbound side has its own error.
fn settle(consumed: Result<u64>, produced: Result<u64>) -> Result<()> {
    match (consumed, produced) {
        (Ok(_), Ok(_)) => Ok(()),
        (Err(Error::ChannelError { .. }), Err(err)) => Err(err),
        (Err(err), _) | (Ok(_), Err(err)) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::call::Shape;
    use futures::stream;
    use tokio_util::sync::CancellationToken;
    use tonic::Code;

    static ECHO: Method = Method::new("test.Test", "EchoPositive", Shape::BidiStream);

    /// Echoes positive numbers, skips zero, rejects negatives.
    struct EchoPositive;

    impl Scan for EchoPositive {
        type Input = i32;
        type Emit = i32;

        fn absorb(&mut self, input: i32) -> Result<Option<i32>> {
            match input {
                n if n < 0 => Err(Error::invalid_argument("negative")),
                0 => Ok(None),
                n => Ok(Some(n)),
            }
        }
    }

    fn ctx() -> CallContext {
        CallContext::new(CancellationToken::new())
    }

    #[tokio::test]
    async fn emissions_follow_inbound_order() {
        let inbound = stream::iter([3, 0, 1, 0, 2].map(Ok));
        let stream = bidi_streaming(ctx(), &ECHO, inbound, EchoPositive, |n| n * 10, 1).into_inner();

        let got: Vec<i32> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(got, [30, 10, 20]);
    }

    #[tokio::test]
    async fn outputs_flow_before_the_caller_half_closes() {
        let ctx = ctx();
        let inbound = stream::iter([4, 7].map(Ok)).chain(stream::pending());
        let mut stream =
            bidi_streaming(ctx.clone(), &ECHO, inbound, EchoPositive, |n| n, 1).into_inner();

        assert_eq!(stream.next().await.unwrap().unwrap(), 4);
        assert_eq!(stream.next().await.unwrap().unwrap(), 7);

        ctx.cancel();
        let status = stream.next().await.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::Cancelled);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn rejected_input_ends_after_earlier_emissions() {
        let inbound = stream::iter([1, 2, -1, 3].map(Ok));
        let stream = bidi_streaming(ctx(), &ECHO, inbound, EchoPositive, |n| n, 4).into_inner();

        let got: Vec<_> = stream.collect().await;
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].as_ref().unwrap(), &1);
        assert_eq!(got[1].as_ref().unwrap(), &2);
        assert_eq!(got[2].as_ref().unwrap_err().code(), Code::InvalidArgument);
    }

    #[test]
    fn outbound_error_wins_over_a_broken_hand_off() {
        let broken = Err(Error::ChannelError {
            context: "Outbound loop stopped".to_string(),
        });
        assert_eq!(
            settle(broken, Err(Error::RequestCancelled)),
            Err(Error::RequestCancelled)
        );
        assert_eq!(
            settle(Err(Error::invalid_argument("x")), Ok(2)),
            Err(Error::invalid_argument("x"))
        );
        assert_eq!(settle(Ok(2), Ok(2)), Ok(()));
    }
}
