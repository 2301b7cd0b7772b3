use super::{CallContext, CallRecord, Fold, Method, StreamSession, call_span};
use crate::server::telemetry::increment_messages_received;
use core::pin::pin;
use futures::{Stream, StreamExt};
use quartet_core::{Error, Result};
use tonic::{Response, Status};
use tracing::Instrument;

/// Drives a client-streaming call.
///
/// Every inbound message is absorbed by `fold` in arrival order. Once the
/// caller half-closes, the accumulator is finalized into the only response.
/// Nothing is sent back before that.
///
/// # Errors
///
/// A rejected message, an accumulator with no defined result, a transport
/// failure, cancellation or deadline expiry.
pub async fn client_streaming<F, S>(
    ctx: CallContext,
    method: &'static Method,
    inbound: S,
    fold: F,
) -> Result<Response<F::Output>, Status>
where
    F: Fold,
    S: Stream<Item = Result<F::Input, Status>>,
{
    let record = CallRecord::begin(method);
    let outcome = absorb_all(&ctx, method, inbound, fold)
        .instrument(call_span(method))
        .await;
    record.finish(&outcome);
    outcome.map(Response::new).map_err(Status::from)
}

async fn absorb_all<F, S>(
    ctx: &CallContext,
    method: &'static Method,
    inbound: S,
    fold: F,
) -> Result<F::Output>
where
    F: Fold,
    S: Stream<Item = Result<F::Input, Status>>,
{
    let mut session = StreamSession::new(fold);
    let mut inbound = pin!(inbound);

    while let Some(input) = ctx.guard(async { Ok(inbound.next().await) }).await? {
        session.absorb(input.map_err(Error::from)?)?;
        increment_messages_received(method);
    }

    session.half_close_recv();
    tracing::debug!(received = session.received(), "Request stream half-closed");
    session.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::call::Shape;
    use futures::stream;
    use tokio_util::sync::CancellationToken;
    use tonic::Code;

    static TOTAL: Method = Method::new("test.Test", "Total", Shape::ClientStream);

    #[derive(Default)]
    struct Total(Option<i64>);

    impl Fold for Total {
        type Input = i64;
        type Output = i64;

        fn absorb(&mut self, input: i64) -> Result<()> {
            if input < 0 {
                return Err(Error::invalid_argument("negative"));
            }
            *self.0.get_or_insert(0) += input;
            Ok(())
        }

        fn finish(self) -> Result<i64> {
            self.0.ok_or_else(|| Error::internal("empty"))
        }
    }

    fn ctx() -> CallContext {
        CallContext::new(CancellationToken::new())
    }

    #[tokio::test]
    async fn folds_every_message_after_half_close() {
        let inbound = stream::iter([1, 2, 3].map(Ok));
        let res = client_streaming(ctx(), &TOTAL, inbound, Total::default())
            .await
            .unwrap();
        assert_eq!(res.into_inner(), 6);
    }

    #[tokio::test]
    async fn empty_stream_uses_the_fold_result() {
        let status = client_streaming(ctx(), &TOTAL, stream::empty(), Total::default())
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
    }

    #[tokio::test]
    async fn rejected_message_ends_the_call() {
        let inbound = stream::iter([1, -1, 3].map(Ok));
        let status = client_streaming(ctx(), &TOTAL, inbound, Total::default())
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn transport_errors_surface_as_channel_errors() {
        let inbound = stream::iter([Ok(1), Err(Status::unknown("reset"))]);
        let status = client_streaming(ctx(), &TOTAL, inbound, Total::default())
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
    }

    #[tokio::test]
    async fn cancellation_while_waiting_for_input() {
        let ctx = ctx();
        let inbound = stream::iter([Ok(1)]).chain(stream::pending());
        let call = tokio::spawn(client_streaming(ctx.clone(), &TOTAL, inbound, Total::default()));

        tokio::time::sleep(core::time::Duration::from_millis(10)).await;
        ctx.cancel();

        let status = call.await.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::Cancelled);
    }
}
