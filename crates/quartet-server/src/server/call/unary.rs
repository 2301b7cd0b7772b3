use super::{CallContext, CallRecord, Method, call_span};
use core::future::Future;
use quartet_core::Result;
use tonic::{Response, Status};
use tracing::Instrument;

/// Drives a unary call.
///
/// `work` is the single domain operation. It runs as one guarded suspension
/// point: cancellation or deadline expiry abandons it. Whatever it returns is
/// the call's sole outcome; nothing is retried.
///
/// # Errors
///
/// The domain error, or cancellation/deadline, mapped to a [`Status`].
pub async fn unary<T, F>(
    ctx: CallContext,
    method: &'static Method,
    work: F,
) -> Result<Response<T>, Status>
where
    F: Future<Output = Result<T>>,
{
    let record = CallRecord::begin(method);
    let outcome = ctx.guard(work).instrument(call_span(method)).await;
    record.finish(&outcome);
    outcome.map(Response::new).map_err(Status::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::call::Shape;
    use core::time::Duration;
    use quartet_core::Error;
    use tokio_util::sync::CancellationToken;
    use tonic::Code;

    static ECHO: Method = Method::new("test.Test", "Echo", Shape::Unary);

    #[tokio::test]
    async fn success_becomes_the_response() {
        let ctx = CallContext::new(CancellationToken::new());
        let res = unary(ctx, &ECHO, async { Ok(5) }).await.unwrap();
        assert_eq!(res.into_inner(), 5);
    }

    #[tokio::test]
    async fn domain_errors_are_mapped() {
        let ctx = CallContext::new(CancellationToken::new());
        let status = unary(ctx, &ECHO, async {
            Err::<(), _>(Error::invalid_argument("nope"))
        })
        .await
        .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "nope");
    }

    #[tokio::test]
    async fn slow_work_hits_the_deadline() {
        let ctx = CallContext::new(CancellationToken::new()).with_timeout(Duration::from_millis(10));
        let status = unary(ctx, &ECHO, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(status.code(), Code::DeadlineExceeded);
    }
}
