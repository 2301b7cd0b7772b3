use super::stream::send_terminal;
use super::{CallContext, CallRecord, CallStream, Method, StreamSession, call_span};
use crate::server::telemetry::increment_messages_sent;
use core::pin::pin;
use futures::{Stream, StreamExt};
use quartet_core::{Error, Result};
use tokio::sync::mpsc;
use tonic::{Response, Status};
use tracing::Instrument;

/// Drives a server-streaming call.
///
/// `source` is pulled lazily by a spawned task: the next item is only
/// produced once the previous one was accepted by a channel of `buffer`
/// slots, so a slow caller slows the producer down. Every pull and every
/// send is a guarded suspension point. The first error ends the stream with
/// that error as its terminal status; items already sent stay delivered.
pub fn server_streaming<T, S>(
    ctx: CallContext,
    method: &'static Method,
    source: S,
    buffer: usize,
) -> Response<CallStream<T>>
where
    T: Send + 'static,
    S: Stream<Item = Result<T>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let stream = CallStream::new(rx, ctx.token().clone());

    tokio::spawn(
        async move {
            let record = CallRecord::begin(method);
            let outcome = pump(&ctx, method, source, &tx).await;
            record.finish(&outcome);
            if let Err(err) = outcome {
                send_terminal(&ctx, &tx, err).await;
            }
        }
        .instrument(call_span(method)),
    );

    Response::new(stream)
}

async fn pump<T, S>(
    ctx: &CallContext,
    method: &'static Method,
    source: S,
    tx: &mpsc::Sender<Result<T, Status>>,
) -> Result<()>
where
    S: Stream<Item = Result<T>>,
{
    let mut session = StreamSession::new(());
    // The single request was consumed before the handler was invoked.
    session.half_close_recv();

    let mut source = pin!(source);
    while let Some(item) = ctx.guard(async { Ok(source.next().await) }).await? {
        let item = item?;
        ctx.guard(async {
            tx.send(Ok(item))
                .await
                .map_err(|_| Error::RequestCancelled)
        })
        .await?;
        session.record_emitted()?;
        increment_messages_sent(method);
    }

    session.half_close_send();
    session.close();
    tracing::debug!(emitted = session.emitted(), "Response stream complete");
    Ok(())
}
