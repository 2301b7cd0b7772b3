use super::CallContext;
use core::pin::Pin;
use core::task::{Context, Poll};
use futures::Stream;
use quartet_core::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::Status;

/// Response stream handed to the transport for streaming calls.
///
/// Yields what the call's producer sends, in send order, and ends when every
/// producer has dropped its sender. Dropping the stream (the transport does so
/// when the caller cancels or disconnects) cancels the call, so producers stop
/// at their next suspension point.
#[derive(Debug)]
pub struct CallStream<T> {
    inner: ReceiverStream<Result<T, Status>>,
    _cancel_on_drop: DropGuard,
}

impl<T> CallStream<T> {
    pub fn new(rx: mpsc::Receiver<Result<T, Status>>, token: CancellationToken) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            _cancel_on_drop: token.drop_guard(),
        }
    }
}

impl<T> Stream for CallStream<T> {
    type Item = Result<T, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Hands the call's terminal error to the transport.
///
/// Waits for buffer space while the caller is still attached. Once the call
/// token is cancelled and the buffer is full the status is dropped: nobody is
/// reading anymore.
pub(crate) async fn send_terminal<T>(
    ctx: &CallContext,
    tx: &mpsc::Sender<Result<T, Status>>,
    err: Error,
) {
    tokio::select! {
        biased;
        res = tx.send(Err(Status::from(err))) => {
            if res.is_err() {
                tracing::debug!("Caller went away before the terminal status");
            }
        }
        () = ctx.token().cancelled() => {
            tracing::debug!("Dropped terminal status of a cancelled call");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn dropping_the_stream_cancels_the_call() {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel::<Result<u8, Status>>(1);
        let stream = CallStream::new(rx, token.clone());

        assert!(!token.is_cancelled());
        drop(stream);
        assert!(token.is_cancelled());
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn yields_in_send_order_then_ends() {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(4);
        let stream = CallStream::new(rx, token);
        for n in 0..3_u8 {
            tx.send(Ok(n)).await.unwrap();
        }
        drop(tx);

        let got: Vec<u8> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(got, [0, 1, 2]);
    }
}
