//! Streaming backpressure via bounded channels.
//!
//! Stream output goes through a bounded `tokio::sync::mpsc::channel` so that
//! producers block when consumers fall behind. The producer runs in its own
//! task and is dropped as soon as the consumer goes away, which cancels
//! whatever backend call it was awaiting.

use std::future::Future;
use std::pin::Pin;

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug};

/// Default number of chunks buffered between producer and consumer.
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Run `produce` in a spawned task feeding a bounded channel, and return the
/// receiving end as a stream.
///
/// `produce` gets the sending half. When the channel is full its `send`
/// waits until the consumer reads. If the consumer drops the stream the
/// producer future is dropped at its next await point, even if it is
/// blocked on something other than `send`.
///
/// # Panics
///
/// Requires a tokio runtime context (called within an async fn).
pub fn spawn_producer<T, F, Fut>(
    buffer_size: usize,
    produce: F,
) -> Pin<Box<dyn Stream<Item = T> + Send>>
where
    T: Send + 'static,
    F: FnOnce(mpsc::Sender<T>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    let watcher = tx.clone();
    let producer = produce(tx);

    tokio::spawn(
        async move {
            tokio::select! {
                _ = watcher.closed() => debug!("stream consumer went away"),
                _ = producer => {}
            }
        }
        .in_current_span(),
    );

    Box::pin(ReceiverStream::new(rx))
}
