use std::sync::Arc;

use tokio::sync::{Mutex, Notify, OnceCell, mpsc};

/// A push-based event stream with a terminal result value.
///
/// Producers call [`EventStreamHandle::push`] to deliver events and
/// [`EventStreamHandle::end`] exactly once to terminate the stream. Consumers iterate
/// with [`EventStream::recv`] and may independently await [`EventStream::result`] any
/// number of times; every call observes the same terminal value.
pub struct EventStream<E, R> {
    receiver: Mutex<mpsc::UnboundedReceiver<E>>,
    result: Arc<OnceCell<R>>,
    result_ready: Arc<Notify>,
}

/// The producer-facing half returned alongside an [`EventStream`].
pub struct EventStreamHandle<E, R> {
    sender: mpsc::UnboundedSender<E>,
    result: Arc<OnceCell<R>>,
    result_ready: Arc<Notify>,
}

/// Create a linked producer/consumer pair.
pub fn channel<E, R>() -> (EventStreamHandle<E, R>, EventStream<E, R>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let result = Arc::new(OnceCell::new());
    let result_ready = Arc::new(Notify::new());

    (
        EventStreamHandle {
            sender: tx,
            result: result.clone(),
            result_ready: result_ready.clone(),
        },
        EventStream {
            receiver: Mutex::new(rx),
            result,
            result_ready,
        },
    )
}

impl<E, R> EventStreamHandle<E, R> {
    /// Deliver one event. A no-op if the consumer has already been dropped.
    pub fn push(&self, event: E) {
        let _ = self.sender.send(event);
    }

    /// Terminate the stream with its final result. Calling this more than once is a
    /// programmer error; only the first call has any effect, matching the "emitted
    /// exactly once" contract producers are expected to uphold.
    pub fn end(&self, result: R) {
        if self.result.set(result).is_ok() {
            self.result_ready.notify_waiters();
        }
    }
}

impl<E, R> EventStream<E, R> {
    /// Receive the next event in FIFO order, or `None` once the stream has ended and
    /// all buffered events have been drained.
    pub async fn recv(&self) -> Option<E> {
        self.receiver.lock().await.recv().await
    }

    /// Await the terminal result. Safe to call multiple times, including
    /// concurrently; every caller observes the same value once it is set.
    pub async fn result(&self) -> &R {
        loop {
            if let Some(result) = self.result.get() {
                return result;
            }
            let notified = self.result_ready.notified();
            if let Some(result) = self.result.get() {
                return result;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_events_in_push_order_then_ends() {
        let (handle, stream) = channel::<i32, &'static str>();
        handle.push(1);
        handle.push(2);
        handle.push(3);
        handle.end("done");

        assert_eq!(stream.recv().await, Some(1));
        assert_eq!(stream.recv().await, Some(2));
        assert_eq!(stream.recv().await, Some(3));
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn result_is_awaitable_multiple_times_and_concurrently() {
        let (handle, stream) = channel::<(), &'static str>();
        handle.end("final");

        let a = stream.result();
        let b = stream.result();
        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(*ra, "final");
        assert_eq!(*rb, "final");
        assert_eq!(*stream.result().await, "final");
    }

    #[tokio::test]
    async fn result_resolves_after_pending_await_started_first() {
        let (handle, stream) = channel::<(), &'static str>();

        let waiter = tokio::spawn(async move { *stream.result().await });

        tokio::task::yield_now().await;
        handle.end("late");

        assert_eq!(waiter.await.unwrap(), "late");
    }
}
