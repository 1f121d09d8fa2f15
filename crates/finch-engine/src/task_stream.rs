//! A stream fed by a background task that owns its resources.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Items produced by a spawned driver task.
///
/// Closing (or dropping) the stream aborts the driver, which releases any
/// worker processes and watchers it holds.
#[derive(Debug)]
pub struct TaskStream<T> {
    rx: mpsc::Receiver<T>,
    task: Option<JoinHandle<()>>,
    name: &'static str,
}

impl<T: Send + 'static> TaskStream<T> {
    pub(crate) fn spawn<F, Fut>(name: &'static str, capacity: usize, driver: F) -> Self
    where
        F: FnOnce(mpsc::Sender<T>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(driver(tx));
        Self {
            rx,
            task: Some(task),
            name,
        }
    }
}

impl<T> TaskStream<T> {
    /// Stop the driver and release everything it holds. Returns `false` if
    /// the stream was already closed.
    pub fn close(&mut self) -> bool {
        let Some(task) = self.task.take() else {
            return false;
        };
        task.abort();
        self.rx.close();
        tracing::debug!(stream = self.name, "Stream closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }
}

impl<T> Stream for TaskStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        if self.task.is_none() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for TaskStream<T> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn yields_until_driver_finishes() {
        let stream = TaskStream::spawn("test", 4, |tx| async move {
            for i in 0..3 {
                if tx.send(i).await.is_err() {
                    return;
                }
            }
        });
        assert_eq!(stream.collect::<Vec<_>>().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn close_aborts_driver_once() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let mut stream: TaskStream<u8> = TaskStream::spawn("test", 1, |_tx| async move {
            // Held until the task is aborted.
            let _done = done_tx;
            std::future::pending::<()>().await;
        });
        assert!(stream.close());
        assert!(!stream.close());
        assert!(stream.next().await.is_none());
        // The sender is dropped when the aborted task is torn down.
        assert!(done_rx.await.is_err());
    }
}
