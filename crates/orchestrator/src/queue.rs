//! FIFO single-consumer async queue with a single-flight drain loop.
//!
//! Items enqueued while a drain is running are picked up in the same cycle.
//! A per-item processor error goes to the `on_error` callback and the drain
//! continues.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use tinge_domain::error::Error;

type Processor<T> = dyn Fn(T) -> BoxFuture<'static, Result<(), Error>> + Send + Sync;
type ErrorHook = dyn Fn(Error) + Send + Sync;

struct QueueInner<T> {
    items: Mutex<VecDeque<T>>,
    draining: AtomicBool,
    processor: Box<Processor<T>>,
    on_error: Box<ErrorHook>,
}

/// An ordered async processor: push items, they are processed one at a time
/// in arrival order on a background task.
pub struct AsyncQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for AsyncQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> AsyncQueue<T> {
    pub fn new<P, F, E>(processor: P, on_error: E) -> Self
    where
        P: Fn(T) -> F + Send + Sync + 'static,
        F: std::future::Future<Output = Result<(), Error>> + Send + 'static,
        E: Fn(Error) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(QueueInner {
                items: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                processor: Box::new(move |item| Box::pin(processor(item))),
                on_error: Box::new(on_error),
            }),
        }
    }

    /// Enqueue an item, starting the drain loop if it is not already running.
    pub fn push(&self, item: T) {
        self.inner.items.lock().push_back(item);
        if !self.inner.draining.swap(true, Ordering::SeqCst) {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                loop {
                    loop {
                        let next = inner.items.lock().pop_front();
                        let Some(item) = next else { break };
                        if let Err(e) = (inner.processor)(item).await {
                            (inner.on_error)(e);
                        }
                    }
                    inner.draining.store(false, Ordering::SeqCst);
                    // An item may have slipped in between the last pop and
                    // the flag reset; reclaim the drain if so.
                    if inner.items.lock().is_empty()
                        || inner.draining.swap(true, Ordering::SeqCst)
                    {
                        break;
                    }
                }
            });
        }
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn processes_in_fifo_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let queue = AsyncQueue::new(
            move |n: u32| {
                let seen = seen2.clone();
                async move {
                    seen.lock().push(n);
                    Ok(())
                }
            },
            |_| {},
        );

        for n in 0..20 {
            queue.push(n);
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn errors_are_reported_and_processing_continues() {
        let processed = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let processed2 = processed.clone();
        let errors2 = errors.clone();

        let queue = AsyncQueue::new(
            move |n: u32| {
                let processed = processed2.clone();
                async move {
                    if n == 2 {
                        return Err(Error::Other("bad item".into()));
                    }
                    processed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            move |_| {
                errors2.fetch_add(1, Ordering::SeqCst);
            },
        );

        for n in 0..5 {
            queue.push(n);
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(processed.load(Ordering::SeqCst), 4);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn items_enqueued_during_drain_are_drained_same_cycle() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        // Slow processor so the drain is still running when we push more.
        let queue = AsyncQueue::new(
            move |n: u32| {
                let seen = seen2.clone();
                async move {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    seen.lock().push(n);
                    Ok(())
                }
            },
            |_| {},
        );

        queue.push(1);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        queue.push(2);
        queue.push(3);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }
}
