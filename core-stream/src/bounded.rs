//! Semaphore-bounded producers.
//!
//! Multi-account and multi-region connectors can open dozens of paginated
//! sources for one resource kind. Wrapping each source with
//! [`semaphore_stream`] bounds how many of them *run* at once while leaving
//! their internal throughput alone.

use connector_traits::BatchStream;
use futures::stream::StreamExt;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Wrap a producer factory so one semaphore permit gates the producer's
/// entire lifetime.
///
/// The permit is acquired before `factory` is called, held across every
/// batch the inner stream yields, and released when the stream completes or
/// is dropped. This bounds the number of concurrently running producers,
/// not the number of in-flight items.
pub fn semaphore_stream<F>(semaphore: Arc<Semaphore>, factory: F) -> BatchStream
where
    F: FnOnce() -> BatchStream + Send + 'static,
{
    futures::stream::once(async move {
        match semaphore.acquire_owned().await {
            Ok(permit) => factory()
                .map(move |item| {
                    // Permit lives as long as this stream does.
                    let _held = &permit;
                    item
                })
                .boxed(),
            // Closed semaphore means the run is shutting down.
            Err(_) => futures::stream::empty().boxed(),
        }
    })
    .flatten()
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge_batches;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Producer that tracks how many of its siblings run at the same time.
    fn counting_producer(
        active: Arc<AtomicUsize>,
        max_seen: Arc<AtomicUsize>,
    ) -> BatchStream {
        futures::stream::once(async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![json!({"id": "item"})])
        })
        .boxed()
    }

    #[tokio::test]
    async fn test_at_most_k_producers_run_concurrently() {
        let semaphore = Arc::new(Semaphore::new(3));
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let producers: Vec<BatchStream> = (0..10)
            .map(|_| {
                let active = Arc::clone(&active);
                let max_seen = Arc::clone(&max_seen);
                semaphore_stream(Arc::clone(&semaphore), move || {
                    counting_producer(active, max_seen)
                })
            })
            .collect();

        let items: Vec<_> = merge_batches(producers).collect().await;

        assert_eq!(items.len(), 10);
        assert!(
            max_seen.load(Ordering::SeqCst) <= 3,
            "saw {} concurrent producers with capacity 3",
            max_seen.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_permit_released_on_completion() {
        let semaphore = Arc::new(Semaphore::new(1));

        for _ in 0..3 {
            let stream = semaphore_stream(Arc::clone(&semaphore), || {
                futures::stream::once(async { Ok(vec![json!({"id": "a"})]) }).boxed()
            });
            let items: Vec<_> = stream.collect().await;
            assert_eq!(items.len(), 1);
        }

        assert_eq!(semaphore.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let semaphore = Arc::new(Semaphore::new(1));

        let mut stream = semaphore_stream(Arc::clone(&semaphore), || {
            futures::stream::iter(vec![Ok(vec![json!({"id": "a"})]), Ok(vec![json!({"id": "b"})])])
                .boxed()
        });
        // Pull one batch, then drop the stream mid-way.
        let first = stream.next().await;
        assert!(first.is_some());
        drop(stream);

        assert_eq!(semaphore.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_closed_semaphore_yields_empty_stream() {
        let semaphore = Arc::new(Semaphore::new(1));
        semaphore.close();

        let stream = semaphore_stream(Arc::clone(&semaphore), || {
            futures::stream::once(async { Ok(vec![json!({"id": "a"})]) }).boxed()
        });
        let items: Vec<_> = stream.collect().await;
        assert!(items.is_empty());
    }
}
