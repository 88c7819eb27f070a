//! Bounded-concurrency admission control.
//!
//! A fixed number of requests run concurrently; a bounded FIFO queue
//! absorbs bursts. When the queue is also full the request is rejected
//! with `ThrottledError` rather than left to pile up.

use crate::probes::Probes;
use crate::response::ApiError;
use axum::{extract::Request, extract::State, middleware::Next, response::Response};
use reef_common::config::ThrottleConfig;
use reef_common::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Admission throttle shared by every request
pub struct Throttle {
    slots: Semaphore,
    queue_limit: usize,
    waiting: AtomicUsize,
    probes: Arc<dyn Probes>,
}

impl Throttle {
    pub fn new(config: &ThrottleConfig, probes: Arc<dyn Probes>) -> Self {
        Self {
            slots: Semaphore::new(config.concurrency),
            queue_limit: config.queue_limit,
            waiting: AtomicUsize::new(0),
            probes,
        }
    }

    /// Acquire an admission slot, queueing if necessary. Fails with
    /// `Throttled` when the queue is full.
    pub async fn admit(&self) -> Result<SemaphorePermit<'_>, Error> {
        if let Ok(permit) = self.slots.try_acquire() {
            return Ok(permit);
        }

        // Slot unavailable: join the wait queue if there is room.
        let waiting = self.waiting.fetch_add(1, Ordering::SeqCst);
        if waiting >= self.queue_limit {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            self.probes.on_throttle();
            return Err(Error::Throttled);
        }
        self.probes.on_queue_enter();
        let permit = self.slots.acquire().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        self.probes.on_queue_leave();
        permit.map_err(|_| Error::internal("throttle semaphore closed"))
    }

    /// Requests currently waiting for a slot
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Admission slots currently free
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

/// Axum layer applying the throttle to every route
pub async fn throttle_layer(
    State(throttle): State<Arc<Throttle>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let permit = throttle.admit().await?;
    let response = next.run(request).await;
    drop(permit);
    throttle.probes.on_request_handled();
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::testing::Recorder;
    use std::time::Duration;

    fn throttle(concurrency: usize, queue: usize) -> (Arc<Throttle>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let config = ThrottleConfig {
            concurrency,
            queue_limit: queue,
        };
        (
            Arc::new(Throttle::new(&config, recorder.clone())),
            recorder,
        )
    }

    #[tokio::test]
    async fn test_admits_up_to_concurrency() {
        let (throttle, _) = throttle(2, 4);
        let a = throttle.admit().await.unwrap();
        let b = throttle.admit().await.unwrap();
        assert_eq!(throttle.free_slots(), 0);
        drop(a);
        drop(b);
        assert_eq!(throttle.free_slots(), 2);
    }

    #[tokio::test]
    async fn test_queues_then_proceeds() {
        let (throttle, recorder) = throttle(1, 4);
        let first = throttle.admit().await.unwrap();

        let contender = {
            let throttle = throttle.clone();
            tokio::spawn(async move {
                let _permit = throttle.admit().await.unwrap();
            })
        };
        // Give the contender time to join the queue.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(throttle.queue_depth(), 1);

        drop(first);
        contender.await.unwrap();
        assert_eq!(throttle.queue_depth(), 0);
        assert_eq!(
            recorder.queue_enter.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        assert_eq!(
            recorder.queue_leave.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn test_rejects_when_queue_full() {
        let (throttle, recorder) = throttle(1, 0);
        let _held = throttle.admit().await.unwrap();
        let err = throttle.admit().await.unwrap_err();
        assert!(matches!(err, Error::Throttled));
        assert_eq!(err.http_status(), 503);
        assert_eq!(
            recorder.throttled.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }
}
