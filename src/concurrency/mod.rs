//! Admission control for search requests
//!
//! A fair `tokio::sync::Semaphore` bounds in-flight requests. Excess callers
//! queue FIFO and are never rejected; only their own timeout ends the wait.

use crate::error::{MeldError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Admission counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyStats {
    pub limit: usize,
    pub in_flight: usize,
    pub waiting: usize,
    pub total_admitted: u64,
    pub peak_in_flight: usize,
}

#[derive(Default)]
struct Counters {
    in_flight: AtomicUsize,
    waiting: AtomicUsize,
    total_admitted: AtomicU64,
    peak: AtomicUsize,
    /// Permits still to be retired after a shrink
    debt: AtomicUsize,
}

impl Counters {
    fn take_debt(&self) -> bool {
        self.debt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1))
            .is_ok()
    }
}

struct WaitGuard<'a>(&'a Counters);

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Held for the lifetime of one admitted request
pub struct ConcurrencySlot {
    permit: Option<OwnedSemaphorePermit>,
    counters: Arc<Counters>,
}

impl Drop for ConcurrencySlot {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::AcqRel);
        if let Some(permit) = self.permit.take() {
            if self.counters.take_debt() {
                permit.forget();
            }
        }
    }
}

pub struct ConcurrencyController {
    semaphore: Arc<Semaphore>,
    limit: AtomicUsize,
    counters: Arc<Counters>,
}

impl ConcurrencyController {
    pub fn new(max_in_flight: usize) -> Self {
        let limit = max_in_flight.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit: AtomicUsize::new(limit),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Wait for a slot in arrival order
    pub async fn acquire(&self) -> Result<ConcurrencySlot> {
        self.counters.waiting.fetch_add(1, Ordering::AcqRel);
        let permit = {
            let _waiting = WaitGuard(&self.counters);
            Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| MeldError::AdmissionClosed)?
        };

        let now = self.counters.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.peak.fetch_max(now, Ordering::AcqRel);
        self.counters.total_admitted.fetch_add(1, Ordering::Relaxed);

        Ok(ConcurrencySlot {
            permit: Some(permit),
            counters: Arc::clone(&self.counters),
        })
    }

    /// Change the limit. Growing takes effect at once; shrinking retires
    /// idle permits now and busy ones as their requests finish.
    pub fn resize(&self, max_in_flight: usize) {
        let new_limit = max_in_flight.max(1);
        let old_limit = self.limit.swap(new_limit, Ordering::AcqRel);
        if new_limit == old_limit {
            return;
        }

        if new_limit > old_limit {
            let mut grow = new_limit - old_limit;
            // cancel outstanding debt before adding permits
            while grow > 0 && self.counters.take_debt() {
                grow -= 1;
            }
            self.semaphore.add_permits(grow);
        } else {
            let mut shrink = old_limit - new_limit;
            while shrink > 0 {
                match self.semaphore.try_acquire() {
                    Ok(permit) => {
                        permit.forget();
                        shrink -= 1;
                    }
                    Err(_) => break,
                }
            }
            self.counters.debt.fetch_add(shrink, Ordering::AcqRel);
        }

        tracing::info!(from = old_limit, to = new_limit, "Concurrency limit changed");
    }

    /// Stop admitting; queued and future callers get an error
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ConcurrencyStats {
        ConcurrencyStats {
            limit: self.limit(),
            in_flight: self.counters.in_flight.load(Ordering::Acquire),
            waiting: self.counters.waiting.load(Ordering::Acquire),
            total_admitted: self.counters.total_admitted.load(Ordering::Relaxed),
            peak_in_flight: self.counters.peak.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_limit_bounds_in_flight() {
        let controller = ConcurrencyController::new(2);
        let a = controller.acquire().await.unwrap();
        let _b = controller.acquire().await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(20), controller.acquire()).await;
        assert!(blocked.is_err());

        let stats = controller.stats();
        assert_eq!(stats.in_flight, 2);
        assert_eq!(stats.waiting, 0);

        drop(a);
        assert!(controller.acquire().await.is_ok());
        assert_eq!(controller.stats().total_admitted, 3);
        assert_eq!(controller.stats().peak_in_flight, 2);
    }

    #[tokio::test]
    async fn test_waiters_admitted_in_order() {
        let controller = Arc::new(ConcurrencyController::new(1));
        let held = controller.acquire().await.unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut handles = Vec::new();
        for i in 0..3 {
            let waiter = Arc::clone(&controller);
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let _slot = waiter.acquire().await.unwrap();
                tx.send(i).unwrap();
            }));
            // let each waiter enqueue before the next
            while controller.stats().waiting < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }
        drop(tx);

        let mut order = Vec::new();
        while let Some(i) = rx.recv().await {
            order.push(i);
        }
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_resize_grow_and_shrink() {
        let controller = ConcurrencyController::new(1);
        let a = controller.acquire().await.unwrap();

        controller.resize(2);
        let b = controller.acquire().await.unwrap();
        assert_eq!(controller.stats().in_flight, 2);

        controller.resize(1);
        drop(a);
        // a's permit was retired, so b still holds the only slot
        let blocked = tokio::time::timeout(Duration::from_millis(20), controller.acquire()).await;
        assert!(blocked.is_err());

        drop(b);
        assert!(controller.acquire().await.is_ok());
        assert_eq!(controller.limit(), 1);
    }

    #[tokio::test]
    async fn test_close_rejects() {
        let controller = ConcurrencyController::new(1);
        controller.close();
        assert!(controller.is_closed());
        assert!(matches!(controller.acquire().await, Err(MeldError::AdmissionClosed)));
        assert_eq!(controller.stats().waiting, 0);
    }
}
