//! Counting semaphore whose capacity can change while permits are held
//!
//! Growing adds permits immediately, waking queued acquirers. Shrinking takes
//! idle permits out of circulation; whatever cannot be taken right away is
//! recorded as debt and paid off by permits as they are returned, so in-flight
//! work is never preempted.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::debug;

#[derive(Debug, Default)]
struct Capacity {
    target: usize,
    /// Permits still held by workers that must be retired when released
    debt: usize,
}

#[derive(Debug)]
struct Inner {
    semaphore: Arc<Semaphore>,
    capacity: Mutex<Capacity>,
}

impl Inner {
    fn capacity(&self) -> MutexGuard<'_, Capacity> {
        self.capacity.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone)]
pub struct ResizableSemaphore {
    inner: Arc<Inner>,
}

/// A held concurrency slot; released on drop
#[derive(Debug)]
pub struct ConcurrencyPermit {
    permit: Option<OwnedSemaphorePermit>,
    inner: Arc<Inner>,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        // Return or retire the permit while the lock is held
        let mut capacity = self.inner.capacity();
        if capacity.debt > 0 {
            capacity.debt -= 1;
            permit.forget();
        } else {
            drop(permit);
        }
        drop(capacity);
    }
}

impl ResizableSemaphore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity: Mutex::new(Capacity {
                    target: capacity,
                    debt: 0,
                }),
            }),
        }
    }

    /// Wait for a permit; fails only after `close`
    pub async fn acquire(&self) -> Result<ConcurrencyPermit, AcquireError> {
        let permit = self.inner.semaphore.clone().acquire_owned().await?;
        Ok(self.wrap(permit))
    }

    pub fn try_acquire(&self) -> Result<ConcurrencyPermit, TryAcquireError> {
        let permit = self.inner.semaphore.clone().try_acquire_owned()?;
        Ok(self.wrap(permit))
    }

    fn wrap(&self, permit: OwnedSemaphorePermit) -> ConcurrencyPermit {
        ConcurrencyPermit {
            permit: Some(permit),
            inner: self.inner.clone(),
        }
    }

    /// Change the capacity in place and return the previous value
    pub fn set_capacity(&self, new_capacity: usize) -> usize {
        let mut capacity = self.inner.capacity();
        let previous = capacity.target;

        if new_capacity > previous {
            let grow = new_capacity - previous;
            let forgiven = grow.min(capacity.debt);
            capacity.debt -= forgiven;
            self.inner.semaphore.add_permits(grow - forgiven);
        } else if new_capacity < previous {
            let mut shrink = previous - new_capacity;
            while shrink > 0 {
                match self.inner.semaphore.try_acquire() {
                    Ok(permit) => {
                        permit.forget();
                        shrink -= 1;
                    }
                    Err(_) => break,
                }
            }
            capacity.debt += shrink;
        }

        capacity.target = new_capacity;
        debug!(
            "Concurrency capacity {} -> {} (outstanding debt {})",
            previous, new_capacity, capacity.debt
        );
        previous
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().target
    }

    pub fn available_permits(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Permits currently held
    pub fn in_use(&self) -> usize {
        let capacity = self.inner.capacity();
        (capacity.target + capacity.debt).saturating_sub(self.inner.semaphore.available_permits())
    }

    /// Wake all waiters with an error and refuse further acquisitions
    pub fn close(&self) {
        self.inner.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_basic_acquire_release() {
        let sem = ResizableSemaphore::new(2);
        let a = sem.try_acquire().unwrap();
        let _b = sem.try_acquire().unwrap();
        assert!(sem.try_acquire().is_err());
        assert_eq!(sem.in_use(), 2);

        drop(a);
        assert_eq!(sem.available_permits(), 1);
        assert_eq!(sem.in_use(), 1);
    }

    #[tokio::test]
    async fn test_grow_wakes_waiter() {
        let sem = ResizableSemaphore::new(1);
        let _held = sem.acquire().await.unwrap();

        let waiter = {
            let sem = sem.clone();
            tokio::spawn(async move { sem.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        assert_eq!(sem.set_capacity(2), 1);
        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[test]
    fn test_shrink_idle_permits_immediately() {
        let sem = ResizableSemaphore::new(5);
        sem.set_capacity(2);
        assert_eq!(sem.capacity(), 2);
        assert_eq!(sem.available_permits(), 2);
        assert_eq!(sem.in_use(), 0);
    }

    #[test]
    fn test_shrink_below_in_use_retires_permits_on_release() {
        let sem = ResizableSemaphore::new(3);
        let a = sem.try_acquire().unwrap();
        let b = sem.try_acquire().unwrap();
        let c = sem.try_acquire().unwrap();

        sem.set_capacity(1);
        assert_eq!(sem.available_permits(), 0);
        assert_eq!(sem.in_use(), 3);

        drop(a);
        drop(b);
        // both releases paid down debt
        assert_eq!(sem.available_permits(), 0);
        assert!(sem.try_acquire().is_err());

        drop(c);
        assert_eq!(sem.available_permits(), 1);
        assert_eq!(sem.in_use(), 0);
    }

    #[test]
    fn test_grow_after_shrink_forgives_debt_first() {
        let sem = ResizableSemaphore::new(4);
        let held: Vec<_> = (0..4).map(|_| sem.try_acquire().unwrap()).collect();

        sem.set_capacity(1); // debt 3
        sem.set_capacity(3); // forgive 2, debt 1
        assert_eq!(sem.available_permits(), 0);

        drop(held);
        assert_eq!(sem.available_permits(), 3);
        assert_eq!(sem.capacity(), 3);
    }

    #[test]
    fn test_concurrent_resize_and_release_settles_at_capacity() {
        let sem = ResizableSemaphore::new(4);
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let sem = sem.clone();
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        if let Ok(permit) = sem.try_acquire() {
                            std::thread::yield_now();
                            drop(permit);
                        }
                    }
                })
            })
            .collect();

        for round in 0..2_000 {
            sem.set_capacity(if round % 2 == 0 { 1 } else { 4 });
            assert!(sem.available_permits() <= sem.capacity());
        }
        for worker in workers {
            worker.join().unwrap();
        }

        sem.set_capacity(3);
        assert_eq!(sem.in_use(), 0);
        assert_eq!(sem.available_permits(), 3);
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let sem = ResizableSemaphore::new(0);
        let waiter = {
            let sem = sem.clone();
            tokio::spawn(async move { sem.acquire().await.is_err() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        sem.close();
        assert!(waiter.await.unwrap());
    }
}
