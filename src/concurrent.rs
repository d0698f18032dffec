use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs independent jobs on a semaphore-bounded pool.
///
/// Every job is awaited. A job that panics is counted as an error and yields
/// `None`; its siblings keep running.
pub struct ConcurrentRunner {
    semaphore: Arc<Semaphore>,
    completed: Arc<AtomicUsize>,
    errors: Arc<AtomicUsize>,
}

impl ConcurrentRunner {
    pub fn new(concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            completed: Arc::new(AtomicUsize::new(0)),
            errors: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Results come back in completion order, one entry per job.
    pub async fn execute<T, F, Fut>(&self, jobs: Vec<T>, job_fn: F) -> Vec<Option<Fut::Output>>
    where
        F: Fn(T) -> Fut + Clone + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
        T: Send + 'static,
    {
        let mut running = FuturesUnordered::new();

        for job in jobs {
            let semaphore = self.semaphore.clone();
            let job_fn = job_fn.clone();
            let completed = self.completed.clone();

            running.push(tokio::spawn(async move {
                // only fails once the semaphore is closed
                let _permit = semaphore.acquire_owned().await.ok()?;
                let output = job_fn(job).await;
                completed.fetch_add(1, Ordering::Relaxed);
                Some(output)
            }));
        }

        let mut results = Vec::with_capacity(running.len());
        while let Some(joined) = running.next().await {
            match joined {
                Ok(output) => results.push(output),
                Err(e) => {
                    tracing::error!(error = %e, "pool job aborted");
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    results.push(None);
                }
            }
        }
        results
    }

    /// `(completed, errors)` across every `execute` call so far.
    pub fn get_stats(&self) -> (usize, usize) {
        (self.completed.load(Ordering::Relaxed), self.errors.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_the_bound() {
        let runner = ConcurrentRunner::new(3);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (active.clone(), peak.clone());
        let results = runner
            .execute((0..20).collect(), move |i: usize| {
                let (a, p) = (a.clone(), p.clone());
                async move {
                    let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    a.fetch_sub(1, Ordering::SeqCst);
                    i
                }
            })
            .await;
        assert_eq!(results.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(runner.get_stats(), (20, 0));
    }

    #[tokio::test]
    async fn panicking_job_is_counted_not_propagated() {
        let runner = ConcurrentRunner::new(2);
        let results = runner
            .execute(vec![1u32, 2, 3], |i| async move {
                if i == 2 {
                    panic!("job {i} blew up");
                }
                i * 10
            })
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|r| r.is_none()).count(), 1);
        assert_eq!(runner.get_stats(), (2, 1));
    }
}
