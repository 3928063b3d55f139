//! Timer plumbing shared by the exporter and the shipper.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Re-entrancy flag for a job that must never overlap with itself.
#[derive(Debug, Default)]
pub struct InFlight {
    busy: AtomicBool,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag, or `None` if another run holds it.
    pub fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard { flag: &self.busy })
    }
}

/// Releases the flag on drop, including on early return or panic.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Run `job` every `period` without waiting for the previous run to finish.
///
/// Each run is its own task, so a hung push never delays the next tick and a
/// panic is logged instead of ending the loop. Overlap is prevented by the
/// job's own [`InFlight`] flag, not here.
pub fn spawn_periodic<F, Fut>(task: &'static str, period: Duration, mut job: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            let run = tokio::spawn(job());
            tokio::spawn(async move {
                if let Err(e) = run.await {
                    if e.is_panic() {
                        tracing::error!(task, "periodic telemetry job panicked");
                    }
                }
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn in_flight_rejects_second_claim() {
        let flag = InFlight::new();
        let guard = flag.try_begin();
        assert!(guard.is_some());
        assert!(flag.try_begin().is_none());

        drop(guard);
        assert!(flag.try_begin().is_some());
    }

    #[test]
    fn in_flight_released_after_panic() {
        let flag = Arc::new(InFlight::new());
        let inner = Arc::clone(&flag);
        let result = std::thread::spawn(move || {
            let _guard = inner.try_begin().unwrap();
            panic!("push exploded");
        })
        .join();
        assert!(result.is_err());
        assert!(flag.try_begin().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_job_survives_panics() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let handle = spawn_periodic("test", Duration::from_millis(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    panic!("first run fails");
                }
            }
        });

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tokio::task::yield_now().await;
        }
        handle.abort();

        assert!(runs.load(Ordering::SeqCst) >= 3);
    }
}
