use std::time::Duration;
use tokio::{
    task::{
        JoinHandle,
        JoinSet,
    },
    time::{
        self,
        MissedTickBehavior,
    },
};
use tracing::{
    debug,
    warn,
};

/// Runs a job on a fixed period without waiting for the previous run to
/// finish. Dropping the handle stops the timer and aborts every run still in
/// flight.
pub struct RepeatingTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl RepeatingTask {
    /// The first run fires immediately.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut in_flight = JoinSet::new();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        in_flight.spawn(job());
                    }
                    Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                        if let Err(err) = joined
                            && err.is_panic()
                        {
                            warn!(task = name, ?err, "repeating job panicked");
                        }
                    }
                }
            }
        });
        debug!(task = name, ?period, "repeating task started");
        Self { name, handle }
    }

    pub fn cancel(self) {
        drop(self)
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.handle.abort();
        debug!(task = self.name, "repeating task cancelled");
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use std::sync::{
        Arc,
        atomic::{
            AtomicUsize,
            Ordering,
        },
    };

    fn counting_job(counter: &Arc<AtomicUsize>) -> impl FnMut() -> std::future::Ready<()> + Send + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spawn__period_elapses__runs_once_per_tick() {
        // given
        let runs = Arc::new(AtomicUsize::new(0));

        // when
        let task = RepeatingTask::spawn("count", Duration::from_secs(1), counting_job(&runs));
        time::sleep(Duration::from_millis(3_500)).await;

        // then
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        task.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn spawn__slow_job__next_run_does_not_wait() {
        // given
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let (s, f) = (started.clone(), finished.clone());

        // when
        let _task = RepeatingTask::spawn("slow", Duration::from_secs(1), move || {
            let (s, f) = (s.clone(), f.clone());
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                time::sleep(Duration::from_secs(10)).await;
                f.fetch_add(1, Ordering::SeqCst);
            }
        });
        time::sleep(Duration::from_millis(2_500)).await;

        // then
        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel__in_flight_run__is_aborted() {
        // given
        let finished = Arc::new(AtomicUsize::new(0));
        let f = finished.clone();
        let task = RepeatingTask::spawn("abort", Duration::from_secs(60), move || {
            let f = f.clone();
            async move {
                time::sleep(Duration::from_secs(1)).await;
                f.fetch_add(1, Ordering::SeqCst);
            }
        });
        time::sleep(Duration::from_millis(500)).await;

        // when
        task.cancel();
        time::sleep(Duration::from_secs(5)).await;

        // then
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}
