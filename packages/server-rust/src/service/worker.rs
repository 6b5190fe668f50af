//! Long-lived background tasks: an inbox of on-demand requests plus a fixed
//! tick. The server runs one of these, the directory sweeper.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info_span, warn, Instrument};

use crate::traits::ConnectionDirectory;

const INBOX_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// BackgroundRunnable
// ---------------------------------------------------------------------------

/// The work a [`BackgroundWorker`] drives.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    /// Label recorded on the worker's span.
    fn name(&self) -> &'static str;

    async fn run(&mut self, task: Self::Task);

    async fn on_tick(&mut self) {}

    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Owns the task driving a [`BackgroundRunnable`].
///
/// Stopping (or dropping) the worker closes its inbox. Tasks already queued
/// still run, then `shutdown` is called once.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    inbox: Option<mpsc::Sender<R::Task>>,
    driver: Option<JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the driver; the first tick fires one `every` after start.
    pub fn start(runnable: R, every: Duration) -> Self {
        let (inbox, rx) = mpsc::channel(INBOX_CAPACITY);
        let span = info_span!("worker", name = runnable.name());
        let driver = tokio::spawn(drive(runnable, rx, every).instrument(span));
        Self {
            inbox: Some(inbox),
            driver: Some(driver),
        }
    }

    /// Queues `task`, waiting if the inbox is full.
    ///
    /// # Errors
    ///
    /// Fails once the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        let Some(inbox) = &self.inbox else {
            anyhow::bail!("worker stopped");
        };
        inbox
            .send(task)
            .await
            .map_err(|_| anyhow::anyhow!("worker exited"))
    }

    /// Closes the inbox and waits for queued tasks and `shutdown` to finish.
    pub async fn stop(&mut self) {
        self.inbox.take();
        if let Some(driver) = self.driver.take() {
            if let Err(err) = driver.await {
                warn!(error = %err, "background worker panicked");
            }
        }
    }
}

async fn drive<R: BackgroundRunnable>(
    mut runnable: R,
    mut inbox: mpsc::Receiver<R::Task>,
    every: Duration,
) {
    let every = every.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            next = inbox.recv() => match next {
                Some(task) => runnable.run(task).await,
                None => break,
            },
            _ = ticker.tick() => runnable.on_tick().await,
        }
    }

    runnable.shutdown().await;
    debug!("worker stopped");
}

// ---------------------------------------------------------------------------
// DirectorySweeper
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum SweepTask {
    /// Purge now instead of waiting for the next tick.
    PurgeNow,
}

/// Physically removes expired subscription records on every tick.
///
/// Reads already ignore expired records; the sweep only reclaims space.
pub struct DirectorySweeper {
    directory: Arc<dyn ConnectionDirectory>,
}

impl DirectorySweeper {
    #[must_use]
    pub fn new(directory: Arc<dyn ConnectionDirectory>) -> Self {
        Self { directory }
    }

    async fn sweep(&self) {
        match self.directory.purge_expired().await {
            Ok(0) => {}
            Ok(removed) => {
                metrics::counter!("topicast_directory_purged_total").increment(removed as u64);
                debug!(removed, "purged expired subscriptions");
            }
            Err(err) => warn!(error = %err, "expired subscription sweep failed"),
        }
    }
}

#[async_trait]
impl BackgroundRunnable for DirectorySweeper {
    type Task = SweepTask;

    fn name(&self) -> &'static str {
        "directory_sweeper"
    }

    async fn run(&mut self, task: SweepTask) {
        match task {
            SweepTask::PurgeNow => self.sweep().await,
        }
    }

    async fn on_tick(&mut self) {
        self.sweep().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use topicast_core::ConnectionId;

    use super::*;
    use crate::directory::MemoryDirectory;

    #[derive(Default)]
    struct Counts {
        runs: AtomicUsize,
        ticks: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    struct Counting(Arc<Counts>);

    #[async_trait]
    impl BackgroundRunnable for Counting {
        type Task = u32;

        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&mut self, _task: u32) {
            self.0.runs.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_tick(&mut self) {
            self.0.ticks.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.0.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Directory whose clock the test moves by hand, holding one record
    /// that expires at t = 1010 ms.
    async fn expiring_directory() -> (Arc<AtomicU64>, Arc<MemoryDirectory>) {
        let now = Arc::new(AtomicU64::new(1_000));
        let clock = Arc::clone(&now);
        let directory = Arc::new(MemoryDirectory::with_clock(Arc::new(move || {
            clock.load(Ordering::SeqCst)
        })));
        directory
            .put("room1", &ConnectionId::new("a"), Duration::from_millis(10))
            .await
            .unwrap();
        (now, directory)
    }

    #[tokio::test]
    async fn queued_tasks_finish_before_stop_returns() {
        let counts = Arc::new(Counts::default());
        let mut worker = BackgroundWorker::start(Counting(counts.clone()), Duration::from_secs(60));

        for task in 0..3 {
            worker.submit(task).await.unwrap();
        }
        worker.stop().await;

        assert_eq!(counts.runs.load(Ordering::SeqCst), 3);
        assert_eq!(counts.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_follow_the_interval() {
        let counts = Arc::new(Counts::default());
        let mut worker = BackgroundWorker::start(Counting(counts.clone()), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        worker.stop().await;

        assert_eq!(counts.ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn submit_after_stop_fails() {
        let mut worker =
            BackgroundWorker::start(Counting(Arc::default()), Duration::from_secs(60));
        worker.stop().await;

        assert!(worker.submit(1).await.is_err());
    }

    #[tokio::test]
    async fn sweeper_purges_on_request() {
        let (now, directory) = expiring_directory().await;
        now.store(2_000, Ordering::SeqCst);

        let mut worker =
            BackgroundWorker::start(DirectorySweeper::new(directory.clone()), Duration::from_secs(60));
        worker.submit(SweepTask::PurgeNow).await.unwrap();
        worker.stop().await;

        assert_eq!(directory.record_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_on_tick_and_keeps_live_records() {
        let (now, directory) = expiring_directory().await;
        directory
            .put("room2", &ConnectionId::new("b"), Duration::from_secs(3_600))
            .await
            .unwrap();
        now.store(2_000, Ordering::SeqCst);

        let mut worker =
            BackgroundWorker::start(DirectorySweeper::new(directory.clone()), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        worker.stop().await;

        assert_eq!(directory.record_count(), 1);
        assert!(directory.find_topics(&ConnectionId::new("a")).await.unwrap().is_empty());
        assert_eq!(directory.find_topics(&ConnectionId::new("b")).await.unwrap().len(), 1);
    }
}
