use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{Instrument, error, info, info_span, warn};

/// Broadcast side of the shutdown signal.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is triggered, or when the sender is gone.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Tracks spawned long-running tasks so shutdown can join them with a deadline.
#[derive(Default)]
pub struct TaskTracker {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, name: &'static str, future: F) -> &mut Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future.instrument(info_span!("task", task = name)));
        info!(task = name, "spawned background task");
        self.tasks.push((name, handle));
        self
    }

    /// Waits for every task until `grace` elapses. Tasks still running at the
    /// deadline are aborted; their names are returned.
    pub async fn join_all(self, grace: Duration) -> Vec<&'static str> {
        let deadline = Instant::now() + grace;
        let mut unfinished = Vec::new();

        info!(tasks = self.tasks.len(), grace_ms = grace.as_millis() as u64, "draining tasks");

        for (name, mut handle) in self.tasks {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => info!(task = name, "task finished"),
                Ok(Err(e)) => error!(task = name, error = %e, "task terminated abnormally"),
                Err(_) => {
                    handle.abort();
                    warn!(task = name, "task did not finish within grace period; aborted");
                    unfinished.push(name);
                }
            }
        }

        unfinished
    }
}
