//! Bounded worker pool for backend growth calls

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot;

use crate::models::BackendNode;
use crate::{Error, Result};

/// Completion of one growth call.
///
/// Resolves to the nodes merged into the pool. Dropping the handle does not
/// cancel the growth.
#[must_use = "dropping a GrowthHandle detaches the growth; call wait() to observe failures"]
pub struct GrowthHandle {
    rx: oneshot::Receiver<Result<Vec<BackendNode>>>,
}

/// Completing side of a [`GrowthHandle`]; dropping it resolves the handle to `Closed`
pub(crate) type GrowthSender = oneshot::Sender<Result<Vec<BackendNode>>>;

impl GrowthHandle {
    pub(crate) fn channel() -> (GrowthSender, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    pub(crate) fn ready(result: Result<Vec<BackendNode>>) -> Self {
        let (tx, handle) = Self::channel();
        let _ = tx.send(result);
        handle
    }

    /// Block the current thread until the growth completes.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async execution context; `.await`
    /// the handle there instead.
    pub fn wait(self) -> Result<Vec<BackendNode>> {
        self.rx.blocking_recv().unwrap_or(Err(Error::Closed))
    }
}

impl Future for GrowthHandle {
    type Output = Result<Vec<BackendNode>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::Closed)))
    }
}

/// Dedicated runtime whose blocking pool runs growth tasks
pub(crate) struct GrowthWorkers {
    runtime: Mutex<Option<Runtime>>,
}

impl GrowthWorkers {
    pub fn new(name: &str, max_workers: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(max_workers.max(1))
            .thread_name(format!("{}-growth", name))
            .build()?;
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
        })
    }

    pub fn submit<F>(&self, task: F) -> GrowthHandle
    where
        F: FnOnce() -> Result<Vec<BackendNode>> + Send + 'static,
    {
        let (tx, handle) = GrowthHandle::channel();
        match self.runtime.lock().as_ref() {
            Some(runtime) => {
                runtime.spawn_blocking(move || {
                    let _ = tx.send(task());
                });
            }
            None => {
                let _ = tx.send(Err(Error::Closed));
            }
        }
        handle
    }

    /// Stop accepting work; tasks already running finish on their own threads
    pub fn shutdown(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
    }
}

impl Drop for GrowthWorkers {
    fn drop(&mut self) {
        self.shutdown();
    }
}
