//! Task scheduling for the core.
//!
//! Components do not spawn onto the tokio runtime directly. They receive an
//! [`AsyncRunner`] at construction and schedule through it, which keeps every
//! task cancellable and makes tests independent of the global runtime.
//!
//! Cancellation is cooperative in the sense tokio defines: an aborted task
//! stops at its next suspension point. CPU-bound work is expected to run to
//! completion before yielding.

use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use thiserror::Error;
use tokio::{
    runtime::Handle,
    task::{JoinError, JoinHandle},
};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task was cancelled")]
    Cancelled,
    #[error("task panicked")]
    Panicked(#[source] anyhow::Error),
}

/// A handle to a scheduled task. Await it for the result; drop it to detach.
#[derive(Debug)]
pub struct Task<T> {
    join_handle: JoinHandle<T>,
}

impl<T> Task<T> {
    /// Requests cancellation. The task completes with [`TaskError::Cancelled`]
    /// once it reaches a suspension point.
    pub fn cancel(&self) {
        self.join_handle.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        Pin::new(&mut self.join_handle)
            .poll(cx)
            .map_err(into_task_error)
    }
}

#[derive(Clone)]
pub struct AsyncRunner {
    handle: Handle,
}

impl AsyncRunner {
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// The runner for the runtime the caller is currently on.
    ///
    /// Panics outside a tokio runtime, like [`Handle::current`].
    #[must_use]
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub fn schedule<F>(&self, future: F) -> Task<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        Task {
            join_handle: self.handle.spawn(future),
        }
    }

    pub fn schedule_after<F>(&self, delay: Duration, future: F) -> Task<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.schedule(async move {
            tokio::time::sleep(delay).await;
            future.await
        })
    }

    /// Runs `make_future` every `period`, starting one period from now.
    ///
    /// Iterations do not overlap. A slow iteration delays subsequent ones.
    pub fn schedule_periodic<M, F>(&self, period: Duration, mut make_future: M) -> Task<()>
    where
        M: FnMut() -> F + Send + 'static,
        F: Future<Output = ()> + Send,
    {
        self.schedule(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            // The first tick of `tokio::time::interval` completes immediately.
            interval.tick().await;

            loop {
                interval.tick().await;
                make_future().await;
            }
        })
    }

    pub fn schedule_blocking<F, T>(&self, function: F) -> Task<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: self.handle.spawn_blocking(function),
        }
    }
}

fn into_task_error(error: JoinError) -> TaskError {
    if error.is_cancelled() {
        return TaskError::Cancelled;
    }

    TaskError::Panicked(panics::payload_into_error(error.into_panic()))
}
