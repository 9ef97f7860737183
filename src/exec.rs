//! Background execution for the asynchronous cache rebuild.
//!
//! The filter never blocks a caller on the full cache rebuild; it hands the
//! job to an [`Executor`]. Production hosts dispatch onto the tokio blocking
//! pool; tests and runtime-less hosts run the job inline. Publication order
//! is enforced by the cache lock, so the executor needs no ordering
//! guarantees of its own.

/// A place to run one self-contained background job.
pub trait Executor: Send + Sync {
    /// Run `job`, now or later, on some thread.
    fn execute(&self, job: Box<dyn FnOnce() + Send>);
}

/// Dispatches jobs onto the tokio blocking pool.
///
/// The rebuild is lock-heavy compute with no await points, which is exactly
/// what `spawn_blocking` is for.
pub struct TokioExecutor {
    /// Handle of the runtime that hosts the jobs.
    handle: tokio::runtime::Handle,
}

impl TokioExecutor {
    /// Wrap an explicit runtime handle.
    #[must_use]
    pub const fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Wrap the current runtime.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime, as
    /// [`tokio::runtime::Handle::current`] does.
    #[must_use]
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        drop(self.handle.spawn_blocking(job));
    }
}

/// Runs jobs inline on the caller's thread.
///
/// Deterministic: by the time `execute` returns, the job has run. Used by
/// the test suite and by hosts without an async runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateExecutor;

impl Executor for ImmediateExecutor {
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        job();
    }
}
