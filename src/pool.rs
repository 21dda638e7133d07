//! Bounded-concurrency task pool.
//!
//! Runs one async task per item with at most `concurrency` tasks in flight.
//! Workers claim the next unclaimed index in increasing order as soon as a
//! slot frees up, so no slot idles while work remains. All tasks are polled
//! cooperatively from the caller's task; nothing is spawned onto other
//! threads.
//!
//! The first task error is returned to the caller and no further items are
//! started. Tasks still in flight at that point are dropped with the pool;
//! tasks that must stop early are expected to watch their own cancellation
//! token.

use futures::stream::{self, StreamExt};
use std::future::Future;

/// Completion progress of a pooled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    /// Rounded completion percentage (0 when `total` is 0).
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed as f64 / self.total as f64) * 100.0).round() as u32
    }
}

type ProgressHook<'a> = Box<dyn FnMut(Progress) + Send + 'a>;
type ResultHook<'a, U> = Box<dyn FnMut(&U) + Send + 'a>;

/// Optional callbacks fired once per successfully completed task, in
/// completion order.
pub struct PoolHooks<'a, U> {
    on_progress: Option<ProgressHook<'a>>,
    on_result: Option<ResultHook<'a, U>>,
}

impl<'a, U> PoolHooks<'a, U> {
    pub fn new() -> Self {
        Self {
            on_progress: None,
            on_result: None,
        }
    }

    pub fn on_progress(mut self, f: impl FnMut(Progress) + Send + 'a) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Called with each result as soon as it is available, before the
    /// matching progress callback.
    pub fn on_result(mut self, f: impl FnMut(&U) + Send + 'a) -> Self {
        self.on_result = Some(Box::new(f));
        self
    }
}

impl<U> Default for PoolHooks<'_, U> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `task(item, index)` for every item with at most `concurrency` tasks
/// in flight.
///
/// The returned vector is index-aligned with `items`. A `concurrency` of 0
/// is treated as 1; values above `items.len()` simply leave the extra
/// workers without work.
pub async fn run_pool<'a, T, U, E, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    task: F,
    mut hooks: PoolHooks<'a, U>,
) -> Result<Vec<U>, E>
where
    F: Fn(T, usize) -> Fut,
    Fut: Future<Output = Result<U, E>>,
{
    let total = items.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let mut slots: Vec<Option<U>> = (0..total).map(|_| None).collect();
    let mut in_flight = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| {
            let fut = task(item, index);
            async move { fut.await.map(|value| (index, value)) }
        })
        .buffer_unordered(concurrency.max(1));

    let mut completed = 0;
    while let Some(outcome) = in_flight.next().await {
        let (index, value) = outcome?;
        if let Some(hook) = hooks.on_result.as_mut() {
            hook(&value);
        }
        slots[index] = Some(value);
        completed += 1;
        if let Some(hook) = hooks.on_progress.as_mut() {
            hook(Progress { completed, total });
        }
    }

    // Every index is yielded exactly once by the stream.
    Ok(slots.into_iter().flatten().collect())
}
