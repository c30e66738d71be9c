use crate::error::PoolError;

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use futures::FutureExt;
use tokio::sync::oneshot;

/// The type of future a work item is normalised into before it is queued.
pub(crate) type TaskToExecute<R> = Pin<Box<dyn Future<Output = Result<R, PoolError>> + Send + 'static>>;

/// Hands a finished task's result to its handle. Returns `false` if the
/// handle was dropped in the meantime.
pub(crate) type PublishResult = Box<dyn FnOnce() -> bool + Send + 'static>;

/// An opaque, zero-argument unit of work producing an `R` or failing.
///
/// The pool never looks inside a work item. A failure (an `Err` return or a
/// panic) is caught at the execution boundary and recorded on the item's
/// [`TaskHandle`](crate::TaskHandle); it never escapes the pool.
pub struct WorkItem<R: Send + 'static> {
  pub(crate) future: TaskToExecute<R>,
}

impl<R: Send + 'static> WorkItem<R> {
  /// Wraps a fallible async operation. An `Err(e)` becomes
  /// `PoolError::ItemFailed(e.to_string())`.
  pub fn new<F, E>(future: F) -> Self
  where
    F: Future<Output = Result<R, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
  {
    Self {
      future: Box::pin(async move { future.await.map_err(|e| PoolError::ItemFailed(e.to_string())) }),
    }
  }

  /// Wraps an async operation that cannot report an error (it may still panic).
  pub fn infallible<F>(future: F) -> Self
  where
    F: Future<Output = R> + Send + 'static,
  {
    Self {
      future: Box::pin(async move { Ok(future.await) }),
    }
  }

  /// Wraps a synchronous operation. It runs on Tokio's blocking thread pool
  /// while still occupying one of the pool's slots.
  pub fn blocking<F, E>(operation: F) -> Self
  where
    F: FnOnce() -> Result<R, E> + Send + 'static,
    E: fmt::Display + Send + 'static,
  {
    Self {
      future: Box::pin(async move {
        match tokio::task::spawn_blocking(operation).await {
          Ok(result) => result.map_err(|e| PoolError::ItemFailed(e.to_string())),
          Err(join_error) if join_error.is_panic() => Err(PoolError::TaskPanicked),
          Err(join_error) => Err(PoolError::ResultChannelError(join_error.to_string())),
        }
      }),
    }
  }
}

impl<R: Send + 'static> fmt::Debug for WorkItem<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkItem").finish_non_exhaustive()
  }
}

/// How a task's execution ended, for logging by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskExitStatus {
  Completed,
  Failed,
  Panicked,
}

/// A task that has run. Its result is held back until `publish` is called.
pub(crate) struct FinishedTask {
  pub(crate) status: TaskExitStatus,
  pub(crate) publish: PublishResult,
}

/// A work item with its result type erased, so a single pool can queue
/// items of every result type.
pub(crate) trait ErasedTask: Send + 'static {
  /// Runs the work item, catching panics. The result is not yet delivered.
  fn execute(self: Box<Self>) -> Pin<Box<dyn Future<Output = FinishedTask> + Send + 'static>>;

  /// Resolves the task without running it, e.g. when it is discarded at shutdown.
  fn fail(self: Box<Self>, error: PoolError);
}

struct TypedTask<R: Send + 'static> {
  future: TaskToExecute<R>,
  result_sender: oneshot::Sender<Result<R, PoolError>>,
}

impl<R: Send + 'static> ErasedTask for TypedTask<R> {
  fn execute(self: Box<Self>) -> Pin<Box<dyn Future<Output = FinishedTask> + Send + 'static>> {
    let TypedTask { future, result_sender } = *self;
    Box::pin(async move {
      let (status, outcome) = match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(value)) => (TaskExitStatus::Completed, Ok(value)),
        Ok(Err(error)) => (TaskExitStatus::Failed, Err(error)),
        Err(_panic_payload) => (TaskExitStatus::Panicked, Err(PoolError::TaskPanicked)),
      };
      FinishedTask {
        status,
        publish: Box::new(move || result_sender.send(outcome).is_ok()),
      }
    })
  }

  fn fail(self: Box<Self>, error: PoolError) {
    let _ = self.result_sender.send(Err(error));
  }
}

/// Internal representation of a work item once it has been handed to the pool.
pub(crate) struct ManagedTaskInternal {
  pub(crate) task_id: u64,
  pub(crate) index: usize,
  pub(crate) task: Box<dyn ErasedTask>,
}

impl ManagedTaskInternal {
  /// Pairs `item` with the sending half of its handle's result channel.
  pub(crate) fn new<R: Send + 'static>(
    task_id: u64,
    index: usize,
    item: WorkItem<R>,
    result_sender: oneshot::Sender<Result<R, PoolError>>,
  ) -> Self {
    Self {
      task_id,
      index,
      task: Box::new(TypedTask {
        future: item.future,
        result_sender,
      }),
    }
  }

  pub(crate) fn fail(self, error: PoolError) {
    self.task.fail(error);
  }
}

impl fmt::Debug for ManagedTaskInternal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ManagedTaskInternal")
      .field("task_id", &self.task_id)
      .field("index", &self.index)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn fallible_item_maps_error_to_item_failure() {
    let item = WorkItem::<u32>::new(async { Err::<u32, _>("no route to host") });
    assert_eq!(item.future.await, Err(PoolError::ItemFailed("no route to host".to_string())));
  }

  #[tokio::test]
  async fn infallible_item_yields_value() {
    let item = WorkItem::infallible(async { 7u32 });
    assert_eq!(item.future.await, Ok(7));
  }

  #[tokio::test]
  async fn blocking_item_panic_is_reported() {
    let item = WorkItem::<u32>::blocking(|| -> Result<u32, String> { panic!("blocking item exploded") });
    assert_eq!(item.future.await, Err(PoolError::TaskPanicked));
  }

  #[tokio::test]
  async fn result_is_held_back_until_published() {
    let (tx, mut rx) = oneshot::channel();
    let task = ManagedTaskInternal::new(1, 0, WorkItem::infallible(async { "typed".to_string() }), tx);

    let finished = task.task.execute().await;
    assert_eq!(finished.status, TaskExitStatus::Completed);
    assert!(rx.try_recv().is_err());

    assert!((finished.publish)());
    assert_eq!(rx.await, Ok(Ok("typed".to_string())));
  }

  #[tokio::test]
  async fn panicking_item_finishes_as_panicked() {
    let (tx, rx) = oneshot::channel::<Result<u8, PoolError>>();
    fn explode() -> u8 {
      panic!("item exploded")
    }
    let task = ManagedTaskInternal::new(2, 0, WorkItem::infallible(async { explode() }), tx);

    let finished = task.task.execute().await;
    assert_eq!(finished.status, TaskExitStatus::Panicked);
    assert!((finished.publish)());
    assert_eq!(rx.await, Ok(Err(PoolError::TaskPanicked)));
  }

  #[tokio::test]
  async fn discarded_task_reports_error_to_receiver() {
    let (tx, rx) = oneshot::channel();
    let task = ManagedTaskInternal::new(3, 0, WorkItem::infallible(async { 1u32 }), tx);
    task.fail(PoolError::PoolShuttingDown);
    assert_eq!(rx.await, Ok(Err(PoolError::PoolShuttingDown)));
  }
}
