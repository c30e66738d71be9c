use crate::error::PoolError;

use tokio::sync::oneshot::{self, error::TryRecvError};

/// Lifecycle state of a submitted work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
  Pending,
  Completed,
  Failed,
}

/// Terminal result of a work item.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<R> {
  Completed(R),
  Failed(PoolError),
}

impl<R> TaskOutcome<R> {
  pub fn state(&self) -> TaskState {
    match self {
      TaskOutcome::Completed(_) => TaskState::Completed,
      TaskOutcome::Failed(_) => TaskState::Failed,
    }
  }

  /// The value of a completed item; `None` for a failed one.
  pub fn into_value(self) -> Option<R> {
    match self {
      TaskOutcome::Completed(value) => Some(value),
      TaskOutcome::Failed(_) => None,
    }
  }

  pub(crate) fn from_result(result: Result<R, PoolError>) -> Self {
    match result {
      Ok(value) => TaskOutcome::Completed(value),
      Err(error) => TaskOutcome::Failed(error),
    }
  }
}

/// A handle to a work item submitted to a [`FanOutPool`](crate::FanOutPool).
///
/// The handle remembers the item's position in its submission batch and moves
/// from [`TaskState::Pending`] to a terminal state exactly once. After that the
/// outcome is cached, so reading it again always yields the same answer.
#[derive(Debug)]
pub struct TaskHandle<R: Send + 'static> {
  pub(crate) task_id: u64,
  pub(crate) index: usize,
  pub(crate) result_receiver: Option<oneshot::Receiver<Result<R, PoolError>>>,
  pub(crate) outcome: Option<TaskOutcome<R>>,
}

impl<R: Send + 'static> TaskHandle<R> {
  pub(crate) fn pending(task_id: u64, index: usize, result_receiver: oneshot::Receiver<Result<R, PoolError>>) -> Self {
    Self {
      task_id,
      index,
      result_receiver: Some(result_receiver),
      outcome: None,
    }
  }

  /// A handle that was resolved before its item ever reached the pool.
  pub(crate) fn failed(task_id: u64, index: usize, error: PoolError) -> Self {
    Self {
      task_id,
      index,
      result_receiver: None,
      outcome: Some(TaskOutcome::Failed(error)),
    }
  }

  /// Returns the unique ID of this task.
  pub fn id(&self) -> u64 {
    self.task_id
  }

  /// Position of the item in the batch it was submitted with.
  pub fn index(&self) -> usize {
    self.index
  }

  pub fn state(&self) -> TaskState {
    self.outcome.as_ref().map_or(TaskState::Pending, TaskOutcome::state)
  }

  pub fn is_terminal(&self) -> bool {
    self.outcome.is_some()
  }

  /// The cached outcome, or `None` while the item is still pending.
  ///
  /// Unlike the collected results, this distinguishes a failed item from one
  /// that completed with a value.
  pub fn outcome(&self) -> Option<&TaskOutcome<R>> {
    self.outcome.as_ref()
  }

  /// The value of a completed item.
  pub fn value(&self) -> Option<&R> {
    match &self.outcome {
      Some(TaskOutcome::Completed(value)) => Some(value),
      _ => None,
    }
  }

  /// Waits until the item is terminal and caches its outcome.
  ///
  /// A broken result channel is not surfaced: the handle is marked failed with
  /// `PoolError::ResultChannelError` instead.
  pub async fn wait(&mut self) {
    if self.outcome.is_some() {
      return;
    }
    let outcome = match self.result_receiver.take() {
      Some(rx) => match rx.await {
        Ok(task_result) => TaskOutcome::from_result(task_result),
        Err(recv_error) => {
          // The sender was dropped without a value, e.g. the pool worker died.
          tracing::warn!(task_id = %self.task_id, index = self.index, "Result channel receive error: {}", recv_error);
          TaskOutcome::Failed(PoolError::ResultChannelError(format!(
            "Task (id: {}) result channel unexpectedly closed: {}",
            self.task_id, recv_error
          )))
        }
      },
      None => TaskOutcome::Failed(PoolError::ResultUnavailable),
    };
    self.outcome = Some(outcome);
  }

  /// Picks up the outcome if it is already available, without waiting.
  /// Returns `true` if the handle is terminal afterwards.
  pub fn try_resolve(&mut self) -> bool {
    if self.outcome.is_some() {
      return true;
    }
    let Some(rx) = self.result_receiver.as_mut() else {
      self.outcome = Some(TaskOutcome::Failed(PoolError::ResultUnavailable));
      return true;
    };
    match rx.try_recv() {
      Ok(task_result) => {
        self.result_receiver = None;
        self.outcome = Some(TaskOutcome::from_result(task_result));
        true
      }
      Err(TryRecvError::Empty) => false,
      Err(TryRecvError::Closed) => {
        self.result_receiver = None;
        self.outcome = Some(TaskOutcome::Failed(PoolError::ResultChannelError(format!(
          "Task (id: {}) result channel closed before a result was sent",
          self.task_id
        ))));
        true
      }
    }
  }

  /// Awaits the completion of the task and returns its result of type `R`.
  ///
  /// # Errors
  /// Returns the failure recorded for the item: `PoolError::ItemFailed`,
  /// `PoolError::TaskPanicked`, `PoolError::PoolShuttingDown` or
  /// `PoolError::ResultChannelError`.
  pub async fn await_result(mut self) -> Result<R, PoolError> {
    self.wait().await;
    match self.outcome.take() {
      Some(TaskOutcome::Completed(value)) => Ok(value),
      Some(TaskOutcome::Failed(error)) => Err(error),
      None => Err(PoolError::ResultUnavailable),
    }
  }

  /// Consumes the handle, returning its outcome if it is terminal.
  pub fn into_outcome(self) -> Option<TaskOutcome<R>> {
    self.outcome
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn wait_caches_completed_outcome() {
    let (tx, rx) = oneshot::channel();
    let mut handle = TaskHandle::<u32>::pending(10, 2, rx);
    assert_eq!(handle.state(), TaskState::Pending);
    assert_eq!(handle.index(), 2);

    tx.send(Ok(5)).unwrap();
    handle.wait().await;
    handle.wait().await;

    assert_eq!(handle.state(), TaskState::Completed);
    assert_eq!(handle.value(), Some(&5));
  }

  #[tokio::test]
  async fn dropped_sender_marks_handle_failed() {
    let (tx, rx) = oneshot::channel::<Result<u32, PoolError>>();
    let mut handle = TaskHandle::pending(11, 0, rx);
    drop(tx);

    handle.wait().await;
    assert_eq!(handle.state(), TaskState::Failed);
    assert!(matches!(handle.outcome(), Some(TaskOutcome::Failed(PoolError::ResultChannelError(_)))));
  }

  #[test]
  fn try_resolve_leaves_pending_handle_untouched() {
    let (tx, rx) = oneshot::channel::<Result<u32, PoolError>>();
    let mut handle = TaskHandle::pending(12, 0, rx);

    assert!(!handle.try_resolve());
    assert_eq!(handle.state(), TaskState::Pending);

    tx.send(Err(PoolError::TaskPanicked)).unwrap();
    assert!(handle.try_resolve());
    assert_eq!(handle.outcome(), Some(&TaskOutcome::Failed(PoolError::TaskPanicked)));
  }

  #[tokio::test]
  async fn pre_failed_handle_reports_its_error() {
    let handle = TaskHandle::<u32>::failed(13, 4, PoolError::PoolShuttingDown);
    assert!(handle.is_terminal());
    assert_eq!(handle.await_result().await, Err(PoolError::PoolShuttingDown));
  }
}
