use thiserror::Error;

/// Errors that can occur within a `fanout_pool` pool or batch.
///
/// Most of these never reach the caller of `compose_all`: under the default
/// [`FailurePolicy::SuppressToAbsent`](crate::FailurePolicy) they are folded
/// into an absent slot. They remain observable through
/// [`TaskHandle::outcome`](crate::TaskHandle::outcome) and the stricter
/// failure policies.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
  #[error("Work item failed: {0}")]
  ItemFailed(String),

  #[error("Submitted work item panicked")]
  TaskPanicked,

  #[error("Task result channel error (result was never delivered): {0}")]
  ResultChannelError(String),

  #[error("Task result not yet available or already taken")]
  ResultUnavailable,

  #[error("Pool's internal semaphore was closed unexpectedly")]
  SemaphoreClosed,

  #[error("Pool is shutting down or already shut down, cannot accept new tasks")]
  PoolShuttingDown,

  #[error("Work item at index {index} failed: {source}")]
  BatchItemFailed { index: usize, source: Box<PoolError> },
}

impl PoolError {
  /// Returns `true` if the error was produced by the work item itself
  /// (an `Err` return or a panic) rather than by the pool.
  pub fn is_item_failure(&self) -> bool {
    match self {
      PoolError::ItemFailed(_) | PoolError::TaskPanicked => true,
      PoolError::BatchItemFailed { source, .. } => source.is_item_failure(),
      _ => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn batch_item_failure_message_names_index() {
    let err = PoolError::BatchItemFailed {
      index: 3,
      source: Box::new(PoolError::ItemFailed("boom".to_string())),
    };
    assert_eq!(err.to_string(), "Work item at index 3 failed: Work item failed: boom");
    assert!(err.is_item_failure());
  }

  #[test]
  fn pool_side_errors_are_not_item_failures() {
    assert!(!PoolError::PoolShuttingDown.is_item_failure());
    assert!(!PoolError::ResultChannelError("closed".into()).is_item_failure());
    assert!(PoolError::TaskPanicked.is_item_failure());
  }
}
