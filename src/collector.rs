use crate::batch::FanOutBatch;
use crate::error::PoolError;
use crate::handle::{TaskHandle, TaskOutcome};

use tracing::{debug, warn};

/// How failed slots are reported when a batch is turned into results.
///
/// `SuppressToAbsent` is the historical behaviour and the default: every
/// failure becomes an absent slot and nothing is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
  #[default]
  SuppressToAbsent,
  /// The first failed slot, in index order, aborts collection.
  PropagateFirstError,
  /// Failed slots are absent in `values` and listed in `failures`.
  CollectErrorsSeparately,
}

/// Ordered results of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutResults<R> {
  /// One slot per submitted item, in submission order.
  pub values: Vec<Option<R>>,
  /// `(index, error)` of each failed slot, in index order. Only populated
  /// under [`FailurePolicy::CollectErrorsSeparately`].
  pub failures: Vec<(usize, PoolError)>,
}

impl<R> FanOutResults<R> {
  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }
}

/// Terminal outcome of a handle, without waiting. A handle that is still
/// pending cannot be read and counts as a failed retrieval.
fn settle<R: Send + 'static>(handle: &mut TaskHandle<R>) -> Result<(), PoolError> {
  if handle.try_resolve() {
    Ok(())
  } else {
    warn!(task_id = %handle.id(), index = handle.index(), "Collect: task is not terminal, treating slot as absent.");
    Err(PoolError::ResultUnavailable)
  }
}

fn apply_policy<R>(
  policy: FailurePolicy,
  slots: impl Iterator<Item = (usize, Result<R, PoolError>)>,
) -> Result<FanOutResults<R>, PoolError> {
  let mut results = FanOutResults {
    values: Vec::with_capacity(slots.size_hint().0),
    failures: Vec::new(),
  };
  for (index, slot) in slots {
    match slot {
      Ok(value) => results.values.push(Some(value)),
      Err(error) => {
        debug!(index, %error, ?policy, "Collect: slot failed.");
        match policy {
          FailurePolicy::SuppressToAbsent => {}
          FailurePolicy::PropagateFirstError => {
            return Err(PoolError::BatchItemFailed {
              index,
              source: Box::new(error),
            })
          }
          FailurePolicy::CollectErrorsSeparately => results.failures.push((index, error)),
        }
        results.values.push(None);
      }
    }
  }
  Ok(results)
}

fn outcome_to_result<R>(outcome: Option<TaskOutcome<R>>) -> Result<R, PoolError> {
  match outcome {
    Some(TaskOutcome::Completed(value)) => Ok(value),
    Some(TaskOutcome::Failed(error)) => Err(error),
    None => Err(PoolError::ResultUnavailable),
  }
}

impl<R: Send + 'static> FanOutBatch<R> {
  /// Waits until every slot is terminal, then returns the ordered values;
  /// `None` for every slot that failed.
  ///
  /// Calling it again on the same batch yields the same sequence.
  pub async fn collect(&mut self) -> Vec<Option<R>>
  where
    R: Clone,
  {
    self.await_all().await;
    self.try_collect()
  }

  /// Like [`collect`](Self::collect), reporting failures according to `policy`.
  pub async fn collect_with(&mut self, policy: FailurePolicy) -> Result<FanOutResults<R>, PoolError>
  where
    R: Clone,
  {
    self.await_all().await;
    self.try_collect_with(policy)
  }

  /// Ordered values of the batch as they stand right now.
  ///
  /// Does not wait: a slot that is still pending is `None` and stays pending
  /// on its handle.
  pub fn try_collect(&mut self) -> Vec<Option<R>>
  where
    R: Clone,
  {
    self
      .handles
      .iter_mut()
      .map(|handle| match settle(handle) {
        Ok(()) => handle.value().cloned(),
        Err(_) => None,
      })
      .collect()
  }

  /// Non-waiting variant of [`collect_with`](Self::collect_with). A pending
  /// slot counts as `PoolError::ResultUnavailable`.
  pub fn try_collect_with(&mut self, policy: FailurePolicy) -> Result<FanOutResults<R>, PoolError>
  where
    R: Clone,
  {
    let slots = self.handles.iter_mut().map(|handle| {
      let slot = settle(handle).and_then(|()| outcome_to_result(handle.outcome().cloned()));
      (handle.index(), slot)
    });
    apply_policy(policy, slots)
  }

  /// Consuming variant of [`collect`](Self::collect); does not require `R: Clone`.
  pub async fn into_results(mut self) -> Vec<Option<R>> {
    self.await_all().await;
    self
      .handles
      .into_iter()
      .map(|mut handle| match settle(&mut handle) {
        Ok(()) => handle.into_outcome().and_then(TaskOutcome::into_value),
        Err(_) => None,
      })
      .collect()
  }

  /// Consuming variant of [`collect_with`](Self::collect_with).
  pub async fn into_results_with(mut self, policy: FailurePolicy) -> Result<FanOutResults<R>, PoolError> {
    self.await_all().await;
    let slots = self.handles.into_iter().map(|mut handle| {
      let index = handle.index();
      let slot = settle(&mut handle).and_then(|()| outcome_to_result(handle.into_outcome()));
      (index, slot)
    });
    apply_policy(policy, slots)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::sync::oneshot;

  fn resolved_batch(results: Vec<Result<&'static str, PoolError>>) -> FanOutBatch<&'static str> {
    let handles = results
      .into_iter()
      .enumerate()
      .map(|(index, result)| {
        let (tx, rx) = oneshot::channel();
        tx.send(result).unwrap();
        TaskHandle::pending(index as u64, index, rx)
      })
      .collect();
    FanOutBatch::new(handles)
  }

  fn mixed_batch() -> FanOutBatch<&'static str> {
    resolved_batch(vec![
      Ok("a"),
      Err(PoolError::ItemFailed("timeout".into())),
      Ok("c"),
      Err(PoolError::TaskPanicked),
    ])
  }

  #[tokio::test]
  async fn collect_suppresses_failures_and_is_idempotent() {
    let mut batch = mixed_batch();
    let first = batch.collect().await;
    let second = batch.collect().await;
    assert_eq!(first, vec![Some("a"), None, Some("c"), None]);
    assert_eq!(first, second);
  }

  #[test]
  fn pending_slot_is_absent_without_blocking() {
    let (_tx, rx) = oneshot::channel::<Result<&'static str, PoolError>>();
    let mut batch = FanOutBatch::new(vec![TaskHandle::pending(0, 0, rx)]);
    assert_eq!(batch.try_collect(), vec![None]);
    assert_eq!(batch.pending_count(), 1);
  }

  #[tokio::test]
  async fn collect_waits_for_pending_slot() {
    let (tx, rx) = oneshot::channel::<Result<&'static str, PoolError>>();
    let mut batch = FanOutBatch::new(vec![TaskHandle::pending(0, 0, rx)]);

    let sender = tokio::spawn(async move {
      tokio::time::sleep(std::time::Duration::from_millis(20)).await;
      tx.send(Ok("late")).unwrap();
    });

    assert_eq!(batch.collect().await, vec![Some("late")]);
    assert_eq!(batch.pending_count(), 0);
    sender.await.unwrap();
  }

  #[test]
  fn try_collect_with_reports_pending_slot_as_unavailable() {
    let (_tx, rx) = oneshot::channel::<Result<&'static str, PoolError>>();
    let mut batch = FanOutBatch::new(vec![TaskHandle::pending(0, 0, rx)]);
    let results = batch.try_collect_with(FailurePolicy::CollectErrorsSeparately).unwrap();
    assert_eq!(results.values, vec![None]);
    assert_eq!(results.failures, vec![(0, PoolError::ResultUnavailable)]);
  }

  #[tokio::test]
  async fn propagate_first_error_reports_lowest_index() {
    let result = mixed_batch().into_results_with(FailurePolicy::PropagateFirstError).await;
    assert_eq!(
      result,
      Err(PoolError::BatchItemFailed {
        index: 1,
        source: Box::new(PoolError::ItemFailed("timeout".into())),
      })
    );
  }

  #[tokio::test]
  async fn collect_errors_separately_lists_failures_in_order() {
    let results = mixed_batch()
      .collect_with(FailurePolicy::CollectErrorsSeparately)
      .await
      .unwrap();
    assert_eq!(results.values, vec![Some("a"), None, Some("c"), None]);
    assert_eq!(
      results.failures,
      vec![(1, PoolError::ItemFailed("timeout".into())), (3, PoolError::TaskPanicked)]
    );
  }

  #[tokio::test]
  async fn suppress_policy_reports_nothing() {
    let results = mixed_batch().into_results_with(FailurePolicy::default()).await.unwrap();
    assert_eq!(results.len(), 4);
    assert!(results.failures.is_empty());
  }

  #[tokio::test]
  async fn strict_policy_on_clean_batch_succeeds() {
    let results = resolved_batch(vec![Ok("x"), Ok("y")])
      .into_results_with(FailurePolicy::PropagateFirstError)
      .await
      .unwrap();
    assert_eq!(results.values, vec![Some("x"), Some("y")]);
  }
}
