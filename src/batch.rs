use crate::handle::{TaskHandle, TaskState};

use futures::future::join_all;
use tracing::{debug, trace};

/// The ordered handles produced by one [`FanOutPool::submit_all`](crate::FanOutPool::submit_all) call.
///
/// Handle `i` belongs to the work item that was at position `i` of the
/// submitted sequence, so the batch length always equals the input length.
#[derive(Debug)]
pub struct FanOutBatch<R: Send + 'static> {
  pub(crate) handles: Vec<TaskHandle<R>>,
}

impl<R: Send + 'static> FanOutBatch<R> {
  pub(crate) fn new(handles: Vec<TaskHandle<R>>) -> Self {
    Self { handles }
  }

  pub fn len(&self) -> usize {
    self.handles.len()
  }

  pub fn is_empty(&self) -> bool {
    self.handles.is_empty()
  }

  pub fn handles(&self) -> &[TaskHandle<R>] {
    &self.handles
  }

  /// Number of handles that have not yet reached a terminal state.
  pub fn pending_count(&self) -> usize {
    self.handles.iter().filter(|h| h.state() == TaskState::Pending).count()
  }

  /// Suspends the calling task until every handle in the batch is terminal.
  ///
  /// Never fails. A handle whose result channel breaks while waiting is
  /// marked failed and the wait carries on with the others. There is no
  /// timeout: one item that never finishes keeps the caller waiting.
  pub async fn await_all(&mut self) {
    if self.handles.is_empty() {
      trace!("await_all: empty batch, nothing to wait for.");
      return;
    }
    debug!(batch_len = self.handles.len(), "Waiting for all tasks in batch to finish.");
    join_all(self.handles.iter_mut().map(|handle| handle.wait())).await;
    debug!(batch_len = self.handles.len(), "All tasks in batch are terminal.");
  }
}

impl<R: Send + 'static> IntoIterator for FanOutBatch<R> {
  type Item = TaskHandle<R>;
  type IntoIter = std::vec::IntoIter<TaskHandle<R>>;

  fn into_iter(self) -> Self::IntoIter {
    self.handles.into_iter()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::PoolError;
  use tokio::sync::oneshot;

  #[tokio::test]
  async fn await_all_on_empty_batch_returns_immediately() {
    let mut batch = FanOutBatch::<u32>::new(Vec::new());
    batch.await_all().await;
    assert!(batch.is_empty());
    assert_eq!(batch.pending_count(), 0);
  }

  #[tokio::test]
  async fn await_all_resolves_out_of_order_completions() {
    let (tx0, rx0) = oneshot::channel();
    let (tx1, rx1) = oneshot::channel();
    let mut batch = FanOutBatch::new(vec![TaskHandle::<u32>::pending(1, 0, rx0), TaskHandle::pending(2, 1, rx1)]);
    assert_eq!(batch.pending_count(), 2);

    let sender = tokio::spawn(async move {
      tx1.send(Ok(11)).unwrap();
      tokio::time::sleep(std::time::Duration::from_millis(20)).await;
      tx0.send(Err(PoolError::TaskPanicked)).unwrap();
    });

    batch.await_all().await;
    sender.await.unwrap();

    assert_eq!(batch.pending_count(), 0);
    assert_eq!(batch.handles()[0].state(), TaskState::Failed);
    assert_eq!(batch.handles()[1].value(), Some(&11));
  }
}
