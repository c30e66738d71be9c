use crate::task::ManagedTaskInternal;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// An unbounded, multi-producer, single-consumer FIFO queue for tasks waiting
/// for a free pool slot.
///
/// Sending never blocks. The queue tracks its own depth so the pool can report
/// how many tasks are waiting without touching the consumer.
pub(crate) struct TaskQueue {
  tx: UnboundedSender<ManagedTaskInternal>,
  rx: UnboundedReceiver<ManagedTaskInternal>,
  depth: Arc<AtomicUsize>,
}

impl TaskQueue {
  pub(crate) fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self {
      tx,
      rx,
      depth: Arc::new(AtomicUsize::new(0)),
    }
  }

  /// Splits the queue into its producer and consumer halves.
  pub(crate) fn split(self) -> (QueueProducer, QueueConsumer) {
    (
      QueueProducer {
        tx: Mutex::new(Some(self.tx)),
        depth: self.depth.clone(),
      },
      QueueConsumer {
        rx: self.rx,
        depth: self.depth,
      },
    )
  }
}

/// The producer half. Shared by every submitter through the pool; closing it
/// lets the consumer drain what is already queued and then stop.
pub(crate) struct QueueProducer {
  tx: Mutex<Option<UnboundedSender<ManagedTaskInternal>>>,
  depth: Arc<AtomicUsize>,
}

/// The consumer half. It cannot be cloned, enforcing the single-consumer pattern.
pub(crate) struct QueueConsumer {
  rx: UnboundedReceiver<ManagedTaskInternal>,
  depth: Arc<AtomicUsize>,
}

impl fmt::Debug for QueueProducer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueProducer")
      .field("len", &self.len())
      .field("closed", &self.is_closed())
      .finish()
  }
}

impl fmt::Debug for QueueConsumer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueConsumer")
      .field("len", &self.depth.load(Ordering::Acquire))
      .finish_non_exhaustive()
  }
}

impl QueueProducer {
  /// Appends a task to the back of the queue.
  ///
  /// Hands the task back if the queue has been closed, so the caller can
  /// resolve it instead of silently dropping it.
  pub(crate) fn send(&self, task: ManagedTaskInternal) -> Result<(), ManagedTaskInternal> {
    let guard = self.tx.lock();
    let Some(tx) = guard.as_ref() else {
      return Err(task);
    };
    // Counted before the send so the consumer can never observe a negative depth.
    self.depth.fetch_add(1, Ordering::AcqRel);
    tx.send(task).map_err(|send_error| {
      self.depth.fetch_sub(1, Ordering::AcqRel);
      send_error.0
    })
  }

  /// Closes the sending side. Already queued tasks stay available to the consumer.
  pub(crate) fn close(&self) {
    self.tx.lock().take();
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.tx.lock().is_none()
  }

  /// Returns the number of tasks currently waiting in the queue.
  pub(crate) fn len(&self) -> usize {
    self.depth.load(Ordering::Acquire)
  }
}

impl QueueConsumer {
  /// Receives the next task in FIFO order. Returns `None` once the producer is
  /// closed and every queued task has been received.
  pub(crate) async fn recv(&mut self) -> Option<ManagedTaskInternal> {
    let task = self.rx.recv().await;
    if task.is_some() {
      self.depth.fetch_sub(1, Ordering::AcqRel);
    }
    task
  }

  /// Closes the queue from the consumer side and returns everything still in it.
  pub(crate) fn drain_remaining(&mut self) -> Vec<ManagedTaskInternal> {
    self.rx.close();
    let mut remaining = Vec::new();
    while let Ok(task) = self.rx.try_recv() {
      self.depth.fetch_sub(1, Ordering::AcqRel);
      remaining.push(task);
    }
    remaining
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::task::WorkItem;
  use std::time::Duration;
  use tokio::sync::oneshot;

  fn dummy_task(id: u64) -> ManagedTaskInternal {
    let (tx, _rx) = oneshot::channel();
    ManagedTaskInternal::new(id, id as usize, WorkItem::infallible(async move { "done".to_string() }), tx)
  }

  #[tokio::test]
  async fn test_queue_is_fifo_and_tracks_depth() {
    let (producer, mut consumer) = TaskQueue::new().split();

    for id in 0..3 {
      producer.send(dummy_task(id)).unwrap();
    }
    assert_eq!(producer.len(), 3);

    for expected in 0..3 {
      assert_eq!(consumer.recv().await.unwrap().task_id, expected);
    }
    assert_eq!(producer.len(), 0);
  }

  #[tokio::test]
  async fn test_close_lets_consumer_drain_then_stop() {
    let (producer, mut consumer) = TaskQueue::new().split();

    producer.send(dummy_task(1)).unwrap();
    producer.close();
    assert!(producer.is_closed());

    let rejected = producer.send(dummy_task(2));
    assert_eq!(rejected.map_err(|task| task.task_id), Err(2));

    assert_eq!(consumer.recv().await.unwrap().task_id, 1);
    let end = tokio::time::timeout(Duration::from_millis(100), consumer.recv())
      .await
      .expect("recv should return once the producer is closed");
    assert!(end.is_none());
  }

  #[tokio::test]
  async fn test_drain_remaining_empties_queue_and_rejects_sends() {
    let (producer, mut consumer) = TaskQueue::new().split();

    producer.send(dummy_task(1)).unwrap();
    producer.send(dummy_task(2)).unwrap();

    let remaining: Vec<u64> = consumer.drain_remaining().into_iter().map(|t| t.task_id).collect();
    assert_eq!(remaining, vec![1, 2]);
    assert_eq!(producer.len(), 0);
    assert!(producer.send(dummy_task(3)).is_err());
    assert_eq!(producer.len(), 0);
  }
}
