use crate::batch::FanOutBatch;
use crate::collector::{FailurePolicy, FanOutResults};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::handle::TaskHandle;
use crate::task::{ManagedTaskInternal, TaskExitStatus, WorkItem};
use crate::task_queue::{QueueConsumer, QueueProducer, TaskQueue};

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_POOL_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Defines how the pool treats work that is still queued when it shuts down.
///
/// Items that are already running always run to completion; there is no
/// cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Every queued item is still started and run to completion.
  Drain,
  /// Queued items that have not started are failed with
  /// `PoolError::PoolShuttingDown`.
  DiscardQueued,
}

/// A fixed-capacity pool that runs work items concurrently and joins them
/// back in submission order.
///
/// At most `capacity` items run at once; the rest wait in an unbounded FIFO
/// queue. The pool is meant to be shared: wrap it in an `Arc` (which
/// [`FanOutPool::new`] already does) and hand clones to every caller. Any
/// number of callers may submit concurrently, each with its own result type,
/// and they all share the same capacity.
pub struct FanOutPool {
  pool_name: Arc<String>,
  capacity: usize,
  semaphore: Arc<Semaphore>,
  task_queue_tx: QueueProducer,
  active_task_info: Arc<DashMap<u64, usize>>,
  shutdown_token: CancellationToken,
  discard_token: CancellationToken,
  worker_stopped_token: CancellationToken,
  worker_join_handle_internal: Mutex<Option<JoinHandle<()>>>,
}

impl FanOutPool {
  /// Creates a pool and starts its dispatcher on `tokio_handle`.
  pub fn new(config: PoolConfig, tokio_handle: TokioHandle) -> Arc<Self> {
    let capacity = config.effective_capacity();
    let (producer, consumer) = TaskQueue::new().split();
    let pool_name = Arc::new(config.name);
    let semaphore = Arc::new(Semaphore::new(capacity));
    let active_task_info = Arc::new(DashMap::new());
    let discard_token = CancellationToken::new();
    let worker_stopped_token = CancellationToken::new();

    let worker_loop_join_handle = tokio_handle.spawn(
      Self::run_worker_loop(
        pool_name.clone(),
        semaphore.clone(),
        consumer,
        tokio_handle.clone(),
        active_task_info.clone(),
        discard_token.clone(),
        worker_stopped_token.clone(),
      )
      .instrument(info_span!("fanout_pool_worker_loop", name = %pool_name)),
    );

    info!(pool_name = %pool_name, capacity, "Fan-out pool created.");

    Arc::new(Self {
      pool_name,
      capacity,
      semaphore,
      task_queue_tx: producer,
      active_task_info,
      shutdown_token: CancellationToken::new(),
      discard_token,
      worker_stopped_token,
      worker_join_handle_internal: Mutex::new(Some(worker_loop_join_handle)),
    })
  }

  /// Creates a pool with the default name and the given capacity on the
  /// current Tokio runtime.
  ///
  /// # Panics
  /// Panics if called outside of a Tokio runtime.
  pub fn with_capacity(capacity: usize) -> Arc<Self> {
    Self::new(PoolConfig::default().with_capacity(capacity), TokioHandle::current())
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Returns the number of items currently running.
  pub fn active_task_count(&self) -> usize {
    self.active_task_info.len()
  }

  /// Returns the current number of items waiting for a free slot.
  pub fn queued_task_count(&self) -> usize {
    self.task_queue_tx.len()
  }

  pub fn is_shutting_down(&self) -> bool {
    self.shutdown_token.is_cancelled()
  }

  /// Enqueues a single work item and returns immediately.
  ///
  /// Never blocks and never fails: on a pool that is shutting down the
  /// returned handle is already failed with `PoolError::PoolShuttingDown`.
  pub fn submit<R: Send + 'static>(&self, item: WorkItem<R>) -> TaskHandle<R> {
    self.submit_at(0, item)
  }

  /// Submits every item in order and returns their handles, index-aligned
  /// with `items`.
  pub fn submit_all<R, I>(&self, items: I) -> FanOutBatch<R>
  where
    R: Send + 'static,
    I: IntoIterator<Item = WorkItem<R>>,
  {
    let handles: Vec<TaskHandle<R>> = items
      .into_iter()
      .enumerate()
      .map(|(index, item)| self.submit_at(index, item))
      .collect();
    debug!(pool_name = %self.pool_name, batch_len = handles.len(), "Submitted batch.");
    FanOutBatch::new(handles)
  }

  /// Runs every item on the pool and returns their values in submission
  /// order, `None` standing in for each item that failed.
  ///
  /// Never fails and never panics because of a work item.
  pub async fn compose_all<R, I>(&self, items: I) -> Vec<Option<R>>
  where
    R: Send + 'static,
    I: IntoIterator<Item = WorkItem<R>>,
  {
    self.submit_all(items).into_results().await
  }

  /// Like [`compose_all`](Self::compose_all), reporting failures according
  /// to `policy`.
  pub async fn compose_all_with<R, I>(&self, items: I, policy: FailurePolicy) -> Result<FanOutResults<R>, PoolError>
  where
    R: Send + 'static,
    I: IntoIterator<Item = WorkItem<R>>,
  {
    self.submit_all(items).into_results_with(policy).await
  }

  /// Synchronous [`compose_all`](Self::compose_all) for callers that are not
  /// running inside an async context. Blocks the calling thread until every
  /// item is terminal.
  ///
  /// Must not be called from a thread that drives the pool's own runtime:
  /// the join would then wait on work that can never be polled.
  pub fn compose_all_blocking<R, I>(&self, items: I) -> Vec<Option<R>>
  where
    R: Send + 'static,
    I: IntoIterator<Item = WorkItem<R>>,
  {
    futures::executor::block_on(self.compose_all(items))
  }

  fn submit_at<R: Send + 'static>(&self, index: usize, item: WorkItem<R>) -> TaskHandle<R> {
    let task_id = NEXT_POOL_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);

    if self.shutdown_token.is_cancelled() {
      warn!(pool_name = %self.pool_name, %task_id, index, "Submit: pool is shutting down, task rejected.");
      return TaskHandle::failed(task_id, index, PoolError::PoolShuttingDown);
    }

    let (result_tx, result_rx) = oneshot::channel::<Result<R, PoolError>>();
    let managed_task_internal = ManagedTaskInternal::new(task_id, index, item, result_tx);

    trace!(pool_name = %self.pool_name, %task_id, index, "Submitting task to queue.");

    match self.task_queue_tx.send(managed_task_internal) {
      Ok(()) => TaskHandle::pending(task_id, index, result_rx),
      Err(rejected) => {
        // Lost a race with shutdown closing the queue.
        warn!(pool_name = %self.pool_name, %task_id, index, "Submit: task queue closed, task rejected.");
        rejected.fail(PoolError::PoolShuttingDown);
        TaskHandle::pending(task_id, index, result_rx)
      }
    }
  }

  /// Stops accepting work and waits until the pool is idle.
  ///
  /// Running items always finish. With [`ShutdownMode::Drain`] every queued
  /// item is run as well; with [`ShutdownMode::DiscardQueued`] queued items
  /// are failed with `PoolError::PoolShuttingDown`. Only the first call picks
  /// the mode. Every call, including concurrent ones, returns only once the
  /// worker loop has stopped and no item is running.
  pub async fn shutdown(self: Arc<Self>, mode: ShutdownMode) -> Result<(), PoolError> {
    let already_initiating_shutdown = self.shutdown_token.is_cancelled();

    if !already_initiating_shutdown {
      info!(pool_name = %self.pool_name, "Initiating explicit pool shutdown (mode: {:?}).", mode);
      self.shutdown_token.cancel();
      if mode == ShutdownMode::DiscardQueued {
        self.discard_token.cancel();
      }
      self.task_queue_tx.close();
    } else {
      info!(pool_name = %self.pool_name, "Shutdown already in progress or initiated by another call.");
    }

    // Set by the worker loop on exit; after that no new item can start.
    self.worker_stopped_token.cancelled().await;

    let handle_to_await: Option<JoinHandle<()>> = self.worker_join_handle_internal.lock().take();
    if let Some(handle) = handle_to_await {
      match handle.await {
        Ok(()) => debug!(pool_name = %self.pool_name, "Worker loop successfully joined."),
        Err(join_error) => {
          error!(pool_name = %self.pool_name, "Error joining worker loop during shutdown: {:?}.", join_error);
        }
      }
    } else {
      trace!(pool_name = %self.pool_name, "Worker join handle already taken by a concurrent shutdown call.");
    }

    // Every running item holds one permit; owning all of them means the pool is idle.
    let all_permits = u32::try_from(self.capacity).map_err(|_| PoolError::SemaphoreClosed)?;
    let _idle = self.semaphore.acquire_many(all_permits).await.map_err(|_| PoolError::SemaphoreClosed)?;

    if !already_initiating_shutdown {
      info!(pool_name = %self.pool_name, "Pool shutdown process completed by this call.");
    }
    Ok(())
  }

  async fn run_worker_loop(
    pool_name: Arc<String>,
    semaphore: Arc<Semaphore>,
    mut task_queue_rx: QueueConsumer,
    tasks_tokio_handle: TokioHandle,
    active_task_info_map: Arc<DashMap<u64, usize>>,
    discard_token: CancellationToken,
    worker_stopped_token: CancellationToken,
  ) {
    // Signals shutdown callers on every exit path, including a panic.
    let _worker_stopped_guard = worker_stopped_token.drop_guard();
    info!(name = %*pool_name, "Worker loop started.");

    loop {
      // A slot is taken before dequeuing so that items start strictly in FIFO order.
      let permit = tokio::select! {
        biased;
        _ = discard_token.cancelled() => break,
        permit_acquisition_result = semaphore.clone().acquire_owned() => match permit_acquisition_result {
          Ok(p) => p,
          Err(_) => {
            error!(name = %*pool_name, "Semaphore closed. Worker loop exiting.");
            break;
          }
        },
      };
      trace!(name = %*pool_name, "Acquired semaphore permit. Available: {}", semaphore.available_permits());

      let next_task = tokio::select! {
        biased;
        _ = discard_token.cancelled() => None,
        recv_result = task_queue_rx.recv() => recv_result,
      };

      let Some(managed_task) = next_task else {
        drop(permit);
        break;
      };

      let task_id = managed_task.task_id;
      let index = managed_task.index;
      let erased_task = managed_task.task;

      active_task_info_map.insert(task_id, index);
      debug!(name = %*pool_name, %task_id, index, "Dequeued task. Spawning with permit.");

      let active_task_info_map_cleanup = active_task_info_map.clone();
      let pool_name_for_task_execution = pool_name.clone();

      tasks_tokio_handle.spawn(
        async move {
          let finished = erased_task.execute().await;
          match finished.status {
            TaskExitStatus::Panicked => {
              error!(pool_name = %*pool_name_for_task_execution, %task_id, "Task panicked during execution.");
            }
            status => {
              trace!(pool_name = %*pool_name_for_task_execution, %task_id, ?status, "Task finished.");
            }
          }

          // Slot released before the result is published.
          active_task_info_map_cleanup.remove(&task_id);
          drop(permit);

          if !(finished.publish)() {
            warn!(
              pool_name = %*pool_name_for_task_execution,
              %task_id,
              "Result receiver for task was dropped. Task outcome may have been lost."
            );
          }
        }
        .instrument(info_span!("managed_task", pool_name = %*pool_name, %task_id, index)),
      );
    }

    let discarded = task_queue_rx.drain_remaining();
    if !discarded.is_empty() {
      info!(name = %*pool_name, count = discarded.len(), "Failing queued tasks that were never started.");
    }
    for task in discarded {
      task.fail(PoolError::PoolShuttingDown);
    }

    info!(
      name = %*pool_name,
      "Worker loop stopped. Active tasks remaining: {}",
      active_task_info_map.len()
    );
  }
}

impl std::fmt::Debug for FanOutPool {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FanOutPool")
      .field("pool_name", &self.pool_name)
      .field("capacity", &self.capacity)
      .field("active", &self.active_task_count())
      .field("queue", &self.task_queue_tx)
      .field("shutting_down", &self.is_shutting_down())
      .finish()
  }
}

impl Drop for FanOutPool {
  fn drop(&mut self) {
    if !self.shutdown_token.is_cancelled() {
      info!(
        pool_name = %*self.pool_name,
        "FanOutPool instance dropped. Initiating implicit shutdown (queued tasks will still run)."
      );
      // Closing the queue lets the worker loop drain what is queued and exit.
      // The loop is not awaited here.
      self.shutdown_token.cancel();
      self.task_queue_tx.close();
    } else {
      trace!(pool_name = %*self.pool_name, "Drop: Shutdown already in progress or completed.");
    }
  }
}
