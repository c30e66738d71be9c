use fanout_pool::{FanOutPool, PoolConfig, ShutdownMode, WorkItem};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::info;

async fn long_item(id: usize) -> usize {
  info!("Item {} starting (takes 1s)", id);
  tokio::time::sleep(Duration::from_secs(1)).await;
  info!("Item {} finished", id);
  id * 10
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Concurrency Limit Example (Capacity: 2) ---");

  let capacity = 2;
  let pool = FanOutPool::new(
    PoolConfig::default().with_name("concurrency_pool").with_capacity(capacity),
    Handle::current(),
  );

  let num_items = 5;
  info!(
    "Composing {} items, each takes 1 sec. With capacity {}, this should take ~{} secs.",
    num_items,
    capacity,
    (num_items as f32 / capacity as f32).ceil()
  );

  let started = Instant::now();
  let items: Vec<WorkItem<usize>> = (0..num_items).map(|i| WorkItem::infallible(long_item(i))).collect();
  let results = pool.compose_all(items).await;
  info!("Results after {:?}: {:?}", started.elapsed(), results);

  info!("All items processed. Shutting down.");
  pool
    .shutdown(ShutdownMode::Drain)
    .await
    .expect("Pool shutdown failed");
  info!("--- Concurrency Limit Example End ---");
}
