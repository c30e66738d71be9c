use fanout_pool::{FailurePolicy, FanOutPool, PoolConfig, ShutdownMode, WorkItem};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn fetch_page(id: usize, delay_ms: u64) -> Result<String, String> {
  info!("Fetch {} starting ({} ms)", id, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  if id == 2 {
    return Err(format!("page {} returned 503", id));
  }
  Ok(format!("page {} body", id))
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Basic Usage Example ---");

  let pool = FanOutPool::new(PoolConfig::default().with_name("basic_pool"), Handle::current());

  // Slower items come first; results still line up with submission order.
  let delays = [300u64, 50, 100, 10];
  let items: Vec<WorkItem<String>> = delays
    .iter()
    .enumerate()
    .map(|(id, &delay_ms)| WorkItem::new(fetch_page(id, delay_ms)))
    .collect();

  let results = pool.compose_all(items).await;
  for (id, slot) in results.iter().enumerate() {
    match slot {
      Some(body) => info!("Slot {}: {}", id, body),
      None => info!("Slot {}: absent", id),
    }
  }

  // Same batch shape, with failures reported next to the values.
  let items: Vec<WorkItem<String>> = delays
    .iter()
    .enumerate()
    .map(|(id, &delay_ms)| WorkItem::new(fetch_page(id, delay_ms)))
    .collect();
  match pool.compose_all_with(items, FailurePolicy::CollectErrorsSeparately).await {
    Ok(results) => {
      for (index, error) in &results.failures {
        info!("Slot {} failed: {}", index, error);
      }
    }
    Err(e) => tracing::error!("Unexpected batch error: {:?}", e),
  }

  pool
    .shutdown(ShutdownMode::Drain)
    .await
    .expect("Pool shutdown failed");
  info!("--- Basic Usage Example End ---");
}
