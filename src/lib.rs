//! A Tokio-based fan-out/join pool: run an ordered batch of independent work
//! items concurrently on a capacity-bounded pool and get their results back
//! in submission order, with per-item failures folded into absent slots.
//!
//! ```no_run
//! use fanout_pool::{FanOutPool, PoolConfig, WorkItem};
//!
//! # async fn demo() {
//! let pool = FanOutPool::new(PoolConfig::default(), tokio::runtime::Handle::current());
//! let results = pool
//!   .compose_all(vec![
//!     WorkItem::infallible(async { "a".to_string() }),
//!     WorkItem::new(async { Err::<String, _>("unreachable host") }),
//!   ])
//!   .await;
//! assert_eq!(results, vec![Some("a".to_string()), None]);
//! # }
//! ```

mod batch;
mod collector;
mod config;
mod error;
mod handle;
mod manager;
mod task;
mod task_queue;

pub use batch::FanOutBatch;
pub use collector::{FailurePolicy, FanOutResults};
pub use config::{PoolConfig, DEFAULT_CAPACITY, MAX_CAPACITY};
pub use error::PoolError;
pub use handle::{TaskHandle, TaskOutcome, TaskState};
pub use manager::{FanOutPool, ShutdownMode};
pub use task::WorkItem;
