use tokio::sync::Semaphore;

/// Number of work items a pool runs at once unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 20;

/// Largest capacity a pool accepts: every slot is a semaphore permit, and
/// shutdown acquires all of them in one `u32`-sized request.
pub const MAX_CAPACITY: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
  Semaphore::MAX_PERMITS
} else {
  u32::MAX as usize
};

const DEFAULT_POOL_NAME: &str = "fanout_pool";

/// Construction parameters for a [`FanOutPool`](crate::FanOutPool).
///
/// Capacity is fixed for the lifetime of the pool; there is no resizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  pub name: String,
  pub capacity: usize,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      name: DEFAULT_POOL_NAME.to_string(),
      capacity: DEFAULT_CAPACITY,
    }
  }
}

impl PoolConfig {
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn with_capacity(mut self, capacity: usize) -> Self {
    self.capacity = capacity;
    self
  }

  /// Capacity actually used by the pool, clamped to `1..=MAX_CAPACITY`.
  pub(crate) fn effective_capacity(&self) -> usize {
    self.capacity.clamp(1, MAX_CAPACITY)
  }
}
