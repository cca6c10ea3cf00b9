//! Global user id allocation.

use std::sync::Arc;

use crate::store::AccountStore;
use crate::{Error, Result};

/// Counter value a fresh partition starts from. The first id handed out is
/// `COUNTER_SEED + 1`.
pub const COUNTER_SEED: u64 = 9999;

/// Issues strictly increasing user ids from a store-side counter.
///
/// There is no in-process counter: every allocation is a single
/// upsert-and-increment against the store, so ids stay unique across any
/// number of server instances sharing that store.
#[derive(Clone)]
pub struct IdAllocator {
    store: Arc<dyn AccountStore>,
    partition: String,
    seed: u64,
}

impl IdAllocator {
    /// Creates an allocator for `partition` using [`COUNTER_SEED`].
    pub fn new(store: Arc<dyn AccountStore>, partition: impl Into<String>) -> Self {
        Self::with_seed(store, partition, COUNTER_SEED)
    }

    /// Creates an allocator with a custom seed for missing partitions.
    pub fn with_seed(store: Arc<dyn AccountStore>, partition: impl Into<String>, seed: u64) -> Self {
        Self {
            store,
            partition: partition.into(),
            seed,
        }
    }

    /// Partition this allocator draws from.
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Starting value for a missing partition.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the next user id.
    ///
    /// # Errors
    /// Returns [`Error::AllocationFailed`] if the store cannot apply the
    /// increment. The counter is left untouched in that case.
    pub async fn allocate_next_id(&self) -> Result<u64> {
        self.store
            .increment_counter(&self.partition, self.seed)
            .await
            .map_err(|e| {
                tracing::error!(partition = %self.partition, "user id allocation failed: {e}");
                Error::AllocationFailed(e.to_string())
            })
    }
}
