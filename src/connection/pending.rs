//! Correlation table mapping sequence ids to waiting callers.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::protocol::Header;

const SHARD_COUNT: usize = 16;

type Shard = Mutex<HashMap<i64, oneshot::Sender<Header>>>;

/// Concurrent map from sequence id to the one-shot sender that resolves
/// the call.
///
/// Sharded by the low bits of the sequence id so caller tasks registering
/// and the reader task delivering rarely touch the same lock. Every lock
/// hold is a single map operation.
pub struct PendingTable {
    shards: [Shard; SHARD_COUNT],
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            shards: std::array::from_fn(|_| Mutex::new(HashMap::new())),
        }
    }

    #[inline]
    fn shard(&self, sequence: i64) -> &Shard {
        &self.shards[(sequence as usize) & (SHARD_COUNT - 1)]
    }

    /// Register a waiter under `sequence`. Must happen before the request
    /// is enqueued so a fast response always finds its caller.
    pub fn register(&self, sequence: i64, reply: oneshot::Sender<Header>) {
        self.shard(sequence).lock().insert(sequence, reply);
    }

    /// Remove and return the waiter for `sequence`.
    ///
    /// Removal and lookup are one atomic step, so a response and a
    /// teardown sweep can never both claim the same waiter.
    pub fn take(&self, sequence: i64) -> Option<oneshot::Sender<Header>> {
        self.shard(sequence).lock().remove(&sequence)
    }

    /// Drop every registered waiter, closing their channels. Returns how
    /// many waiters were swept.
    pub fn sweep(&self) -> usize {
        let mut swept = 0;
        for shard in &self.shards {
            let drained: Vec<_> = shard.lock().drain().collect();
            swept += drained.len();
            // Senders drop here, outside the lock; receivers observe the
            // closed channel.
            drop(drained);
        }
        swept
    }

    /// Number of calls currently awaiting a response.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.lock().is_empty())
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}
