use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::communication::{WorkerClient, WorkerRequest};
use crate::errors::WorkerError;
use crate::graph::{PartitionId, PartitionOwners, VertexId};
use crate::WorkerId;

/// Holds the coarse serialisability tokens of one worker.
///
/// The global token is owned by at most one worker at a time and
/// circulates through the worker ring in ascending id order, wrapping at
/// the end; worker 0 holds it initially. The local token is owned by at
/// most one of this worker's partitions and circulates through the
/// owned partitions in ascending id order. Tokens are exchanged only
/// after all compute threads have quiesced and outgoing messages have
/// been flushed, so fork exchange is unnecessary on this path.
pub struct TokenStore {
    my_worker_id: WorkerId,
    num_workers: usize,
    have_global: AtomicBool,
    /// The worker's partitions in ascending id order.
    ring: Vec<PartitionId>,
    /// Index into `ring` of the partition currently holding the local
    /// token.
    local_pos: AtomicUsize,
}

impl TokenStore {
    pub fn new(my_worker_id: WorkerId, num_workers: usize, mut owned: Vec<PartitionId>) -> Self {
        owned.sort_unstable();
        Self {
            my_worker_id,
            num_workers,
            have_global: AtomicBool::new(my_worker_id == 0),
            ring: owned,
            local_pos: AtomicUsize::new(0),
        }
    }

    /// Whether this worker currently holds the global token.
    pub fn have_global_token(&self) -> bool {
        self.have_global.load(Ordering::SeqCst)
    }

    /// Whether the given partition currently holds this worker's local
    /// token.
    pub fn have_local_token(&self, partition_id: PartitionId) -> bool {
        let pos = self.local_pos.load(Ordering::SeqCst);
        self.ring.get(pos) == Some(&partition_id)
    }

    /// Advances the local token to the next partition in the ring.
    pub fn rotate_local_token(&self) {
        if self.ring.is_empty() {
            return;
        }
        let pos = self.local_pos.load(Ordering::SeqCst);
        self.local_pos
            .store((pos + 1) % self.ring.len(), Ordering::SeqCst);
    }

    /// Records the arrival of the global token.
    pub fn receive_global_token(&self) {
        self.have_global.store(true, Ordering::SeqCst);
    }

    /// Passes the global token to the next worker in the ring, if this
    /// worker holds it. A single-worker ring keeps the token in place.
    pub fn release_global_token<I: VertexId>(
        &self,
        owners: &PartitionOwners<I>,
        client: &dyn WorkerClient<I>,
    ) -> Result<(), WorkerError> {
        if self.num_workers <= 1 || !self.have_global.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let next = (self.my_worker_id + 1) % self.num_workers;
        let task_id = owners.task_of_worker(next).ok_or_else(|| {
            WorkerError::UnsupportedConfig(format!("worker {} owns no partitions", next))
        })?;
        tracing::debug!(
            "worker {}: passing global token to worker {}",
            self.my_worker_id,
            next
        );
        client
            .send_request(
                task_id,
                WorkerRequest::SendGlobalToken {
                    sender: self.my_worker_id,
                    receiver: next,
                },
            )
            .map_err(WorkerError::Communication)?;
        Ok(())
    }
}
