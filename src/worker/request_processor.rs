use std::collections::HashMap;
use std::sync::Arc;

use crate::communication::{
    encode_phase, Serializable, VertexIdMessages, WorkerClient, WorkerRequest,
};
use crate::configuration::Configuration;
use crate::errors::WorkerError;
use crate::graph::{Data, Vertex, VertexId};
use crate::worker::server_data::ServerData;
use crate::TaskId;

struct WorkerCache {
    by_partition: HashMap<u32, VertexIdMessages>,
    size: usize,
}

impl WorkerCache {
    fn new() -> Self {
        Self {
            by_partition: HashMap::new(),
            size: 0,
        }
    }
}

/// Batches the outgoing messages of one compute thread, one cache per
/// destination worker, so they can be sent in bulk. Not thread-safe;
/// every compute thread owns its own processor.
///
/// Under asynchronous execution, messages for co-located vertices
/// short-circuit directly into the local message store without being
/// serialized. Under BSP the co-located send still traverses the cache so
/// that it participates in the store rotation.
pub struct RequestProcessor<I: VertexId, M: Data> {
    config: Arc<Configuration>,
    server_data: Arc<ServerData<I, M>>,
    client: Arc<dyn WorkerClient<I>>,
    my_task_id: TaskId,
    caches: HashMap<TaskId, WorkerCache>,
    initial_cache_capacity: usize,
    /// Whether subsequent messages are for the next phase of a
    /// multi-phase computation.
    for_next_phase: bool,
    /// The vertex currently being computed, recorded so that
    /// overwrite-by-source payloads can carry their source.
    current_source: Option<I>,
    /// Messages sent during the super-step, local ones included when
    /// async.
    msgs_sent: u64,
    /// Local messages sent during the super-step.
    local_msgs_sent: u64,
    /// Message bytes sent during the super-step; local short-circuited
    /// messages are never serialized and do not count.
    msg_bytes_sent: u64,
}

impl<I: VertexId, M: Data> RequestProcessor<I, M> {
    pub fn new(
        config: Arc<Configuration>,
        server_data: Arc<ServerData<I, M>>,
        client: Arc<dyn WorkerClient<I>>,
        my_task_id: TaskId,
    ) -> Self {
        let initial_cache_capacity = (config.max_message_bytes_per_worker as f32
            * (1.0 + config.request_size_slack)) as usize;
        Self {
            config,
            server_data,
            client,
            my_task_id,
            caches: HashMap::new(),
            initial_cache_capacity,
            for_next_phase: false,
            current_source: None,
            msgs_sent: 0,
            local_msgs_sent: 0,
            msg_bytes_sent: 0,
        }
    }

    /// Flags all subsequent messages as being for the current (false) or
    /// the next (true) computation phase.
    pub fn set_for_next_phase(&mut self, for_next_phase: bool) {
        self.for_next_phase = for_next_phase;
    }

    /// Records the vertex whose compute call is sending.
    pub fn set_current_source(&mut self, source: Option<I>) {
        self.current_source = source;
    }

    /// Sends one message to the vertex with id `dest`.
    pub fn send_message(&mut self, dest: &I, message: &M) -> Result<(), WorkerError> {
        let owner = self.server_data_owner(dest);
        let async_conf = &self.config.async_conf;
        // If not doing multi-phase, ignore the next-phase flag.
        let for_next_phase = self.for_next_phase && async_conf.multi_phase;

        // This count feeds the master's termination check: computation
        // ends when all vertices are halted and no messages were sent.
        // It includes local messages when using async.
        self.msgs_sent += 1;

        // Short-circuit local messages directly to the message store.
        // This avoids byte-array caching and gives compute more recent
        // data. The task id is shared by all partitions of one worker.
        if async_conf.is_async() && owner.task_id == self.my_task_id {
            self.local_msgs_sent += 1;
            let store = if for_next_phase {
                self.server_data.next_phase_local_message_store()
            } else {
                self.server_data.local_message_store()
            };
            let source = self.current_source.clone();
            store.add_partition_message(
                owner.partition_id,
                dest,
                source.as_ref(),
                message,
            )?;
            return Ok(());
        }

        // The high bit of the partition id field tells the receiver which
        // phase's store the batch belongs in.
        let partition_id_with_phase = encode_phase(owner.partition_id, for_next_phase);

        let initial_capacity = self.initial_cache_capacity;
        let cache = self
            .caches
            .entry(owner.task_id)
            .or_insert_with(WorkerCache::new);
        let batch = cache
            .by_partition
            .entry(partition_id_with_phase)
            .or_insert_with(|| VertexIdMessages::with_capacity(initial_capacity));
        let size_before = batch.size();
        if async_conf.need_all_msgs {
            let source = self.current_source.clone().ok_or_else(|| {
                WorkerError::UnsupportedConfig(
                    "need_all_msgs requires a current source vertex".to_string(),
                )
            })?;
            batch
                .add(dest, &(source, message))
                .map_err(WorkerError::Communication)?;
        } else {
            batch.add(dest, message).map_err(WorkerError::Communication)?;
        }
        cache.size += batch.size() - size_before;

        // Send a request if the cache of outgoing messages to this worker
        // is full enough to be flushed.
        if cache.size >= self.config.max_message_bytes_per_worker {
            self.flush_worker(owner.task_id)?;
        }
        Ok(())
    }

    /// Sends a message along every out-edge of `vertex`.
    pub fn send_message_to_all_edges<V: Data, E: Data>(
        &mut self,
        vertex: &Vertex<I, V, E>,
        message: &M,
    ) -> Result<(), WorkerError> {
        for edge in vertex.edges() {
            self.send_message(edge.target(), message)?;
        }
        Ok(())
    }

    /// Detaches the cache of one worker and emits a request for it.
    fn flush_worker(&mut self, task_id: TaskId) -> Result<(), WorkerError> {
        if let Some(cache) = self.caches.remove(&task_id) {
            if cache.size == 0 {
                return Ok(());
            }
            let batches: Vec<(u32, VertexIdMessages)> =
                cache.by_partition.into_iter().collect();
            let request = WorkerRequest::SendWorkerMessages(batches);
            self.msg_bytes_sent += request
                .serialized_size()
                .map_err(WorkerError::Communication)? as u64;
            self.client
                .send_request(task_id, request)
                .map_err(WorkerError::Communication)?;
        }
        Ok(())
    }

    /// Detaches every remaining per-worker cache and emits a request for
    /// each.
    pub fn flush(&mut self) -> Result<(), WorkerError> {
        let task_ids: Vec<TaskId> = self.caches.keys().copied().collect();
        for task_id in task_ids {
            self.flush_worker(task_id)?;
        }
        Ok(())
    }

    /// Resets and returns the message count of the super-step. When
    /// barriers are disabled only local messages count, since remote
    /// deliveries are reported by the receiving side.
    pub fn reset_message_count(&mut self) -> u64 {
        let sent = if self.config.async_conf.disable_barriers {
            self.local_msgs_sent
        } else {
            self.msgs_sent
        };
        self.msgs_sent = 0;
        self.local_msgs_sent = 0;
        sent
    }

    /// Resets and returns the message byte count of the super-step.
    pub fn reset_message_bytes_count(&mut self) -> u64 {
        let bytes = self.msg_bytes_sent;
        self.msg_bytes_sent = 0;
        bytes
    }

    fn server_data_owner(&self, dest: &I) -> crate::graph::PartitionOwner {
        self.server_data.owners().vertex_owner(dest)
    }
}
