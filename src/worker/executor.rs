use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::communication::WorkerClient;
use crate::configuration::Configuration;
use crate::errors::WorkerError;
use crate::graph::{
    Computation, ComputeContext, Data, Messages, Partition, PartitionId, PartitionStats,
    PartitionStore, Vertex, VertexId, VertexMutations, VertexType, VertexTypeStore,
};
use crate::worker::message_store::MessageStore;
use crate::worker::philosophers::PhilosophersTable;
use crate::worker::request_processor::RequestProcessor;
use crate::worker::server_data::ServerData;
use crate::worker::tokens::TokenStore;
use crate::TaskId;

/// Computes as many partitions as possible on one compute thread.
///
/// Every thread has its own [`RequestProcessor`] to send messages, and
/// pulls partition ids off a shared queue until it is empty. Partitions
/// are checked out of the store for the duration of a pass, so only one
/// thread ever touches a given partition.
pub(crate) struct PartitionExecutor<I: VertexId, V: Data, E: Data, M: Data> {
    config: Arc<Configuration>,
    partition_store: Arc<PartitionStore<I, V, E>>,
    server_data: Arc<ServerData<I, M>>,
    vertex_types: Arc<VertexTypeStore<I>>,
    tokens: Arc<TokenStore>,
    vertex_philosophers: Option<Arc<PhilosophersTable<I>>>,
    partition_philosophers: Option<Arc<PhilosophersTable<I>>>,
    client: Arc<dyn WorkerClient<I>>,
    queue: Arc<Mutex<VecDeque<PartitionId>>>,
    superstep: u64,
    logical_superstep: u64,
    my_task_id: TaskId,
}

impl<I: VertexId, V: Data, E: Data, M: Data> PartitionExecutor<I, V, E, M> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Arc<Configuration>,
        partition_store: Arc<PartitionStore<I, V, E>>,
        server_data: Arc<ServerData<I, M>>,
        vertex_types: Arc<VertexTypeStore<I>>,
        tokens: Arc<TokenStore>,
        vertex_philosophers: Option<Arc<PhilosophersTable<I>>>,
        partition_philosophers: Option<Arc<PhilosophersTable<I>>>,
        client: Arc<dyn WorkerClient<I>>,
        queue: Arc<Mutex<VecDeque<PartitionId>>>,
        superstep: u64,
        logical_superstep: u64,
        my_task_id: TaskId,
    ) -> Self {
        Self {
            config,
            partition_store,
            server_data,
            vertex_types,
            tokens,
            vertex_philosophers,
            partition_philosophers,
            client,
            queue,
            superstep,
            logical_superstep,
            my_task_id,
        }
    }

    /// Drains the partition queue, computing each partition under the
    /// configured execution discipline, and returns the per-partition
    /// statistics together with the vertex mutations requested by user
    /// code.
    pub(crate) fn run<C>(
        &self,
        mut computation: C,
    ) -> Result<(Vec<PartitionStats>, VertexMutations<I>), WorkerError>
    where
        C: Computation<I, V, E, Message = M>,
    {
        let mut processor = RequestProcessor::new(
            Arc::clone(&self.config),
            Arc::clone(&self.server_data),
            Arc::clone(&self.client),
            self.my_task_id,
        );
        let mut mutations = VertexMutations::new();
        let mut stats_list: Vec<PartitionStats> = Vec::new();

        let is_async = self.config.async_conf.is_async();
        let remote_store = if is_async {
            self.server_data.remote_message_store()
        } else {
            self.server_data.current_message_store()
        };
        let local_store = if is_async {
            Some(self.server_data.local_message_store())
        } else {
            None
        };

        loop {
            let partition_id = self.queue.lock().unwrap().pop_front();
            let Some(partition_id) = partition_id else {
                break;
            };
            // Take ownership of the partition for this pass; it is put
            // back on every exit path.
            let Some(mut partition) = self.partition_store.take_partition(partition_id) else {
                continue;
            };

            let result = self.run_partition(
                &mut computation,
                &mut partition,
                &mut processor,
                &mut mutations,
                &remote_store,
                local_store.as_ref(),
            );
            self.partition_store.put_partition(partition);
            stats_list.push(result?);

            tracing::trace!(
                "executor {}: completed partition {}, {} remaining",
                self.my_task_id,
                partition_id,
                self.queue.lock().unwrap().len()
            );
        }

        processor.flush()?;
        // The bytes flushed from the cache tail belong to the last
        // partition processed.
        let tail_bytes = processor.reset_message_bytes_count();
        if let Some(last) = stats_list.last_mut() {
            last.message_bytes_sent += tail_bytes;
        }
        Ok((stats_list, mutations))
    }

    fn run_partition<C>(
        &self,
        computation: &mut C,
        partition: &mut Partition<I, V, E>,
        processor: &mut RequestProcessor<I, M>,
        mutations: &mut VertexMutations<I>,
        remote_store: &Arc<MessageStore<I, M>>,
        local_store: Option<&Arc<MessageStore<I, M>>>,
    ) -> Result<PartitionStats, WorkerError>
    where
        C: Computation<I, V, E, Message = M>,
    {
        let partition_id = partition.id();
        let async_conf = &self.config.async_conf;
        // The first logical super-step lets every vertex execute; it can
        // involve initialization that must not be skipped.
        let partition_lock_active =
            async_conf.partition_lock_serialized() && self.logical_superstep > 0;

        if partition_lock_active {
            let table = self.partition_philosophers.as_ref().ok_or_else(|| {
                WorkerError::UnsupportedConfig(
                    "partition-lock serializability without a philosophers table".to_string(),
                )
            })?;
            // Skip partitions that do not need to be executed.
            if table.all_vertices_halted(partition_id)
                && !self.partition_has_messages(partition_id, remote_store, local_store)
            {
                let mut stats = PartitionStats::new(partition_id);
                stats.vertex_count = partition.vertex_count();
                stats.finished_vertex_count = partition.vertex_count();
                stats.edge_count = partition.edge_count();
                return Ok(stats);
            }
            table.acquire_forks(u64::from(partition_id), &self.client)?;
        }

        computation.pre_superstep();
        let mut stats = self.compute_partition(
            computation,
            partition,
            processor,
            mutations,
            remote_store,
            local_store,
        )?;

        if partition_lock_active {
            // Flush all caches before releasing the forks; releasing
            // them may flush messages to the network itself.
            processor.flush()?;
            let table = self.partition_philosophers.as_ref().unwrap();
            table.release_forks(u64::from(partition_id), &self.client)?;
            table.set_all_vertices_halted(
                partition_id,
                stats.finished_vertex_count == stats.vertex_count,
            );
        }
        computation.post_superstep();

        stats.messages_sent += processor.reset_message_count();
        stats.message_bytes_sent += processor.reset_message_bytes_count();
        Ok(stats)
    }

    fn compute_partition<C>(
        &self,
        computation: &mut C,
        partition: &mut Partition<I, V, E>,
        processor: &mut RequestProcessor<I, M>,
        mutations: &mut VertexMutations<I>,
        remote_store: &Arc<MessageStore<I, M>>,
        local_store: Option<&Arc<MessageStore<I, M>>>,
    ) -> Result<PartitionStats, WorkerError>
    where
        C: Computation<I, V, E, Message = M>,
    {
        let partition_id = partition.id();
        let async_conf = self.config.async_conf.clone();
        let mut stats = PartitionStats::new(partition_id);

        for vertex in partition.iter_mut() {
            let vertex_id = vertex.id().clone();

            if async_conf.token_serialized() && self.logical_superstep > 0 {
                // Skipped halted vertices with pending local messages
                // must be woken up, since local messages are not reported
                // to the master's termination check.
                let need_wake = !async_conf.need_all_msgs
                    && vertex.is_halted()
                    && self.vertex_has_messages(&vertex_id, remote_store, local_store);

                // Internal vertices can always execute; boundary vertices
                // need the matching token. Token passing happens only
                // after all compute threads have quiesced, so no cache
                // flush is needed here.
                match self.vertex_types.vertex_type(&vertex_id) {
                    VertexType::Internal => {
                        let messages = self.local_messages(&vertex_id, local_store)?;
                        self.compute_vertex(computation, processor, mutations, vertex, messages)?;
                    }
                    VertexType::LocalBoundary => {
                        if self.tokens.have_local_token(partition_id) {
                            let messages = self.local_messages(&vertex_id, local_store)?;
                            self.compute_vertex(
                                computation, processor, mutations, vertex, messages,
                            )?;
                        } else if need_wake {
                            vertex.wake_up();
                        }
                    }
                    VertexType::RemoteBoundary => {
                        if self.tokens.have_global_token() {
                            let messages =
                                self.all_messages(&vertex_id, remote_store, local_store)?;
                            self.compute_vertex(
                                computation, processor, mutations, vertex, messages,
                            )?;
                        } else if need_wake {
                            vertex.wake_up();
                        }
                    }
                    VertexType::MixedBoundary => {
                        if self.tokens.have_global_token()
                            && self.tokens.have_local_token(partition_id)
                        {
                            let messages =
                                self.all_messages(&vertex_id, remote_store, local_store)?;
                            self.compute_vertex(
                                computation, processor, mutations, vertex, messages,
                            )?;
                        } else if need_wake {
                            vertex.wake_up();
                        }
                    }
                }
            } else if async_conf.vertex_lock_serialized() && self.logical_superstep > 0 {
                let table = self.vertex_philosophers.as_ref().ok_or_else(|| {
                    WorkerError::UnsupportedConfig(
                        "vertex-lock serializability without a philosophers table".to_string(),
                    )
                })?;
                let key = vertex_id.lock_id().ok_or_else(|| {
                    WorkerError::UnsupportedConfig(
                        "vertex-lock serializability requires integer vertex ids".to_string(),
                    )
                })?;
                if table.is_boundary(key) {
                    // Skip halted vertices that have no messages to wake
                    // with.
                    if !(vertex.is_halted()
                        && !self.vertex_has_messages(&vertex_id, remote_store, local_store))
                    {
                        table.acquire_forks(key, &self.client)?;
                        let messages = self.all_messages(&vertex_id, remote_store, local_store)?;
                        self.compute_vertex(computation, processor, mutations, vertex, messages)?;
                        // Flush all caches before releasing the forks, so
                        // forks cannot race ahead of sent messages.
                        processor.flush()?;
                        table.release_forks(key, &self.client)?;
                    }
                } else {
                    let messages = self.local_messages(&vertex_id, local_store)?;
                    self.compute_vertex(computation, processor, mutations, vertex, messages)?;
                }
            } else {
                // Regular non-serializable execution, or partition-lock
                // execution with the forks already held.
                let messages = self.all_messages(&vertex_id, remote_store, local_store)?;
                self.compute_vertex(computation, processor, mutations, vertex, messages)?;
            }

            if vertex.is_halted() {
                stats.finished_vertex_count += 1;
            }
            stats.vertex_count += 1;
            stats.edge_count += vertex.num_edges() as u64;
        }

        // Clear the partition when using the plain BSP store: each
        // super-step consumes exactly what the prior one produced. Async
        // stores keep the messages that arrived during the compute calls
        // above.
        if !async_conf.is_async() {
            remote_store.clear_partition(partition_id);
        }
        Ok(stats)
    }

    fn compute_vertex<C>(
        &self,
        computation: &mut C,
        processor: &mut RequestProcessor<I, M>,
        mutations: &mut VertexMutations<I>,
        vertex: &mut Vertex<I, V, E>,
        messages: Messages<M>,
    ) -> Result<(), WorkerError>
    where
        C: Computation<I, V, E, Message = M>,
    {
        if vertex.is_halted() && !messages.is_empty() {
            vertex.wake_up();
        }
        if vertex.is_halted() {
            return Ok(());
        }
        // Once the logical super-step count reaches the configured
        // maximum, the vertex votes to halt unconditionally.
        if self.logical_superstep >= self.config.max_supersteps {
            vertex.vote_to_halt();
            return Ok(());
        }

        // The source id is set before compute() and cleared right after;
        // there is one processor per thread, so this is thread-safe.
        processor.set_current_source(Some(vertex.id().clone()));
        let mut ctx = ComputeContext {
            processor: &mut *processor,
            mutations,
            superstep: self.superstep,
            logical_superstep: self.logical_superstep,
        };
        let result = computation.compute(&mut ctx, vertex, messages);
        processor.set_current_source(None);
        result
    }

    /// All messages (local and remote) for a vertex, under the message
    /// visibility rules of the execution discipline.
    fn all_messages(
        &self,
        vertex_id: &I,
        remote_store: &Arc<MessageStore<I, M>>,
        local_store: Option<&Arc<MessageStore<I, M>>>,
    ) -> Result<Messages<M>, WorkerError> {
        let async_conf = &self.config.async_conf;
        if !async_conf.is_async() {
            return Ok(Messages::new(
                remote_store.remove_vertex_messages(vertex_id)?,
                Vec::new(),
            ));
        }
        // Logical super-step 0 is a special case under async: many
        // algorithms send messages there without any logic to process
        // them, so revealed messages would be lost. Keep them until
        // after.
        if self.logical_superstep == 0 {
            return Ok(Messages::empty());
        }
        let local_store = local_store.ok_or_else(|| {
            WorkerError::UnsupportedConfig("async execution without a local store".to_string())
        })?;
        if async_conf.need_all_msgs {
            // No need to remove: the next round overwrites.
            let remote = if async_conf.do_remote_read {
                remote_store.get_vertex_messages_without_source(vertex_id)?
            } else {
                Vec::new()
            };
            let local = if async_conf.do_local_read {
                local_store.get_vertex_messages_without_source(vertex_id)?
            } else {
                Vec::new()
            };
            Ok(Messages::new(remote, local))
        } else {
            // Always remove messages immediately rather than get and
            // clear.
            let remote = if async_conf.do_remote_read {
                remote_store.remove_vertex_messages(vertex_id)?
            } else {
                Vec::new()
            };
            let local = if async_conf.do_local_read {
                local_store.remove_vertex_messages(vertex_id)?
            } else {
                Vec::new()
            };
            Ok(Messages::new(remote, local))
        }
    }

    /// Only the local messages for a vertex. BSP has no local store; the
    /// serialisability disciplines that reach this path require async.
    fn local_messages(
        &self,
        vertex_id: &I,
        local_store: Option<&Arc<MessageStore<I, M>>>,
    ) -> Result<Messages<M>, WorkerError> {
        let async_conf = &self.config.async_conf;
        if !async_conf.is_async() {
            return Err(WorkerError::UnsupportedConfig(
                "local-only message reads are not supported under BSP".to_string(),
            ));
        }
        if self.logical_superstep == 0 {
            return Ok(Messages::empty());
        }
        let local_store = local_store.ok_or_else(|| {
            WorkerError::UnsupportedConfig("async execution without a local store".to_string())
        })?;
        if !async_conf.do_local_read {
            return Ok(Messages::empty());
        }
        if async_conf.need_all_msgs {
            Ok(Messages::new(
                local_store.get_vertex_messages_without_source(vertex_id)?,
                Vec::new(),
            ))
        } else {
            Ok(Messages::new(
                local_store.remove_vertex_messages(vertex_id)?,
                Vec::new(),
            ))
        }
    }

    /// Whether a vertex has messages, consistently with what the message
    /// reads above would return.
    fn vertex_has_messages(
        &self,
        vertex_id: &I,
        remote_store: &Arc<MessageStore<I, M>>,
        local_store: Option<&Arc<MessageStore<I, M>>>,
    ) -> bool {
        let async_conf = &self.config.async_conf;
        if !async_conf.is_async() {
            return remote_store.has_messages_for_vertex(vertex_id);
        }
        if self.logical_superstep == 0 {
            return false;
        }
        if async_conf.need_all_msgs {
            return true;
        }
        remote_store.has_messages_for_vertex(vertex_id)
            || local_store
                .map(|store| store.has_messages_for_vertex(vertex_id))
                .unwrap_or(false)
    }

    /// Whether a partition has messages waiting.
    fn partition_has_messages(
        &self,
        partition_id: PartitionId,
        remote_store: &Arc<MessageStore<I, M>>,
        local_store: Option<&Arc<MessageStore<I, M>>>,
    ) -> bool {
        let async_conf = &self.config.async_conf;
        if !async_conf.is_async() {
            return remote_store.has_messages_for_partition(partition_id);
        }
        if self.logical_superstep == 0 {
            return false;
        }
        if async_conf.need_all_msgs {
            return true;
        }
        remote_store.has_messages_for_partition(partition_id)
            || local_store
                .map(|store| store.has_messages_for_partition(partition_id))
                .unwrap_or(false)
    }
}
