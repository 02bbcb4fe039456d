//! The worker: owns the partitions, message stores and serialisability
//! state of one cluster member, and drives the super-step execution loop
//! over its compute threads.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;

use crate::communication::{RequestHandler, WorkerClient, WorkerRequest};
use crate::configuration::{Configuration, Serializability};
use crate::errors::WorkerError;
use crate::graph::{
    Computation, Data, Partition, PartitionOwners, PartitionStats, PartitionStore, Vertex,
    VertexId, VertexMutations, VertexResolver, VertexTypeStore,
};
use crate::{TaskId, WorkerId};

// Private submodules
mod executor;
mod message_store;
mod philosophers;
mod request_processor;
mod server_data;
mod tokens;

// Public exports
pub use message_store::{MessageStore, MessageStoreMode};
pub use philosophers::{PhilosopherKind, PhilosophersTable};
pub use request_processor::RequestProcessor;
pub use server_data::ServerData;
pub use tokens::TokenStore;

use executor::PartitionExecutor;
use crate::graph::DefaultVertexResolver;

/// Aggregated statistics of one worker super-step, used by an external
/// master for its termination check.
#[derive(Debug, Clone, Default)]
pub struct SuperstepStats {
    /// The global super-step these statistics belong to.
    pub superstep: u64,
    /// The logical super-step these statistics belong to.
    pub logical_superstep: u64,
    /// Vertices computed or skipped on this worker.
    pub vertex_count: u64,
    /// Vertices halted after the super-step.
    pub finished_vertex_count: u64,
    /// Out-edges across the worker's vertices.
    pub edge_count: u64,
    /// Messages sent; local-only under barrierless execution.
    pub messages_sent: u64,
    /// Message bytes sent over the wire.
    pub message_bytes_sent: u64,
}

impl SuperstepStats {
    /// The number of vertices that are still active.
    pub fn active_vertices(&self) -> u64 {
        self.vertex_count - self.finished_vertex_count
    }

    /// Whether every vertex on the worker has voted to halt.
    pub fn all_halted(&self) -> bool {
        self.finished_vertex_count == self.vertex_count
    }
}

/// One member of the worker fleet.
///
/// The worker owns its partitions, the message stores, the vertex type
/// store and the serialisability state, and exposes the two barrier
/// steps an external master drives: [`prepare_superstep`] (store
/// rotation and mutation resolution, run while no compute thread is
/// active) and [`run_superstep`] (the parallel compute pass).
///
/// [`prepare_superstep`]: Worker::prepare_superstep
/// [`run_superstep`]: Worker::run_superstep
pub struct Worker<I: VertexId, V: Data, E: Data, M: Data> {
    config: Arc<Configuration>,
    worker_id: WorkerId,
    task_id: TaskId,
    owners: Arc<PartitionOwners<I>>,
    partition_store: Arc<PartitionStore<I, V, E>>,
    server_data: Arc<ServerData<I, M>>,
    vertex_types: Arc<VertexTypeStore<I>>,
    vertex_philosophers: Option<Arc<PhilosophersTable<I>>>,
    partition_philosophers: Option<Arc<PhilosophersTable<I>>>,
    tokens: Arc<TokenStore>,
    client: OnceLock<Arc<dyn WorkerClient<I>>>,
    resolver: Arc<dyn VertexResolver<I, V, E>>,
    superstep: AtomicU64,
    logical_superstep: AtomicU64,
    new_phase: AtomicBool,
    pending_mutations: Mutex<VertexMutations<I>>,
    /// The first fatal error recorded by the receive path or a compute
    /// thread; surfaced at the next super-step boundary.
    failure: Mutex<Option<WorkerError>>,
}

impl<I: VertexId, V: Data + Default, E: Data, M: Data> Worker<I, V, E, M> {
    /// Creates a worker with the default vertex resolution policy (lazy
    /// creation on first message, removal unless messages are pending).
    pub fn new(
        config: Configuration,
        worker_id: WorkerId,
        task_id: TaskId,
        owners: Arc<PartitionOwners<I>>,
    ) -> Result<Arc<Self>, WorkerError> {
        Self::with_resolver(config, worker_id, task_id, owners, Arc::new(DefaultVertexResolver))
    }
}

impl<I: VertexId, V: Data, E: Data, M: Data> Worker<I, V, E, M> {
    /// Creates a worker with an explicit vertex resolution policy.
    pub fn with_resolver(
        config: Configuration,
        worker_id: WorkerId,
        task_id: TaskId,
        owners: Arc<PartitionOwners<I>>,
        resolver: Arc<dyn VertexResolver<I, V, E>>,
    ) -> Result<Arc<Self>, WorkerError> {
        config.validate()?;
        let config = Arc::new(config);
        let owned_partitions = owners.partitions_of_worker(worker_id);
        let tokens = Arc::new(TokenStore::new(
            worker_id,
            config.num_workers,
            owned_partitions.clone(),
        ));
        let vertex_philosophers = if config.async_conf.vertex_lock_serialized() {
            Some(Arc::new(PhilosophersTable::new(
                PhilosopherKind::Vertex,
                task_id,
                Arc::clone(&owners),
            )))
        } else {
            None
        };
        let partition_philosophers = if config.async_conf.partition_lock_serialized() {
            Some(Arc::new(PhilosophersTable::new(
                PhilosopherKind::Partition,
                task_id,
                Arc::clone(&owners),
            )))
        } else {
            None
        };

        let partition_store = Arc::new(PartitionStore::new());
        for partition_id in owned_partitions {
            partition_store.insert_partition(Partition::new(partition_id));
        }

        tracing::debug!("initialized worker {}", worker_id);
        Ok(Arc::new(Self {
            server_data: Arc::new(ServerData::new(Arc::clone(&config), Arc::clone(&owners))),
            config,
            worker_id,
            task_id,
            owners,
            partition_store,
            vertex_types: Arc::new(VertexTypeStore::new()),
            vertex_philosophers,
            partition_philosophers,
            tokens,
            client: OnceLock::new(),
            resolver,
            superstep: AtomicU64::new(0),
            logical_superstep: AtomicU64::new(0),
            new_phase: AtomicBool::new(false),
            pending_mutations: Mutex::new(VertexMutations::new()),
            failure: Mutex::new(None),
        }))
    }

    /// Attaches the transport client. Must be called before the first
    /// super-step.
    pub fn set_client(&self, client: Arc<dyn WorkerClient<I>>) {
        if self.client.set(client).is_err() {
            tracing::error!("worker {}: client was already set", self.worker_id);
        }
    }

    fn client(&self) -> Result<Arc<dyn WorkerClient<I>>, WorkerError> {
        self.client.get().cloned().ok_or_else(|| {
            WorkerError::UnsupportedConfig("worker has no transport client".to_string())
        })
    }

    /// Adds a vertex to the partition that owns it. The vertex must be
    /// owned by this worker.
    pub fn add_vertex(&self, vertex: Vertex<I, V, E>) -> Result<(), WorkerError> {
        let owner = self.owners.vertex_owner(vertex.id());
        if owner.worker_id != self.worker_id {
            return Err(WorkerError::UnsupportedConfig(format!(
                "vertex {:?} belongs to worker {}",
                vertex.id(),
                owner.worker_id
            )));
        }
        self.partition_store
            .with_partition(owner.partition_id, |partition| {
                partition.put_vertex(vertex);
            })
            .ok_or_else(|| {
                WorkerError::UnsupportedConfig(format!(
                    "partition {} is not resident",
                    owner.partition_id
                ))
            })
    }

    /// Finishes graph loading: classifies vertex types and seats the
    /// philosophers, as required by the configured serialisability
    /// discipline. Must be called after the last `add_vertex` and before
    /// the first super-step.
    pub fn finish_loading(&self) -> Result<(), WorkerError> {
        let async_conf = &self.config.async_conf;
        for partition_id in self.partition_store.partition_ids() {
            let Some(partition) = self.partition_store.take_partition(partition_id) else {
                continue;
            };
            let result = (|| -> Result<(), WorkerError> {
                if async_conf.token_serialized() {
                    for vertex in partition.iter() {
                        self.vertex_types
                            .add_vertex(vertex, &self.owners, self.worker_id);
                    }
                }
                if let Some(table) = &self.vertex_philosophers {
                    for vertex in partition.iter() {
                        table.add_vertex_if_boundary(vertex)?;
                    }
                }
                if let Some(table) = &self.partition_philosophers {
                    table.add_partition(&partition)?;
                }
                Ok(())
            })();
            self.partition_store.put_partition(partition);
            result?;
        }
        if async_conf.token_serialized() {
            tracing::debug!(
                "worker {}: classified {} vertices",
                self.worker_id,
                self.vertex_types.len()
            );
        }
        Ok(())
    }

    /// The barrier step between super-steps: rotates the message stores
    /// and resolves vertex mutations and lazily created vertices. No
    /// compute thread may be running while this executes; the master
    /// must quiesce all workers first.
    pub fn prepare_superstep(&self) -> Result<(), WorkerError> {
        self.check_failure()?;
        let new_phase = self.new_phase.swap(false, Ordering::SeqCst);
        self.server_data.prepare_superstep(new_phase);
        self.resolve_vertices()
    }

    /// Runs one logical super-step over all owned partitions, using
    /// `factory` to create one computation instance per compute thread.
    /// Returns the aggregated statistics of the pass.
    pub fn run_superstep<C, F>(&self, factory: F) -> Result<SuperstepStats, WorkerError>
    where
        C: Computation<I, V, E, Message = M>,
        F: Fn() -> C + Send + Sync,
    {
        self.check_failure()?;
        let client = self.client()?;
        let superstep = self.superstep.load(Ordering::SeqCst);
        let logical_superstep = self.logical_superstep.load(Ordering::SeqCst);

        let partition_ids = self.partition_store.partition_ids();
        let num_threads = self.config.num_compute_threads.min(partition_ids.len()).max(1);
        let queue = Arc::new(Mutex::new(VecDeque::from(partition_ids)));

        let mut all_stats: Vec<PartitionStats> = Vec::new();
        let mut merged_mutations = VertexMutations::new();

        thread::scope(|scope| -> Result<(), WorkerError> {
            let mut handles = Vec::new();
            for _ in 0..num_threads {
                let executor = PartitionExecutor::new(
                    Arc::clone(&self.config),
                    Arc::clone(&self.partition_store),
                    Arc::clone(&self.server_data),
                    Arc::clone(&self.vertex_types),
                    Arc::clone(&self.tokens),
                    self.vertex_philosophers.clone(),
                    self.partition_philosophers.clone(),
                    Arc::clone(&client),
                    Arc::clone(&queue),
                    superstep,
                    logical_superstep,
                    self.task_id,
                );
                let factory = &factory;
                handles.push(scope.spawn(move || executor.run(factory())));
            }
            for handle in handles {
                let (stats, mutations) =
                    handle.join().map_err(|_| WorkerError::Interrupted)??;
                all_stats.extend(stats);
                merged_mutations.merge(mutations);
            }
            Ok(())
        })?;

        // Surface fatal errors the receive path recorded while compute
        // was running.
        self.check_failure()?;

        // All compute threads have quiesced; drain the transport before
        // any token moves, so remote observers of the token exchange see
        // every message sent this super-step.
        client.wait_all_requests();
        if self.config.async_conf.token_serialized() {
            self.tokens.rotate_local_token();
            self.tokens
                .release_global_token(&self.owners, client.as_ref())?;
        }

        self.pending_mutations
            .lock()
            .unwrap()
            .merge(merged_mutations);
        self.logical_superstep.fetch_add(1, Ordering::SeqCst);

        let mut stats = SuperstepStats {
            superstep,
            logical_superstep,
            ..Default::default()
        };
        for partition_stats in &all_stats {
            stats.vertex_count += partition_stats.vertex_count;
            stats.finished_vertex_count += partition_stats.finished_vertex_count;
            stats.edge_count += partition_stats.edge_count;
            stats.messages_sent += partition_stats.messages_sent;
            stats.message_bytes_sent += partition_stats.message_bytes_sent;
        }
        tracing::debug!(
            "worker {}: finished logical superstep {} ({} active, {} messages)",
            self.worker_id,
            logical_superstep,
            stats.active_vertices(),
            stats.messages_sent
        );
        Ok(stats)
    }

    /// Marks the completion of a global super-step. Called by the master
    /// at every global barrier; under barrierless execution logical
    /// super-steps run ahead of this counter.
    pub fn finish_global_superstep(&self) {
        self.superstep.fetch_add(1, Ordering::SeqCst);
    }

    /// Signals that the next super-step starts a new computation phase.
    pub fn signal_new_phase(&self) {
        self.new_phase.store(true, Ordering::SeqCst);
    }

    /// Whether locally short-circuited messages are waiting. A
    /// barrierless worker keeps running logical super-steps while this
    /// holds.
    pub fn pending_local_messages(&self) -> bool {
        self.config.async_conf.is_async()
            && self.server_data.local_message_store().has_any_messages()
    }

    /// The current global super-step.
    pub fn superstep(&self) -> u64 {
        self.superstep.load(Ordering::SeqCst)
    }

    /// The current logical super-step.
    pub fn logical_superstep(&self) -> u64 {
        self.logical_superstep.load(Ordering::SeqCst)
    }

    /// The id of this worker.
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// The transport task id of this worker.
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Reads the value of an owned vertex. Returns `None` while the
    /// vertex's partition is checked out by a compute thread.
    pub fn vertex_value(&self, id: &I) -> Option<V> {
        let owner = self.owners.vertex_owner(id);
        self.partition_store
            .with_partition(owner.partition_id, |partition| {
                partition.vertex(id).map(|vertex| vertex.value().clone())
            })
            .flatten()
    }

    /// Runs `f` over every resident vertex of this worker.
    pub fn for_each_vertex(&self, mut f: impl FnMut(&Vertex<I, V, E>)) {
        for partition_id in self.partition_store.partition_ids() {
            self.partition_store.with_partition(partition_id, |partition| {
                for vertex in partition.iter() {
                    f(vertex);
                }
            });
        }
    }

    fn check_failure(&self) -> Result<(), WorkerError> {
        match self.failure.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn record_failure(&self, error: WorkerError) {
        tracing::error!("worker {}: fatal error: {}", self.worker_id, error);
        let mut failure = self.failure.lock().unwrap();
        if failure.is_none() {
            *failure = Some(error);
        }
    }

    /// Applies pending vertex mutations and creates vertices for
    /// messages addressed to missing ones, through the resolver.
    fn resolve_vertices(&self) -> Result<(), WorkerError> {
        let mutations = std::mem::take(&mut *self.pending_mutations.lock().unwrap());
        if !mutations.is_empty()
            && self.config.async_conf.serializability != Serializability::None
        {
            // Mutating the graph under a serialisability discipline
            // assumes information the philosopher and type tables no
            // longer have.
            return Err(WorkerError::UnsupportedConfig(
                "graph mutation combined with a serialisability discipline".to_string(),
            ));
        }

        let removals: HashSet<I> = mutations.removals.into_iter().collect();
        let additions: HashSet<I> = mutations.additions.into_iter().collect();
        for id in removals.iter().chain(additions.iter()) {
            let owner = self.owners.vertex_owner(id);
            if owner.worker_id != self.worker_id {
                return Err(WorkerError::UnsupportedConfig(format!(
                    "mutation of vertex {:?} owned by worker {}",
                    id, owner.worker_id
                )));
            }
        }

        let is_async = self.config.async_conf.is_async();
        let stores = if is_async {
            vec![
                self.server_data.remote_message_store(),
                self.server_data.local_message_store(),
            ]
        } else {
            vec![self.server_data.current_message_store()]
        };

        for partition_id in self.partition_store.partition_ids() {
            let mut candidates: HashSet<I> = HashSet::new();
            for store in &stores {
                candidates.extend(store.message_vertex_ids(partition_id));
            }
            for id in removals
                .iter()
                .chain(additions.iter())
                .filter(|id| self.owners.partition_of(id) == partition_id)
            {
                candidates.insert(id.clone());
            }

            for id in candidates {
                let is_addition = additions.contains(&id);
                let has_messages = stores
                    .iter()
                    .any(|store| store.has_messages_for_vertex(&id))
                    || is_addition;
                let requested_removal = removals.contains(&id);
                self.partition_store.with_partition(partition_id, |partition| {
                    // Messages to an existing, unmutated vertex need no
                    // resolution; only missing destinations and pending
                    // mutations go through the resolver.
                    if partition.contains_vertex(&id) && !requested_removal && !is_addition {
                        return;
                    }
                    let existing = partition.remove_vertex(&id);
                    if let Some(resolved) =
                        self.resolver
                            .resolve(&id, existing, requested_removal, has_messages)
                    {
                        partition.put_vertex(resolved);
                    }
                });
            }
        }
        Ok(())
    }

    fn dispatch_request(&self, request: WorkerRequest<I>) -> Result<(), WorkerError> {
        match request {
            WorkerRequest::SendWorkerMessages(batches) => {
                self.server_data.handle_worker_messages(batches)
            }
            WorkerRequest::SendToken { sender, receiver } => {
                let table = self.vertex_philosophers.as_ref().ok_or_else(|| {
                    WorkerError::UnsupportedConfig(
                        "received a vertex token without vertex-lock serializability"
                            .to_string(),
                    )
                })?;
                let client = self.client()?;
                table.receive_token(lock_key(&sender)?, lock_key(&receiver)?, &client)
            }
            WorkerRequest::SendFork { sender, receiver } => {
                let table = self.vertex_philosophers.as_ref().ok_or_else(|| {
                    WorkerError::UnsupportedConfig(
                        "received a vertex fork without vertex-lock serializability"
                            .to_string(),
                    )
                })?;
                table.receive_fork(lock_key(&sender)?, lock_key(&receiver)?)
            }
            WorkerRequest::SendGlobalToken { sender, receiver } => {
                if receiver != self.worker_id {
                    tracing::error!(
                        "worker {}: received global token addressed to {} from {}",
                        self.worker_id,
                        receiver,
                        sender
                    );
                }
                self.tokens.receive_global_token();
                Ok(())
            }
            WorkerRequest::SendPartitionToken { sender, receiver } => {
                let table = self.partition_philosophers.as_ref().ok_or_else(|| {
                    WorkerError::UnsupportedConfig(
                        "received a partition token without partition-lock serializability"
                            .to_string(),
                    )
                })?;
                let client = self.client()?;
                table.receive_token(u64::from(sender), u64::from(receiver), &client)
            }
            WorkerRequest::SendPartitionFork { sender, receiver } => {
                let table = self.partition_philosophers.as_ref().ok_or_else(|| {
                    WorkerError::UnsupportedConfig(
                        "received a partition fork without partition-lock serializability"
                            .to_string(),
                    )
                })?;
                table.receive_fork(u64::from(sender), u64::from(receiver))
            }
        }
    }
}

fn lock_key<I: VertexId>(id: &I) -> Result<u64, WorkerError> {
    id.lock_id().ok_or_else(|| {
        WorkerError::UnsupportedConfig(
            "distributed locking requires integer vertex ids".to_string(),
        )
    })
}

impl<I: VertexId, V: Data, E: Data, M: Data> RequestHandler<I> for Worker<I, V, E, M> {
    fn handle_request(&self, request: WorkerRequest<I>) -> Result<(), WorkerError> {
        if let Err(error) = self.dispatch_request(request) {
            self.record_failure(error);
        }
        Ok(())
    }
}
