//! Shared helpers for the integration tests: an in-process test cluster
//! and the reference computations driven through it.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use rand::{rngs::StdRng, Rng, SeedableRng};

use harary::communication::local::InProcessNetwork;
use harary::communication::{CommunicationError, RequestHandler, WorkerClient, WorkerRequest};
use harary::errors::WorkerError;
use harary::graph::{
    Computation, ComputeContext, Data, Edge, GraphPartitioner, Messages, PartitionId,
    PartitionOwners, Vertex, VertexResolver,
};
use harary::worker::{SuperstepStats, Worker};
use harary::{Configuration, TaskId};

/// Returns a unique port for each test to avoid race conditions.
pub fn get_unique_port() -> usize {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static PORT: AtomicUsize = AtomicUsize::new(9000);
    PORT.fetch_add(1, Ordering::SeqCst)
}

/// Deals vertex ids over partitions by id modulo partition count, so
/// tests control placement exactly.
pub struct ModuloPartitioner {
    num_partitions: u32,
}

impl ModuloPartitioner {
    pub fn new(num_partitions: u32) -> Self {
        Self { num_partitions }
    }
}

impl GraphPartitioner<u64> for ModuloPartitioner {
    fn partition_of(&self, id: &u64) -> PartitionId {
        (*id % u64::from(self.num_partitions)) as PartitionId
    }
}

/// A transport client for tests that must never be reached.
pub struct NullClient;

impl WorkerClient<u64> for NullClient {
    fn send_request(
        &self,
        _task_id: TaskId,
        _request: WorkerRequest<u64>,
    ) -> Result<(), CommunicationError> {
        panic!("NullClient received a request");
    }

    fn wait_all_requests(&self) {}
}

/// Builds the default owner table used by the test clusters.
pub fn test_owners(num_partitions: u32, num_workers: usize) -> Arc<PartitionOwners<u64>> {
    Arc::new(PartitionOwners::round_robin(
        num_partitions,
        num_workers,
        Box::new(ModuloPartitioner::new(num_partitions)),
    ))
}

/// Creates a vertex with `u64` ids from a slice of (target, edge value)
/// pairs.
pub fn vertex<V: Data, E: Data>(id: u64, value: V, edges: &[(u64, E)]) -> Vertex<u64, V, E> {
    Vertex::new(
        id,
        value,
        edges
            .iter()
            .map(|(target, edge_value)| Edge::new(*target, edge_value.clone()))
            .collect(),
    )
}

/// A cluster of workers wired through the in-process transport, driven
/// in lockstep by the tests.
pub struct TestCluster<V: Data, E: Data, M: Data> {
    pub workers: Vec<Arc<Worker<u64, V, E, M>>>,
    owners: Arc<PartitionOwners<u64>>,
}

impl<V: Data + Default, E: Data, M: Data> TestCluster<V, E, M> {
    pub fn new(
        num_workers: usize,
        num_partitions: u32,
        tweak: impl Fn(Configuration) -> Configuration,
    ) -> Self {
        let owners = test_owners(num_partitions, num_workers);
        let network = InProcessNetwork::new();
        let mut workers = Vec::new();
        for index in 0..num_workers {
            let config =
                tweak(Configuration::new(index, num_workers, num_partitions, 2).disable_logger());
            let worker = Worker::new(config, index, index, Arc::clone(&owners))
                .expect("worker construction failed");
            worker.set_client(Arc::new(network.client(index)));
            network.register(index, worker.clone() as Arc<dyn RequestHandler<u64>>);
            workers.push(worker);
        }
        Self { workers, owners }
    }
}

impl<V: Data, E: Data, M: Data> TestCluster<V, E, M> {
    pub fn with_resolver(
        num_workers: usize,
        num_partitions: u32,
        tweak: impl Fn(Configuration) -> Configuration,
        resolver: Arc<dyn VertexResolver<u64, V, E>>,
    ) -> Self {
        let owners = test_owners(num_partitions, num_workers);
        let network = InProcessNetwork::new();
        let mut workers = Vec::new();
        for index in 0..num_workers {
            let config =
                tweak(Configuration::new(index, num_workers, num_partitions, 2).disable_logger());
            let worker = Worker::with_resolver(
                config,
                index,
                index,
                Arc::clone(&owners),
                Arc::clone(&resolver),
            )
            .expect("worker construction failed");
            worker.set_client(Arc::new(network.client(index)));
            network.register(index, worker.clone() as Arc<dyn RequestHandler<u64>>);
            workers.push(worker);
        }
        Self { workers, owners }
    }

    /// Adds a vertex to whichever worker owns it.
    pub fn add_vertex(&self, vertex: Vertex<u64, V, E>) {
        let owner = self.owners.vertex_owner(vertex.id());
        self.workers[owner.worker_id]
            .add_vertex(vertex)
            .expect("add_vertex failed");
    }

    pub fn finish_loading(&self) {
        for worker in &self.workers {
            worker.finish_loading().expect("finish_loading failed");
        }
    }

    /// Runs one lockstep super-step round across all workers and returns
    /// their statistics.
    pub fn run_round<C, F>(&self, factory: &F) -> Vec<SuperstepStats>
    where
        C: Computation<u64, V, E, Message = M>,
        F: Fn() -> C + Send + Sync + Clone,
    {
        for worker in &self.workers {
            worker.prepare_superstep().expect("prepare_superstep failed");
        }
        let stats = thread::scope(|scope| {
            let handles: Vec<_> = self
                .workers
                .iter()
                .map(|worker| {
                    let factory = factory.clone();
                    scope.spawn(move || {
                        worker.run_superstep(factory).expect("run_superstep failed")
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("compute thread panicked"))
                .collect::<Vec<_>>()
        });
        for worker in &self.workers {
            worker.finish_global_superstep();
        }
        stats
    }

    /// Runs rounds until every vertex has halted and no messages were
    /// sent, and returns the number of rounds taken.
    pub fn run_to_completion<C, F>(&self, factory: F, max_rounds: usize) -> usize
    where
        C: Computation<u64, V, E, Message = M>,
        F: Fn() -> C + Send + Sync + Clone,
    {
        for round in 0..max_rounds {
            let stats = self.run_round(&factory);
            let all_halted = stats.iter().all(SuperstepStats::all_halted);
            let messages: u64 = stats.iter().map(|s| s.messages_sent).sum();
            if all_halted && messages == 0 {
                return round + 1;
            }
        }
        panic!("computation did not converge within {} rounds", max_rounds);
    }

    /// The value of a vertex, wherever it lives.
    pub fn vertex_value(&self, id: u64) -> Option<V> {
        let owner = self.owners.vertex_owner(&id);
        self.workers[owner.worker_id].vertex_value(&id)
    }

    /// All resident vertex ids across the cluster.
    pub fn vertex_ids(&self) -> HashSet<u64> {
        let mut ids = HashSet::new();
        for worker in &self.workers {
            worker.for_each_vertex(|vertex| {
                ids.insert(*vertex.id());
            });
        }
        ids
    }
}

/// Single-source shortest paths over f64 edge weights.
pub struct ShortestPaths {
    pub source: u64,
}

impl Computation<u64, f64, f64> for ShortestPaths {
    type Message = f64;

    fn compute(
        &mut self,
        ctx: &mut ComputeContext<'_, u64, f64>,
        vertex: &mut Vertex<u64, f64, f64>,
        messages: Messages<f64>,
    ) -> Result<(), WorkerError> {
        if ctx.superstep() == 0 {
            vertex.set_value(f64::MAX);
        }
        let mut min_dist = if *vertex.id() == self.source {
            0.0
        } else {
            f64::MAX
        };
        for message in messages {
            min_dist = min_dist.min(message);
        }
        if min_dist < *vertex.value() {
            vertex.set_value(min_dist);
            for edge in vertex.edges() {
                ctx.send_message(edge.target(), &(min_dist + edge.value()))?;
            }
        }
        vertex.vote_to_halt();
        Ok(())
    }
}

/// Number of bitstrings kept by the diameter estimation; a larger count
/// concentrates the estimate.
pub const DIAMETER_K: usize = 8;

/// Flajolet-Martin diameter estimation: every vertex repeatedly ORs its
/// neighbours' bitmask sets into its own.
pub struct DiameterEstimation {
    pub max_supersteps: u64,
}

fn random_bit_index(rng: &mut StdRng, size_bitmask: u32) -> u32 {
    let cur_random: f64 = rng.gen();
    let mut threshold = 0.0;
    for j in 0..size_bitmask - 1 {
        threshold += 2.0_f64.powi(-(j as i32) - 1);
        if cur_random < threshold {
            return j;
        }
    }
    size_bitmask - 1
}

impl Computation<u64, Vec<u64>, ()> for DiameterEstimation {
    type Message = Vec<u64>;

    fn compute(
        &mut self,
        ctx: &mut ComputeContext<'_, u64, Vec<u64>>,
        vertex: &mut Vertex<u64, Vec<u64>, ()>,
        messages: Messages<Vec<u64>>,
    ) -> Result<(), WorkerError> {
        if ctx.superstep() == 0 {
            let mut rng = StdRng::seed_from_u64(*vertex.id());
            let value: Vec<u64> = (0..DIAMETER_K)
                .map(|_| 1u64 << (62 - u64::from(random_bit_index(&mut rng, 63))))
                .collect();
            ctx.send_message_to_all_edges(vertex, &value)?;
            vertex.set_value(value);
            return Ok(());
        }

        // Vertices created lazily by an inbound message have no bitmasks
        // and no out-edges; they can simply halt.
        if vertex.value().is_empty() {
            vertex.vote_to_halt();
            return Ok(());
        }

        let mut bitmask = vertex.value().clone();
        for message in messages {
            for i in 0..DIAMETER_K {
                bitmask[i] |= message[i];
            }
        }
        vertex.set_value(bitmask.clone());

        if ctx.superstep() >= self.max_supersteps {
            vertex.vote_to_halt();
        } else {
            ctx.send_message_to_all_edges(vertex, &bitmask)?;
        }
        Ok(())
    }
}

/// k-core decomposition: vertices with fewer than k surviving edges
/// broadcast their id and request their own removal.
pub struct KCore {
    pub k: usize,
}

impl Computation<u64, u64, ()> for KCore {
    type Message = u64;

    fn compute(
        &mut self,
        ctx: &mut ComputeContext<'_, u64, u64>,
        vertex: &mut Vertex<u64, u64, ()>,
        messages: Messages<u64>,
    ) -> Result<(), WorkerError> {
        let to_delete: HashSet<u64> = messages.collect();
        vertex.retain_edges(|edge| !to_delete.contains(edge.target()));

        if vertex.num_edges() < self.k {
            let id = *vertex.id();
            ctx.send_message_to_all_edges(vertex, &id)?;
            ctx.remove_vertex_request(id);
        }
        vertex.vote_to_halt();
        Ok(())
    }
}

/// The only desired mutation of the k-core computation is the deletion of
/// vertices; a deleted vertex must not be recreated by a message sent to
/// it.
pub struct KCoreResolver;

impl VertexResolver<u64, u64, ()> for KCoreResolver {
    fn resolve(
        &self,
        _id: &u64,
        vertex: Option<Vertex<u64, u64, ()>>,
        requested_removal: bool,
        _has_messages: bool,
    ) -> Option<Vertex<u64, u64, ()>> {
        if requested_removal {
            None
        } else {
            vertex
        }
    }
}

/// Vertices push an incrementing counter to their neighbours until a
/// limit is reached. Exercises the token-serialised async path.
pub struct IncrementUntil {
    pub limit: u64,
}

impl Computation<u64, u64, ()> for IncrementUntil {
    type Message = u64;

    fn compute(
        &mut self,
        ctx: &mut ComputeContext<'_, u64, u64>,
        vertex: &mut Vertex<u64, u64, ()>,
        messages: Messages<u64>,
    ) -> Result<(), WorkerError> {
        let old = *vertex.value();
        let mut highest = old;
        for message in messages {
            highest = highest.max(message);
        }
        vertex.set_value(highest);

        if highest >= self.limit {
            // Announce the limit exactly once, when first crossing it, so
            // a lagging neighbour still converges.
            if old < self.limit {
                ctx.send_message_to_all_edges(vertex, &self.limit)?;
            }
            vertex.vote_to_halt();
        } else {
            let next = highest + 1;
            ctx.send_message_to_all_edges(vertex, &next)?;
        }
        Ok(())
    }
}
