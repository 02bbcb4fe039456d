use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use crate::graph::{Data, PartitionId, Vertex, VertexId};
use crate::{TaskId, WorkerId};

/// A slice of the graph owned by a single worker.
///
/// A partition is exclusively owned by whichever compute thread currently
/// checked it out of the [`PartitionStore`]; the vertex map is mutated
/// only between super-steps or by that thread.
#[derive(Debug)]
pub struct Partition<I, V, E> {
    id: PartitionId,
    vertices: HashMap<I, Vertex<I, V, E>>,
}

impl<I: VertexId, V: Data, E: Data> Partition<I, V, E> {
    /// Creates a new, empty partition.
    pub fn new(id: PartitionId) -> Self {
        Self {
            id,
            vertices: HashMap::new(),
        }
    }

    /// The id of this partition.
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Inserts a vertex, replacing any previous vertex with the same id.
    pub fn put_vertex(&mut self, vertex: Vertex<I, V, E>) {
        self.vertices.insert(vertex.id().clone(), vertex);
    }

    /// Removes a vertex.
    pub fn remove_vertex(&mut self, id: &I) -> Option<Vertex<I, V, E>> {
        self.vertices.remove(id)
    }

    /// Looks up a vertex by id.
    pub fn vertex(&self, id: &I) -> Option<&Vertex<I, V, E>> {
        self.vertices.get(id)
    }

    /// Looks up a vertex by id, mutably.
    pub fn vertex_mut(&mut self, id: &I) -> Option<&mut Vertex<I, V, E>> {
        self.vertices.get_mut(id)
    }

    /// Whether the partition contains a vertex with the given id.
    pub fn contains_vertex(&self, id: &I) -> bool {
        self.vertices.contains_key(id)
    }

    /// Iterates over the vertices of this partition. Iteration order is
    /// unspecified.
    pub fn iter(&self) -> impl Iterator<Item = &Vertex<I, V, E>> {
        self.vertices.values()
    }

    /// Iterates mutably over the vertices of this partition.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Vertex<I, V, E>> {
        self.vertices.values_mut()
    }

    /// The number of vertices in this partition.
    pub fn vertex_count(&self) -> u64 {
        self.vertices.len() as u64
    }

    /// The total number of out-edges across the partition's vertices.
    pub fn edge_count(&self) -> u64 {
        self.vertices.values().map(|v| v.num_edges() as u64).sum()
    }
}

/// Statistics gathered while computing one partition during one
/// super-step.
#[derive(Debug, Clone, Default)]
pub struct PartitionStats {
    /// The partition these statistics describe.
    pub partition_id: PartitionId,
    /// Number of vertices in the partition.
    pub vertex_count: u64,
    /// Number of vertices that were halted after compute.
    pub finished_vertex_count: u64,
    /// Number of out-edges in the partition.
    pub edge_count: u64,
    /// Messages sent while computing the partition.
    pub messages_sent: u64,
    /// Message bytes sent while computing the partition.
    pub message_bytes_sent: u64,
}

impl PartitionStats {
    /// Creates statistics for one partition pass.
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            ..Default::default()
        }
    }
}

/// A worker-local view of who owns a partition. Stable within a
/// super-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionOwner {
    /// The partition.
    pub partition_id: PartitionId,
    /// The worker that owns the partition.
    pub worker_id: WorkerId,
    /// The transport task id of the owning worker.
    pub task_id: TaskId,
}

/// Maps a vertex id to the partition it belongs to.
pub trait GraphPartitioner<I>: Send + Sync {
    /// The partition the vertex with id `id` belongs to.
    fn partition_of(&self, id: &I) -> PartitionId;
}

/// Hash-based partitioning over all partitions of the cluster.
#[derive(Debug, Clone)]
pub struct HashPartitioner {
    num_partitions: u32,
}

impl HashPartitioner {
    /// Creates a partitioner spreading vertices over `num_partitions`
    /// partitions.
    pub fn new(num_partitions: u32) -> Self {
        Self { num_partitions }
    }
}

impl<I: VertexId> GraphPartitioner<I> for HashPartitioner {
    fn partition_of(&self, id: &I) -> PartitionId {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % u64::from(self.num_partitions)) as PartitionId
    }
}

/// The worker-local owner table: an O(1) mapping from vertex id to
/// [`PartitionOwner`], stable within a super-step.
pub struct PartitionOwners<I> {
    owners: Vec<PartitionOwner>,
    partitioner: Box<dyn GraphPartitioner<I>>,
}

impl<I: VertexId> PartitionOwners<I> {
    /// Creates an owner table from an explicit partition assignment.
    ///
    /// `owners` must contain one entry per partition, indexed by partition
    /// id.
    pub fn new(owners: Vec<PartitionOwner>, partitioner: Box<dyn GraphPartitioner<I>>) -> Self {
        Self {
            owners,
            partitioner,
        }
    }

    /// Creates an owner table that deals partitions round-robin over
    /// `num_workers` workers, with worker ids doubling as task ids.
    pub fn round_robin(
        num_partitions: u32,
        num_workers: usize,
        partitioner: Box<dyn GraphPartitioner<I>>,
    ) -> Self {
        let owners = (0..num_partitions)
            .map(|partition_id| PartitionOwner {
                partition_id,
                worker_id: partition_id as usize % num_workers,
                task_id: partition_id as usize % num_workers,
            })
            .collect();
        Self::new(owners, partitioner)
    }

    /// The owner of the partition holding the given vertex.
    pub fn vertex_owner(&self, id: &I) -> PartitionOwner {
        let partition_id = self.partitioner.partition_of(id);
        self.owners[partition_id as usize]
    }

    /// The owner of the given partition.
    pub fn partition_owner(&self, partition_id: PartitionId) -> PartitionOwner {
        self.owners[partition_id as usize]
    }

    /// The partition the given vertex belongs to.
    pub fn partition_of(&self, id: &I) -> PartitionId {
        self.partitioner.partition_of(id)
    }

    /// The partitions owned by `worker_id`, in ascending partition order.
    pub fn partitions_of_worker(&self, worker_id: WorkerId) -> Vec<PartitionId> {
        self.owners
            .iter()
            .filter(|owner| owner.worker_id == worker_id)
            .map(|owner| owner.partition_id)
            .collect()
    }

    /// The transport task id of the given worker.
    pub fn task_of_worker(&self, worker_id: WorkerId) -> Option<TaskId> {
        self.owners
            .iter()
            .find(|owner| owner.worker_id == worker_id)
            .map(|owner| owner.task_id)
    }

    /// The total number of partitions in the cluster.
    pub fn num_partitions(&self) -> u32 {
        self.owners.len() as u32
    }
}

/// Holds the partitions owned by a worker.
///
/// Compute threads check partitions out with [`take_partition`]
/// (exclusive ownership for the duration of the pass) and return them
/// with [`put_partition`]. Concurrent checkout of different partitions is
/// allowed; concurrent mutation of the same partition is not possible by
/// construction.
///
/// [`take_partition`]: PartitionStore::take_partition
/// [`put_partition`]: PartitionStore::put_partition
pub struct PartitionStore<I, V, E> {
    partitions: Mutex<HashMap<PartitionId, Partition<I, V, E>>>,
}

impl<I: VertexId, V: Data, E: Data> PartitionStore<I, V, E> {
    /// Creates an empty partition store.
    pub fn new() -> Self {
        Self {
            partitions: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts a partition, replacing any existing partition with the same
    /// id.
    pub fn insert_partition(&self, partition: Partition<I, V, E>) {
        self.partitions
            .lock()
            .unwrap()
            .insert(partition.id(), partition);
    }

    /// Checks the partition with the given id out of the store, creating
    /// an empty one if it does not exist yet.
    pub fn get_or_create_partition(&self, partition_id: PartitionId) -> Partition<I, V, E> {
        self.partitions
            .lock()
            .unwrap()
            .remove(&partition_id)
            .unwrap_or_else(|| Partition::new(partition_id))
    }

    /// Checks a partition out of the store, transferring exclusive
    /// ownership to the caller.
    pub fn take_partition(&self, partition_id: PartitionId) -> Option<Partition<I, V, E>> {
        self.partitions.lock().unwrap().remove(&partition_id)
    }

    /// Returns a partition to the store.
    pub fn put_partition(&self, partition: Partition<I, V, E>) {
        self.partitions
            .lock()
            .unwrap()
            .insert(partition.id(), partition);
    }

    /// The ids of the partitions currently in the store, ascending.
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        let mut ids: Vec<PartitionId> =
            self.partitions.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Runs `f` against a partition inside the store. Returns `None` if
    /// the partition does not exist or is checked out.
    pub fn with_partition<R>(
        &self,
        partition_id: PartitionId,
        f: impl FnOnce(&mut Partition<I, V, E>) -> R,
    ) -> Option<R> {
        let mut partitions = self.partitions.lock().unwrap();
        partitions.get_mut(&partition_id).map(f)
    }
}

impl<I: VertexId, V: Data, E: Data> Default for PartitionStore<I, V, E> {
    fn default() -> Self {
        Self::new()
    }
}
