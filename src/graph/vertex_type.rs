use std::collections::HashMap;
use std::sync::RwLock;

use crate::graph::{Data, PartitionOwners, Vertex, VertexId};
use crate::WorkerId;

/// Classifies a vertex by where its out-neighbours live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexType {
    /// Every out-neighbour resides in the same partition.
    Internal,
    /// Every out-neighbour resides on the same worker, but at least one
    /// lives in a different partition.
    LocalBoundary,
    /// Every out-of-partition neighbour resides on a different worker.
    RemoteBoundary,
    /// Out-of-partition neighbours both on this worker and on others.
    MixedBoundary,
}

/// Stores the [`VertexType`] of every owned vertex.
///
/// Populated once after the graph is loaded; thread-safe for reads
/// afterwards.
pub struct VertexTypeStore<I> {
    types: RwLock<HashMap<I, VertexType>>,
}

impl<I: VertexId> VertexTypeStore<I> {
    pub fn new() -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
        }
    }

    /// Classifies one owned vertex by walking its out-edges. Must not be
    /// called while compute threads are executing.
    pub fn add_vertex<V: Data, E: Data>(
        &self,
        vertex: &Vertex<I, V, E>,
        owners: &PartitionOwners<I>,
        my_worker_id: WorkerId,
    ) {
        let partition_id = owners.partition_of(vertex.id());
        let mut has_local_neighbour = false;
        let mut has_remote_neighbour = false;

        for edge in vertex.edges() {
            let owner = owners.vertex_owner(edge.target());
            if owner.worker_id != my_worker_id {
                has_remote_neighbour = true;
            } else if owner.partition_id != partition_id {
                has_local_neighbour = true;
            }
        }

        let vertex_type = match (has_local_neighbour, has_remote_neighbour) {
            (false, false) => VertexType::Internal,
            (true, false) => VertexType::LocalBoundary,
            (false, true) => VertexType::RemoteBoundary,
            (true, true) => VertexType::MixedBoundary,
        };
        self.types
            .write()
            .unwrap()
            .insert(vertex.id().clone(), vertex_type);
    }

    /// The type of the given vertex. Vertices that were never classified
    /// (for example, lazily created ones with no out-edges) are internal.
    pub fn vertex_type(&self, id: &I) -> VertexType {
        self.types
            .read()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(VertexType::Internal)
    }

    /// The number of classified vertices.
    pub fn len(&self) -> usize {
        self.types.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<I: VertexId> Default for VertexTypeStore<I> {
    fn default() -> Self {
        Self::new()
    }
}
