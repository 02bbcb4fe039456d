//! The data model of the engine: vertices, edges, partitions, and the
//! traits user-supplied payload types must satisfy.

use std::fmt::Debug;
use std::hash::Hash;

use serde::{de::DeserializeOwned, Serialize};

// Private submodules
mod computation;
mod partition;
mod vertex;
mod vertex_type;

// Public exports
pub use computation::{
    ComputeContext, Computation, DefaultVertexResolver, Messages, VertexMutations,
    VertexResolver,
};
pub use partition::{
    GraphPartitioner, HashPartitioner, Partition, PartitionOwner, PartitionOwners,
    PartitionStats, PartitionStore,
};
pub use vertex::{Edge, Vertex};
pub use vertex_type::{VertexType, VertexTypeStore};

/// A unique identifier for a partition.
///
/// The high bit of the 32-bit wire field is reserved for the next-phase
/// flag, so valid partition ids occupy 31 bits.
pub type PartitionId = u32;

/// The largest valid partition id.
pub const MAX_PARTITION_ID: PartitionId = (1 << 31) - 1;

/// Trait for valid vertex, edge and message payloads. The data must be
/// clonable, sendable between threads and serializable.
pub trait Data: 'static + Clone + Send + Sync + Debug + Serialize + DeserializeOwned {}
/// Any type that is clonable, sendable, and can be serialized and
/// deserialized implements `Data`.
impl<T> Data for T where T: 'static + Clone + Send + Sync + Debug + Serialize + DeserializeOwned {}

/// Trait for vertex identifiers.
///
/// Identifiers are opaque comparable keys. Fixed-width integer ids
/// additionally expose a [`lock_id`](VertexId::lock_id), which the
/// distributed locking disciplines require.
pub trait VertexId: Data + Eq + Ord + Hash {
    /// A dense numeric rendering of the id, used to key philosopher state.
    ///
    /// Returns `None` for id types without a fixed-width integer form;
    /// such ids cannot be used with the vertex- or partition-lock
    /// serialisability disciplines.
    fn lock_id(&self) -> Option<u64> {
        None
    }
}

macro_rules! impl_vertex_id_for_int {
    ($($t:ty),*) => {
        $(
            impl VertexId for $t {
                fn lock_id(&self) -> Option<u64> {
                    Some(*self as u64)
                }
            }
        )*
    };
}

impl_vertex_id_for_int!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl VertexId for Vec<u8> {}
impl VertexId for String {}
