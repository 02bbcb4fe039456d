use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, RwLock};

use crate::communication::{WorkerClient, WorkerRequest};
use crate::errors::WorkerError;
use crate::graph::{Data, Partition, PartitionId, PartitionOwners, Vertex, VertexId};
use crate::TaskId;

/// Mask for the have-token bit.
const MASK_HAVE_TOKEN: u8 = 0x1;
/// Mask for the have-fork bit.
const MASK_HAVE_FORK: u8 = 0x2;
/// Mask for the is-dirty bit.
const MASK_IS_DIRTY: u8 = 0x4;

fn have_token(state: u8) -> bool {
    state & MASK_HAVE_TOKEN != 0
}

fn have_fork(state: u8) -> bool {
    state & MASK_HAVE_FORK != 0
}

fn is_dirty(state: u8) -> bool {
    state & MASK_IS_DIRTY != 0
}

/// The granularity at which philosophers sit at the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhilosopherKind {
    /// One philosopher per boundary vertex.
    Vertex,
    /// One philosopher per partition with cross-partition edges.
    Partition,
}

/// The identity of a philosopher or one of its neighbours, as it appears
/// on the wire.
#[derive(Debug, Clone)]
enum PeerId<I> {
    Vertex(I),
    Partition(PartitionId),
}

impl<I: VertexId> PeerId<I> {
    fn key(&self) -> Result<u64, WorkerError> {
        match self {
            PeerId::Vertex(id) => id.lock_id().ok_or_else(|| {
                WorkerError::UnsupportedConfig(
                    "distributed locking requires integer vertex ids".to_string(),
                )
            }),
            PeerId::Partition(partition_id) => Ok(u64::from(*partition_id)),
        }
    }
}

struct NeighbourEntry<I> {
    peer: PeerId<I>,
    state: u8,
}

struct Philosopher<I> {
    id: PeerId<I>,
    neighbours: Arc<Mutex<HashMap<u64, NeighbourEntry<I>>>>,
}

/// Implements the hygienic dining philosophers solution over the
/// boundary vertices (or partitions) local to this worker.
///
/// Each philosopher tracks, per neighbour, whether it holds the token,
/// whether it holds the fork, and whether the fork is dirty. For every
/// edge the fork starts dirty at the larger-id endpoint and the token at
/// the smaller-id endpoint, which makes the initial precedence graph
/// acyclic. At any instant exactly one endpoint of an edge holds the
/// fork.
pub struct PhilosophersTable<I: VertexId> {
    kind: PhilosopherKind,
    my_task_id: TaskId,
    owners: Arc<PartitionOwners<I>>,
    philosophers: RwLock<HashMap<u64, Philosopher<I>>>,
    /// Lock for the condition variable below.
    cv_lock: Mutex<()>,
    /// Condition variable indicating arrival of a fork.
    fork_arrived: Condvar,
    /// Per-partition record of whether every vertex was halted after the
    /// last pass. Used by the partition granularity only.
    halted_partitions: Mutex<HashMap<PartitionId, bool>>,
}

impl<I: VertexId> PhilosophersTable<I> {
    pub fn new(kind: PhilosopherKind, my_task_id: TaskId, owners: Arc<PartitionOwners<I>>) -> Self {
        Self {
            kind,
            my_task_id,
            owners,
            philosophers: RwLock::new(HashMap::new()),
            cv_lock: Mutex::new(()),
            fork_arrived: Condvar::new(),
            halted_partitions: Mutex::new(HashMap::new()),
        }
    }

    /// Adds and initializes a vertex as a philosopher if it is a boundary
    /// vertex. Must not be called while compute threads are executing.
    pub fn add_vertex_if_boundary<V: Data, E: Data>(
        &self,
        vertex: &Vertex<I, V, E>,
    ) -> Result<(), WorkerError> {
        let partition_id = self.owners.partition_of(vertex.id());
        let p_key = PeerId::Vertex(vertex.id().clone()).key()?;

        let mut neighbours: Option<HashMap<u64, NeighbourEntry<I>>> = None;
        for edge in vertex.edges() {
            let dst_partition_id = self.owners.partition_of(edge.target());
            // Neighbours in the same partition are executed by the same
            // thread and need no forks; a vertex with no out-of-partition
            // neighbours is not a philosopher at all.
            if dst_partition_id == partition_id {
                continue;
            }
            let n_key = PeerId::Vertex(edge.target().clone()).key()?;
            // Skip self-loops.
            if n_key == p_key {
                continue;
            }
            // For an acyclic precedence graph, initialize the token at
            // the smaller id and the dirty fork at the larger id.
            let state = if n_key < p_key {
                MASK_HAVE_FORK | MASK_IS_DIRTY
            } else {
                MASK_HAVE_TOKEN
            };
            neighbours
                .get_or_insert_with(|| HashMap::with_capacity(vertex.num_edges()))
                .insert(
                    n_key,
                    NeighbourEntry {
                        peer: PeerId::Vertex(edge.target().clone()),
                        state,
                    },
                );
        }

        if let Some(neighbours) = neighbours {
            self.insert_philosopher(p_key, PeerId::Vertex(vertex.id().clone()), neighbours)?;
        }
        Ok(())
    }

    /// Adds a partition as a philosopher whose neighbours are the
    /// partitions its vertices point into. Must not be called while
    /// compute threads are executing.
    pub fn add_partition<V: Data, E: Data>(
        &self,
        partition: &Partition<I, V, E>,
    ) -> Result<(), WorkerError> {
        let p_key = u64::from(partition.id());
        let mut neighbours: HashMap<u64, NeighbourEntry<I>> = HashMap::new();

        for vertex in partition.iter() {
            for edge in vertex.edges() {
                let dst_partition_id = self.owners.partition_of(edge.target());
                if dst_partition_id == partition.id() {
                    continue;
                }
                let n_key = u64::from(dst_partition_id);
                let state = if n_key < p_key {
                    MASK_HAVE_FORK | MASK_IS_DIRTY
                } else {
                    MASK_HAVE_TOKEN
                };
                neighbours.entry(n_key).or_insert(NeighbourEntry {
                    peer: PeerId::Partition(dst_partition_id),
                    state,
                });
            }
        }

        self.halted_partitions
            .lock()
            .unwrap()
            .insert(partition.id(), false);

        if !neighbours.is_empty() {
            self.insert_philosopher(p_key, PeerId::Partition(partition.id()), neighbours)?;
        }
        Ok(())
    }

    fn insert_philosopher(
        &self,
        key: u64,
        id: PeerId<I>,
        neighbours: HashMap<u64, NeighbourEntry<I>>,
    ) -> Result<(), WorkerError> {
        let mut philosophers = self.philosophers.write().unwrap();
        if philosophers
            .insert(
                key,
                Philosopher {
                    id,
                    neighbours: Arc::new(Mutex::new(neighbours)),
                },
            )
            .is_some()
        {
            return Err(WorkerError::DuplicateNeighbour(key));
        }
        Ok(())
    }

    /// Whether the given key identifies a philosopher on this worker.
    /// Thread-safe for all concurrent calls except the registration
    /// calls.
    pub fn is_boundary(&self, key: u64) -> bool {
        self.philosophers.read().unwrap().contains_key(&key)
    }

    fn philosopher(&self, key: u64) -> Option<(PeerId<I>, Arc<Mutex<HashMap<u64, NeighbourEntry<I>>>>)> {
        let philosophers = self.philosophers.read().unwrap();
        philosophers
            .get(&key)
            .map(|p| (p.id.clone(), Arc::clone(&p.neighbours)))
    }

    /// Blocking call that returns once the philosopher holds a clean fork
    /// with every neighbour and may start eating.
    ///
    /// A philosopher without registered neighbours holds all of its forks
    /// vacuously.
    pub fn acquire_forks(
        &self,
        key: u64,
        client: &Arc<dyn WorkerClient<I>>,
    ) -> Result<(), WorkerError> {
        let Some((my_id, neighbours)) = self.philosopher(key) else {
            return Ok(());
        };
        tracing::trace!("philosopher {}: acquiring forks", key);

        let mut token_requests: Vec<PeerId<I>> = Vec::new();
        let mut need_forks = false;
        {
            let mut neighbours = neighbours.lock().map_err(|_| WorkerError::Interrupted)?;
            for entry in neighbours.values_mut() {
                if have_token(entry.state) && !have_fork(entry.state) {
                    // The state must be updated before the token request
                    // goes out: a local request satisfied immediately
                    // will modify this entry again.
                    entry.state &= !MASK_HAVE_TOKEN;
                    need_forks = true;
                    token_requests.push(entry.peer.clone());
                } else if have_fork(entry.state) && is_dirty(entry.state) {
                    // Our own dirty fork only needs cleaning in place.
                    entry.state &= !MASK_IS_DIRTY;
                }
            }
        }

        let mut need_remote_fork = false;
        for peer in &token_requests {
            need_remote_fork |= self.send_token(client, &my_id, peer)?;
        }
        if need_remote_fork {
            client.wait_all_requests();
        }

        if !need_forks {
            tracing::trace!("philosopher {}: got all forks", key);
            return Ok(());
        }

        loop {
            // The whole recheck happens under the condition variable's
            // lock so a signal between the check and the wait is never
            // missed. Some if not all forks may have already arrived.
            let guard = self.cv_lock.lock().map_err(|_| WorkerError::Interrupted)?;
            let missing_fork = {
                let neighbours = neighbours.lock().map_err(|_| WorkerError::Interrupted)?;
                neighbours.values().any(|entry| !have_fork(entry.state))
            };
            if !missing_fork {
                tracing::trace!("philosopher {}: got all forks", key);
                return Ok(());
            }
            let _guard = self
                .fork_arrived
                .wait(guard)
                .map_err(|_| WorkerError::Interrupted)?;
        }
    }

    /// Dirties used forks and satisfies any pending requests for them.
    /// Called after eating.
    pub fn release_forks(
        &self,
        key: u64,
        client: &Arc<dyn WorkerClient<I>>,
    ) -> Result<(), WorkerError> {
        let Some((my_id, neighbours)) = self.philosopher(key) else {
            return Ok(());
        };
        tracing::trace!("philosopher {}: releasing forks", key);

        // All held forks are implicitly dirty now.
        let mut fork_sends: Vec<PeerId<I>> = Vec::new();
        {
            let mut neighbours = neighbours.lock().map_err(|_| WorkerError::Interrupted)?;
            for entry in neighbours.values_mut() {
                if have_token(entry.state) {
                    // The neighbour has requested this fork; hand it off
                    // clean.
                    entry.state &= !MASK_HAVE_FORK;
                    fork_sends.push(entry.peer.clone());
                } else {
                    // Explicitly dirty the fork so a later token request
                    // is answered immediately.
                    entry.state |= MASK_IS_DIRTY;
                }
            }
        }

        let mut need_flush = false;
        for peer in &fork_sends {
            need_flush |= self.send_fork(client, &my_id, peer)?;
        }
        if need_flush {
            client.wait_all_requests();
        }
        Ok(())
    }

    /// Processes a received token, which doubles as a fork request.
    pub fn receive_token(
        &self,
        sender_key: u64,
        receiver_key: u64,
        client: &Arc<dyn WorkerClient<I>>,
    ) -> Result<(), WorkerError> {
        let (my_id, neighbours) = self.philosopher(receiver_key).ok_or_else(|| {
            WorkerError::UnsupportedConfig(format!(
                "received a token for unknown philosopher {}",
                receiver_key
            ))
        })?;

        let mut fork_send: Option<PeerId<I>> = None;
        {
            let mut neighbours = neighbours.lock().map_err(|_| WorkerError::Interrupted)?;
            let entry = neighbours.get_mut(&sender_key).ok_or_else(|| {
                WorkerError::UnsupportedConfig(format!(
                    "received a token from unknown neighbour {}",
                    sender_key
                ))
            })?;
            entry.state |= MASK_HAVE_TOKEN;
            tracing::trace!("philosopher {}: got token from {}", receiver_key, sender_key);

            // A dirty fork is surrendered immediately; a clean one is
            // released once its holder dirties it.
            if is_dirty(entry.state) {
                entry.state &= !MASK_HAVE_FORK;
                entry.state &= !MASK_IS_DIRTY;
                fork_send = Some(entry.peer.clone());
            }
        }

        if let Some(peer) = fork_send {
            let remote = self.send_fork(client, &my_id, &peer)?;
            if remote {
                // Draining the transport from the arrival path would
                // block it on itself; run the barrier on a helper thread.
                let client = Arc::clone(client);
                std::thread::spawn(move || client.wait_all_requests());
            }
        }
        Ok(())
    }

    /// Processes a received fork.
    pub fn receive_fork(&self, sender_key: u64, receiver_key: u64) -> Result<(), WorkerError> {
        let (_, neighbours) = self.philosopher(receiver_key).ok_or_else(|| {
            WorkerError::UnsupportedConfig(format!(
                "received a fork for unknown philosopher {}",
                receiver_key
            ))
        })?;
        {
            let mut neighbours = neighbours.lock().map_err(|_| WorkerError::Interrupted)?;
            let entry = neighbours.get_mut(&sender_key).ok_or_else(|| {
                WorkerError::UnsupportedConfig(format!(
                    "received a fork from unknown neighbour {}",
                    sender_key
                ))
            })?;
            entry.state |= MASK_HAVE_FORK;
            tracing::trace!("philosopher {}: got fork from {}", receiver_key, sender_key);
        }

        // Signal fork arrival.
        let _guard = self.cv_lock.lock().map_err(|_| WorkerError::Interrupted)?;
        self.fork_arrived.notify_all();
        Ok(())
    }

    /// Sends a token (request for a fork). Returns true if the receiver
    /// is remote, false if it was handled locally.
    fn send_token(
        &self,
        client: &Arc<dyn WorkerClient<I>>,
        sender: &PeerId<I>,
        receiver: &PeerId<I>,
    ) -> Result<bool, WorkerError> {
        let dst_task_id = self.task_of(receiver);
        if dst_task_id == self.my_task_id {
            self.receive_token(sender.key()?, receiver.key()?, client)?;
            Ok(false)
        } else {
            client
                .send_request(dst_task_id, self.token_request(sender, receiver))
                .map_err(WorkerError::Communication)?;
            Ok(true)
        }
    }

    /// Sends a fork. Returns true if the receiver is remote, false if it
    /// was handled locally.
    fn send_fork(
        &self,
        client: &Arc<dyn WorkerClient<I>>,
        sender: &PeerId<I>,
        receiver: &PeerId<I>,
    ) -> Result<bool, WorkerError> {
        let dst_task_id = self.task_of(receiver);
        if dst_task_id == self.my_task_id {
            self.receive_fork(sender.key()?, receiver.key()?)?;
            Ok(false)
        } else {
            client
                .send_request(dst_task_id, self.fork_request(sender, receiver))
                .map_err(WorkerError::Communication)?;
            Ok(true)
        }
    }

    fn task_of(&self, peer: &PeerId<I>) -> TaskId {
        match peer {
            PeerId::Vertex(id) => self.owners.vertex_owner(id).task_id,
            PeerId::Partition(partition_id) => {
                self.owners.partition_owner(*partition_id).task_id
            }
        }
    }

    fn token_request(&self, sender: &PeerId<I>, receiver: &PeerId<I>) -> WorkerRequest<I> {
        match (sender, receiver) {
            (PeerId::Vertex(s), PeerId::Vertex(r)) => WorkerRequest::SendToken {
                sender: s.clone(),
                receiver: r.clone(),
            },
            (PeerId::Partition(s), PeerId::Partition(r)) => WorkerRequest::SendPartitionToken {
                sender: *s,
                receiver: *r,
            },
            // A table holds philosophers of a single granularity.
            _ => unreachable!("mixed philosopher granularities"),
        }
    }

    fn fork_request(&self, sender: &PeerId<I>, receiver: &PeerId<I>) -> WorkerRequest<I> {
        match (sender, receiver) {
            (PeerId::Vertex(s), PeerId::Vertex(r)) => WorkerRequest::SendFork {
                sender: s.clone(),
                receiver: r.clone(),
            },
            (PeerId::Partition(s), PeerId::Partition(r)) => WorkerRequest::SendPartitionFork {
                sender: *s,
                receiver: *r,
            },
            _ => unreachable!("mixed philosopher granularities"),
        }
    }

    /// Records whether every vertex of the partition was halted after its
    /// last pass.
    pub fn set_all_vertices_halted(&self, partition_id: PartitionId, halted: bool) {
        self.halted_partitions
            .lock()
            .unwrap()
            .insert(partition_id, halted);
    }

    /// Whether every vertex of the partition was halted after its last
    /// pass.
    pub fn all_vertices_halted(&self, partition_id: PartitionId) -> bool {
        self.halted_partitions
            .lock()
            .unwrap()
            .get(&partition_id)
            .copied()
            .unwrap_or(false)
    }

    /// The granularity of this table.
    pub fn kind(&self) -> PhilosopherKind {
        self.kind
    }

    /// Snapshot of one philosopher's per-neighbour state as
    /// (neighbour key, have-token, have-fork, is-dirty) tuples. Intended
    /// for inspection in tests and debugging.
    pub fn neighbour_states(&self, key: u64) -> Vec<(u64, bool, bool, bool)> {
        match self.philosopher(key) {
            Some((_, neighbours)) => {
                let neighbours = neighbours.lock().unwrap();
                let mut states: Vec<_> = neighbours
                    .iter()
                    .map(|(n_key, entry)| {
                        (
                            *n_key,
                            have_token(entry.state),
                            have_fork(entry.state),
                            is_dirty(entry.state),
                        )
                    })
                    .collect();
                states.sort_unstable_by_key(|s| s.0);
                states
            }
            None => Vec::new(),
        }
    }
}
