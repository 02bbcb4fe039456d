use std::sync::{Arc, Mutex};

use crate::communication::{decode_phase, VertexIdMessages};
use crate::configuration::Configuration;
use crate::errors::WorkerError;
use crate::graph::{Data, PartitionOwners, VertexId};
use crate::worker::message_store::{MessageStore, MessageStoreMode};

struct Stores<I: VertexId, M: Data> {
    /// BSP store for messages which will be consumed in the next
    /// super-step.
    incoming: Option<Arc<MessageStore<I, M>>>,
    /// BSP store for messages received in the previous super-step and
    /// consumed in the current one.
    current: Option<Arc<MessageStore<I, M>>>,
    /// Async store for messages from remote workers. Persists across the
    /// super-steps of one phase.
    remote: Option<Arc<MessageStore<I, M>>>,
    /// Async store for messages that short-circuited the network.
    /// Persists across the super-steps of one phase.
    local: Option<Arc<MessageStore<I, M>>>,
    /// Remote store holding messages for the next computation phase.
    next_phase_remote: Option<Arc<MessageStore<I, M>>>,
    /// Local store holding messages for the next computation phase.
    next_phase_local: Option<Arc<MessageStore<I, M>>>,
}

/// The set of message stores a worker serves, and their rotation at
/// super-step boundaries.
///
/// Rotation is a barrier step: no compute thread may run while
/// [`prepare_superstep`](ServerData::prepare_superstep) executes.
pub struct ServerData<I: VertexId, M: Data> {
    config: Arc<Configuration>,
    owners: Arc<PartitionOwners<I>>,
    stores: Mutex<Stores<I, M>>,
}

impl<I: VertexId, M: Data> ServerData<I, M> {
    /// The worker-local partition owner table.
    pub fn owners(&self) -> &Arc<PartitionOwners<I>> {
        &self.owners
    }

    pub fn new(config: Arc<Configuration>, owners: Arc<PartitionOwners<I>>) -> Self {
        Self {
            config,
            owners,
            stores: Mutex::new(Stores {
                incoming: None,
                current: None,
                remote: None,
                local: None,
                next_phase_remote: None,
                next_phase_local: None,
            }),
        }
    }

    fn new_bsp_store(&self) -> Arc<MessageStore<I, M>> {
        Arc::new(MessageStore::new(
            MessageStoreMode::Append,
            Arc::clone(&self.owners),
            self.config.vertex_buffer_capacity,
        ))
    }

    fn new_async_store(&self) -> Arc<MessageStore<I, M>> {
        let mode = if self.config.async_conf.need_all_msgs {
            MessageStoreMode::OverwriteBySource
        } else {
            MessageStoreMode::Append
        };
        Arc::new(MessageStore::new(
            mode,
            Arc::clone(&self.owners),
            self.config.vertex_buffer_capacity,
        ))
    }

    /// Rotates the stores for the next super-step.
    ///
    /// Under BSP the previous `current` store is cleared, `incoming`
    /// becomes `current`, and a fresh `incoming` is allocated: each
    /// super-step consumes exactly what the prior one produced. Async
    /// stores are created once and persist across the super-steps of a
    /// phase; on a phase change the next-phase stores are promoted and
    /// fresh next-phase stores allocated.
    pub fn prepare_superstep(&self, new_phase: bool) {
        let mut stores = self.stores.lock().unwrap();
        let async_conf = &self.config.async_conf;

        if !async_conf.is_async() {
            if let Some(current) = stores.current.take() {
                current.clear_all();
            }
            stores.current = Some(
                stores
                    .incoming
                    .take()
                    .unwrap_or_else(|| self.new_bsp_store()),
            );
            stores.incoming = Some(self.new_bsp_store());
            return;
        }

        if async_conf.multi_phase && new_phase {
            // On the first phase the next-phase stores are still unset;
            // the lazy creation below produces the current-phase stores.
            if stores.next_phase_remote.is_some() {
                stores.remote = stores.next_phase_remote.take();
                stores.local = stores.next_phase_local.take();
            }
            stores.next_phase_remote = Some(self.new_async_store());
            stores.next_phase_local = Some(self.new_async_store());
        }

        if stores.remote.is_none() {
            stores.remote = Some(self.new_async_store());
        }
        if stores.local.is_none() {
            stores.local = Some(self.new_async_store());
        }
        if async_conf.multi_phase {
            if stores.next_phase_remote.is_none() {
                stores.next_phase_remote = Some(self.new_async_store());
            }
            if stores.next_phase_local.is_none() {
                stores.next_phase_local = Some(self.new_async_store());
            }
        }
    }

    /// The BSP store consumed by the current super-step.
    pub fn current_message_store(&self) -> Arc<MessageStore<I, M>> {
        let mut stores = self.stores.lock().unwrap();
        Arc::clone(
            stores
                .current
                .get_or_insert_with(|| self.new_bsp_store()),
        )
    }

    /// The BSP store messages arrive into.
    pub fn incoming_message_store(&self) -> Arc<MessageStore<I, M>> {
        let mut stores = self.stores.lock().unwrap();
        Arc::clone(
            stores
                .incoming
                .get_or_insert_with(|| self.new_bsp_store()),
        )
    }

    /// The async store of messages from remote workers.
    pub fn remote_message_store(&self) -> Arc<MessageStore<I, M>> {
        let mut stores = self.stores.lock().unwrap();
        Arc::clone(
            stores
                .remote
                .get_or_insert_with(|| self.new_async_store()),
        )
    }

    /// The async store of locally short-circuited messages.
    pub fn local_message_store(&self) -> Arc<MessageStore<I, M>> {
        let mut stores = self.stores.lock().unwrap();
        Arc::clone(stores.local.get_or_insert_with(|| self.new_async_store()))
    }

    /// The remote store of the next computation phase.
    pub fn next_phase_remote_message_store(&self) -> Arc<MessageStore<I, M>> {
        let mut stores = self.stores.lock().unwrap();
        Arc::clone(
            stores
                .next_phase_remote
                .get_or_insert_with(|| self.new_async_store()),
        )
    }

    /// The local store of the next computation phase.
    pub fn next_phase_local_message_store(&self) -> Arc<MessageStore<I, M>> {
        let mut stores = self.stores.lock().unwrap();
        Arc::clone(
            stores
                .next_phase_local
                .get_or_insert_with(|| self.new_async_store()),
        )
    }

    /// Routes one inbound message batch into the store matching the
    /// execution discipline and the phase flag of its partition id field.
    pub fn handle_worker_messages(
        &self,
        batches: Vec<(u32, VertexIdMessages)>,
    ) -> Result<(), WorkerError> {
        for (raw_partition_id, batch) in batches {
            let (partition_id, for_next_phase) = decode_phase(raw_partition_id);
            let store = if !self.config.async_conf.is_async() {
                self.incoming_message_store()
            } else if for_next_phase {
                self.next_phase_remote_message_store()
            } else {
                self.remote_message_store()
            };
            store.add_partition_messages(partition_id, &batch)?;
        }
        Ok(())
    }
}
