use std::net::SocketAddr;

use tracing::Level;

use crate::{errors::WorkerError, graph::MAX_PARTITION_ID, WorkerId};

/// Default threshold at which a per-worker message cache is flushed.
const DEFAULT_MAX_MESSAGE_BYTES_PER_WORKER: usize = 512 * 1024;
/// Default slack factor applied when sizing a fresh message cache.
const DEFAULT_REQUEST_SIZE_SLACK: f32 = 0.2;

/// The serialisability discipline applied to asynchronous execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serializability {
    /// No serialisability guarantees.
    None,
    /// Coarse serialisability via global and per-partition tokens.
    Token,
    /// Hygienic dining philosophers per boundary vertex.
    VertexLock,
    /// Hygienic dining philosophers per partition.
    PartitionLock,
}

impl Serializability {
    fn parse(value: &str) -> Result<Self, WorkerError> {
        match value {
            "none" => Ok(Serializability::None),
            "token" => Ok(Serializability::Token),
            "vertex-lock" => Ok(Serializability::VertexLock),
            "partition-lock" => Ok(Serializability::PartitionLock),
            other => Err(WorkerError::UnsupportedConfig(format!(
                "unknown serializability mode `{}`",
                other
            ))),
        }
    }
}

/// Options controlling asynchronous execution.
#[derive(Debug, Clone)]
pub struct AsyncConfiguration {
    /// Whether to use asynchronous execution.
    pub do_async: bool,
    /// Whether to use barrierless asynchronous execution.
    pub disable_barriers: bool,
    /// Whether the algorithm needs every vertex to see the latest message
    /// from each of its neighbours on every super-step.
    pub need_all_msgs: bool,
    /// Whether the algorithm has multiple computation phases.
    pub multi_phase: bool,
    /// The serialisability discipline to apply.
    pub serializability: Serializability,
    /// Whether compute reads messages from the remote store.
    pub do_remote_read: bool,
    /// Whether compute reads messages from the local store.
    pub do_local_read: bool,
}

impl Default for AsyncConfiguration {
    fn default() -> Self {
        Self {
            do_async: false,
            disable_barriers: false,
            need_all_msgs: false,
            multi_phase: false,
            serializability: Serializability::None,
            do_remote_read: true,
            do_local_read: true,
        }
    }
}

impl AsyncConfiguration {
    /// Whether asynchronous execution is enabled at all.
    pub fn is_async(&self) -> bool {
        self.do_async
    }

    /// Whether execution is serialised with global/partition tokens.
    pub fn token_serialized(&self) -> bool {
        self.serializability == Serializability::Token
    }

    /// Whether execution is serialised with per-vertex distributed locking.
    pub fn vertex_lock_serialized(&self) -> bool {
        self.serializability == Serializability::VertexLock
    }

    /// Whether execution is serialised with per-partition distributed
    /// locking.
    pub fn partition_lock_serialized(&self) -> bool {
        self.serializability == Serializability::PartitionLock
    }
}

/// Stores the configuration parameters of a [`Worker`](crate::worker::Worker).
#[derive(Debug, Clone)]
pub struct Configuration {
    /// The index of this worker.
    pub index: WorkerId,
    /// The number of workers in the cluster.
    pub num_workers: usize,
    /// The total number of partitions across the cluster.
    pub num_partitions: u32,
    /// The number of OS compute threads the worker will use.
    pub num_compute_threads: usize,
    /// The maximum number of logical super-steps before every vertex is
    /// forced to halt.
    pub max_supersteps: u64,
    /// The accumulated byte size at which a per-worker message cache is
    /// flushed into a request.
    pub max_message_bytes_per_worker: usize,
    /// Slack factor applied when reserving space for a fresh message cache.
    pub request_size_slack: f32,
    /// Byte capacity of the message buffer of a single destination vertex.
    /// Exceeding it fails the task with `PayloadTooLarge`.
    pub vertex_buffer_capacity: usize,
    /// Mapping between worker indices and data socket addresses, when
    /// running over TCP.
    pub data_addresses: Vec<SocketAddr>,
    /// The logging level of the logger initialized by the engine.
    /// If `None`, no logger is initialized.
    pub logging_level: Option<Level>,
    /// Options controlling asynchronous execution.
    pub async_conf: AsyncConfiguration,
}

impl Configuration {
    /// Creates a new worker configuration.
    pub fn new(
        index: WorkerId,
        num_workers: usize,
        num_partitions: u32,
        num_compute_threads: usize,
    ) -> Self {
        let log_level = if cfg!(debug_assertions) {
            Some(Level::DEBUG)
        } else {
            Some(Level::INFO)
        };
        Self {
            index,
            num_workers,
            num_partitions,
            num_compute_threads,
            max_supersteps: u64::MAX,
            max_message_bytes_per_worker: DEFAULT_MAX_MESSAGE_BYTES_PER_WORKER,
            request_size_slack: DEFAULT_REQUEST_SIZE_SLACK,
            vertex_buffer_capacity: i32::MAX as usize,
            data_addresses: Vec::new(),
            logging_level: log_level,
            async_conf: AsyncConfiguration::default(),
        }
    }

    /// Creates a worker configuration from command line arguments.
    pub fn from_args(args: &clap::ArgMatches) -> Result<Self, WorkerError> {
        let num_compute_threads = args
            .value_of("threads")
            .unwrap()
            .parse()
            .map_err(|_| WorkerError::UnsupportedConfig("bad thread count".to_string()))?;
        let num_partitions = args
            .value_of("partitions")
            .unwrap()
            .parse()
            .map_err(|_| WorkerError::UnsupportedConfig("bad partition count".to_string()))?;
        let index = args
            .value_of("index")
            .unwrap()
            .parse()
            .map_err(|_| WorkerError::UnsupportedConfig("bad worker index".to_string()))?;

        let data_addrs = args.value_of("data-addresses").unwrap();
        let mut data_addresses: Vec<SocketAddr> = Vec::new();
        for addr in data_addrs.split(',') {
            data_addresses.push(addr.parse().map_err(|_| {
                WorkerError::UnsupportedConfig(format!("bad socket address `{}`", addr))
            })?);
        }

        let max_supersteps = args
            .value_of("max-supersteps")
            .unwrap()
            .parse()
            .map_err(|_| WorkerError::UnsupportedConfig("bad max-supersteps".to_string()))?;

        let log_level = match args.occurrences_of("verbose") {
            0 => None,
            1 => Some(Level::WARN),
            2 => Some(Level::INFO),
            3 => Some(Level::DEBUG),
            _ => Some(Level::TRACE),
        };

        let async_conf = AsyncConfiguration {
            do_async: args.is_present("async"),
            disable_barriers: args.is_present("disable-barriers"),
            need_all_msgs: args.is_present("need-all-messages"),
            multi_phase: args.is_present("multi-phase"),
            serializability: Serializability::parse(
                args.value_of("serializability").unwrap(),
            )?,
            do_remote_read: true,
            do_local_read: true,
        };

        let num_workers = data_addresses.len().max(1);
        let config = Self {
            index,
            num_workers,
            num_partitions,
            num_compute_threads,
            max_supersteps,
            max_message_bytes_per_worker: DEFAULT_MAX_MESSAGE_BYTES_PER_WORKER,
            request_size_slack: DEFAULT_REQUEST_SIZE_SLACK,
            vertex_buffer_capacity: i32::MAX as usize,
            data_addresses,
            logging_level: log_level,
            async_conf,
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the maximum number of logical super-steps.
    pub fn with_max_supersteps(mut self, max_supersteps: u64) -> Self {
        self.max_supersteps = max_supersteps;
        self
    }

    /// Sets the flush threshold of the per-worker message caches.
    pub fn with_max_message_bytes_per_worker(mut self, bytes: usize) -> Self {
        self.max_message_bytes_per_worker = bytes;
        self
    }

    /// Sets the byte capacity of a single destination vertex's buffer.
    pub fn with_vertex_buffer_capacity(mut self, capacity: usize) -> Self {
        self.vertex_buffer_capacity = capacity;
        self
    }

    /// Sets the options controlling asynchronous execution.
    pub fn with_async_conf(mut self, async_conf: AsyncConfiguration) -> Self {
        self.async_conf = async_conf;
        self
    }

    /// Sets the logging level.
    pub fn with_logging_level(mut self, level: Level) -> Self {
        self.logging_level = Some(level);
        self
    }

    /// No logger is initialized if this method is called.
    pub fn disable_logger(mut self) -> Self {
        self.logging_level = None;
        self
    }

    /// Checks the configuration for unsupported option combinations.
    ///
    /// The checks run again when a worker is constructed, so programmatic
    /// configurations cannot bypass them.
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.num_partitions == 0 || self.num_partitions - 1 > MAX_PARTITION_ID {
            return Err(WorkerError::UnsupportedConfig(format!(
                "partition ids must fit in 31 bits (at most {} partitions)",
                MAX_PARTITION_ID as u64 + 1
            )));
        }
        if self.num_workers == 0 {
            return Err(WorkerError::UnsupportedConfig(
                "at least one worker is required".to_string(),
            ));
        }
        if self.num_compute_threads == 0 {
            return Err(WorkerError::UnsupportedConfig(
                "at least one compute thread is required".to_string(),
            ));
        }
        if self.async_conf.disable_barriers && !self.async_conf.do_async {
            return Err(WorkerError::UnsupportedConfig(
                "disable_barriers requires do_async".to_string(),
            ));
        }
        if self.async_conf.serializability != Serializability::None
            && !self.async_conf.do_async
        {
            // Serialisability under pure BSP requires conditions that are
            // not performant; use AP or BAP instead.
            return Err(WorkerError::UnsupportedConfig(
                "serializability disciplines require do_async".to_string(),
            ));
        }
        if self.async_conf.need_all_msgs && !self.async_conf.do_async {
            return Err(WorkerError::UnsupportedConfig(
                "need_all_msgs requires do_async".to_string(),
            ));
        }
        if self.async_conf.multi_phase && !self.async_conf.do_async {
            return Err(WorkerError::UnsupportedConfig(
                "multi_phase requires do_async".to_string(),
            ));
        }
        Ok(())
    }
}
