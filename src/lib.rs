//! Harary is the worker-side core of a distributed vertex-centric graph
//! processing engine. A master coordinates a fleet of workers; each
//! worker owns one or more partitions of the graph, runs a user-supplied
//! [`Computation`](crate::graph::Computation) over the vertices it owns,
//! and exchanges messages with the other workers between or during
//! logical super-steps.
//!
//! ## Execution disciplines
//! The engine supports three execution disciplines, selected through
//! [`AsyncConfiguration`](crate::configuration::AsyncConfiguration):
//! 1. Synchronous bulk-synchronous-parallel execution, where message
//!    stores rotate at a barrier between super-steps and every message
//!    becomes visible exactly one super-step after it was sent.
//! 2. Asynchronous execution with barriers, where messages become
//!    visible as soon as they arrive; messages between co-located
//!    vertices short-circuit the network entirely.
//! 3. Barrierless asynchronous execution, where a worker keeps running
//!    logical super-steps while local messages are pending and only
//!    joins a global barrier when it runs dry.
//!
//! Asynchronous execution can additionally be made serialisable, either
//! coarsely via circulating tokens, or precisely via the hygienic
//! dining-philosophers protocol at vertex or partition granularity
//! (see [`PhilosophersTable`](crate::worker::PhilosophersTable)).
//!
//! ## Example
//! This example wires a single-worker cluster and runs a computation to
//! completion.
//!
//! ```ignore
//! let config = Configuration::new(0, 1, 4, 2);
//! let owners = Arc::new(PartitionOwners::round_robin(
//!     4, 1, Box::new(HashPartitioner::new(4)),
//! ));
//! let network = InProcessNetwork::new();
//! let worker: Arc<Worker<u64, f64, f64, f64>> =
//!     Worker::new(config, 0, 0, owners)?;
//! worker.set_client(Arc::new(network.client(0)));
//! network.register(0, worker.clone());
//!
//! for vertex in vertices {
//!     worker.add_vertex(vertex)?;
//! }
//! worker.finish_loading()?;
//!
//! loop {
//!     worker.prepare_superstep()?;
//!     let stats = worker.run_superstep(|| ShortestPaths::new(1))?;
//!     worker.finish_global_superstep();
//!     if stats.all_halted() && stats.messages_sent == 0 {
//!         break;
//!     }
//! }
//! ```
//!
//! ## Collaborators
//! Graph ingest and partitioning, checkpointing, aggregators, output
//! writers and cluster membership are external collaborators. The engine
//! only assumes a reliable unicast transport
//! ([`WorkerClient`](crate::communication::WorkerClient)) and a stable
//! per-super-step partition owner table
//! ([`PartitionOwners`](crate::graph::PartitionOwners)).

// Libraries used in this file.
use clap::{App, Arg};

// Private submodules
mod configuration;

// Public submodules
pub mod communication;
pub mod errors;
pub mod graph;
pub mod worker;

// Public exports
pub use configuration::{AsyncConfiguration, Configuration, Serializability};

/// A unique identifier for a worker.
pub type WorkerId = usize;

/// The transport address of a worker's task. All partitions local to one
/// worker share its task id.
pub type TaskId = usize;

/// Initializes a terminal logger honouring the configuration's logging
/// level. Does nothing if the configuration disabled logging or a
/// subscriber is already installed.
pub fn init_logging(config: &Configuration) {
    if let Some(level) = config.logging_level {
        let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
    }
}

/// Defines command line arguments for running a multi-worker job.
pub fn new_app(name: &str) -> App {
    App::new(name)
        .arg(
            Arg::with_name("threads")
                .short("t")
                .long("threads")
                .default_value("4")
                .help("Number of compute threads per worker"),
        )
        .arg(
            Arg::with_name("partitions")
                .short("p")
                .long("partitions")
                .default_value("1")
                .help("Total number of graph partitions across the cluster"),
        )
        .arg(
            Arg::with_name("data-addresses")
                .short("d")
                .long("data-addresses")
                .default_value("127.0.0.1:9000")
                .help("Comma separated list of data socket addresses of all workers"),
        )
        .arg(
            Arg::with_name("index")
                .short("i")
                .long("index")
                .default_value("0")
                .help("Current worker index"),
        )
        .arg(
            Arg::with_name("max-supersteps")
                .long("max-supersteps")
                .default_value("18446744073709551615")
                .help("Maximum number of logical super-steps"),
        )
        .arg(
            Arg::with_name("async")
                .long("async")
                .takes_value(false)
                .help("Use asynchronous execution"),
        )
        .arg(
            Arg::with_name("disable-barriers")
                .long("disable-barriers")
                .takes_value(false)
                .help("Use barrierless asynchronous execution"),
        )
        .arg(
            Arg::with_name("need-all-messages")
                .long("need-all-messages")
                .takes_value(false)
                .help("Every vertex needs its neighbours' latest messages each super-step"),
        )
        .arg(
            Arg::with_name("multi-phase")
                .long("multi-phase")
                .takes_value(false)
                .help("The computation has multiple phases"),
        )
        .arg(
            Arg::with_name("serializability")
                .long("serializability")
                .default_value("none")
                .possible_values(&["none", "token", "vertex-lock", "partition-lock"])
                .help("Serialisability discipline for asynchronous execution"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .takes_value(false)
                .help("Sets the level of verbosity"),
        )
}
