use harary::errors::WorkerError;
use harary::graph::{ComputeContext, Computation, Messages, Vertex};

mod utils;
use utils::{vertex, ShortestPaths, TestCluster};

#[test]
fn shortest_paths_from_a_single_source() {
    let cluster: TestCluster<f64, f64, f64> = TestCluster::new(1, 2, |config| config);
    cluster.add_vertex(vertex(1, f64::MAX, &[(2, 1.0), (3, 5.0)]));
    cluster.add_vertex(vertex(2, f64::MAX, &[(3, 1.0)]));
    cluster.add_vertex(vertex(3, f64::MAX, &[]));
    cluster.finish_loading();

    let rounds = cluster.run_to_completion(|| ShortestPaths { source: 1 }, 10);

    assert_eq!(cluster.vertex_value(1), Some(0.0));
    assert_eq!(cluster.vertex_value(2), Some(1.0));
    assert_eq!(cluster.vertex_value(3), Some(2.0));
    assert!(rounds <= 4, "expected convergence in four rounds, took {}", rounds);
}

/// Sends a single message in super-step 0 and accumulates everything
/// received afterwards.
struct SendOnce;

impl Computation<u64, f64, f64> for SendOnce {
    type Message = f64;

    fn compute(
        &mut self,
        ctx: &mut ComputeContext<'_, u64, f64>,
        vertex: &mut Vertex<u64, f64, f64>,
        messages: Messages<f64>,
    ) -> Result<(), WorkerError> {
        for message in messages {
            *vertex.value_mut() += message;
        }
        if ctx.superstep() == 0 {
            ctx.send_message_to_all_edges(vertex, &1.0)?;
        }
        vertex.vote_to_halt();
        Ok(())
    }
}

#[test]
fn a_message_is_delivered_exactly_once_in_the_next_superstep() {
    let cluster: TestCluster<f64, f64, f64> = TestCluster::new(2, 4, |config| config);
    // 1 -> 2 and 2 -> 1 across the two workers.
    cluster.add_vertex(vertex(1, 0.0, &[(2, 0.0)]));
    cluster.add_vertex(vertex(2, 0.0, &[(1, 0.0)]));
    cluster.finish_loading();

    // Round 1 sends; round 2 delivers and wakes; round 3 observes
    // silence.
    let rounds = cluster.run_to_completion(|| SendOnce, 10);

    assert_eq!(cluster.vertex_value(1), Some(1.0));
    assert_eq!(cluster.vertex_value(2), Some(1.0));
    assert!(rounds <= 3);
}

/// Never halts voluntarily and keeps the message volume constant.
struct ChatterBox;

impl Computation<u64, f64, f64> for ChatterBox {
    type Message = f64;

    fn compute(
        &mut self,
        ctx: &mut ComputeContext<'_, u64, f64>,
        vertex: &mut Vertex<u64, f64, f64>,
        messages: Messages<f64>,
    ) -> Result<(), WorkerError> {
        for _ in messages {}
        ctx.send_message_to_all_edges(vertex, &1.0)?;
        Ok(())
    }
}

#[test]
fn vertices_halt_unconditionally_at_the_superstep_limit() {
    let cluster: TestCluster<f64, f64, f64> =
        TestCluster::new(1, 2, |config| config.with_max_supersteps(5));
    cluster.add_vertex(vertex(1, 0.0, &[(2, 0.0)]));
    cluster.add_vertex(vertex(2, 0.0, &[(1, 0.0)]));
    cluster.finish_loading();

    // Super-steps 0 through 4 compute; super-step 5 halts everything.
    let rounds = cluster.run_to_completion(|| ChatterBox, 10);
    assert_eq!(rounds, 6);
    assert_eq!(cluster.workers[0].logical_superstep(), 6);
}

#[test]
fn a_message_to_a_missing_vertex_creates_it_lazily() {
    let cluster: TestCluster<f64, f64, f64> = TestCluster::new(1, 2, |config| config);
    cluster.add_vertex(vertex(1, f64::MAX, &[(2, 1.0)]));
    // Vertex 2 is never loaded.
    cluster.finish_loading();

    cluster.run_to_completion(|| ShortestPaths { source: 1 }, 10);

    // The message from vertex 1 created vertex 2 with a default value,
    // and the created vertex was haltable despite having no out-edges.
    assert!(cluster.vertex_value(2).is_some());
    assert!(cluster.vertex_ids().contains(&2));
}
