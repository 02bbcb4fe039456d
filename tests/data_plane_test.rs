use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use harary::communication::data_plane::connect_workers;
use harary::communication::{
    RequestHandler, VertexIdMessages, WorkerClient, WorkerRequest,
};
use harary::errors::WorkerError;

mod utils;
use utils::get_unique_port;

/// Records every inbound request.
struct Recorder {
    requests: Mutex<Vec<WorkerRequest<u64>>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
        })
    }
}

impl RequestHandler<u64> for Recorder {
    fn handle_request(&self, request: WorkerRequest<u64>) -> Result<(), WorkerError> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn requests_cross_the_tcp_mesh_and_wait_all_blocks_until_applied() {
    let addresses: Vec<SocketAddr> = (0..2)
        .map(|_| {
            format!("127.0.0.1:{}", get_unique_port())
                .parse()
                .expect("Unable to parse socket address")
        })
        .collect();

    let recorder_a = Recorder::new();
    let recorder_b = Recorder::new();
    let (client_a, client_b) = tokio::join!(
        connect_workers(0, addresses.clone(), recorder_a.clone() as Arc<dyn RequestHandler<u64>>),
        connect_workers(1, addresses, recorder_b.clone() as Arc<dyn RequestHandler<u64>>),
    );
    let client_a = Arc::new(client_a.expect("worker 0 failed to connect"));
    let client_b = Arc::new(client_b.expect("worker 1 failed to connect"));

    // A request to the remote worker, and one batch of messages.
    let mut batch = VertexIdMessages::new();
    batch.add(&3u64, &"hello".to_string()).unwrap();
    client_a
        .send_request(1, WorkerRequest::SendGlobalToken { sender: 0, receiver: 1 })
        .unwrap();
    client_a
        .send_request(1, WorkerRequest::SendWorkerMessages(vec![(2, batch)]))
        .unwrap();

    // The barrier returns only after worker 1 acknowledged both
    // requests, which it does after applying them.
    let waiter = Arc::clone(&client_a);
    tokio::task::spawn_blocking(move || waiter.wait_all_requests())
        .await
        .unwrap();

    let received = recorder_b.requests.lock().unwrap();
    assert_eq!(received.len(), 2);
    match &received[0] {
        WorkerRequest::SendGlobalToken { sender, receiver } => {
            assert_eq!((*sender, *receiver), (0, 1));
        }
        other => panic!("unexpected first request: {:?}", other),
    }
    match &received[1] {
        WorkerRequest::SendWorkerMessages(batches) => {
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0].0, 2);
            assert_eq!(batches[0].1.count(), 1);
        }
        other => panic!("unexpected second request: {:?}", other),
    }
    drop(received);

    // A request addressed to the local worker is applied in place.
    client_b
        .send_request(1, WorkerRequest::SendPartitionToken { sender: 1, receiver: 3 })
        .unwrap();
    assert_eq!(recorder_b.requests.lock().unwrap().len(), 3);
}
