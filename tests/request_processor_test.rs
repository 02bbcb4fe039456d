use std::sync::{Arc, Mutex};

use harary::communication::{
    decode_phase, CommunicationError, WorkerClient, WorkerRequest,
};
use harary::errors::WorkerError;
use harary::worker::{RequestProcessor, ServerData};
use harary::{AsyncConfiguration, Configuration, TaskId};

mod utils;
use utils::test_owners;

/// Records every request instead of sending it.
struct RecordingClient {
    requests: Mutex<Vec<(TaskId, WorkerRequest<u64>)>>,
}

impl RecordingClient {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
        })
    }

    fn take(&self) -> Vec<(TaskId, WorkerRequest<u64>)> {
        std::mem::take(&mut *self.requests.lock().unwrap())
    }
}

impl WorkerClient<u64> for RecordingClient {
    fn send_request(
        &self,
        task_id: TaskId,
        request: WorkerRequest<u64>,
    ) -> Result<(), CommunicationError> {
        self.requests.lock().unwrap().push((task_id, request));
        Ok(())
    }

    fn wait_all_requests(&self) {}
}

fn processor_fixture(
    config: Configuration,
    num_workers: usize,
) -> (
    RequestProcessor<u64, String>,
    Arc<ServerData<u64, String>>,
    Arc<RecordingClient>,
) {
    let config = Arc::new(config);
    let owners = test_owners(config.num_partitions, num_workers);
    let server_data = Arc::new(ServerData::new(Arc::clone(&config), owners));
    let client = RecordingClient::new();
    let processor = RequestProcessor::new(
        config,
        Arc::clone(&server_data),
        client.clone() as Arc<dyn WorkerClient<u64>>,
        0,
    );
    (processor, server_data, client)
}

fn async_config() -> AsyncConfiguration {
    AsyncConfiguration {
        do_async: true,
        ..Default::default()
    }
}

#[test]
fn local_messages_short_circuit_under_async() {
    let config = Configuration::new(0, 1, 4, 1).with_async_conf(async_config());
    let (mut processor, server_data, client) = processor_fixture(config, 1);

    processor.send_message(&2, &"hello".to_string()).unwrap();

    // Nothing reached the transport; the message is in the local store.
    assert!(client.take().is_empty());
    let local = server_data.local_message_store();
    assert_eq!(
        local.remove_vertex_messages(&2).unwrap(),
        vec!["hello".to_string()]
    );

    // Local messages count towards the sent counter under async.
    assert_eq!(processor.reset_message_count(), 1);
    // Short-circuited messages were never serialized.
    assert_eq!(processor.reset_message_bytes_count(), 0);
}

#[test]
fn bsp_colocated_messages_go_through_the_cache() {
    let config = Configuration::new(0, 1, 4, 1);
    let (mut processor, server_data, client) = processor_fixture(config, 1);

    processor.send_message(&2, &"epoch".to_string()).unwrap();
    assert!(client.take().is_empty());
    processor.flush().unwrap();

    let requests = client.take();
    assert_eq!(requests.len(), 1);
    let (task_id, request) = &requests[0];
    assert_eq!(*task_id, 0);
    match request {
        WorkerRequest::SendWorkerMessages(batches) => {
            assert_eq!(batches.len(), 1);
            let (raw_partition_id, batch) = &batches[0];
            assert_eq!(decode_phase(*raw_partition_id), (2, false));
            assert_eq!(batch.count(), 1);
        }
        other => panic!("unexpected request: {:?}", other),
    }
    assert!(!server_data
        .local_message_store()
        .has_messages_for_vertex(&2));

    assert_eq!(processor.reset_message_count(), 1);
    assert!(processor.reset_message_bytes_count() > 0);
}

#[test]
fn cache_flushes_when_the_per_worker_threshold_is_reached() {
    let config = Configuration::new(0, 2, 4, 1).with_max_message_bytes_per_worker(128);
    let (mut processor, _server_data, client) = processor_fixture(config, 2);

    // Vertex 1 lives in partition 1, owned by worker 1 (round robin).
    let payload = "y".repeat(48);
    processor.send_message(&1, &payload).unwrap();
    assert!(client.take().is_empty());
    processor.send_message(&1, &payload).unwrap();

    let requests = client.take();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, 1);
}

#[test]
fn next_phase_messages_carry_the_phase_bit() {
    let mut async_conf = async_config();
    async_conf.multi_phase = true;
    let config = Configuration::new(0, 2, 4, 1).with_async_conf(async_conf);
    let (mut processor, server_data, client) = processor_fixture(config, 2);

    processor.set_for_next_phase(true);

    // A remote send gets the flag encoded into the partition id field.
    processor.send_message(&1, &"remote".to_string()).unwrap();
    processor.flush().unwrap();
    let requests = client.take();
    match &requests[0].1 {
        WorkerRequest::SendWorkerMessages(batches) => {
            let (raw_partition_id, _) = batches[0];
            assert_eq!(decode_phase(raw_partition_id), (1, true));
        }
        other => panic!("unexpected request: {:?}", other),
    }

    // A local send lands in the next-phase local store.
    processor.send_message(&2, &"local".to_string()).unwrap();
    assert!(server_data
        .next_phase_local_message_store()
        .has_messages_for_vertex(&2));
    assert!(!server_data.local_message_store().has_messages_for_vertex(&2));
}

#[test]
fn need_all_messages_requires_a_source() {
    let mut async_conf = async_config();
    async_conf.need_all_msgs = true;
    let config = Configuration::new(0, 2, 4, 1).with_async_conf(async_conf);
    let (mut processor, server_data, _client) = processor_fixture(config, 2);

    // Without a source the send is rejected.
    match processor.send_message(&1, &"m".to_string()) {
        Err(WorkerError::UnsupportedConfig(_)) => {}
        other => panic!("expected UnsupportedConfig, got {:?}", other.map(|_| ())),
    }

    // With a source, the local path stores by source.
    processor.set_current_source(Some(9));
    processor.send_message(&2, &"m1".to_string()).unwrap();
    processor.send_message(&2, &"m2".to_string()).unwrap();
    let local = server_data.local_message_store();
    // The second message from the same source overwrote the first.
    assert_eq!(
        local.get_vertex_messages_without_source(&2).unwrap(),
        vec!["m2".to_string()]
    );
}
