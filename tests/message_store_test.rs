use harary::communication::VertexIdMessages;
use harary::errors::WorkerError;
use harary::worker::{MessageStore, MessageStoreMode};

mod utils;
use utils::test_owners;

fn append_store(capacity: usize) -> MessageStore<u64, String> {
    MessageStore::new(MessageStoreMode::Append, test_owners(4, 1), capacity)
}

#[test]
fn append_order_is_preserved_per_vertex() {
    let store = append_store(usize::MAX);
    let dest = 6u64;
    let partition_id = 6 % 4;
    for i in 0..5 {
        store
            .add_partition_message(partition_id, &dest, None, &format!("msg-{}", i))
            .unwrap();
    }

    let messages = store.remove_vertex_messages(&dest).unwrap();
    let expected: Vec<String> = (0..5).map(|i| format!("msg-{}", i)).collect();
    assert_eq!(messages, expected);
}

#[test]
fn drain_is_destructive_and_append_recreates_the_queue() {
    let store = append_store(usize::MAX);
    let dest = 1u64;
    store
        .add_partition_message(1, &dest, None, &"a".to_string())
        .unwrap();

    assert_eq!(store.remove_vertex_messages(&dest).unwrap(), vec!["a"]);
    // A second drain returns nothing.
    assert!(store.remove_vertex_messages(&dest).unwrap().is_empty());
    assert!(!store.has_messages_for_vertex(&dest));

    // Appending after the drain forms a new queue.
    store
        .add_partition_message(1, &dest, None, &"b".to_string())
        .unwrap();
    assert!(store.has_messages_for_vertex(&dest));
    assert_eq!(store.remove_vertex_messages(&dest).unwrap(), vec!["b"]);
}

#[test]
fn concurrent_appends_to_one_vertex_are_atomic() {
    let store = append_store(usize::MAX);
    let dest = 2u64;

    std::thread::scope(|scope| {
        for thread in 0..4 {
            let store = &store;
            scope.spawn(move || {
                for i in 0..100 {
                    store
                        .add_partition_message(2, &dest, None, &format!("{}-{}", thread, i))
                        .unwrap();
                }
            });
        }
    });

    let messages = store.remove_vertex_messages(&dest).unwrap();
    assert_eq!(messages.len(), 400);
}

#[test]
fn batch_append_equals_a_sequence_of_single_appends() {
    let single = append_store(usize::MAX);
    let batched = append_store(usize::MAX);

    let mut batch = VertexIdMessages::new();
    for (dest, payload) in [(1u64, "x"), (5, "y"), (1, "z")] {
        single
            .add_partition_message(1, &dest, None, &payload.to_string())
            .unwrap();
        batch.add(&dest, &payload.to_string()).unwrap();
    }
    assert_eq!(batch.count(), 3);
    batched.add_partition_messages(1, &batch).unwrap();

    for dest in [1u64, 5] {
        assert_eq!(
            single.remove_vertex_messages(&dest).unwrap(),
            batched.remove_vertex_messages(&dest).unwrap(),
        );
    }
}

#[test]
fn overwrite_by_source_keeps_the_latest_message_and_reads_without_drain() {
    let store: MessageStore<u64, String> =
        MessageStore::new(MessageStoreMode::OverwriteBySource, test_owners(4, 1), usize::MAX);
    let dest = 3u64;

    store
        .add_partition_message(3, &dest, Some(&10), &"old".to_string())
        .unwrap();
    store
        .add_partition_message(3, &dest, Some(&20), &"other".to_string())
        .unwrap();
    store
        .add_partition_message(3, &dest, Some(&10), &"new".to_string())
        .unwrap();

    let mut messages = store.get_vertex_messages_without_source(&dest).unwrap();
    messages.sort();
    assert_eq!(messages, vec!["new".to_string(), "other".to_string()]);

    // Reading does not drain: the next round overwrites instead.
    assert_eq!(store.get_vertex_messages_without_source(&dest).unwrap().len(), 2);
    assert!(store.has_messages_for_vertex(&dest));
}

#[test]
fn vertex_buffer_overflow_fails_fast_without_corrupting_neighbours() {
    let store = append_store(4096);
    let hot = 1u64;
    let neighbour = 5u64;
    let payload = "x".repeat(1024);

    store
        .add_partition_message(1, &neighbour, None, &"fine".to_string())
        .unwrap();

    let mut failed = false;
    for _ in 0..10 {
        match store.add_partition_message(1, &hot, None, &payload) {
            Ok(()) => {}
            Err(WorkerError::PayloadTooLarge { capacity, .. }) => {
                assert_eq!(capacity, 4096);
                failed = true;
                break;
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert!(failed, "expected the hot vertex to overflow its buffer");

    // The neighbour's queue is intact.
    assert_eq!(
        store.remove_vertex_messages(&neighbour).unwrap(),
        vec!["fine"]
    );
}

#[test]
fn clear_partition_drops_only_that_partition() {
    let store = append_store(usize::MAX);
    store
        .add_partition_message(1, &1u64, None, &"a".to_string())
        .unwrap();
    store
        .add_partition_message(2, &2u64, None, &"b".to_string())
        .unwrap();

    assert!(store.has_messages_for_partition(1));
    store.clear_partition(1);
    assert!(!store.has_messages_for_partition(1));
    assert!(store.has_messages_for_partition(2));
    assert_eq!(store.message_vertex_ids(2), vec![2]);
}
