//! An in-process transport for workers that share one OS process, used by
//! single-process deployments and the integration tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::communication::{
    CommunicationError, RequestHandler, WorkerClient, WorkerRequest,
};
use crate::graph::VertexId;
use crate::TaskId;

/// A registry connecting the request handlers of all workers running in
/// this process.
pub struct InProcessNetwork<I> {
    handlers: Mutex<HashMap<TaskId, Arc<dyn RequestHandler<I>>>>,
}

impl<I: VertexId> InProcessNetwork<I> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: Mutex::new(HashMap::new()),
        })
    }

    /// Registers the receive path of the worker with the given task id.
    pub fn register(&self, task_id: TaskId, handler: Arc<dyn RequestHandler<I>>) {
        self.handlers.lock().unwrap().insert(task_id, handler);
    }

    /// Creates a client through which the given worker sends its requests.
    pub fn client(self: &Arc<Self>, task_id: TaskId) -> LocalWorkerClient<I> {
        LocalWorkerClient {
            network: Arc::clone(self),
            task_id,
        }
    }

    fn handler_of(&self, task_id: TaskId) -> Option<Arc<dyn RequestHandler<I>>> {
        self.handlers.lock().unwrap().get(&task_id).cloned()
    }
}

/// A [`WorkerClient`] that hands requests directly to the receiving
/// worker's handler.
///
/// Delivery happens on the calling thread, so by the time `send_request`
/// returns the request has been applied; `wait_all_requests` is therefore
/// a no-op.
pub struct LocalWorkerClient<I> {
    network: Arc<InProcessNetwork<I>>,
    task_id: TaskId,
}

impl<I: VertexId> WorkerClient<I> for LocalWorkerClient<I> {
    fn send_request(
        &self,
        task_id: TaskId,
        request: WorkerRequest<I>,
    ) -> Result<(), CommunicationError> {
        let handler = self
            .network
            .handler_of(task_id)
            .ok_or(CommunicationError::UnknownWorker(task_id))?;
        if let Err(error) = handler.handle_request(request) {
            // Receiver-side failures are recorded by the receiving worker;
            // the channel itself did not fail.
            tracing::error!(
                "[LocalWorkerClient {}] Worker {} failed to handle a request: {}",
                self.task_id,
                task_id,
                error
            );
        }
        Ok(())
    }

    fn wait_all_requests(&self) {}
}
