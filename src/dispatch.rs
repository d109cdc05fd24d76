use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::platform::Update;

/// Updates buffered between the webhook and the worker.
pub const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("update queue is closed")]
    Closed,
}

/// Where the webhook gate hands verified updates.
#[async_trait]
pub trait UpdateSink: Send + Sync {
    async fn submit(&self, update: Update) -> Result<(), DispatchError>;
}

/// Processes a single update.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn handle(&self, update: Update) -> Result<()>;
}

/// Receives handler failures.
#[async_trait]
pub trait ErrorReporter: Send + Sync {
    async fn report(&self, update: &Update, error: &anyhow::Error);
}

/// Bounded in-process queue feeding [`run_worker`].
#[derive(Clone)]
pub struct UpdateQueue {
    tx: mpsc::Sender<Update>,
}

impl UpdateQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Update>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl UpdateSink for UpdateQueue {
    async fn submit(&self, update: Update) -> Result<(), DispatchError> {
        self.tx.send(update).await.map_err(|_| DispatchError::Closed)
    }
}

/// Drain the queue, handling each update on its own task. Returns once every
/// sender is dropped and in-flight updates have finished.
pub async fn run_worker(
    mut rx: mpsc::Receiver<Update>,
    handler: Arc<dyn UpdateHandler>,
    reporter: Arc<dyn ErrorReporter>,
) {
    let mut in_flight = tokio::task::JoinSet::new();

    while let Some(update) = rx.recv().await {
        debug!("Dispatching update {}", update.update_id);
        let handler = Arc::clone(&handler);
        let reporter = Arc::clone(&reporter);
        in_flight.spawn(async move {
            if let Err(e) = handler.handle(update.clone()).await {
                error!("Error handling update {}: {:#}", update.update_id, e);
                reporter.report(&update, &e).await;
            }
        });

        // Reap finished tasks so the set does not grow unbounded
        while let Some(joined) = in_flight.try_join_next() {
            if let Err(e) = joined {
                error!("Update task panicked: {}", e);
            }
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!("Update task panicked: {}", e);
        }
    }
    info!("Update worker stopped");
}
