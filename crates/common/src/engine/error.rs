use thiserror::Error;

use crate::blobs::BlobStoreError;
use crate::delivery::DeliveryError;
use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("blob store error: {0}")]
    Blob(#[from] BlobStoreError),

    #[error("engine worker has stopped")]
    WorkerStopped,
}
