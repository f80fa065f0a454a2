use async_trait::async_trait;
use thiserror::Error;

use crate::core::Blob;

/// Error type for content lookups
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ContentStoreError {
    /// No blob is stored under the requested name
    #[error("blob not found: {0}")]
    NotFound(String),

    /// The backing store could not answer
    #[error("content store unavailable: {0}")]
    Unavailable(String),
}

pub type ContentStoreResult<T> = Result<T, ContentStoreError>;

/// ContentStore defines the port (interface) for looking up stored blobs
#[async_trait]
pub trait ContentStore: Send + Sync + 'static {
    /// Fetch the blob stored under `file_name`.
    async fn find_blob(&self, file_name: &str) -> ContentStoreResult<Blob>;
}
