use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response};
use thiserror::Error;

/// Error type for file system operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FileSystemError {
    /// Error when encountering an IO issue
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error when path is invalid
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Result type for file system operations
pub type FileSystemResult<T> = Result<T, FileSystemError>;

/// FileSystem defines the port (interface) for the static side of the proxy
pub trait FileSystem: Send + Sync + 'static {
    /// Serve a file from the file system
    ///
    /// # Arguments
    /// * `root` - The root directory to serve files from
    /// * `path` - The request path relative to the root
    /// * `req` - The original HTTP request
    fn serve_file(
        &self,
        root: &str,
        path: &str,
        req: Request<AxumBody>,
    ) -> impl std::future::Future<Output = FileSystemResult<Response<AxumBody>>> + Send;

    /// Whether `path` names an existing file or directory under `root`.
    ///
    /// Paths that resolve outside of `root` are rejected with
    /// [`FileSystemError::InvalidPath`].
    fn entry_exists(
        &self,
        root: &str,
        path: &str,
    ) -> impl std::future::Future<Output = FileSystemResult<bool>> + Send;
}
