pub mod content_store;
pub mod file_system;
pub mod http_client;
pub mod http_server;
pub mod session_store;

pub use content_store::{ContentStore, ContentStoreError, ContentStoreResult};
pub use file_system::{FileSystem, FileSystemError, FileSystemResult};
pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
pub use http_server::HttpServer;
pub use session_store::{SessionError, SessionRecord, SessionResult, SessionStore};
