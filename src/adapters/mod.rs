pub mod api_gateway;
pub mod file_system;
pub mod handlers;
pub mod http_client;
pub mod memory_store;
pub mod middleware;
pub mod reverse_proxy;
pub mod session;

/// Re-export commonly used types from adapters
pub use api_gateway::ApiGateway;
pub use file_system::FileSystemAdapter;
pub use http_client::HttpClientAdapter;
pub use memory_store::{MemoryContentStore, MemorySessionStore};
pub use reverse_proxy::ReverseProxy;
pub use session::{Session, SessionManager};
