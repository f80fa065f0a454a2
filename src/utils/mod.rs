pub mod graceful_shutdown;
pub mod tunnel;

pub use graceful_shutdown::{ShutdownReason, bind_listener, serve_until_cancelled, wait_for_signal};
pub use tunnel::{TunnelStats, relay};
