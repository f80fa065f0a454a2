use eyre::Result;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// HttpServer defines the port (interface) for the long-running HTTP tiers
pub trait HttpServer: Send + Sync + 'static {
    /// Name used for the server's actor and in logs
    fn name(&self) -> &'static str;

    /// Bind the configured address and serve until `shutdown` is cancelled.
    ///
    /// Bind failures are returned immediately.
    fn run(&self, shutdown: CancellationToken)
    -> impl std::future::Future<Output = Result<()>> + Send;

    /// Serve on an already bound listener until `shutdown` is cancelled.
    fn serve(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}
