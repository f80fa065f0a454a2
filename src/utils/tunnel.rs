//! Bidirectional byte relay for upgraded connections.
use std::time::Duration;

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::timeout,
};

const BUFFER_SIZE: usize = 16 * 1024;

/// Totals for one finished tunnel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TunnelStats {
    /// Bytes copied from the client side to the upstream side.
    pub bytes_up: u64,
    /// Bytes copied from the upstream side to the client side.
    pub bytes_down: u64,
    pub idle_timed_out: bool,
}

enum Event {
    Up(std::io::Result<usize>),
    Down(std::io::Result<usize>),
}

/// Copy bytes both ways between `client` and `upstream` until both sides
/// reach EOF or nothing moves for `idle_timeout`.
///
/// EOF on one side half-closes the other, so each direction drains on its own.
pub async fn relay<C, U>(client: C, upstream: U, idle_timeout: Duration) -> std::io::Result<TunnelStats>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);
    let mut up_buf = vec![0u8; BUFFER_SIZE];
    let mut down_buf = vec![0u8; BUFFER_SIZE];

    let mut stats = TunnelStats::default();
    let mut client_open = true;
    let mut upstream_open = true;

    while client_open || upstream_open {
        let event = timeout(idle_timeout, async {
            tokio::select! {
                result = client_read.read(&mut up_buf), if client_open => Event::Up(result),
                result = upstream_read.read(&mut down_buf), if upstream_open => Event::Down(result),
            }
        })
        .await;

        match event {
            Err(_) => {
                tracing::debug!(idle_timeout = ?idle_timeout, "tunnel idle, closing");
                stats.idle_timed_out = true;
                break;
            }
            Ok(Event::Up(result)) => match result? {
                0 => {
                    client_open = false;
                    upstream_write.shutdown().await?;
                }
                n => {
                    upstream_write.write_all(&up_buf[..n]).await?;
                    stats.bytes_up += n as u64;
                }
            },
            Ok(Event::Down(result)) => match result? {
                0 => {
                    upstream_open = false;
                    client_write.shutdown().await?;
                }
                n => {
                    client_write.write_all(&down_buf[..n]).await?;
                    stats.bytes_down += n as u64;
                }
            },
        }
    }

    Ok(stats)
}
