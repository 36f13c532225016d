//! The echo service under test: accept loop plus a per-connection drain loop.
//!
//! `tokio`'s multi-threaded scheduler is a fixed pool of OS threads sharing
//! one `mio`-backed, edge-triggered epoll instance, handing each readiness
//! event to exactly one worker — this is the mechanism the original design
//! hand-rolled. The accept loop and the per-connection read/echo loop are
//! still written out explicitly, rather than delegated to a framed codec, so
//! the drain-to-`WouldBlock` discipline stays visible: each connection reads
//! until the socket would block (success), reports 0 bytes (peer shutdown),
//! or errors, and in every case but the first closes and drops the
//! connection without affecting any other.

use std::io::ErrorKind;

use metrics::{counter, gauge};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::{ServerArgs, ServerMode};
use crate::signal::Watcher;

/// Per-connection read buffer size. Matches the original's fixed 1024-byte
/// worker scratch buffer (§4.2).
const READ_BUF_SIZE: usize = 1024;

/// Errors standing up or running the server.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The listener could not be bound.
    #[error("failed to bind listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    /// `--mode` asked for a baseline this build does not implement.
    #[error("server mode {0:?} is an experimental baseline, not ported to this build")]
    UnimplementedMode(ServerMode),
    /// Accept failed with an error other than a transient one, which is
    /// fatal to the worker per the original design's failure semantics.
    #[error("fatal accept error: {0}")]
    Accept(std::io::Error),
}

/// Run the echo server until `shutdown` fires.
///
/// # Errors
///
/// Returns [`Error::UnimplementedMode`] immediately if `args.mode` names an
/// unported baseline, [`Error::Bind`] if the listener cannot be bound, or
/// [`Error::Accept`] if the accept loop hits a non-transient error.
pub async fn run(args: ServerArgs, mut shutdown: Watcher) -> Result<(), Error> {
    if args.mode != ServerMode::Epoll {
        return Err(Error::UnimplementedMode(args.mode));
    }

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .map_err(|source| Error::Bind {
            port: args.port,
            source,
        })?;
    info!(port = args.port, threads = args.threads, "echo server listening");

    let mut open_connections: i64 = 0;

    loop {
        tokio::select! {
            biased;
            () = shutdown.recv() => {
                info!("shutdown signaled, stopping accept loop");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        open_connections += 1;
                        gauge!("echobench_server_open_connections").set(open_connections as f64);
                        counter!("echobench_server_connections_accepted_total").increment(1);
                        debug!(%addr, "accepted connection");
                        let mut conn_shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                () = conn_shutdown.recv() => {}
                                () = handle_connection(stream, addr) => {}
                            }
                        });
                    }
                    Err(err) if is_transient(&err) => {
                        warn!(%err, "transient accept error, continuing");
                    }
                    Err(err) => {
                        error!(%err, "fatal accept error");
                        return Err(Error::Accept(err));
                    }
                }
            }
        }
    }
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::WouldBlock | ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset
    )
}

/// Drain one connection until it would block, shuts down, or errors.
///
/// Every chunk read is echoed back immediately with a single write, so the
/// worker never buffers more than one read's worth of the peer's data.
async fn handle_connection(mut stream: TcpStream, addr: std::net::SocketAddr) {
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                debug!(%addr, "peer shutdown");
                break;
            }
            Ok(n) => {
                if let Err(err) = stream.write_all(&buf[..n]).await {
                    warn!(%addr, %err, "write error, closing connection");
                    break;
                }
                counter!("echobench_server_bytes_echoed_total").increment(n as u64);
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                // Edge-triggered sockets never actually surface WouldBlock
                // through tokio's readable-driven read (the read future only
                // resolves when data is ready), but the arm is kept to make
                // the drain-to-exhaustion discipline explicit and to handle
                // spurious wakeups defensively.
                continue;
            }
            Err(err) => {
                warn!(%addr, %err, "read error, closing connection");
                break;
            }
        }
    }
    counter!("echobench_server_connections_closed_total").increment(1);
}
