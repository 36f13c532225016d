//! Peer discovery over broadcast, yielding TCP control channels.
//!
//! Two operations on a broadcast-enabled IPv4 network: [`discover`], run by
//! the controller to find clients, and [`discoverable`], run by a client to
//! wait to be found. Using TCP for the callback, rather than treating the
//! UDP sender as the control channel, gives the control channel flow control
//! and a clean disconnect signal without implementing either over UDP.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info, warn};

use echobench_proto::discovery::{decode_probe, encode_probe};

/// The default idle window applied to [`discover`]'s accept loop when the
/// caller does not supply one.
pub const DEFAULT_DISCOVER_TIMEOUT: Duration = Duration::from_secs(3);

/// Errors produced by [`discover`] and [`discoverable`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Generic IO error standing up a socket or sending/receiving on it.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The broadcast probe could not be sent at all; this fails the whole
    /// [`discover`] call, unlike a later accept error.
    #[error("failed to send discovery broadcast: {0}")]
    BroadcastSend(std::io::Error),
    /// A discovery probe datagram had the wrong payload length.
    #[error("malformed discovery datagram: {0}")]
    Malformed(#[from] echobench_proto::discovery::Error),
    /// `listen_port` was zero, which can never be bound meaningfully.
    #[error("listen port must be non-zero")]
    ZeroPort,
    /// `timeout` elapsed with no probe received.
    #[error("timed out waiting for a discovery probe")]
    Timeout(#[from] tokio::time::error::Elapsed),
}

fn reuseaddr_tcp_listener(addr: SocketAddrV4) -> Result<TcpListener, Error> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    Ok(TcpListener::from_std(socket.into())?)
}

fn broadcast_udp_socket() -> Result<UdpSocket, Error> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

fn bound_udp_socket(port: u16) -> Result<UdpSocket, Error> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Discover up to `max_peers` clients.
///
/// Opens a TCP listener on `callback_port`, broadcasts one discovery probe
/// naming that port to `255.255.255.255:broadcast_port`, then accepts
/// connections until either `max_peers` have arrived or `timeout` has
/// elapsed with no further arrivals. Returns the accepted connections in
/// arrival order.
///
/// # Errors
///
/// Fails if the broadcast probe cannot be sent, or if an accept error occurs
/// before any client has been discovered. An accept error after at least one
/// success is logged and tolerated; the partial result is returned.
pub async fn discover(
    broadcast_port: u16,
    callback_port: u16,
    max_peers: usize,
    timeout: Duration,
) -> Result<Vec<TcpStream>, Error> {
    if max_peers == 0 {
        return Ok(Vec::new());
    }

    let listener = reuseaddr_tcp_listener(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, callback_port))?;
    let broadcast_socket = broadcast_udp_socket()?;

    let probe = encode_probe(callback_port);
    let destination = SocketAddrV4::new(Ipv4Addr::BROADCAST, broadcast_port);
    broadcast_socket
        .send_to(&probe, destination)
        .await
        .map_err(Error::BroadcastSend)?;
    drop(broadcast_socket);

    let mut connections = Vec::with_capacity(max_peers);
    while connections.len() < max_peers {
        match tokio::time::timeout(timeout, listener.accept()).await {
            Ok(Ok((stream, addr))) => {
                info!(%addr, "discovered connection");
                connections.push(stream);
            }
            Ok(Err(err)) => {
                if connections.is_empty() {
                    return Err(Error::Io(err));
                }
                warn!(%err, "accept error after at least one client discovered, stopping early");
                break;
            }
            Err(_elapsed) => break,
        }
    }

    Ok(connections)
}

/// Wait to be discovered by a controller.
///
/// Binds UDP on `listen_port` and waits (indefinitely if `timeout` is
/// `None`) for a discovery probe. Connects back to the probe's source
/// address on the port carried in its payload, and returns the connected
/// socket. A failed connect-back does not fail the call: it logs and
/// re-waits for another probe.
///
/// # Errors
///
/// Fails only if the listen socket cannot be bound, `listen_port` is zero,
/// or `timeout` elapses with no probe received.
pub async fn discoverable(
    listen_port: u16,
    timeout: Option<Duration>,
) -> Result<TcpStream, Error> {
    if listen_port == 0 {
        return Err(Error::ZeroPort);
    }

    let socket = bound_udp_socket(listen_port)?;
    let mut buf = [0u8; 4];

    loop {
        let (n, source) = match timeout {
            Some(budget) => tokio::time::timeout(budget, socket.recv_from(&mut buf)).await??,
            None => socket.recv_from(&mut buf).await?,
        };

        let callback_port = match decode_probe(&buf[..n]) {
            Ok(port) => port,
            Err(err) => {
                warn!(%err, "ignoring malformed discovery probe");
                continue;
            }
        };

        let target = SocketAddr::new(source.ip(), callback_port);
        debug!(%target, "connecting back to discoverer");
        match TcpStream::connect(target).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                warn!(%err, %target, "connect-back failed, waiting for another probe");
                continue;
            }
        }
    }
}
