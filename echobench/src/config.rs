//! Command-line configuration for the three echobench binaries.
//!
//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Crashes are most likely
//! to originate from argument parsing, intentionally: a malformed invocation
//! should fail loudly before any socket is opened.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

/// The multiplexing strategy an `echo-server` invocation asked for.
///
/// Only [`ServerMode::Epoll`] is implemented; the other two name the
/// fork-per-connection and `select`-based baselines carried in the original
/// source as experimental comparisons. They are accepted on the command
/// line (matching the historical `--poll`/`--select`/`--epoll` surface) and
/// rejected at startup with a clear error, rather than silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "lower")]
pub enum ServerMode {
    /// The edge-triggered readiness loop. The only mode this build runs.
    Epoll,
    /// The `poll()`-based baseline. Not ported; rejected at startup.
    Poll,
    /// The fork-per-connection baseline. Not ported; rejected at startup.
    Select,
}

/// `echo-server`: the multiplexed echo service under test.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct ServerArgs {
    /// Multiplexing strategy. Only `epoll` is implemented.
    #[clap(long, value_enum, default_value = "epoll")]
    pub mode: ServerMode,

    /// Number of worker threads sharing the readiness instance.
    #[clap(long, default_value_t = default_threads())]
    pub threads: usize,

    /// TCP port to listen on.
    #[clap(long, default_value_t = 7000)]
    pub port: u16,

    /// Optional address to serve Prometheus metrics on.
    #[clap(long)]
    pub telemetry_addr: Option<SocketAddr>,
}

fn default_threads() -> usize {
    num_cpus::get()
}

/// `echo-client`: a load generator controlled by an `echo-controller`.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct ClientArgs {
    /// Discovery port to listen for controller broadcasts on.
    #[clap(long, default_value_t = 7002)]
    pub port: u16,

    /// Optional address to serve Prometheus metrics on.
    #[clap(long)]
    pub telemetry_addr: Option<SocketAddr>,
}

/// `echo-controller`: discovers clients, drives volleys, records results.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct ControllerArgs {
    /// Port on which to broadcast discovery probes. The controller listens
    /// for client callbacks on `discover_port + 1`.
    #[clap(long)]
    pub discover_port: u16,

    /// IPv4 address of the server under test.
    #[clap(long)]
    pub server: Ipv4Addr,

    /// TCP port of the server under test.
    #[clap(long)]
    pub server_port: u16,

    /// Payload size in bytes for each echo request.
    #[clap(long)]
    pub data_size: u32,

    /// Connection count to add to the total after each successful volley.
    #[clap(long)]
    pub increment: u32,

    /// Maximum number of clients to discover.
    #[clap(long)]
    pub clients: usize,

    /// Starting total connection count across all clients.
    #[clap(long)]
    pub base_connects: u32,

    /// Iterations (send/await cycles) per `TEST`.
    #[clap(long)]
    pub vollies: u32,

    /// CSV output path. Defaults to stdout.
    #[clap(long)]
    pub output: Option<PathBuf>,

    /// Skip the test loop entirely: discover clients and send `KILL`.
    #[clap(long)]
    pub kill: bool,

    /// Optional address to serve Prometheus metrics on.
    #[clap(long)]
    pub telemetry_addr: Option<SocketAddr>,
}
