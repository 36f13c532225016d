//! The controller driver: discovers clients, drives them through volleys of
//! increasing connection counts, and writes a CSV report.
//!
//! The controller is single-threaded and fully blocking in spirit (§5): one
//! command is fully sent to every client before the next is formed, and
//! replies are collected sequentially. A lost client (a 0-byte control
//! channel read) sets its slot to `None` — Rust's idiomatic stand-in for the
//! original's sentinel-zero socket descriptor — so future broadcasts simply
//! skip it.

use std::io::Write as _;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use tokio::net::TcpStream;
use tracing::{info, warn};

use echobench_proto::{Command, Reply, TestCode};

use crate::config::ControllerArgs;
use crate::control::{self, split, Reader, Writer};
use crate::discovery::{self, DEFAULT_DISCOVER_TIMEOUT};

/// Errors fatal to the controller process.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Discovery itself failed (bind failure, not "nobody answered").
    #[error("discovery error: {0}")]
    Discovery(#[from] discovery::Error),
    /// `--output` named a file that could not be created.
    #[error("failed to open output file {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Writing a CSV row failed after the file was successfully opened.
    #[error("failed to write output: {0}")]
    Write(#[from] std::io::Error),
}

struct ClientHandle {
    reader: Reader,
    writer: Writer,
    peer: std::net::SocketAddr,
}

/// The min/max/sum reduction across a volley's `RESULT` samples (§3, §8).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
}

/// Reduce a batch of successful samples: `min` of minima, `max` of maxima,
/// scalar `sum` of sums.
#[must_use]
pub fn reduce(samples: &[(f64, f64, f64)]) -> Aggregate {
    samples.iter().fold(
        Aggregate {
            min: f64::INFINITY,
            max: 0.0,
            sum: 0.0,
        },
        |mut acc, &(min, max, sum)| {
            acc.min = acc.min.min(min);
            acc.max = acc.max.max(max);
            acc.sum += sum;
            acc
        },
    )
}

enum VolleyOutcome {
    Success(Aggregate),
    Failure(String),
}

/// `total = ceil(total / num_clients) * num_clients`: distributes the
/// requested connection total evenly across all originally discovered
/// clients, and makes the observable total monotonically non-decreasing.
#[must_use]
pub fn even_total(total: u32, num_clients: u32) -> (u32, u32) {
    let per_client = total.div_ceil(num_clients);
    (per_client, per_client * num_clients)
}

/// Human-readable mapping from a non-zero `RESULT` code to the reason
/// printed when the controller aborts a run, carried over from
/// `original_source/controller/controller.c`'s `switch` on response code.
#[must_use]
pub fn describe_failure(code: TestCode) -> String {
    match code {
        TestCode::Success => unreachable!("describe_failure called with a success code"),
        TestCode::ConnectTimeout => "Server stopped connecting".to_string(),
        TestCode::ConnectRefused => "Server refused further connections".to_string(),
        TestCode::AwaitTimeout => "Server stopped responding".to_string(),
        TestCode::Hangup => "Server hung up mid-test".to_string(),
        TestCode::SizeMismatch => "Server echoed back the wrong number of bytes".to_string(),
        TestCode::ReadError => "Server reported a socket error mid-test".to_string(),
        TestCode::Unknown(v) => format!("Test Client reported an unrecognized code {v}"),
    }
}

async fn send_all(clients: &mut [Option<ClientHandle>], command: &Command) {
    for slot in clients.iter_mut() {
        if let Some(handle) = slot {
            if let Err(err) = handle.writer.write_command(command).await {
                warn!(%err, peer = %handle.peer, %command, "client disconnected while sending command");
                *slot = None;
            }
        }
    }
}

async fn collect_results(clients: &mut [Option<ClientHandle>]) -> VolleyOutcome {
    let mut samples = Vec::new();
    for slot in clients.iter_mut() {
        let Some(handle) = slot else { continue };
        match handle.reader.read_reply().await {
            Ok(Reply::Result {
                code,
                min_ms,
                max_ms,
                sum_ms,
            }) => {
                if !code.is_success() {
                    return VolleyOutcome::Failure(describe_failure(code));
                }
                samples.push((min_ms, max_ms, sum_ms));
            }
            Ok(Reply::Err(text)) => {
                warn!(peer = %handle.peer, text, "client reported a soft error");
                return VolleyOutcome::Failure(format!("Test Client Stopped unexpectedly: {text}"));
            }
            Err(control::Error::Closed) => {
                warn!(peer = %handle.peer, "client disconnected mid-volley");
                *slot = None;
                return VolleyOutcome::Failure("Server disconnected".to_string());
            }
            Err(err) => {
                warn!(peer = %handle.peer, %err, "malformed reply from client");
                return VolleyOutcome::Failure("Test Client Stopped unexpectedly".to_string());
            }
        }
    }
    VolleyOutcome::Success(reduce(&samples))
}

enum OutputSink {
    Stdout(std::io::Stdout),
    File(std::fs::File),
}

impl std::io::Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            OutputSink::Stdout(s) => s.write(buf),
            OutputSink::File(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            OutputSink::Stdout(s) => s.flush(),
            OutputSink::File(f) => f.flush(),
        }
    }
}

fn open_output(path: &Option<PathBuf>) -> Result<OutputSink, Error> {
    match path {
        Some(path) => std::fs::File::create(path)
            .map(OutputSink::File)
            .map_err(|source| Error::Output {
                path: path.clone(),
                source,
            }),
        None => Ok(OutputSink::Stdout(std::io::stdout())),
    }
}

/// Run the controller to completion: discover clients, broadcast the static
/// part of the plan, then loop increasing volleys until a client reports a
/// failure or is lost, writing one CSV row per successful volley.
///
/// # Errors
///
/// Returns [`Error`] if discovery fails fatally or the output file cannot be
/// opened or written to. A client-reported test failure is not an [`Error`]:
/// it ends the run cleanly after printing the reason, matching the
/// original's behavior.
pub async fn run(args: ControllerArgs) -> Result<(), Error> {
    let listen_port = args.discover_port + 1;
    println!("Discovering Clients (max {})... ", args.clients);
    let discovered = discovery::discover(
        args.discover_port,
        listen_port,
        args.clients,
        DEFAULT_DISCOVER_TIMEOUT,
    )
    .await?;
    println!("{} found", discovered.len());
    info!(found = discovered.len(), "clients discovered");

    if discovered.is_empty() {
        println!("Failed to find any clients.");
        return Ok(());
    }

    let num_clients = discovered.len() as u32;
    let mut clients: Vec<Option<ClientHandle>> = discovered
        .into_iter()
        .map(|stream: TcpStream| {
            let peer = stream.peer_addr().expect("connected socket has a peer address");
            let (reader, writer) = split(stream);
            Some(ClientHandle { reader, writer, peer })
        })
        .collect();

    if args.kill {
        println!("Killing clients");
        send_all(&mut clients, &Command::Kill).await;
        return Ok(());
    }

    println!("Setting target ip to {}", args.server);
    send_all(
        &mut clients,
        &Command::Target {
            addr: args.server,
            port: args.server_port,
        },
    )
    .await;

    println!("Setting data size to {}", args.data_size);
    send_all(&mut clients, &Command::Size(args.data_size)).await;

    println!("Testing in vollies of {}", args.vollies);
    send_all(&mut clients, &Command::Cycles(args.vollies)).await;

    let mut output = open_output(&args.output)?;
    writeln!(output, "Connections, minTime, maxTime, cumulative")?;

    println!("Beginning test");
    let mut total = args.base_connects;
    loop {
        let (per_client, new_total) = even_total(total, num_clients);
        total = new_total;

        send_all(&mut clients, &Command::Count(per_client)).await;
        send_all(&mut clients, &Command::Test).await;

        match collect_results(&mut clients).await {
            VolleyOutcome::Success(agg) => {
                writeln!(output, "{total:6},{:10.3}, {:10.3}, {:10.3}", agg.min, agg.max, agg.sum)?;
                total += args.increment;
            }
            VolleyOutcome::Failure(reason) => {
                println!("{reason}");
                break;
            }
        }
    }

    println!("Test done");
    send_all(&mut clients, &Command::Done).await;
    Ok(())
}
