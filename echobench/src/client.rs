//! The client test engine: maintains long-lived connections to the server
//! under test and runs timed echo volleys on command from a controller.
//!
//! The engine is single-threaded and cooperative: every socket is a
//! non-blocking `tokio::net::TcpStream`, and the only suspension point in
//! the reply-await phase is waiting on those sockets' readiness, which is
//! exactly what `FuturesUnordered` polling does under the hood. This is the
//! same mechanism §4.3 describes, expressed with the runtime's reactor
//! instead of a hand-held epoll handle.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use metrics::{counter, gauge};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use echobench_proto::{Command, Reply, TestCode};

use crate::control::{self, split};
use crate::discovery::{self, discoverable};
use crate::signal::Watcher;

/// Wall-clock budget for one `TEST` iteration's reply-await phase (§5).
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors fatal to the client process.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Discovery failed in a way that isn't "no probe arrived yet".
    #[error("discovery error: {0}")]
    Discovery(#[from] discovery::Error),
}

/// A mutable test plan, built up by `TARGET`/`SIZE`/`COUNT`/`CYCLES` and run
/// by `TEST`. See the data model (§3) for field semantics.
#[derive(Debug)]
pub struct TestPlan {
    server: Option<SocketAddr>,
    buf_len: u32,
    data_buf: bytes::Bytes,
    clients: u32,
    iterations: u32,
    sockets: Vec<TcpStream>,
    /// A connect failure mid-`COUNT` tears down the sockets opened by that
    /// call but doesn't fail `COUNT` itself; it's surfaced as the `RESULT`
    /// of the next `TEST` instead, since `RESULT` is the only reply the
    /// protocol defines for test outcomes.
    pending_code: Option<TestCode>,
    target_set: bool,
    size_set: bool,
    count_set: bool,
    cycles_set: bool,
}

impl TestPlan {
    /// A freshly-prepped plan: nothing set, zero sockets open.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `TARGET`, `SIZE`, `COUNT`, and `CYCLES` have each been
    /// observed at least once. Observing `COUNT` does not require that its
    /// socket growth actually succeeded — see [`Self::grow_to`].
    #[must_use]
    pub fn ready(&self) -> bool {
        self.target_set && self.size_set && self.count_set && self.cycles_set
    }

    /// `TARGET <ipv4> <port>`.
    pub fn set_target(&mut self, addr: Ipv4Addr, port: u16) {
        self.server = Some(SocketAddr::from((addr, port)));
        self.target_set = true;
    }

    /// `SIZE <n>`: (re)allocate the payload buffer, filled `A..Z` cycling.
    pub fn set_size(&mut self, n: u32) {
        self.data_buf = bytes::Bytes::from((0..n).map(|i| b'A' + (i % 26) as u8).collect::<Vec<u8>>());
        self.buf_len = n;
        self.size_set = true;
    }

    /// `CYCLES <n>`: iterations per `TEST`.
    pub fn set_cycles(&mut self, n: u32) {
        self.iterations = n;
        self.cycles_set = true;
    }

    /// `COUNT <n>`: grow the socket pool up to `n` connections.
    ///
    /// Per the invariant that `COUNT` may only raise the target, `n <=
    /// sockets.len()` is a no-op (shrinking is undefined and treated as
    /// such). Connects are attempted sequentially; a failure tears down
    /// only the sockets opened by *this* call, leaving the previously
    /// established pool untouched, and records a pending failure code for
    /// the next `TEST` to report.
    pub async fn grow_to(&mut self, n: u32) {
        self.count_set = true;
        if n as usize <= self.sockets.len() {
            return;
        }
        let Some(server) = self.server else {
            self.pending_code = Some(TestCode::ConnectRefused);
            return;
        };

        let mut opened = Vec::with_capacity(n as usize - self.sockets.len());
        for _ in self.sockets.len()..n as usize {
            match TcpStream::connect(server).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    counter!("echobench_client_sockets_connected_total").increment(1);
                    opened.push(stream);
                }
                Err(err) => {
                    warn!(%err, "connect failed while growing socket pool, tearing down this batch");
                    self.pending_code = Some(classify_connect_error(&err));
                    return;
                }
            }
        }

        self.sockets.append(&mut opened);
        self.clients = n;
        self.pending_code = None;
        gauge!("echobench_client_open_sockets").set(self.sockets.len() as f64);
    }

    /// `TEST`: run `iterations` send-all-then-await-all passes across every
    /// open socket and reduce the per-sample latencies into one `RESULT`.
    pub async fn run(&mut self, reply_timeout: Duration) -> Reply {
        if let Some(code) = self.pending_code.take() {
            return zero_result(code);
        }
        if self.clients == 0 || self.sockets.len() != self.clients as usize {
            return zero_result(TestCode::ConnectRefused);
        }

        let mut min = Duration::MAX;
        let mut max = Duration::ZERO;
        let mut sum = Duration::ZERO;

        for iteration in 0..self.iterations {
            match self.run_iteration(reply_timeout).await {
                Ok(samples) => {
                    for sample in samples {
                        min = min.min(sample);
                        max = max.max(sample);
                        sum += sample;
                    }
                }
                Err(code) => {
                    debug!(iteration, %code, "test iteration failed");
                    return zero_result(code);
                }
            }
        }

        if min == Duration::MAX {
            min = Duration::ZERO;
        }
        counter!("echobench_client_tests_completed_total").increment(1);
        Reply::Result {
            code: TestCode::Success,
            min_ms: min.as_secs_f64() * 1000.0,
            max_ms: max.as_secs_f64() * 1000.0,
            sum_ms: sum.as_secs_f64() * 1000.0,
        }
    }

    /// One send-all-then-await-all pass. Writes happen sequentially (they
    /// are effectively instantaneous); the await phase is driven
    /// concurrently across all sockets with a single deadline covering the
    /// whole phase, and returns as soon as one socket reports an error,
    /// rather than waiting out the stragglers.
    async fn run_iteration(&mut self, reply_timeout: Duration) -> Result<Vec<Duration>, TestCode> {
        let buf_len = self.buf_len as usize;
        let mut pending = FuturesUnordered::new();
        for socket in &mut self.sockets {
            let data = self.data_buf.clone();
            pending.push(async move {
                socket.write_all(&data).await.map_err(|_| TestCode::ReadError)?;
                let start = Instant::now();
                drain_reply(socket, buf_len).await?;
                Ok(start.elapsed())
            });
        }

        let deadline = Instant::now() + reply_timeout;
        let mut samples = Vec::with_capacity(pending.len());
        while let Some(budget) = deadline.checked_duration_since(Instant::now()) {
            if pending.is_empty() {
                return Ok(samples);
            }
            match tokio::time::timeout(budget, pending.next()).await {
                Ok(Some(Ok(sample))) => samples.push(sample),
                Ok(Some(Err(code))) => return Err(code),
                Ok(None) => return Ok(samples),
                Err(_elapsed) => return Err(TestCode::AwaitTimeout),
            }
        }
        Err(TestCode::AwaitTimeout)
    }
}

impl Default for TestPlan {
    fn default() -> Self {
        TestPlan {
            server: None,
            buf_len: 0,
            data_buf: bytes::Bytes::new(),
            clients: 0,
            iterations: 0,
            sockets: Vec::new(),
            pending_code: None,
            target_set: false,
            size_set: false,
            count_set: false,
            cycles_set: false,
        }
    }
}

fn zero_result(code: TestCode) -> Reply {
    Reply::Result {
        code,
        min_ms: 0.0,
        max_ms: 0.0,
        sum_ms: 0.0,
    }
}

/// Drains one echo reply of `buf_len` bytes from `socket`.
///
/// Reads accumulate into a scratch buffer sized 1.5x `buf_len` (§4.3) rather
/// than stopping the instant `buf_len` bytes have arrived: a single `read`
/// can return more than one TCP segment's worth of data, so if the server
/// under test ever writes more than `buf_len` bytes for one reply, the
/// extra bytes show up in the same scratch buffer and are caught here
/// instead of being mistaken for the start of the next reply. A `read`
/// that lands short of `buf_len` is not itself an error — edge-triggered
/// sockets can deliver a reply across several reads — so the loop keeps
/// going until the count reaches, or overshoots, `buf_len`.
async fn drain_reply(socket: &mut TcpStream, buf_len: usize) -> Result<(), TestCode> {
    if buf_len == 0 {
        return Ok(());
    }
    let mut scratch = vec![0u8; buf_len + buf_len / 2];
    let mut total = 0usize;
    loop {
        let n = socket
            .read(&mut scratch[total..])
            .await
            .map_err(|_| TestCode::ReadError)?;
        if n == 0 {
            return Err(TestCode::Hangup);
        }
        total += n;
        if total > buf_len {
            return Err(TestCode::SizeMismatch);
        }
        if total == buf_len {
            return Ok(());
        }
    }
}

fn classify_connect_error(err: &std::io::Error) -> TestCode {
    match err.kind() {
        std::io::ErrorKind::TimedOut => TestCode::ConnectTimeout,
        // `ConnectionRefused` and everything else our `TARGET` parser
        // cannot have caused (it already validated the address and port)
        // collapse to the same code: spec.md's §7 taxonomy gives refusal
        // no sibling for "some other connect failure".
        _ => TestCode::ConnectRefused,
    }
}

/// The outcome of one control-channel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// `DONE` was received, or the controller disconnected. The client
    /// should return to discovery.
    Done,
    /// `KILL` was received. The client process should exit.
    Killed,
}

/// Drive one control-channel session to completion: read commands, apply
/// them to a fresh [`TestPlan`], and reply as the protocol (§6.1, §6.2)
/// requires, until `DONE`, `KILL`, or disconnect.
pub async fn run_session(
    stream: TcpStream,
    reply_timeout: Duration,
) -> Result<SessionOutcome, control::Error> {
    let (mut reader, mut writer) = split(stream);
    let mut plan = TestPlan::new();

    loop {
        let command = match reader.read_command().await {
            Ok(command) => command,
            Err(control::Error::Closed) => {
                info!("controller disconnected, returning to discovery");
                return Ok(SessionOutcome::Done);
            }
            Err(err) => return Err(err),
        };

        match command {
            Command::Target { addr, port } => plan.set_target(addr, port),
            Command::Size(n) => plan.set_size(n),
            Command::Count(n) => plan.grow_to(n).await,
            Command::Cycles(n) => plan.set_cycles(n),
            Command::Test => {
                if !plan.ready() {
                    writer
                        .write_reply(&Reply::Err("Not Ready to test".to_string()))
                        .await?;
                    continue;
                }
                let result = plan.run(reply_timeout).await;
                writer.write_reply(&result).await?;
            }
            Command::Done => {
                info!("received DONE, returning to discovery");
                return Ok(SessionOutcome::Done);
            }
            Command::Kill => {
                info!("received KILL, client process will exit");
                return Ok(SessionOutcome::Killed);
            }
        }
    }
}

/// The client's outer loop: wait to be discovered, run one session, and
/// (unless killed) go back to waiting. Runs until `shutdown` fires or a
/// session reports [`SessionOutcome::Killed`].
///
/// # Errors
///
/// Returns [`Error`] if discovery itself fails fatally (bind failure or a
/// zero listen port); a lost control-channel mid-session is not an error,
/// it is [`SessionOutcome::Done`].
pub async fn run(listen_port: u16, mut shutdown: Watcher) -> Result<(), Error> {
    loop {
        let stream = tokio::select! {
            biased;
            () = shutdown.recv() => {
                info!("shutdown signaled, stopping discovery loop");
                return Ok(());
            }
            found = discoverable(listen_port, None) => found?,
        };

        match run_session(stream, DEFAULT_REPLY_TIMEOUT).await {
            Ok(SessionOutcome::Done) => continue,
            Ok(SessionOutcome::Killed) => return Ok(()),
            Err(err) => {
                warn!(%err, "control channel session ended with an error, returning to discovery");
                continue;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::split as control_split;
    use echobench_proto::Command as Cmd;
    use tokio::net::TcpListener;

    async fn echo_server(port: u16) -> tokio::task::JoinHandle<()> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                });
            }
        })
    }

    #[tokio::test]
    async fn single_socket_single_iteration_yields_one_sample() {
        let _server = echo_server(18100).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut plan = TestPlan::new();
        plan.set_target(Ipv4Addr::new(127, 0, 0, 1), 18100);
        plan.set_size(8);
        plan.set_cycles(1);
        plan.grow_to(1).await;
        assert!(plan.ready());

        match plan.run(Duration::from_secs(2)).await {
            Reply::Result {
                code,
                min_ms,
                max_ms,
                sum_ms,
            } => {
                assert_eq!(code, TestCode::Success);
                assert!((min_ms - max_ms).abs() < 0.001);
                assert!((sum_ms - min_ms).abs() < 0.001);
            }
            Reply::Err(_) => panic!("expected a RESULT reply"),
        }
    }

    #[tokio::test]
    async fn echo_fidelity_at_1024_bytes() {
        let _server = echo_server(18101).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let expected: Vec<u8> = (0..1024u32).map(|i| b'A' + (i % 26) as u8).collect();
        let mut plan = TestPlan::new();
        plan.set_target(Ipv4Addr::new(127, 0, 0, 1), 18101);
        plan.set_size(1024);
        assert_eq!(plan.data_buf.as_ref(), expected.as_slice());
        plan.set_cycles(1);
        plan.grow_to(1).await;

        let result = plan.run(Duration::from_secs(2)).await;
        assert!(matches!(
            result,
            Reply::Result {
                code: TestCode::Success,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn socket_pool_growth_folds_all_samples() {
        let _server = echo_server(18102).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut plan = TestPlan::new();
        plan.set_target(Ipv4Addr::new(127, 0, 0, 1), 18102);
        plan.set_size(8);
        plan.set_cycles(1);
        plan.grow_to(2).await;
        plan.grow_to(5).await;
        assert_eq!(plan.sockets.len(), 5);

        let result = plan.run(Duration::from_secs(2)).await;
        assert!(matches!(
            result,
            Reply::Result {
                code: TestCode::Success,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn oversized_echo_reply_yields_size_mismatch() {
        // A misbehaving server under test: echoes the sent payload plus
        // extra, unrequested bytes in the same write.
        let listener = TcpListener::bind("127.0.0.1:18104").await.unwrap();
        tokio::spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => {
                        let mut reply = buf[..n].to_vec();
                        reply.extend_from_slice(b"EXTRA");
                        if stream.write_all(&reply).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut plan = TestPlan::new();
        plan.set_target(Ipv4Addr::new(127, 0, 0, 1), 18104);
        plan.set_size(8);
        plan.set_cycles(1);
        plan.grow_to(1).await;

        let result = plan.run(Duration::from_secs(2)).await;
        assert!(matches!(
            result,
            Reply::Result {
                code: TestCode::SizeMismatch,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn connect_refused_surfaces_on_the_next_test() {
        // Nothing is listening on this port.
        let mut plan = TestPlan::new();
        plan.set_target(Ipv4Addr::new(127, 0, 0, 1), 18199);
        plan.set_size(8);
        plan.set_cycles(1);
        plan.grow_to(2).await;
        assert!(plan.ready(), "COUNT is observed even though it failed");

        let result = plan.run(Duration::from_secs(2)).await;
        match result {
            Reply::Result { code, sum_ms, .. } => {
                assert_eq!(code, TestCode::ConnectRefused);
                assert_eq!(sum_ms, 0.0);
            }
            Reply::Err(_) => panic!("expected a RESULT reply"),
        }
    }

    #[tokio::test]
    async fn reply_await_timeout_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:18103").await.unwrap();
        tokio::spawn(async move {
            // Accept and hold the connection open, but never echo anything back.
            let (stream, _) = listener.accept().await.unwrap();
            std::mem::forget(stream);
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut plan = TestPlan::new();
        plan.set_target(Ipv4Addr::new(127, 0, 0, 1), 18103);
        plan.set_size(8);
        plan.set_cycles(1);
        plan.grow_to(1).await;

        let result = plan.run(Duration::from_millis(100)).await;
        assert!(matches!(
            result,
            Reply::Result {
                code: TestCode::AwaitTimeout,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_before_ready_returns_err_and_leaves_plan_unchanged() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let controller = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut reader, mut writer) = control_split(stream);
            writer.write_command(&Cmd::Test).await.unwrap();
            reader.read_reply().await.unwrap()
        });

        let client_stream = TcpStream::connect(addr).await.unwrap();
        let outcome = tokio::spawn(async move {
            run_session(client_stream, Duration::from_secs(1)).await
        });

        let reply = controller.await.unwrap();
        assert_eq!(
            reply,
            echobench_proto::Reply::Err("Not Ready to test".to_string())
        );

        // The controller never sent DONE/KILL; dropping it closes the
        // connection, which the session treats as a clean return.
        let outcome = outcome.await.unwrap().unwrap();
        assert_eq!(outcome, SessionOutcome::Done);
    }

    #[tokio::test]
    async fn kill_command_yields_killed_outcome() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let controller = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (_reader, mut writer) = control_split(stream);
            writer.write_command(&Cmd::Kill).await.unwrap();
        });

        let client_stream = TcpStream::connect(addr).await.unwrap();
        let outcome = run_session(client_stream, Duration::from_secs(1)).await.unwrap();
        controller.await.unwrap();
        assert_eq!(outcome, SessionOutcome::Killed);
    }
}
