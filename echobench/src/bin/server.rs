//! `echo-server`: the multiplexed echo service under test.
//!
//! The worker pool is the tokio runtime's own multi-threaded scheduler,
//! sized by `--threads` rather than left at its CPU-count default, since
//! `--threads` is specified as the count of workers sharing the readiness
//! instance (§4.2).

use clap::Parser;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::util::SubscriberInitExt;

use echobench::config::ServerArgs;
use echobench::server;
use echobench::signal::Shutdown;
use echobench::telemetry;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Telemetry(#[from] telemetry::Error),
    #[error(transparent)]
    Server(#[from] server::Error),
    #[error("failed to build tokio runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .finish()
        .init();

    let args = ServerArgs::parse();
    telemetry::install(args.telemetry_addr)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.threads)
        .enable_all()
        .build()
        .map_err(Error::Runtime)?;

    runtime.block_on(async move {
        let shutdown = Shutdown::new();
        tokio::spawn(shutdown.clone().watch_ctrl_c());
        server::run(args, shutdown.watcher()).await
    })?;
    Ok(())
}
